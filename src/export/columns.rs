//! Arrow column helpers for vector features.
//!
//! State and action features are stored as nullable fixed-size lists of
//! float32. A chunked action is a fixed-size list of such lists. Values are
//! kept flat (row-major) while building and reading.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, AsArray, FixedSizeListArray, Float32Array};
use arrow::buffer::NullBuffer;
use arrow::compute::cast;
use arrow::datatypes::{DataType, Field, FieldRef, Float32Type};

use crate::error::ExportError;

/// Shape of one vector feature cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorShape {
    /// `(d,)`
    Flat(usize),
    /// `(chunk, d)`
    Chunked(usize, usize),
}

impl VectorShape {
    /// Number of scalars in one cell.
    pub fn len(&self) -> usize {
        match *self {
            VectorShape::Flat(d) => d,
            VectorShape::Chunked(c, d) => c * d,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width of the innermost vector.
    pub fn inner_dim(&self) -> usize {
        match *self {
            VectorShape::Flat(d) | VectorShape::Chunked(_, d) => d,
        }
    }

    pub fn with_inner_dim(&self, dim: usize) -> Self {
        match *self {
            VectorShape::Flat(_) => VectorShape::Flat(dim),
            VectorShape::Chunked(c, _) => VectorShape::Chunked(c, dim),
        }
    }

    /// Shape as written to `meta/info.json`.
    pub fn dims(&self) -> Vec<usize> {
        match *self {
            VectorShape::Flat(d) => vec![d],
            VectorShape::Chunked(c, d) => vec![c, d],
        }
    }

    pub fn data_type(&self) -> DataType {
        match *self {
            VectorShape::Flat(d) => DataType::FixedSizeList(item_field(), d as i32),
            VectorShape::Chunked(c, d) => DataType::FixedSizeList(
                Arc::new(Field::new("item", VectorShape::Flat(d).data_type(), true)),
                c as i32,
            ),
        }
    }

    /// Recognises the column types produced by [`VectorColumn`].
    pub fn from_data_type(data_type: &DataType) -> Option<Self> {
        let DataType::FixedSizeList(item, outer) = data_type else {
            return None;
        };
        match item.data_type() {
            DataType::Float32 | DataType::Float64 => Some(VectorShape::Flat(*outer as usize)),
            DataType::FixedSizeList(leaf, inner)
                if matches!(leaf.data_type(), DataType::Float32 | DataType::Float64) =>
            {
                Some(VectorShape::Chunked(*outer as usize, *inner as usize))
            }
            _ => None,
        }
    }
}

fn item_field() -> FieldRef {
    Arc::new(Field::new("item", DataType::Float32, true))
}

/// Schema field for a vector feature column.
pub fn vector_field(name: &str, shape: VectorShape) -> Field {
    Field::new(name, shape.data_type(), true)
}

/// Builder for one vector feature column.
#[derive(Debug, Clone)]
pub struct VectorColumn {
    shape: VectorShape,
    values: Vec<f32>,
    validity: Vec<bool>,
}

impl VectorColumn {
    pub fn new(shape: VectorShape) -> Self {
        Self {
            shape,
            values: Vec::new(),
            validity: Vec::new(),
        }
    }

    pub fn with_capacity(shape: VectorShape, rows: usize) -> Self {
        Self {
            shape,
            values: Vec::with_capacity(rows * shape.len()),
            validity: Vec::with_capacity(rows),
        }
    }

    pub fn shape(&self) -> VectorShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.validity.len()
    }

    pub fn is_empty(&self) -> bool {
        self.validity.is_empty()
    }

    /// Appends one cell given as flat row-major values.
    pub fn push_flat(&mut self, column: &str, cell: Option<&[f32]>) -> Result<(), ExportError> {
        match cell {
            Some(values) => {
                if values.len() != self.shape.len() {
                    return Err(ExportError::InvalidColumn {
                        column: column.to_string(),
                        reason: format!(
                            "expected {} values for shape {:?}, got {}",
                            self.shape.len(),
                            self.shape.dims(),
                            values.len()
                        ),
                    });
                }
                self.values.extend_from_slice(values);
                self.validity.push(true);
            }
            None => self.push_null(),
        }
        Ok(())
    }

    /// Appends a `(d,)` cell.
    pub fn push_vector(&mut self, column: &str, cell: Option<&[f64]>) -> Result<(), ExportError> {
        let flat: Option<Vec<f32>> = cell.map(|v| v.iter().map(|&x| x as f32).collect());
        self.push_flat(column, flat.as_deref())
    }

    /// Appends a `(chunk, d)` cell.
    pub fn push_chunk(&mut self, column: &str, cell: Option<&[Vec<f64>]>) -> Result<(), ExportError> {
        if let (Some(rows), VectorShape::Chunked(_, d)) = (cell, self.shape) {
            if let Some(bad) = rows.iter().find(|r| r.len() != d) {
                return Err(ExportError::InvalidColumn {
                    column: column.to_string(),
                    reason: format!("chunk entry has width {}, expected {}", bad.len(), d),
                });
            }
        }
        let flat: Option<Vec<f32>> =
            cell.map(|rows| rows.iter().flatten().map(|&x| x as f32).collect());
        self.push_flat(column, flat.as_deref())
    }

    pub fn push_null(&mut self) {
        self.values
            .extend(std::iter::repeat(0.0).take(self.shape.len()));
        self.validity.push(false);
    }

    pub fn finish(self) -> Result<ArrayRef, ExportError> {
        let nulls = NullBuffer::from(self.validity);
        let values: ArrayRef = Arc::new(Float32Array::from(self.values));

        let array = match self.shape {
            VectorShape::Flat(d) => FixedSizeListArray::try_new(item_field(), d as i32, values, Some(nulls))?,
            VectorShape::Chunked(c, d) => {
                let inner = FixedSizeListArray::try_new(item_field(), d as i32, values, None)?;
                let inner_field = Arc::new(Field::new("item", inner.data_type().clone(), true));
                FixedSizeListArray::try_new(inner_field, c as i32, Arc::new(inner), Some(nulls))?
            }
        };
        Ok(Arc::new(array))
    }
}

/// Decodes a vector column into flat row-major cells; null rows are `None`.
pub fn read_vectors(
    name: &str,
    array: &ArrayRef,
) -> Result<(VectorShape, Vec<Option<Vec<f32>>>), ExportError> {
    let shape = VectorShape::from_data_type(array.data_type()).ok_or_else(|| {
        ExportError::InvalidColumn {
            column: name.to_string(),
            reason: format!("not a vector column: {}", array.data_type()),
        }
    })?;

    let list = array.as_fixed_size_list();
    let mut rows = Vec::with_capacity(list.len());
    for i in 0..list.len() {
        if list.is_null(i) {
            rows.push(None);
            continue;
        }
        let cell = list.value(i);
        let flat = match shape {
            VectorShape::Flat(_) => leaf_values(&cell)?,
            VectorShape::Chunked(c, _) => {
                let inner = cell.as_fixed_size_list();
                let mut flat = Vec::with_capacity(shape.len());
                for j in 0..c {
                    flat.extend(leaf_values(&inner.value(j))?);
                }
                flat
            }
        };
        rows.push(Some(flat));
    }

    Ok((shape, rows))
}

fn leaf_values(array: &ArrayRef) -> Result<Vec<f32>, ExportError> {
    let values = cast(array, &DataType::Float32)?;
    Ok(values.as_primitive::<Float32Type>().values().to_vec())
}

/// Zero-pads every innermost vector of a flat cell from `from` to `to`.
///
/// Never truncates: `to` must be at least the current inner width.
pub fn pad_cell(cell: &[f32], from: VectorShape, to: VectorShape) -> Vec<f32> {
    let (d, target) = (from.inner_dim(), to.inner_dim());
    if d == target || d == 0 {
        let mut out = cell.to_vec();
        out.resize(to.len(), 0.0);
        return out;
    }

    let mut out = Vec::with_capacity(to.len());
    for inner in cell.chunks(d) {
        out.extend_from_slice(inner);
        out.extend(std::iter::repeat(0.0).take(target - d));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flat_column_roundtrip_with_nulls() {
        let shape = VectorShape::Flat(3);
        let mut col = VectorColumn::new(shape);
        col.push_vector("s", Some(&[1.0, 2.0, 3.0][..])).unwrap();
        col.push_vector("s", None).unwrap();
        col.push_vector("s", Some(&[4.0, 5.0, 6.0][..])).unwrap();
        assert_eq!(col.len(), 3);

        let array = col.finish().unwrap();
        assert_eq!(array.null_count(), 1);
        assert_eq!(array.data_type(), &shape.data_type());

        let (read_shape, rows) = read_vectors("s", &array).unwrap();
        assert_eq!(read_shape, shape);
        assert_eq!(rows[0], Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(rows[1], None);
        assert_eq!(rows[2], Some(vec![4.0, 5.0, 6.0]));
    }

    #[test]
    fn test_chunked_column() {
        let shape = VectorShape::Chunked(2, 2);
        let mut col = VectorColumn::new(shape);
        col.push_chunk("a", Some(&[vec![1.0, 2.0], vec![3.0, 4.0]][..])).unwrap();
        col.push_chunk("a", None).unwrap();

        let array = col.finish().unwrap();
        assert_eq!(VectorShape::from_data_type(array.data_type()), Some(shape));

        let (_, rows) = read_vectors("a", &array).unwrap();
        assert_eq!(rows[0], Some(vec![1.0, 2.0, 3.0, 4.0]));
        assert_eq!(rows[1], None);
    }

    #[test]
    fn test_width_mismatch_is_rejected() {
        let mut col = VectorColumn::new(VectorShape::Flat(2));
        assert!(col.push_vector("s", Some(&[1.0][..])).is_err());

        let mut col = VectorColumn::new(VectorShape::Chunked(2, 2));
        assert!(col.push_chunk("a", Some(&[vec![1.0], vec![2.0, 3.0]][..])).is_err());
    }

    #[test]
    fn test_pad_cell() {
        let padded = pad_cell(&[1.0, 2.0], VectorShape::Flat(2), VectorShape::Flat(4));
        assert_eq!(padded, vec![1.0, 2.0, 0.0, 0.0]);

        let padded = pad_cell(
            &[1.0, 2.0, 3.0, 4.0],
            VectorShape::Chunked(2, 2),
            VectorShape::Chunked(2, 3),
        );
        assert_eq!(padded, vec![1.0, 2.0, 0.0, 3.0, 4.0, 0.0]);
    }

    #[test]
    fn test_shape_dims() {
        assert_eq!(VectorShape::Flat(7).dims(), vec![7]);
        assert_eq!(VectorShape::Chunked(10, 7).dims(), vec![10, 7]);
        assert_eq!(VectorShape::Chunked(10, 7).with_inner_dim(14), VectorShape::Chunked(10, 14));
        assert_eq!(VectorShape::from_data_type(&DataType::Int64), None);
    }
}
