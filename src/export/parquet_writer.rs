//! Parquet I/O for dataset frame tables.

use std::path::Path;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::ExportError;

fn writer_properties() -> WriterProperties {
    WriterProperties::builder()
        .set_compression(Compression::ZSTD(Default::default()))
        .build()
}

/// Write one frame table to a Parquet file on disk.
pub fn write_parquet(batch: &RecordBatch, output_path: &Path) -> Result<(), ExportError> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| ExportError::Io(e, parent.to_path_buf()))?;
    }

    let file = std::fs::File::create(output_path)
        .map_err(|e| ExportError::Io(e, output_path.to_path_buf()))?;

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_properties()))?;
    writer.write(batch)?;
    writer.close()?;

    tracing::debug!(
        path = %output_path.display(),
        rows = batch.num_rows(),
        "Parquet file written"
    );

    Ok(())
}

/// Read a whole frame table back as a single batch.
pub fn read_parquet(input_path: &Path) -> Result<RecordBatch, ExportError> {
    let file = std::fs::File::open(input_path)
        .map_err(|e| ExportError::Io(e, input_path.to_path_buf()))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let schema = builder.schema().clone();
    let reader = builder.build()?;

    let batches = reader.collect::<Result<Vec<_>, _>>()?;
    let batch = concat_batches(&schema, &batches)?;

    tracing::debug!(
        path = %input_path.display(),
        rows = batch.num_rows(),
        "Parquet file loaded"
    );

    Ok(batch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::columns::{vector_field, VectorColumn, VectorShape};
    use arrow::array::{Array, Int64Array};
    use arrow::datatypes::{DataType, Field, Schema};
    use std::sync::Arc;

    fn make_batch() -> RecordBatch {
        let shape = VectorShape::Flat(2);
        let mut state = VectorColumn::new(shape);
        state.push_vector("s", Some(&[1.0, 2.0][..])).unwrap();
        state.push_vector("s", None).unwrap();

        let schema = Arc::new(Schema::new(vec![
            Field::new("frame_index", DataType::Int64, false),
            vector_field("observation.state.main_executed", shape),
        ]));
        RecordBatch::try_new(
            schema,
            vec![Arc::new(Int64Array::from(vec![0, 1])), state.finish().unwrap()],
        )
        .unwrap()
    }

    #[test]
    fn test_write_and_read_parquet() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("data/chunk-000/episode_000000.parquet");

        write_parquet(&make_batch(), &path).unwrap();
        assert!(path.exists());

        let loaded = read_parquet(&path).unwrap();
        assert_eq!(loaded.num_rows(), 2);
        let state = loaded
            .column_by_name("observation.state.main_executed")
            .unwrap();
        assert_eq!(state.null_count(), 1);
        assert_eq!(
            VectorShape::from_data_type(state.data_type()),
            Some(VectorShape::Flat(2))
        );
    }
}
