//! Parquet implementation of `TableEngine`.

use crate::engine::{
    accumulate_stats, finish_stats, BatchIter, EngineError, PartMetadata, PartStats, PartWriteOptions, TableEngine,
    META_RUN_ID, META_SCHEMA_VERSION, META_TABLE_NAME,
};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use std::fs::File;
use std::path::Path;

#[derive(Debug, Clone, Copy, Default)]
pub struct ParquetEngine;

fn writer_props(opts: &PartWriteOptions) -> WriterProperties {
    let kv = opts
        .metadata
        .iter()
        .map(|(k, v)| KeyValue {
            key: k.clone(),
            value: Some(v.clone()),
        })
        .collect::<Vec<_>>();
    WriterProperties::builder()
        .set_compression(opts.compression.to_parquet())
        .set_max_row_group_size(opts.row_group_size.max(1))
        .set_dictionary_enabled(true)
        .set_data_page_size_limit(128 * 1024)
        .set_key_value_metadata(Some(kv))
        .build()
}

impl TableEngine for ParquetEngine {
    fn extension(&self) -> &'static str {
        "parquet"
    }

    fn write_part(&self, path: &Path, batch: &RecordBatch, opts: &PartWriteOptions) -> Result<(), EngineError> {
        let file = File::create(path)?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(writer_props(opts)))?;
        writer.write(batch)?;
        writer.close()?;
        Ok(())
    }

    fn open_part(&self, path: &Path) -> Result<BatchIter, EngineError> {
        let file = File::open(path)?;
        let reader = ParquetRecordBatchReaderBuilder::try_new(file)?.build()?;
        Ok(Box::new(reader.map(|b| b.map_err(EngineError::from))))
    }

    fn part_stats(&self, path: &Path, tick_column: &str) -> Result<PartStats, EngineError> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        // Project the tick column only; the rest of the row is irrelevant here.
        let idx = builder.schema().index_of(tick_column)?;
        let mask = parquet::arrow::ProjectionMask::roots(builder.parquet_schema(), [idx]);
        let reader = builder.with_projection(mask).build()?;

        let mut acc = None;
        for batch in reader {
            accumulate_stats(&mut acc, &batch?, tick_column)?;
        }
        Ok(finish_stats(acc))
    }

    fn read_metadata(&self, path: &Path) -> Result<PartMetadata, EngineError> {
        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let fm = builder.metadata().file_metadata();
        let lookup = |key: &str| {
            fm.key_value_metadata()
                .and_then(|kvs| kvs.iter().find(|kv| kv.key == key))
                .and_then(|kv| kv.value.clone())
        };
        Ok(PartMetadata {
            schema_version: lookup(META_SCHEMA_VERSION),
            table_name: lookup(META_TABLE_NAME),
            run_id: lookup(META_RUN_ID),
            num_rows: fm.num_rows(),
        })
    }
}
