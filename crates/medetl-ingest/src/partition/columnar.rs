//! Parquet encoding of canonical records
//!
//! One row per record. The payload is stored as its plain JSON rendering
//! so downstream readers do not need the canonical type tags.

use std::sync::Arc;

use arrow::array::{
    Array as _, ArrayRef, Date32Array, StringArray, TimestampMillisecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::NaiveDate;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::format::KeyValue;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::models::CanonicalRecord;

pub const META_SCHEMA_VERSION: &str = "medetl.schema_version";
pub const META_RUN_ID: &str = "medetl.run_id";
pub const META_CHECKSUM: &str = "medetl.checksum";

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Arrow schema of published data files
pub fn partition_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("record_id", DataType::Utf8, false),
        Field::new("source", DataType::Utf8, false),
        Field::new("event_date", DataType::Date32, false),
        Field::new("payload", DataType::Utf8, false),
        Field::new("provenance_source_id", DataType::Utf8, false),
        Field::new("provenance_cursor", DataType::Utf8, true),
        Field::new(
            "fetched_at",
            DataType::Timestamp(TimeUnit::Millisecond, Some("UTC".into())),
            false,
        ),
    ]))
}

fn writer_properties(schema_version: u32, run_id: Uuid, checksum: &str) -> WriterProperties {
    let metadata = vec![
        KeyValue {
            key: META_SCHEMA_VERSION.to_string(),
            value: Some(schema_version.to_string()),
        },
        KeyValue {
            key: META_RUN_ID.to_string(),
            value: Some(run_id.to_string()),
        },
        KeyValue {
            key: META_CHECKSUM.to_string(),
            value: Some(checksum.to_string()),
        },
    ];

    WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .set_key_value_metadata(Some(metadata))
        .build()
}

/// Encode records into a single-row-group Parquet file
pub fn encode_records(
    records: &[CanonicalRecord],
    schema_version: u32,
    run_id: Uuid,
    checksum: &str,
) -> Result<Bytes> {
    let schema = partition_schema();

    let payloads = records
        .iter()
        .map(|r| serde_json::to_string(&r.payload_json()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.record_id.as_str()))),
        Arc::new(StringArray::from_iter_values(records.iter().map(|r| r.source.as_str()))),
        Arc::new(Date32Array::from_iter_values(
            records
                .iter()
                .map(|r| (r.event_date - epoch()).num_days() as i32),
        )),
        Arc::new(StringArray::from_iter_values(payloads.iter().map(String::as_str))),
        Arc::new(StringArray::from_iter_values(
            records.iter().map(|r| r.provenance.source_id.as_str()),
        )),
        Arc::new(StringArray::from(
            records
                .iter()
                .map(|r| r.provenance.page_cursor.as_deref())
                .collect::<Vec<_>>(),
        )),
        Arc::new(
            TimestampMillisecondArray::from_iter_values(
                records.iter().map(|r| r.provenance.fetched_at.timestamp_millis()),
            )
            .with_timezone("UTC"),
        ),
    ];

    let batch = RecordBatch::try_new(schema.clone(), columns)?;

    let mut buffer = Vec::new();
    let mut writer = ArrowWriter::try_new(
        &mut buffer,
        schema,
        Some(writer_properties(schema_version, run_id, checksum)),
    )?;
    writer.write(&batch)?;
    writer.close()?;

    Ok(Bytes::from(buffer))
}

/// A decoded data-file row, as a downstream consumer sees it
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionRow {
    pub record_id: String,
    pub source: String,
    pub event_date: NaiveDate,
    pub payload: serde_json::Value,
    pub provenance_cursor: Option<String>,
}

/// Decoded data file plus its key/value metadata
#[derive(Debug, Clone)]
pub struct DecodedPartition {
    pub rows: Vec<PartitionRow>,
    pub schema_version: Option<u32>,
    pub run_id: Option<String>,
    pub checksum: Option<String>,
}

fn col_string<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray> {
    let idx = batch.schema().index_of(name)?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| PipelineError::Storage(format!("column '{}' is not Utf8", name)))
}

fn col_date<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a Date32Array> {
    let idx = batch.schema().index_of(name)?;
    batch
        .column(idx)
        .as_any()
        .downcast_ref::<Date32Array>()
        .ok_or_else(|| PipelineError::Storage(format!("column '{}' is not Date32", name)))
}

/// Decode a data file written by [`encode_records`]
pub fn decode_records(data: Bytes) -> Result<DecodedPartition> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(data)?;

    let kv = builder
        .metadata()
        .file_metadata()
        .key_value_metadata()
        .cloned()
        .unwrap_or_default();
    let lookup = |key: &str| {
        kv.iter()
            .find(|entry| entry.key == key)
            .and_then(|entry| entry.value.clone())
    };
    let schema_version = lookup(META_SCHEMA_VERSION).and_then(|v| v.parse().ok());
    let run_id = lookup(META_RUN_ID);
    let checksum = lookup(META_CHECKSUM);

    let reader = builder.build()?;
    let mut rows = Vec::new();

    for batch in reader {
        let batch = batch?;
        let record_ids = col_string(&batch, "record_id")?;
        let sources = col_string(&batch, "source")?;
        let dates = col_date(&batch, "event_date")?;
        let payloads = col_string(&batch, "payload")?;
        let cursors = col_string(&batch, "provenance_cursor")?;

        for i in 0..batch.num_rows() {
            let event_date = epoch() + chrono::Duration::days(i64::from(dates.value(i)));
            rows.push(PartitionRow {
                record_id: record_ids.value(i).to_string(),
                source: sources.value(i).to_string(),
                event_date,
                payload: serde_json::from_str(payloads.value(i))?,
                provenance_cursor: (!cursors.is_null(i)).then(|| cursors.value(i).to_string()),
            });
        }
    }

    Ok(DecodedPartition {
        rows,
        schema_version,
        run_id,
        checksum,
    })
}
