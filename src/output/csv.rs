//! CSV file sink
//!
//! One CSV file per batch with the normalized columns and the raw payload as
//! a compact JSON string in the last column.

use super::{BackupLayout, Sink, SinkError, SinkResult, SinkTarget, WriteReport};
use crate::Record;
use async_trait::async_trait;
use csv::Writer;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

const DEFAULT_BUFFER_SIZE: usize = 8192; // 8KB buffer

/// CSV row for one record
#[derive(Debug, Serialize)]
struct RecordRow {
    object_type: String,
    external_id: String,
    display_name: String,
    parent_resource_id: String,
    created_at: String,
    updated_at: String,
    payload: String,
}

impl TryFrom<&Record> for RecordRow {
    type Error = SinkError;

    fn try_from(record: &Record) -> Result<Self, Self::Error> {
        Ok(Self {
            object_type: record.object_type.clone(),
            external_id: record.external_id.clone(),
            display_name: record.display_name.clone(),
            parent_resource_id: record
                .parent_resource_id
                .as_ref()
                .map(|rid| rid.to_string())
                .unwrap_or_default(),
            created_at: record.created_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            updated_at: record.updated_at.map(|t| t.to_rfc3339()).unwrap_or_default(),
            payload: serde_json::to_string(&record.payload)
                .map_err(|e| SinkError::Serialization(e.to_string()))?,
        })
    }
}

/// Writes batches as CSV files under a [`BackupLayout`]
#[derive(Debug)]
pub struct CsvSink {
    layout: BackupLayout,
    buffer_size: usize,
}

impl CsvSink {
    /// Create a sink with the default buffer size
    pub fn new(layout: BackupLayout) -> Self {
        Self::new_with_buffer_size(layout, DEFAULT_BUFFER_SIZE)
    }

    /// Create a sink with a custom write buffer size
    pub fn new_with_buffer_size(layout: BackupLayout, buffer_size: usize) -> Self {
        Self { layout, buffer_size }
    }
}

fn write_csv_file(path: &Path, rows: &[RecordRow], buffer_size: usize) -> SinkResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| SinkError::io(path, e))?;
    let mut writer = Writer::from_writer(BufWriter::with_capacity(buffer_size, file));

    // Headers are written by serialize(); an empty batch still gets them.
    if rows.is_empty() {
        writer
            .write_record([
                "object_type",
                "external_id",
                "display_name",
                "parent_resource_id",
                "created_at",
                "updated_at",
                "payload",
            ])
            .map_err(|e| SinkError::io(path, e))?;
    }
    for row in rows {
        writer.serialize(row).map_err(|e| SinkError::io(path, e))?;
    }

    let buf_writer = writer
        .into_inner()
        .map_err(|e| SinkError::io(path, format!("Failed to flush CSV writer: {e}")))?;
    let file = buf_writer
        .into_inner()
        .map_err(|e| SinkError::io(path, format!("Failed to get file handle: {e}")))?;
    file.sync_all().map_err(|e| SinkError::io(path, e))
}

#[async_trait]
impl Sink for CsvSink {
    fn name(&self) -> &str {
        "csv"
    }

    async fn write(&self, records: &[Record], target: &SinkTarget) -> SinkResult<WriteReport> {
        let rows = records
            .iter()
            .map(RecordRow::try_from)
            .collect::<SinkResult<Vec<_>>>()?;
        let path = self.layout.target_path(target, "csv");
        let file_path = path.clone();
        let buffer_size = self.buffer_size;
        tokio::task::spawn_blocking(move || write_csv_file(&file_path, &rows, buffer_size))
            .await
            .map_err(|e| SinkError::io(&path, e))??;

        debug!(target = %target, records = records.len(), path = %path.display(), "CSV batch written");
        Ok(WriteReport {
            records_written: records.len(),
            location: Some(path),
        })
    }
}
