//! JSON file sink
//!
//! One pretty-printed JSON array per batch, plus a `manifest.json` listing
//! every file written once the run finishes.

use super::{BackupLayout, Sink, SinkError, SinkResult, SinkTarget, WriteReport};
use crate::Record;
use async_trait::async_trait;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Serialize)]
struct ManifestEntry {
    target: String,
    path: PathBuf,
    records: usize,
}

/// Writes batches as JSON files under a [`BackupLayout`]
#[derive(Debug)]
pub struct JsonSink {
    layout: BackupLayout,
    written: Mutex<Vec<ManifestEntry>>,
}

impl JsonSink {
    /// Create a sink writing below `layout`
    pub fn new(layout: BackupLayout) -> Self {
        Self {
            layout,
            written: Mutex::new(Vec::new()),
        }
    }

    /// Layout in use
    pub fn layout(&self) -> &BackupLayout {
        &self.layout
    }
}

fn write_json_file<T: Serialize + ?Sized>(path: &Path, value: &T) -> SinkResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| SinkError::io(parent, e))?;
    }
    let file = File::create(path).map_err(|e| SinkError::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)
        .map_err(|e| SinkError::Serialization(e.to_string()))?;
    writer.flush().map_err(|e| SinkError::io(path, e))
}

#[async_trait]
impl Sink for JsonSink {
    fn name(&self) -> &str {
        "json"
    }

    async fn write(&self, records: &[Record], target: &SinkTarget) -> SinkResult<WriteReport> {
        let path = self.layout.target_path(target, "json");
        let batch = records.to_vec();
        let file_path = path.clone();
        tokio::task::spawn_blocking(move || write_json_file(&file_path, &batch))
            .await
            .map_err(|e| SinkError::io(&path, e))??;

        debug!(target = %target, records = records.len(), path = %path.display(), "JSON batch written");
        self.written
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ManifestEntry {
                target: target.to_string(),
                path: path.clone(),
                records: records.len(),
            });

        Ok(WriteReport {
            records_written: records.len(),
            location: Some(path),
        })
    }

    async fn finish(&self) -> SinkResult<()> {
        let mut entries = self.written.lock().unwrap_or_else(|p| p.into_inner()).clone();
        if entries.is_empty() {
            return Ok(());
        }
        entries.sort_by(|a, b| a.path.cmp(&b.path));

        let path = self.layout.run_dir().join(MANIFEST_FILE);
        let manifest_path = path.clone();
        tokio::task::spawn_blocking(move || write_json_file(&manifest_path, &entries))
            .await
            .map_err(|e| SinkError::io(&path, e))??;
        info!(path = %path.display(), "Backup manifest written");
        Ok(())
    }
}
