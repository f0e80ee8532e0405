//! Log-only sink
//!
//! Persists nothing; logs one line per batch. Useful for dry runs and for
//! checking endpoint coverage against a tenant.

use super::{Sink, SinkResult, SinkTarget, WriteReport};
use crate::Record;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Logs batch sizes
#[derive(Debug, Default)]
pub struct LogSink {
    batches: AtomicU64,
    records: AtomicU64,
}

impl LogSink {
    /// Create a log sink
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn write(&self, records: &[Record], target: &SinkTarget) -> SinkResult<WriteReport> {
        self.batches.fetch_add(1, Ordering::Relaxed);
        self.records.fetch_add(records.len() as u64, Ordering::Relaxed);
        info!(
            target = %target,
            records = records.len(),
            "Batch received"
        );
        Ok(WriteReport {
            records_written: records.len(),
            location: None,
        })
    }

    async fn finish(&self) -> SinkResult<()> {
        info!(
            batches = self.batches.load(Ordering::Relaxed),
            records = self.records.load(Ordering::Relaxed),
            "Log sink finished"
        );
        Ok(())
    }
}
