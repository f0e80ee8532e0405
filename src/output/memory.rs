//! In-memory sink
//!
//! Keeps every batch in memory. Used by tests and by library callers that
//! want the records back instead of files.

use super::{Sink, SinkError, SinkResult, SinkTarget, WriteReport};
use crate::Record;
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Collects batches keyed by target
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<(SinkTarget, Vec<Record>)>>,
    failing: HashSet<String>,
    finished: AtomicBool,
}

impl MemorySink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every batch for `endpoint`
    pub fn failing_on(mut self, endpoint: impl Into<String>) -> Self {
        self.failing.insert(endpoint.into());
        self
    }

    /// Batches in write order
    pub fn batches(&self) -> Vec<(SinkTarget, Vec<Record>)> {
        self.batches.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Records written for `endpoint`, across resources, grouped by target
    pub fn records_by_target(&self, endpoint: &str) -> BTreeMap<String, Vec<Record>> {
        self.batches()
            .into_iter()
            .filter(|(target, _)| target.endpoint == endpoint)
            .map(|(target, records)| (target.to_string(), records))
            .collect()
    }

    /// Records of the last batch written for `target`
    pub fn records_for(&self, target: &SinkTarget) -> Option<Vec<Record>> {
        self.batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .rev()
            .find(|(t, _)| t == target)
            .map(|(_, records)| records.clone())
    }

    /// Whether `finish` has been called
    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sink for MemorySink {
    fn name(&self) -> &str {
        "memory"
    }

    async fn write(&self, records: &[Record], target: &SinkTarget) -> SinkResult<WriteReport> {
        if self.failing.contains(&target.endpoint) {
            return Err(SinkError::Rejected {
                target: target.to_string(),
                message: "configured to fail".to_string(),
            });
        }
        self.batches
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push((target.clone(), records.to_vec()));
        Ok(WriteReport {
            records_written: records.len(),
            location: None,
        })
    }

    async fn finish(&self) -> SinkResult<()> {
        self.finished.store(true, Ordering::SeqCst);
        Ok(())
    }
}
