//! Concurrency ceilings
//!
//! Four independent semaphores bound in-flight work: endpoints, resources,
//! detail calls per endpoint and API calls overall. A fetch always takes its
//! local ceiling first and the global API ceiling second, so overlapping
//! ceilings cannot deadlock.

use crate::config::ConcurrencyConfig;
use crate::shutdown::{Cancelled, SharedShutdown};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// The run-wide semaphores
#[derive(Debug, Clone)]
pub struct ConcurrencyLimits {
    endpoints: Arc<Semaphore>,
    resources: Arc<Semaphore>,
    api_calls: Arc<Semaphore>,
    endpoints_per_resource: usize,
    details_per_endpoint: usize,
}

impl ConcurrencyLimits {
    /// Create the semaphores from configuration
    pub fn from_config(config: &ConcurrencyConfig) -> Self {
        Self {
            endpoints: Arc::new(Semaphore::new(config.max_concurrent_endpoints.max(1))),
            resources: Arc::new(Semaphore::new(config.max_concurrent_resources.max(1))),
            api_calls: Arc::new(Semaphore::new(config.max_concurrent_api_calls.max(1))),
            endpoints_per_resource: config.max_concurrent_endpoints.max(1),
            details_per_endpoint: config.max_detail_calls_per_endpoint.max(1),
        }
    }

    /// Endpoints-in-parallel ceiling
    pub fn endpoints(&self) -> &Arc<Semaphore> {
        &self.endpoints
    }

    /// Resources-in-parallel ceiling
    pub fn resources(&self) -> &Arc<Semaphore> {
        &self.resources
    }

    /// Fresh endpoint ceiling for one resource's phase-two fetches
    pub fn resource_endpoints(&self) -> Arc<Semaphore> {
        Arc::new(Semaphore::new(self.endpoints_per_resource))
    }

    /// Free global API slots
    pub fn available_api_slots(&self) -> usize {
        self.api_calls.available_permits()
    }

    /// Scope for list calls: the global API ceiling only
    pub fn list_scope(&self) -> ConcurrencyScope {
        ConcurrencyScope {
            local: None,
            global: Arc::clone(&self.api_calls),
        }
    }

    /// Fresh detail ceiling for one endpoint, nested inside the API ceiling
    pub fn detail_scope(&self) -> ConcurrencyScope {
        ConcurrencyScope {
            local: Some(Arc::new(Semaphore::new(self.details_per_endpoint))),
            global: Arc::clone(&self.api_calls),
        }
    }
}

/// Acquire a permit from `semaphore` unless the run is cancelled first
pub async fn acquire_or_cancel(
    semaphore: &Arc<Semaphore>,
    shutdown: &SharedShutdown,
) -> Result<OwnedSemaphorePermit, Cancelled> {
    let permit = shutdown
        .run_until_shutdown(Arc::clone(semaphore).acquire_owned())
        .await?;
    // The semaphores are never closed.
    permit.map_err(|_| Cancelled(crate::shutdown::ShutdownReason::Interrupted))
}

/// Local ceiling (optional) plus the global API ceiling
#[derive(Debug, Clone)]
pub struct ConcurrencyScope {
    local: Option<Arc<Semaphore>>,
    global: Arc<Semaphore>,
}

impl ConcurrencyScope {
    /// Scope with an explicit local semaphore
    pub fn new(local: Option<Arc<Semaphore>>, global: Arc<Semaphore>) -> Self {
        Self { local, global }
    }

    /// Acquire local then global; both are released when the slot drops
    pub async fn acquire(&self, shutdown: &SharedShutdown) -> Result<ConcurrencySlot, Cancelled> {
        let local = match &self.local {
            Some(local) => Some(acquire_or_cancel(local, shutdown).await?),
            None => None,
        };
        let global = acquire_or_cancel(&self.global, shutdown).await?;
        Ok(ConcurrencySlot {
            _local: local,
            _global: global,
        })
    }
}

/// Held for exactly one HTTP attempt
#[derive(Debug)]
pub struct ConcurrencySlot {
    _local: Option<OwnedSemaphorePermit>,
    _global: OwnedSemaphorePermit,
}
