//! Bounded fetcher
//!
//! Turns an [`EndpointSpec`] into concrete [`FetchTask`]s and executes them
//! against the governance API. Every HTTP attempt holds a concurrency slot,
//! a rate token and a valid auth token; list fetches follow continuation
//! cursors in order until exhausted or the page cap is hit.

use crate::backup::summary::FailureKind;
use crate::config::{EndpointSpec, PaginationStyle, ITEM_ID_PLACEHOLDER, RESOURCE_ID_PLACEHOLDER};
use crate::shutdown::ShutdownReason;
use crate::ResourceId;
use reqwest::Method;
use serde_json::Value;
use std::time::Duration;
use url::Url;

pub mod auth;
pub mod http;
pub mod pagination;
pub mod retry_formatter;

pub use auth::{AuthError, TokenProvider};
pub use http::IgaHttpClient;
pub use pagination::{PaginatedItems, Truncation};

use crate::backup::limits::ConcurrencyScope;

/// Query parameter carrying the continuation cursor
pub const CURSOR_PARAM: &str = "after";

/// Fetcher errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FetcherError {
    /// Credentials rejected even after a token refresh
    #[error("authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Rate budget wait would pass the run deadline
    #[error("rate budget wait of {wait:?} exceeds the run deadline")]
    RateTimeout {
        /// Wait that would have been needed
        wait: Duration,
        /// Retries spent before the timeout
        retries: u32,
    },

    /// Retries exhausted on network errors, 5xx or 429
    #[error("transient failure after {retries} retries: {message}")]
    Transient {
        /// Last error
        message: String,
        /// Retries spent
        retries: u32,
    },

    /// Non-retryable client error
    #[error("HTTP {status}: {message}")]
    Permanent {
        /// Status code
        status: u16,
        /// Response body excerpt
        message: String,
        /// Retries spent before this response
        retries: u32,
    },

    /// Resource endpoint issued without a resource ID
    #[error("endpoint {endpoint} requires a resource ID")]
    MissingResourceId {
        /// Endpoint name
        endpoint: String,
    },

    /// Response body could not be interpreted
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Run cancelled before the request finished
    #[error("cancelled: {0}")]
    Cancelled(ShutdownReason),
}

/// Result type for fetcher operations
pub type FetcherResult<T> = Result<T, FetcherError>;

impl FetcherError {
    /// Retries spent before the failure surfaced
    pub fn retries(&self) -> u32 {
        match self {
            FetcherError::RateTimeout { retries, .. }
            | FetcherError::Transient { retries, .. }
            | FetcherError::Permanent { retries, .. } => *retries,
            _ => 0,
        }
    }

    /// Summary category for this error
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            FetcherError::Auth(_) => FailureKind::Auth,
            FetcherError::RateTimeout { .. } => FailureKind::RateTimeout,
            FetcherError::Transient { .. } => FailureKind::TransientFetch,
            FetcherError::Permanent { .. } => FailureKind::PermanentFetch,
            FetcherError::MissingResourceId { .. } => FailureKind::MissingResourceId,
            FetcherError::InvalidResponse(_) => FailureKind::InvalidResponse,
            FetcherError::Cancelled(_) => FailureKind::Cancelled,
        }
    }

    /// Errors that must stop the whole run
    pub fn is_fatal(&self) -> bool {
        matches!(self, FetcherError::Auth(_) | FetcherError::Cancelled(_))
    }
}

/// Expected response shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// Collection, possibly paginated
    List,
    /// Single object
    Object,
}

/// One unit of fetch work with its path and query fully resolved
#[derive(Debug, Clone, PartialEq)]
pub struct FetchTask {
    /// Endpoint name
    pub endpoint: String,
    /// HTTP method
    pub method: Method,
    /// Resolved path
    pub path: String,
    /// Query parameters, cursor excluded
    pub query: Vec<(String, String)>,
    /// Expected response shape
    pub shape: ResponseShape,
    /// Pagination style for list fetches
    pub pagination: PaginationStyle,
    /// Resource context
    pub resource_id: Option<ResourceId>,
    /// Item ID for detail fetches
    pub item_id: Option<String>,
}

impl FetchTask {
    /// List task for `spec`; resource endpoints need `resource_id`
    pub fn list(
        spec: &EndpointSpec,
        resource_id: Option<&ResourceId>,
        page_size: u32,
    ) -> FetcherResult<Self> {
        let substitute = |template: &str, encode: fn(&str) -> String| -> FetcherResult<String> {
            match (template.contains(RESOURCE_ID_PLACEHOLDER), resource_id) {
                (false, _) => Ok(template.to_string()),
                (true, Some(rid)) => {
                    Ok(template.replace(RESOURCE_ID_PLACEHOLDER, &encode(rid.as_str())))
                }
                (true, None) => Err(FetcherError::MissingResourceId {
                    endpoint: spec.name.clone(),
                }),
            }
        };

        if spec.requires_resource_id() && resource_id.is_none() {
            return Err(FetcherError::MissingResourceId {
                endpoint: spec.name.clone(),
            });
        }

        let path = substitute(&spec.path, encode_path_segment)?;
        let mut query = Vec::new();
        if let Some(filter) = &spec.filter {
            query.push(("filter".to_string(), substitute(filter, escape_filter_literal)?));
        }
        if spec.pagination.is_paginated() {
            query.push(("limit".to_string(), page_size.to_string()));
        }

        Ok(Self {
            endpoint: spec.name.clone(),
            method: Method::GET,
            path,
            query,
            shape: ResponseShape::List,
            pagination: spec.pagination.clone(),
            resource_id: resource_id.cloned(),
            item_id: None,
        })
    }

    /// Detail task for one list item, when the endpoint has a detail template
    pub fn detail(
        spec: &EndpointSpec,
        item_id: &str,
        resource_id: Option<&ResourceId>,
    ) -> Option<Self> {
        let template = spec.detail_template()?;
        let mut path = template.replace(ITEM_ID_PLACEHOLDER, &encode_path_segment(item_id));
        if let Some(rid) = resource_id {
            path = path.replace(RESOURCE_ID_PLACEHOLDER, &encode_path_segment(rid.as_str()));
        }
        Some(Self {
            endpoint: spec.name.clone(),
            method: Method::GET,
            path,
            query: Vec::new(),
            shape: ResponseShape::Object,
            pagination: PaginationStyle::None,
            resource_id: resource_id.cloned(),
            item_id: Some(item_id.to_string()),
        })
    }
}

/// Percent-encode `value` as a single path segment
fn encode_path_segment(value: &str) -> String {
    match value {
        "." => return "%2E".to_string(),
        ".." => return "%2E%2E".to_string(),
        _ => {}
    }
    let Ok(mut url) = Url::parse("http://segment.invalid/") else {
        return value.to_string();
    };
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.clear().push(value);
    }
    url.path().trim_start_matches('/').to_string()
}

/// Escape `value` for use inside a double-quoted filter string literal
fn escape_filter_literal(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// One page of a list response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    /// Items in source order
    pub items: Vec<Value>,
    /// Continuation cursor, if another page exists
    pub cursor: Option<String>,
}

impl RawPage {
    /// Interpret a list body
    ///
    /// Accepts a JSON array, an object wrapping `items` or `value`, or a single
    /// object (treated as a one-item list). `link_cursor` comes from the
    /// `Link` header and is used for [`PaginationStyle::LinkHeader`].
    pub fn from_body(
        body: Value,
        style: &PaginationStyle,
        link_cursor: Option<String>,
    ) -> FetcherResult<Self> {
        let body_cursor = match style {
            PaginationStyle::BodyCursor { field } => body
                .get(field)
                .and_then(Value::as_str)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            _ => None,
        };
        let cursor = match style {
            PaginationStyle::None => None,
            PaginationStyle::LinkHeader => link_cursor,
            PaginationStyle::BodyCursor { .. } => body_cursor,
        };

        let items = match body {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            Value::Object(mut map) => match ["items", "value"]
                .iter()
                .find(|key| map.get(**key).is_some_and(Value::is_array))
            {
                Some(key) => match map.remove(*key) {
                    Some(Value::Array(items)) => items,
                    _ => Vec::new(),
                },
                None => vec![Value::Object(map)],
            },
            other => {
                return Err(FetcherError::InvalidResponse(format!(
                    "expected a JSON array or object, got {other}"
                )))
            }
        };

        Ok(Self { items, cursor })
    }
}

/// Request counters for one logical fetch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestStats {
    /// HTTP attempts issued
    pub requests: u64,
    /// Retries spent
    pub retries: u64,
}

impl RequestStats {
    /// Add another fetch's counters
    pub fn add(&mut self, other: RequestStats) {
        self.requests += other.requests;
        self.retries += other.retries;
    }
}

/// Result of a detail fetch
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedObject {
    /// Response body
    pub value: Value,
    /// Request counters
    pub stats: RequestStats,
}

/// Executes [`FetchTask`]s with pagination bounded by `max_pages`
pub struct BoundedFetcher {
    http: IgaHttpClient,
    max_pages: usize,
}

impl BoundedFetcher {
    /// Create a fetcher
    pub fn new(http: IgaHttpClient, max_pages: usize) -> Self {
        Self {
            http,
            max_pages: max_pages.max(1),
        }
    }

    /// Underlying HTTP client
    pub fn http(&self) -> &IgaHttpClient {
        &self.http
    }

    /// Fetch every page of a list task, in cursor order
    ///
    /// The slot from `scope` is taken per HTTP attempt and released between
    /// pages.
    pub async fn fetch_list(
        &self,
        task: &FetchTask,
        scope: &ConcurrencyScope,
    ) -> FetcherResult<PaginatedItems> {
        pagination::paginate(&task.endpoint, self.max_pages, |cursor| async move {
            let response = self.http.get(task, cursor.as_deref(), scope).await?;
            let page = RawPage::from_body(response.body, &task.pagination, response.link_cursor)?;
            Ok((page, response.stats))
        })
        .await
    }

    /// Fetch a single object
    pub async fn fetch_object(
        &self,
        task: &FetchTask,
        scope: &ConcurrencyScope,
    ) -> FetcherResult<FetchedObject> {
        let response = self.http.get(task, None, scope).await?;
        Ok(FetchedObject {
            value: response.body,
            stats: response.stats,
        })
    }
}
