//! Run configuration
//!
//! [`BackupConfig`] is loaded once at start-up from a JSON file, optionally
//! overridden from the environment, validated, and then treated as read-only
//! for the lifetime of the run. Every section has defaults so a minimal file
//! only needs the tenant and credentials.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub mod endpoints;

pub use endpoints::{
    DisplayNameRule, EnabledEndpoints, EndpointCatalog, EndpointSpec, EndpointToggles,
    PaginationStyle, RecordFields, ITEM_ID_PLACEHOLDER, RESOURCE_ID_PLACEHOLDER,
};

use crate::backup::discovery::ResourceIdRule;

/// Environment variable overriding the tenant domain
pub const ENV_DOMAIN: &str = "OKTA_DOMAIN";
/// Environment variable overriding the SSWS API token
pub const ENV_API_TOKEN: &str = "OKTA_API_TOKEN";
/// Environment variable overriding the OAuth client ID
pub const ENV_CLIENT_ID: &str = "OKTA_CLIENT_ID";
/// Environment variable overriding the OAuth client secret
pub const ENV_CLIENT_SECRET: &str = "OKTA_CLIENT_SECRET";

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("failed to read config file {path}: {message}")]
    FileRead {
        /// Path that failed
        path: PathBuf,
        /// Underlying error
        message: String,
    },

    /// Configuration could not be parsed
    #[error("failed to parse configuration: {0}")]
    Parse(String),

    /// Configuration is structurally valid but semantically wrong
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// Endpoint enablement refers to an endpoint that does not exist
    #[error("unknown {kind} endpoint in enablement file: {name}")]
    UnknownEndpoint {
        /// "global" or "resource"
        kind: String,
        /// Offending name
        name: String,
    },
}

/// Main backup configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackupConfig {
    /// Tenant addressing
    #[serde(default)]
    pub tenant: TenantConfig,

    /// Credentials
    #[serde(default)]
    pub auth: AuthConfig,

    /// Concurrency ceilings
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,

    /// Request-rate budget
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Retry and backoff
    #[serde(default)]
    pub retry: RetryConfig,

    /// HTTP transport
    #[serde(default)]
    pub http: HttpConfig,

    /// Pagination
    #[serde(default)]
    pub pagination: PaginationConfig,

    /// Run-wide limits
    #[serde(default)]
    pub run: RunConfig,

    /// Sink selection
    #[serde(default)]
    pub output: OutputConfig,

    /// Resource-ID extraction rules applied to phase-one records
    #[serde(default = "default_discovery_rules")]
    pub discovery: Vec<ResourceIdRule>,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            tenant: TenantConfig::default(),
            auth: AuthConfig::default(),
            concurrency: ConcurrencyConfig::default(),
            rate_limit: RateLimitConfig::default(),
            retry: RetryConfig::default(),
            http: HttpConfig::default(),
            pagination: PaginationConfig::default(),
            run: RunConfig::default(),
            output: OutputConfig::default(),
            discovery: default_discovery_rules(),
        }
    }
}

impl BackupConfig {
    /// Load configuration from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `OKTA_*` environment overrides
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup (environment in production)
    pub fn with_overrides_from<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(domain) = non_empty(ENV_DOMAIN) {
            self.tenant.base_url = domain;
        }
        if let Some(token) = non_empty(ENV_API_TOKEN) {
            self.auth.api_token = Some(token);
        }
        if let Some(client_id) = non_empty(ENV_CLIENT_ID) {
            self.auth.client_id = Some(client_id);
        }
        if let Some(secret) = non_empty(ENV_CLIENT_SECRET) {
            self.auth.client_secret = Some(secret);
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "tenant.base_url is required (or set {ENV_DOMAIN})"
            )));
        }

        let has_token = self.auth.api_token.as_deref().is_some_and(|t| !t.is_empty());
        let has_oauth = self.auth.client_id.is_some() && self.auth.client_secret.is_some();
        if !has_token && !has_oauth {
            return Err(ConfigError::Invalid(format!(
                "credentials required: auth.api_token ({ENV_API_TOKEN}) or auth.client_id + auth.client_secret"
            )));
        }

        self.concurrency.validate()?;
        self.rate_limit.validate()?;

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.base_delay_ms ({}) exceeds retry.max_delay_ms ({})",
                self.retry.base_delay_ms, self.retry.max_delay_ms
            )));
        }
        if self.pagination.page_size == 0 || self.pagination.max_pages == 0 {
            return Err(ConfigError::Invalid(
                "pagination.page_size and pagination.max_pages must be at least 1".to_string(),
            ));
        }
        if self.output.sinks.is_empty() {
            return Err(ConfigError::Invalid(
                "output.sinks must name at least one sink".to_string(),
            ));
        }
        Ok(())
    }

    /// Normalized base URL with scheme and without trailing slash
    pub fn base_url(&self) -> String {
        self.tenant.base_url()
    }
}

/// Tenant addressing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantConfig {
    /// Base URL or bare domain (e.g. "example.okta.com")
    #[serde(default)]
    pub base_url: String,

    /// Numeric tenant identifier used in output paths
    #[serde(default)]
    pub tenant_id: u32,

    /// Customer identifier used in output paths
    #[serde(default = "default_customer_id")]
    pub customer_id: String,

    /// Deployment environment (eu, us, beta, local)
    #[serde(default = "default_environment")]
    pub environment: String,
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            tenant_id: 0,
            customer_id: default_customer_id(),
            environment: default_environment(),
        }
    }
}

impl TenantConfig {
    /// Base URL with an https scheme added to bare domains
    pub fn base_url(&self) -> String {
        let trimmed = self.base_url.trim().trim_end_matches('/');
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            trimmed.to_string()
        } else {
            format!("https://{trimmed}")
        }
    }
}

fn default_customer_id() -> String {
    "unknown".to_string()
}

fn default_environment() -> String {
    "us".to_string()
}

/// Credentials; the SSWS token takes priority over OAuth client credentials
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuthConfig {
    /// SSWS API token
    #[serde(default)]
    pub api_token: Option<String>,

    /// OAuth 2.0 client ID
    #[serde(default)]
    pub client_id: Option<String>,

    /// OAuth 2.0 client secret
    #[serde(default)]
    pub client_secret: Option<String>,

    /// OAuth scopes requested with client credentials
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec![
        "okta.governance.accessRequests.read".to_string(),
        "okta.governance.accessCertifications.read".to_string(),
        "okta.governance.access.read".to_string(),
    ]
}

/// The four independent concurrency ceilings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConcurrencyConfig {
    /// Endpoints processed in parallel
    #[serde(default = "default_max_concurrent_endpoints")]
    pub max_concurrent_endpoints: usize,

    /// HTTP calls in flight across the whole run
    #[serde(default = "default_max_concurrent_api_calls")]
    pub max_concurrent_api_calls: usize,

    /// Detail calls in flight per endpoint
    #[serde(default = "default_max_detail_calls_per_endpoint")]
    pub max_detail_calls_per_endpoint: usize,

    /// Resource IDs in flight during phase two
    #[serde(default = "default_max_concurrent_resources")]
    pub max_concurrent_resources: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_endpoints: default_max_concurrent_endpoints(),
            max_concurrent_api_calls: default_max_concurrent_api_calls(),
            max_detail_calls_per_endpoint: default_max_detail_calls_per_endpoint(),
            max_concurrent_resources: default_max_concurrent_resources(),
        }
    }
}

impl ConcurrencyConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let ceilings = [
            ("max_concurrent_endpoints", self.max_concurrent_endpoints),
            ("max_concurrent_api_calls", self.max_concurrent_api_calls),
            ("max_detail_calls_per_endpoint", self.max_detail_calls_per_endpoint),
            ("max_concurrent_resources", self.max_concurrent_resources),
        ];
        for (name, value) in ceilings {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "concurrency.{name} must be at least 1"
                )));
            }
        }
        Ok(())
    }
}

fn default_max_concurrent_endpoints() -> usize {
    3
}

fn default_max_concurrent_api_calls() -> usize {
    15
}

fn default_max_detail_calls_per_endpoint() -> usize {
    10
}

fn default_max_concurrent_resources() -> usize {
    8
}

/// Request-rate budget for the rate governor
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RateLimitConfig {
    /// Baseline refill rate
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u32,

    /// Bucket capacity
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,

    /// Multiplier applied to the refill rate after a 429 (0 < factor < 1)
    #[serde(default = "default_throttle_penalty")]
    pub throttle_penalty: f64,

    /// How long the penalty stays in force after the last 429
    #[serde(default = "default_throttle_cooldown_secs")]
    pub throttle_cooldown_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_minute: default_requests_per_minute(),
            burst_size: default_burst_size(),
            throttle_penalty: default_throttle_penalty(),
            throttle_cooldown_secs: default_throttle_cooldown_secs(),
        }
    }
}

impl RateLimitConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.requests_per_minute == 0 || self.burst_size == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.requests_per_minute and rate_limit.burst_size must be at least 1"
                    .to_string(),
            ));
        }
        if !(self.throttle_penalty > 0.0 && self.throttle_penalty < 1.0) {
            return Err(ConfigError::Invalid(format!(
                "rate_limit.throttle_penalty must be between 0 and 1 (exclusive), got {}",
                self.throttle_penalty
            )));
        }
        Ok(())
    }

    /// Cool-down window as a [`Duration`]
    pub fn throttle_cooldown(&self) -> Duration {
        Duration::from_secs(self.throttle_cooldown_secs)
    }
}

fn default_requests_per_minute() -> u32 {
    50
}

fn default_burst_size() -> u32 {
    10
}

fn default_throttle_penalty() -> f64 {
    0.5
}

fn default_throttle_cooldown_secs() -> u64 {
    60
}

/// Retry and backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryConfig {
    /// Retries after the initial attempt
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on the exponential delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Upper bound of the random jitter added to each delay
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,

    /// Cap on a server-supplied `Retry-After`
    #[serde(default = "default_max_throttle_delay_secs")]
    pub max_throttle_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: default_jitter_ms(),
            max_throttle_delay_secs: default_max_throttle_delay_secs(),
        }
    }
}

fn default_max_retries() -> u32 {
    5
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_jitter_ms() -> u64 {
    250
}

fn default_max_throttle_delay_secs() -> u64 {
    300
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HttpConfig {
    /// TCP connect timeout
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Idle connections kept per host
    #[serde(default = "default_pool_size")]
    pub pool_size: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            pool_size: default_pool_size(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_pool_size() -> usize {
    20
}

/// Pagination configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaginationConfig {
    /// Value sent as the `limit` query parameter
    #[serde(default = "default_page_size")]
    pub page_size: u32,

    /// Pages followed for one logical fetch before giving up
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            max_pages: default_max_pages(),
        }
    }
}

fn default_page_size() -> u32 {
    200
}

fn default_max_pages() -> usize {
    10_000
}

/// Run-wide limits
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunConfig {
    /// Overall run deadline
    #[serde(default)]
    pub deadline_secs: Option<u64>,

    /// Keep at most this many records per endpoint (test mode)
    #[serde(default)]
    pub objects_per_endpoint: Option<usize>,

    /// Fan out to at most this many discovered resources (test mode)
    #[serde(default)]
    pub resources_limit: Option<usize>,
}

impl RunConfig {
    /// Deadline as a [`Duration`]
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

/// Available sink backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// One JSON document per endpoint batch
    Json,
    /// One CSV file per endpoint batch
    Csv,
    /// Log a line per batch, persist nothing
    Log,
}

impl std::str::FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(SinkKind::Json),
            "csv" => Ok(SinkKind::Csv),
            "log" => Ok(SinkKind::Log),
            _ => Err(format!("Invalid sink: {s}. Valid options: json, csv, log")),
        }
    }
}

/// Sink selection and output location
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    /// Root directory for file sinks
    #[serde(default = "default_output_root")]
    pub root: PathBuf,

    /// Active sinks; every batch is written to each of them
    #[serde(default = "default_sinks")]
    pub sinks: Vec<SinkKind>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: default_output_root(),
            sinks: default_sinks(),
        }
    }
}

fn default_output_root() -> PathBuf {
    PathBuf::from("backup")
}

fn default_sinks() -> Vec<SinkKind> {
    vec![SinkKind::Json]
}

fn default_discovery_rules() -> Vec<ResourceIdRule> {
    ResourceIdRule::defaults()
}
