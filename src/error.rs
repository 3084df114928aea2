//! Error taxonomy for the cache service core.
//!
//! Every public operation on [`crate::manager::CacheManager`] returns
//! `Result<T, CacheError>`. Each variant carries a stable `code()` string and
//! an `http_status()`, matching the mapping an external HTTP layer is
//! expected to apply (`§6`/`§7` of the design: validation failures are 400,
//! keyspace violations 400, breaker-open 503, everything else 500).

use thiserror::Error;

/// Errors surfaced by the cache core.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache key error: {0}")]
    KeyInvalid(String),

    #[error("keyspace '{keyspace}' is not permitted for service '{service}'")]
    KeyspaceForbidden { service: String, keyspace: String },

    #[error("cache connection error for node {node}: {source}")]
    ConnectionFail {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache operation '{operation}' failed for key {key}: {source}")]
    OperationFail {
        operation: String,
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("cache operation '{operation}' timed out after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    #[error("circuit breaker open for operation '{operation}' on node '{node}' ({failures}/{threshold} failures)")]
    BreakerOpen {
        operation: String,
        node: String,
        threshold: u32,
        failures: u32,
    },

    #[error("batch operation '{operation}' partially failed: {failed}/{total} members failed")]
    BatchPartial {
        operation: String,
        total: usize,
        failed: usize,
    },

    #[error("failed to decode cached payload for key {key}: {reason}")]
    DecodeFail { key: String, reason: String },
}

impl CacheError {
    /// Stable machine-readable error code, suitable for API responses.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::KeyInvalid(_) => "KEY_INVALID",
            Self::KeyspaceForbidden { .. } => "KEYSPACE_FORBIDDEN",
            Self::ConnectionFail { .. } => "CACHE_CONNECTION_FAIL",
            Self::OperationFail { .. } => "CACHE_OPERATION_FAIL",
            Self::Timeout { .. } => "CACHE_TIMEOUT",
            Self::BreakerOpen { .. } => "BREAKER_OPEN",
            Self::BatchPartial { .. } => "BATCH_PARTIAL",
            Self::DecodeFail { .. } => "DECODE_FAIL",
        }
    }

    /// HTTP status an adapter should map this error to (`§6`).
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::KeyInvalid(_) | Self::KeyspaceForbidden { .. } => 400,
            Self::BreakerOpen { .. } => 503,
            Self::ConnectionFail { .. }
            | Self::OperationFail { .. }
            | Self::Timeout { .. }
            | Self::BatchPartial { .. }
            | Self::DecodeFail { .. } => 500,
        }
    }

    /// True if the breaker should record this outcome as a failure.
    #[must_use]
    pub fn counts_as_breaker_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFail { .. } | Self::OperationFail { .. } | Self::Timeout { .. }
        )
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                operation: "redis".to_string(),
                elapsed_ms: 0,
            }
        } else if err.is_io_error() || err.is_unrecoverable_error() {
            Self::ConnectionFail {
                node: "redis".to_string(),
                source: err.into(),
            }
        } else {
            Self::OperationFail {
                operation: "redis".to_string(),
                key: String::new(),
                source: err.into(),
            }
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
