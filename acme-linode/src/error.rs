use std::time::Duration;

use thiserror::Error;

/// Failures the solver distinguishes from generic transport or cluster errors.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<Error>()` to branch on them.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid secret reference: must contain name and key values")]
    InvalidSecretReference,
    #[error("no zone found for domain {domain:?}")]
    ZoneNotFound { domain: String },
    #[error("key {key:?} not found in secret {namespace}/{name}")]
    SecretKeyNotFound {
        key: String,
        namespace: String,
        name: String,
    },
    #[error("linode api returned {status}: {}", .reasons.join("; "))]
    Api { status: u16, reasons: Vec<String> },
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
}
