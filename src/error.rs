//! Error taxonomy.
//!
//! Only [`ConfigError`] is fatal, and only before any traffic is sent. Every
//! runtime condition (failed check, unreachable endpoint, stale token) is
//! absorbed where it happens and surfaces through metrics and logs, so one
//! bad endpoint cannot abort a load test in progress.

use thiserror::Error;

/// Fatal startup errors. Raised while loading the test plan or resolving the
/// environment, before the first request goes out.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no authentication mode configured; set AUTH_NONE=true to run unauthenticated")]
    NoAuthMode,

    #[error("duplicate operation name `{0}` across setup/endpoints/teardown")]
    DuplicateOperation(String),

    #[error("operation `{name}` has a negative weight ({weight})")]
    NegativeWeight { name: String, weight: f64 },

    #[error("unknown load profile `{0}` (expected smoke, ramp, soak, stress or spike)")]
    UnknownProfile(String),

    #[error("invalid value for {name}: `{value}`")]
    InvalidEnv { name: String, value: String },

    #[error("cannot read test plan: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse test plan: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("data file `{name}`: {source}")]
    DataFile {
        name: String,
        #[source]
        source: csv::Error,
    },
}

/// A failed HTTP exchange. Never escapes the dispatcher: it is converted into
/// a failed check on the operation that triggered it.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("network error: {0}")]
    Network(String),
}
