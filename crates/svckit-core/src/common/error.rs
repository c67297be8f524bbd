//! Error types for the svckit building blocks.
//!
//! ## Error Cases
//! - [`ConfigError`]: flags or environment variables could not be resolved,
//!   or the caller asked for the usage listing.
//! - [`MetricError`]: a metric could not be created or exported.
//! - [`DiscoveryError`]: the discovery backend refused or could not take a
//!   registration.
//!
//! All three are fatal when they happen during startup.

use thiserror::Error;

/// Failure to resolve the service configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// `-h`/`-help` was the only argument. Carries the generated listing.
    #[error("{usage}")]
    HelpRequested { usage: String },

    /// A flag or environment variable was unknown or malformed.
    #[error("{appname}: bad usage, {reason}\n{usage}")]
    BadUsage {
        appname: String,
        reason: String,
        usage: String,
    },

    /// The same flag name was declared twice.
    #[error("flag -{flag} declared more than once")]
    DuplicateFlag { flag: String },

    /// A required address was still unset after parsing.
    #[error("{which} address is empty, it needs to be set before the service starts")]
    EmptyAddress { which: &'static str },
}

/// Failure to create, label or export a metric.
#[derive(Error, Debug)]
pub enum MetricError {
    /// Histogram range violates `0 < min < max`.
    #[error("invalid bucket range: min={min}, max={max} (need 0 < min < max)")]
    InvalidRange { min: f64, max: f64 },

    /// A metric with the same name exists with a different shape.
    #[error("metric {name:?} already registered as {existing}")]
    Conflict { name: String, existing: String },

    /// The underlying Prometheus registry rejected the operation.
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// Exposition output was not valid UTF-8.
    #[error("metrics encoding: {0}")]
    Encoding(#[from] std::string::FromUtf8Error),
}

/// Failure to register with, or reach, the discovery backend.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    /// The registration context was cancelled before completion.
    #[error("registration cancelled")]
    Cancelled,

    /// The discovery address could not be used.
    #[error("invalid discovery address {addr:?}: {reason}")]
    InvalidAddress { addr: String, reason: String },

    /// The backend refused the registration.
    #[error("registration rejected: {reason}")]
    Rejected { reason: String },

    /// Transport failure while talking to the backend.
    #[error("discovery i/o: {0}")]
    Io(#[from] std::io::Error),
}
