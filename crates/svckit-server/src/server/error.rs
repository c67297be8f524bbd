use std::net::SocketAddr;
use svckit_core::{ConfigError, DiscoveryError, MetricError};
use thiserror::Error;

/// Which of the two listeners a failure concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Listener {
    Rpc,
    Status,
}

impl std::fmt::Display for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rpc => "rpc",
            Self::Status => "status",
        })
    }
}

/// Startup failure of a [`Service`](crate::server::Service).
///
/// Every variant is fatal: nothing is retried, and by the time the error is
/// returned the service has already cancelled its shutdown token and
/// reached [`State::Stopped`](crate::server::State::Stopped).
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("invalid flag or environment: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid {listener} address {addr:?}")]
    InvalidAddress {
        listener: Listener,
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("can't bind {listener} address {addr}")]
    Bind {
        listener: Listener,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("can't create service metrics: {0}")]
    Metrics(#[from] MetricError),

    #[error("can't register with discovery service at {addr}")]
    Discovery {
        addr: String,
        #[source]
        source: DiscoveryError,
    },

    #[error("registering service failed")]
    Setup(#[source] anyhow::Error),
}

impl ServiceError {
    /// `true` if the user only asked for the usage listing.
    pub fn is_help(&self) -> bool {
        matches!(self, Self::Config(ConfigError::HelpRequested { .. }))
    }
}
