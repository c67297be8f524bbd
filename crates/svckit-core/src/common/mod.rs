//! Types and errors shared by every svckit module.

pub mod error;
pub mod types;

pub use error::{ConfigError, DiscoveryError, MetricError};
pub use types::{Addrs, ServiceDescriptor};
