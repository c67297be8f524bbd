//! # Service identity types
//!
//! - [`Addrs`] - the three addresses a service needs, resolved once the flags
//!   have been parsed.
//! - [`ServiceDescriptor`] - what a service announces to discovery.

use crate::ConfigError;

/// The addresses a service listens on and the address where it reaches the
/// discovery backend.
///
/// Evaluated once the [`FlagSet`](crate::flag::FlagSet) has been parsed,
/// never before.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Addrs {
    /// Where the gRPC server listens.
    pub rpc: String,
    /// Where the HTTP status server (metrics, profiling) listens.
    pub status: String,
    /// Where the discovery backend can be reached.
    pub discovery: String,
}

impl Addrs {
    pub fn new(
        rpc: impl Into<String>,
        status: impl Into<String>,
        discovery: impl Into<String>,
    ) -> Self {
        Self {
            rpc: rpc.into(),
            status: status.into(),
            discovery: discovery.into(),
        }
    }

    /// Rejects any address that is still empty (an unset placeholder).
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (which, addr) in [
            ("rpc", &self.rpc),
            ("status", &self.status),
            ("discovery", &self.discovery),
        ] {
            if addr.trim().is_empty() {
                return Err(ConfigError::EmptyAddress { which });
            }
        }
        Ok(())
    }
}

/// Immutable description of a running service, handed to the discovery
/// provider at registration time.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceDescriptor {
    pub name: String,
    pub rpc_addr: String,
    pub status_addr: String,
}

impl ServiceDescriptor {
    pub fn new(
        name: impl Into<String>,
        rpc_addr: impl Into<String>,
        status_addr: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            rpc_addr: rpc_addr.into(),
            status_addr: status_addr.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_addrs_validate() {
        let addrs = Addrs::new("127.0.0.1:0", "127.0.0.1:0", "127.0.0.1:8500");
        assert!(addrs.validate().is_ok());
    }

    #[test]
    fn blank_addr_is_rejected() {
        let addrs = Addrs::new("127.0.0.1:0", "  ", "127.0.0.1:8500");
        match addrs.validate() {
            Err(ConfigError::EmptyAddress { which }) => assert_eq!(which, "status"),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
