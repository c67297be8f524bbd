//! Discovery: announcing a service so that others can find it.
//!
//! The orchestrator receives a [`Provider`] explicitly at construction and
//! calls [`Provider::register`] once at startup. Whatever [`Dialer`] the
//! provider returns is handed to the service's own registration code.

mod local;

pub use local::{Catalog, LocalDialer, LocalProvider};

use crate::{DiscoveryError, ServiceDescriptor};
use core::future::Future;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

/// A discovery backend.
pub trait Provider: Send + Sync + 'static {
    type Dialer: Dialer;

    /// Registers `desc` with the backend reachable at `addr`.
    ///
    /// `cancel` aborts a registration in flight; once it fires after a
    /// successful registration, the provider should withdraw the entry.
    fn register(
        &self,
        cancel: CancellationToken,
        addr: &str,
        desc: &ServiceDescriptor,
    ) -> impl Future<Output = Result<Self::Dialer, DiscoveryError>> + Send;
}

/// Opens connections through the discovery backend.
pub trait Dialer: Send + Sync + 'static {
    type Conn: AsyncRead + AsyncWrite + Send + Unpin + 'static;

    fn dial(&self) -> impl Future<Output = std::io::Result<Self::Conn>> + Send;
}
