//! In-process discovery backend.
//!
//! [`LocalProvider`] keeps registrations in a shared [`Catalog`] rather than
//! a remote system. It is enough for single-host deployments and for tests,
//! and it behaves like a real backend: it validates the backend address,
//! honours cancellation, and withdraws entries when the registration
//! context ends.

use super::{Dialer, Provider};
use crate::{DiscoveryError, ServiceDescriptor};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

/// Registered services, keyed by name.
#[derive(Clone, Default)]
pub struct Catalog {
    entries: Arc<RwLock<BTreeMap<String, Vec<ServiceDescriptor>>>>,
}

impl Catalog {
    /// Every instance currently registered under `name`.
    pub fn resolve(&self, name: &str) -> Vec<ServiceDescriptor> {
        self.entries.read().get(name).cloned().unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn insert(&self, desc: ServiceDescriptor) {
        let mut entries = self.entries.write();
        let instances = entries.entry(desc.name.clone()).or_default();
        if !instances.contains(&desc) {
            instances.push(desc);
        }
    }

    fn remove(&self, desc: &ServiceDescriptor) {
        let mut entries = self.entries.write();
        if let Some(instances) = entries.get_mut(&desc.name) {
            instances.retain(|d| d != desc);
            if instances.is_empty() {
                entries.remove(&desc.name);
            }
        }
    }
}

#[derive(Clone, Default)]
pub struct LocalProvider {
    catalog: Catalog,
}

impl LocalProvider {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

impl Provider for LocalProvider {
    type Dialer = LocalDialer;

    async fn register(
        &self,
        cancel: CancellationToken,
        addr: &str,
        desc: &ServiceDescriptor,
    ) -> Result<LocalDialer, DiscoveryError> {
        if cancel.is_cancelled() {
            return Err(DiscoveryError::Cancelled);
        }

        let backend: SocketAddr = addr.parse().map_err(|e| DiscoveryError::InvalidAddress {
            addr: addr.to_owned(),
            reason: format!("{e}"),
        })?;

        if desc.name.is_empty() {
            return Err(DiscoveryError::Rejected {
                reason: "service name is empty".into(),
            });
        }

        self.catalog.insert(desc.clone());
        tracing::debug!(service = %desc.name, rpc = %desc.rpc_addr, "registered");

        let catalog = self.catalog.clone();
        let withdrawn = desc.clone();
        tokio::spawn(async move {
            cancel.cancelled().await;
            catalog.remove(&withdrawn);
            tracing::debug!(service = %withdrawn.name, "deregistered");
        });

        Ok(LocalDialer {
            backend,
            catalog: self.catalog.clone(),
        })
    }
}

/// Dialer returned by [`LocalProvider`]: connects to the discovery address
/// and answers lookups from the shared catalog.
#[derive(Clone)]
pub struct LocalDialer {
    backend: SocketAddr,
    catalog: Catalog,
}

impl LocalDialer {
    pub fn backend(&self) -> SocketAddr {
        self.backend
    }

    pub fn resolve(&self, name: &str) -> Vec<ServiceDescriptor> {
        self.catalog.resolve(name)
    }
}

impl Dialer for LocalDialer {
    type Conn = TcpStream;

    async fn dial(&self) -> std::io::Result<TcpStream> {
        TcpStream::connect(self.backend).await
    }
}
