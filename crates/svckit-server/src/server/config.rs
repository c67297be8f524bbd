use svckit_core::Addrs;
use svckit_core::flag::FlagSet;

/// A service's own configuration.
///
/// The orchestrator owns the settings value: it lends it to a [`FlagSet`]
/// through [`Settings::declare`], parses, and only then calls
/// [`Settings::addrs`]. The borrow ends with parsing, so addresses can never
/// be read before the flags are resolved.
pub trait Settings: Send + 'static {
    /// Declares every option of the service on `fs`.
    fn declare<'a>(&'a mut self, fs: &mut FlagSet<'a>);

    /// The resolved rpc, status and discovery addresses.
    fn addrs(&self) -> Addrs;
}

/// Settings for a service that only needs its three addresses.
///
/// Declares `-rpc.addr`, `-status.addr` and `-discovery.addr` (and the
/// matching `<APPNAME>_RPC_ADDR`, ... environment variables).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StandardAddrs {
    pub rpc: String,
    pub status: String,
    pub discovery: String,
}

impl Default for StandardAddrs {
    fn default() -> Self {
        Self {
            rpc: "127.0.0.1:9090".to_owned(),
            status: "127.0.0.1:9091".to_owned(),
            discovery: "127.0.0.1:8500".to_owned(),
        }
    }
}

impl Settings for StandardAddrs {
    fn declare<'a>(&'a mut self, fs: &mut FlagSet<'a>) {
        fs.string(&mut self.rpc, "address on which to serve gRPC", &["rpc", "addr"]);
        fs.string(
            &mut self.status,
            "address on which to serve metrics and profiles over HTTP",
            &["status", "addr"],
        );
        fs.string(
            &mut self.discovery,
            "address where the discovery service is reachable",
            &["discovery", "addr"],
        );
    }

    fn addrs(&self) -> Addrs {
        Addrs::new(&self.rpc, &self.status, &self.discovery)
    }
}
