//! Lifecycle orchestration for an instrumented gRPC service.

pub mod config;
pub mod error;
pub mod instrument;
pub mod lifecycle;
pub mod orchestrator;
pub mod status;
pub mod telemetry;

pub use config::{Settings, StandardAddrs};
pub use error::{Listener, ServiceError};
pub use instrument::{Instrumentor, StreamShape};
pub use lifecycle::{BoundAddrs, ServiceHandle, State};
pub use orchestrator::{Registration, RpcRoutes, Service, start};
pub use telemetry::{LogFormat, TelemetryProviders, fatal, init_telemetry};
