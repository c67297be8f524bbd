//! # Telemetry
//!
//! Logs always go through `tracing`. [`init_telemetry`] installs the global
//! subscriber once per process:
//!
//! - an `EnvFilter` read from `RUST_LOG` (default `info`);
//! - a console layer, pretty-printed or JSON depending on [`LogFormat`];
//! - with the `otlp` feature, an OpenTelemetry layer that exports spans over
//!   OTLP/gRPC. The exporter honours the usual `OTEL_EXPORTER_OTLP_*`
//!   environment variables.
//!
//! ## Span behavior
//!
//! - The orchestrator runs inside a `service` span carrying `appname`, so
//!   every event it or a registration callback emits is tagged with it.
//! - Events outside of a span are only shown in log output, not exported.
//!
//! ## Example usage
//!
//! ```bash
//! LOG_FORMAT=json RUST_LOG=svckit_server=debug cargo run --bin svckit-demo
//! cargo run --bin svckit-demo --features otlp
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[cfg(feature = "otlp")]
use opentelemetry::trace::TracerProvider;
#[cfg(feature = "otlp")]
use opentelemetry_sdk::{Resource, trace as sdktrace};

/// Environment variable selecting the console format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Console output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human-readable.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Reads [`LOG_FORMAT_ENV`]; anything but `json` means [`LogFormat::Pretty`].
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV)
            .map(|raw| Self::parse(&raw))
            .unwrap_or_default()
    }

    fn parse(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Handles that must be flushed before the process exits.
pub struct TelemetryProviders {
    #[cfg(feature = "otlp")]
    pub tracer_provider: sdktrace::SdkTracerProvider,
}

impl TelemetryProviders {
    /// Flushes and stops the exporters. A no-op without `otlp`.
    pub fn shutdown(self) {
        #[cfg(feature = "otlp")]
        {
            if let Err(err) = self.tracer_provider.force_flush() {
                eprintln!("Error flushing traces: {err:#?}");
            }
            if let Err(err) = self.tracer_provider.shutdown() {
                eprintln!("Error shutting down tracer: {err:#?}");
            }
        }
    }
}

/// Installs the global subscriber.
///
/// # Errors
///
/// Fails if a global subscriber is already set, or if the OTLP exporter
/// cannot be built.
pub fn init_telemetry(service_name: &str, format: LogFormat) -> anyhow::Result<TelemetryProviders> {
    let pretty = (format == LogFormat::Pretty).then(|| {
        tracing_subscriber::fmt::layer()
            .with_thread_ids(true)
            .with_line_number(true)
            .with_target(false)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
            .with_file(true)
            .pretty()
    });
    let json = (format == LogFormat::Json).then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_thread_ids(true)
            .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
    });

    let registry = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(pretty)
        .with(json);

    #[cfg(feature = "otlp")]
    let (registry, tracer_provider) = {
        let tracer_provider = init_tracer(service_name)?;
        opentelemetry::global::set_tracer_provider(tracer_provider.clone());
        let layer = tracing_opentelemetry::layer()
            .with_tracer(tracer_provider.tracer("svckit"))
            .with_error_records_to_exceptions(true);
        (registry.with(layer), tracer_provider)
    };
    #[cfg(not(feature = "otlp"))]
    let _ = service_name;

    registry.try_init()?;

    Ok(TelemetryProviders {
        #[cfg(feature = "otlp")]
        tracer_provider,
    })
}

#[cfg(feature = "otlp")]
fn init_tracer(service_name: &str) -> anyhow::Result<sdktrace::SdkTracerProvider> {
    use anyhow::Context;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .build()
        .context("failed to build span exporter")?;

    Ok(sdktrace::SdkTracerProvider::builder()
        .with_resource(
            Resource::builder()
                .with_service_name(service_name.to_owned())
                .build(),
        )
        .with_batch_exporter(exporter)
        .build())
}

/// Logs `err` (with its whole cause chain) at error level and exits with
/// status 1.
///
/// For startup failures that happen before, or outside of, a running
/// service.
pub fn fatal(err: impl Into<anyhow::Error>, msg: &str) -> ! {
    let err = err.into();
    tracing::error!(err = format!("{err:#}"), "{msg}");
    std::process::exit(1)
}
