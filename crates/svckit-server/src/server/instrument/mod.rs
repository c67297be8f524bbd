//! Call-level instrumentation for the gRPC server.
//!
//! [`Instrumentor`] owns the request/response counters and duration samplers
//! and hands out an [`InstrumentLayer`] that wraps the tonic router. Every
//! call produces one request increment on entry, then one response increment
//! and one duration sample once the response body has finished, whether the
//! handler succeeded, failed, or the caller went away.
//!
//! ## Series
//!
//! | name | labels |
//! |------|--------|
//! | `unary_request_total` | `method` |
//! | `unary_response_total` | `method`, `code` |
//! | `unary_response_duration_seconds` | `method`, `code` |
//! | `stream_request_total` | `method`, `client_stream`, `server_stream` |
//! | `stream_response_total` | `method`, `client_stream`, `server_stream`, `code` |
//! | `stream_response_duration_seconds` | `method`, `client_stream`, `server_stream`, `code` |

mod body;
mod layer;

pub use body::InstrumentedBody;
pub use layer::{InstrumentLayer, InstrumentService, ResponseFuture};

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use svckit_core::MetricError;
use svckit_core::metric::{Counter, Node, Sampler};
use tonic::Code;

/// Smallest duration bucket, in seconds.
pub const DURATION_MIN_SECS: f64 = 0.008;
/// Largest duration bucket, in seconds.
pub const DURATION_MAX_SECS: f64 = 30.0;

/// Method label used for paths that no registered service answers to.
pub const UNKNOWN_METHOD: &str = "unknown";

/// Which sides of a call carry a stream of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamShape {
    pub client: bool,
    pub server: bool,
}

impl StreamShape {
    pub const UNARY: Self = Self {
        client: false,
        server: false,
    };
    pub const CLIENT: Self = Self {
        client: true,
        server: false,
    };
    pub const SERVER: Self = Self {
        client: false,
        server: true,
    };
    pub const BIDI: Self = Self {
        client: true,
        server: true,
    };

    pub const fn is_streaming(self) -> bool {
        self.client || self.server
    }
}

/// Registered services and the shape of their streaming methods.
///
/// Written while services are being added, read on every call.
#[derive(Clone, Default)]
pub struct MethodTable {
    inner: Arc<RwLock<MethodTableInner>>,
}

#[derive(Default)]
struct MethodTableInner {
    services: HashSet<String>,
    streaming: HashMap<String, StreamShape>,
}

impl MethodTable {
    pub fn add_service(&self, name: &str) {
        self.inner.write().services.insert(name.to_owned());
    }

    /// Declares `path` (`/package.Service/Method`) as streaming.
    pub fn add_streaming(&self, path: &str, shape: StreamShape) {
        self.inner
            .write()
            .streaming
            .insert(path.to_owned(), shape);
    }

    /// Registered services without a single declared streaming method,
    /// sorted by name.
    pub fn unshaped_services(&self) -> Vec<String> {
        let inner = self.inner.read();
        let mut unshaped: Vec<String> = inner
            .services
            .iter()
            .filter(|service| {
                let prefix = format!("/{service}/");
                !inner.streaming.keys().any(|path| path.starts_with(&prefix))
            })
            .cloned()
            .collect();
        unshaped.sort();
        unshaped
    }

    /// Resolves a request path into its method label and shape.
    pub fn classify(&self, path: &str) -> (String, StreamShape) {
        let inner = self.inner.read();
        let service = path
            .strip_prefix('/')
            .and_then(|p| p.split_once('/'))
            .map(|(service, _)| service);

        match service {
            Some(service) if inner.services.contains(service) => {
                let shape = inner.streaming.get(path).copied().unwrap_or_default();
                (path.to_owned(), shape)
            }
            _ => (UNKNOWN_METHOD.to_owned(), StreamShape::UNARY),
        }
    }
}

struct CallMetrics {
    request_total: Counter,
    response_total: Counter,
    response_duration: Sampler,
}

/// Metric handles shared by every instrumented call.
#[derive(Clone)]
pub struct Instrumentor {
    unary: Arc<CallMetrics>,
    stream: Arc<CallMetrics>,
    methods: MethodTable,
}

impl Instrumentor {
    /// Registers the unary and stream series on `node`.
    pub fn new(node: &dyn Node) -> Result<Self, MetricError> {
        let unary = CallMetrics {
            request_total: node.counter(
                "unary_request_total",
                "Number of unary requests received",
                &["method"],
            )?,
            response_total: node.counter(
                "unary_response_total",
                "Number of unary responses sent",
                &["method", "code"],
            )?,
            response_duration: node.sampler(
                "unary_response_duration_seconds",
                "Seconds elapsed to produce a unary response",
                DURATION_MIN_SECS,
                DURATION_MAX_SECS,
                &["method", "code"],
            )?,
        };
        let stream = CallMetrics {
            request_total: node.counter(
                "stream_request_total",
                "Number of stream requests received",
                &["method", "client_stream", "server_stream"],
            )?,
            response_total: node.counter(
                "stream_response_total",
                "Number of stream responses sent",
                &["method", "client_stream", "server_stream", "code"],
            )?,
            response_duration: node.sampler(
                "stream_response_duration_seconds",
                "Seconds elapsed to produce a stream response",
                DURATION_MIN_SECS,
                DURATION_MAX_SECS,
                &["method", "client_stream", "server_stream", "code"],
            )?,
        };

        Ok(Self {
            unary: Arc::new(unary),
            stream: Arc::new(stream),
            methods: MethodTable::default(),
        })
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }

    pub fn layer(&self) -> InstrumentLayer {
        InstrumentLayer::new(self.clone())
    }

    /// Counts the request and starts the clock for a call to `path`.
    pub(crate) fn begin(&self, path: &str) -> Call {
        let (method, shape) = self.methods.classify(path);
        let (metrics, labels) = if shape.is_streaming() {
            let labels = vec![method, shape.client.to_string(), shape.server.to_string()];
            (Arc::clone(&self.stream), labels)
        } else {
            (Arc::clone(&self.unary), vec![method])
        };

        let refs: Vec<&str> = labels.iter().map(String::as_str).collect();
        metrics.request_total.observe(1.0, &refs);

        Call {
            metrics,
            labels,
            start: Instant::now(),
            header_code: None,
            done: false,
        }
    }
}

/// One in-flight call. Emits the response pair exactly once: explicitly via
/// [`Call::finish`], or on drop as `Cancelled` (or the status already seen in
/// the response headers).
pub(crate) struct Call {
    metrics: Arc<CallMetrics>,
    labels: Vec<String>,
    start: Instant,
    header_code: Option<Code>,
    done: bool,
}

impl Call {
    /// Remembers a status delivered in the response headers (trailers-only
    /// responses).
    pub(crate) fn set_header_code(&mut self, code: Option<Code>) {
        self.header_code = code;
    }

    pub(crate) fn header_code(&self) -> Option<Code> {
        self.header_code
    }

    pub(crate) fn finish(&mut self, code: Code) {
        if self.done {
            return;
        }
        self.done = true;

        let code = format!("{code:?}");
        let mut labels: Vec<&str> = self.labels.iter().map(String::as_str).collect();
        labels.push(&code);

        self.metrics
            .response_duration
            .observe(self.start.elapsed().as_secs_f64(), &labels);
        self.metrics.response_total.observe(1.0, &labels);
    }
}

impl Drop for Call {
    fn drop(&mut self) {
        let code = self.header_code.unwrap_or(Code::Cancelled);
        self.finish(code);
    }
}

/// Reads a `grpc-status` header or trailer.
pub(crate) fn status_code(headers: &http::HeaderMap) -> Option<Code> {
    headers
        .get("grpc-status")
        .map(|value| Code::from_bytes(value.as_bytes()))
}

#[cfg(test)]
pub(crate) mod testing {
    use parking_lot::Mutex;
    use std::sync::Arc;
    use svckit_core::MetricError;
    use svckit_core::metric::{Counter, MetricNode, Node, Observer, Sampler};

    /// One observation: metric name, value and label values.
    pub type Sample = (String, f64, Vec<String>);

    /// Node that records every observation in memory.
    #[derive(Clone, Default)]
    pub struct RecordingNode {
        samples: Arc<Mutex<Vec<Sample>>>,
    }

    struct Recorder {
        name: String,
        samples: Arc<Mutex<Vec<Sample>>>,
    }

    impl Observer for Recorder {
        fn observe(&self, value: f64, labels: &[&str]) {
            self.samples.lock().push((
                self.name.clone(),
                value,
                labels.iter().map(|l| (*l).to_owned()).collect(),
            ));
        }
    }

    impl RecordingNode {
        pub fn samples(&self, name: &str) -> Vec<(f64, Vec<String>)> {
            self.samples
                .lock()
                .iter()
                .filter(|(n, _, _)| n == name)
                .map(|(_, v, l)| (*v, l.clone()))
                .collect()
        }

        fn handle(&self, name: &str) -> Arc<dyn Observer> {
            Arc::new(Recorder {
                name: name.to_owned(),
                samples: Arc::clone(&self.samples),
            })
        }
    }

    impl Node for RecordingNode {
        fn counter(&self, name: &str, _: &str, _: &[&str]) -> Result<Counter, MetricError> {
            Ok(self.handle(name))
        }

        fn sampler(
            &self,
            name: &str,
            _: &str,
            _: f64,
            _: f64,
            _: &[&str],
        ) -> Result<Sampler, MetricError> {
            Ok(self.handle(name))
        }

        fn with_label(&self, _: &str, _: &str) -> MetricNode {
            Arc::new(self.clone())
        }
    }
}
