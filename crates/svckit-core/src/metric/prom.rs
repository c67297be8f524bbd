use super::{Counter, MetricNode, Node, Observer, Sampler, exponential_buckets};
use crate::MetricError;
use ::prometheus::core::Collector;
use ::prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// `Content-Type` of the text exposition produced by [`Exporter::encode`].
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Creates a fresh registry, a root node writing into it, and the exporter
/// that renders it.
///
/// On Linux the registry also carries the process collector (CPU, memory,
/// file descriptors).
pub fn prometheus() -> (MetricNode, Exporter) {
    let registry = Registry::new();

    #[cfg(target_os = "linux")]
    {
        let process = ::prometheus::process_collector::ProcessCollector::for_self();
        if let Err(e) = registry.register(Box::new(process)) {
            tracing::warn!(err = %e, "process collector unavailable");
        }
    }

    let node = PrometheusNode::with_registry(registry.clone());
    (Arc::new(node), Exporter { registry })
}

/// Renders every metric of a registry in the Prometheus text format.
#[derive(Clone)]
pub struct Exporter {
    registry: Registry,
}

impl Exporter {
    pub fn encode(&self) -> Result<String, MetricError> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buf)?;
        Ok(String::from_utf8(buf)?)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Kind {
    Counter,
    Histogram,
}

struct Registered {
    kind: Kind,
    labels: Vec<String>,
    handle: Arc<dyn Observer>,
}

/// Series identity: the metric name plus its constant labels.
#[derive(PartialEq, Eq, Hash)]
struct SeriesKey {
    name: String,
    const_labels: Vec<(String, String)>,
}

struct Shared {
    registry: Registry,
    series: Mutex<HashMap<SeriesKey, Registered>>,
}

/// [`Node`] backed by a Prometheus registry.
///
/// Nodes derived with [`Node::with_label`] share the registry and the
/// deduplication table with their parent.
#[derive(Clone)]
pub struct PrometheusNode {
    shared: Arc<Shared>,
    labels: BTreeMap<String, String>,
}

impl PrometheusNode {
    pub fn with_registry(registry: Registry) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                series: Mutex::new(HashMap::new()),
            }),
            labels: BTreeMap::new(),
        }
    }

    fn const_labels(&self) -> HashMap<String, String> {
        self.labels.clone().into_iter().collect()
    }

    /// Returns the handle already registered under `name`, or builds,
    /// registers and remembers a new one.
    fn get_or_register<F>(
        &self,
        name: &str,
        kind: Kind,
        labels: &[&str],
        build: F,
    ) -> Result<Arc<dyn Observer>, MetricError>
    where
        F: FnOnce() -> Result<(Box<dyn Collector>, Arc<dyn Observer>), MetricError>,
    {
        let key = SeriesKey {
            name: name.to_owned(),
            const_labels: self
                .labels
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
        };

        let mut series = self.shared.series.lock();
        if let Some(existing) = series.get(&key) {
            if existing.kind != kind || existing.labels != labels {
                return Err(MetricError::Conflict {
                    name: name.to_owned(),
                    existing: format!("{:?} with labels {:?}", existing.kind, existing.labels),
                });
            }
            return Ok(Arc::clone(&existing.handle));
        }

        let (collector, handle) = build()?;
        self.shared.registry.register(collector)?;
        series.insert(
            key,
            Registered {
                kind,
                labels: labels.iter().map(|l| (*l).to_owned()).collect(),
                handle: Arc::clone(&handle),
            },
        );
        Ok(handle)
    }
}

impl Node for PrometheusNode {
    fn counter(&self, name: &str, desc: &str, labels: &[&str]) -> Result<Counter, MetricError> {
        self.get_or_register(name, Kind::Counter, labels, || {
            let opts = Opts::new(name, desc).const_labels(self.const_labels());
            let vec = CounterVec::new(opts, labels)?;
            let collector: Box<dyn Collector> = Box::new(vec.clone());
            let handle: Arc<dyn Observer> = Arc::new(CounterHandle(vec));
            Ok((collector, handle))
        })
    }

    fn sampler(
        &self,
        name: &str,
        desc: &str,
        min: f64,
        max: f64,
        labels: &[&str],
    ) -> Result<Sampler, MetricError> {
        self.get_or_register(name, Kind::Histogram, labels, || {
            let opts = HistogramOpts::new(name, desc)
                .const_labels(self.const_labels())
                .buckets(exponential_buckets(min, max)?);
            let vec = HistogramVec::new(opts, labels)?;
            let collector: Box<dyn Collector> = Box::new(vec.clone());
            let handle: Arc<dyn Observer> = Arc::new(SamplerHandle(vec));
            Ok((collector, handle))
        })
    }

    fn with_label(&self, key: &str, value: &str) -> MetricNode {
        let mut labels = self.labels.clone();
        labels.insert(key.to_owned(), value.to_owned());
        Arc::new(Self {
            shared: Arc::clone(&self.shared),
            labels,
        })
    }
}

struct CounterHandle(CounterVec);

impl Observer for CounterHandle {
    fn observe(&self, value: f64, labels: &[&str]) {
        self.0.with_label_values(labels).inc_by(value);
    }
}

struct SamplerHandle(HistogramVec);

impl Observer for SamplerHandle {
    fn observe(&self, value: f64, labels: &[&str]) {
        self.0.with_label_values(labels).observe(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> (MetricNode, Exporter) {
        let registry = Registry::new();
        (
            Arc::new(PrometheusNode::with_registry(registry.clone())),
            Exporter { registry },
        )
    }

    #[test]
    fn same_name_shares_one_series() {
        let (node, exporter) = root();
        let first = node.counter("hits_total", "Number of hits", &["route"]).unwrap();
        let second = node.counter("hits_total", "Number of hits", &["route"]).unwrap();

        first.observe(1.0, &["a"]);
        second.observe(2.0, &["a"]);

        let text = exporter.encode().unwrap();
        assert!(text.contains("hits_total{route=\"a\"} 3"), "{text}");
    }

    #[test]
    fn reusing_a_name_with_another_shape_conflicts() {
        let (node, _) = root();
        node.counter("jobs", "Jobs", &["queue"]).unwrap();

        assert!(matches!(
            node.sampler("jobs", "Jobs", 0.1, 10.0, &["queue"]),
            Err(MetricError::Conflict { .. })
        ));
        assert!(matches!(
            node.counter("jobs", "Jobs", &["queue", "state"]),
            Err(MetricError::Conflict { .. })
        ));
    }

    #[test]
    fn labels_accumulate_without_touching_the_parent() {
        let (node, exporter) = root();
        let app = node.with_label("appname", "appd");
        let zone = app.with_label("zone", "eu");

        zone.counter("boots_total", "Boots", &[]).unwrap().observe(1.0, &[]);
        app.counter("starts_total", "Starts", &[]).unwrap().observe(1.0, &[]);

        let text = exporter.encode().unwrap();
        assert!(
            text.contains("boots_total{appname=\"appd\",zone=\"eu\"} 1"),
            "{text}"
        );
        assert!(text.contains("starts_total{appname=\"appd\"} 1"), "{text}");
    }

    #[test]
    fn sibling_views_get_distinct_series() {
        let (node, exporter) = root();
        let a = node.with_label("appname", "a");
        let b = node.with_label("appname", "b");
        a.counter("up_total", "Up", &[]).unwrap().observe(1.0, &[]);
        b.counter("up_total", "Up", &[]).unwrap().observe(5.0, &[]);

        let text = exporter.encode().unwrap();
        assert!(text.contains("up_total{appname=\"a\"} 1"), "{text}");
        assert!(text.contains("up_total{appname=\"b\"} 5"), "{text}");
    }

    #[test]
    fn sampler_uses_exponential_buckets() {
        let (node, exporter) = root();
        let sampler = node
            .sampler("latency_seconds", "Latency", 0.008, 30.0, &["method"])
            .unwrap();
        sampler.observe(0.01, &["get"]);

        let text = exporter.encode().unwrap();
        assert!(text.contains("latency_seconds_bucket{method=\"get\",le=\"0.008\"} 0"), "{text}");
        assert!(text.contains("latency_seconds_bucket{method=\"get\",le=\"0.016\"} 1"), "{text}");
        assert!(text.contains("latency_seconds_count{method=\"get\"} 1"), "{text}");
    }

    #[test]
    fn bad_range_is_an_error() {
        let (node, _) = root();
        assert!(matches!(
            node.sampler("broken", "Broken", 5.0, 1.0, &[]),
            Err(MetricError::InvalidRange { .. })
        ));
    }

    #[test]
    fn concurrent_increments_are_not_lost() {
        let (node, exporter) = root();
        let counter = node.counter("events_total", "Events", &["kind"]).unwrap();

        std::thread::scope(|s| {
            for _ in 0..8 {
                let counter = Arc::clone(&counter);
                s.spawn(move || {
                    for _ in 0..1000 {
                        counter.observe(1.0, &["tick"]);
                    }
                });
            }
        });

        let text = exporter.encode().unwrap();
        assert!(text.contains("events_total{kind=\"tick\"} 8000"), "{text}");
    }

    #[test]
    #[should_panic]
    fn label_count_mismatch_is_a_contract_violation() {
        let (node, _) = root();
        let counter = node.counter("calls_total", "Calls", &["method", "code"]).unwrap();
        counter.observe(1.0, &["only-method"]);
    }
}
