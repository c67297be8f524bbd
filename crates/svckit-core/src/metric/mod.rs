//! # Metrics
//!
//! A [`Node`] hands out labeled metric handles and can be narrowed with
//! constant labels. Handles are opaque [`Observer`]s, so callers never see
//! the storage behind them and tests can substitute their own.
//!
//! - [`prometheus()`] - the Prometheus-backed node and its [`Exporter`].
//! - [`exponential_buckets`] - histogram boundaries from a `(min, max)` range.
//! - [`StopWatch`] - records the time elapsed since it started, per step.

mod buckets;
mod prom;

pub use buckets::{MAX_MAGNITUDES, exponential_buckets};
pub use prom::{CONTENT_TYPE, Exporter, PrometheusNode, prometheus};

use crate::MetricError;
use std::sync::Arc;
use std::time::Instant;

/// A named, labeled emission point.
///
/// Implementations must tolerate concurrent calls from any number of tasks.
pub trait Observer: Send + Sync {
    /// Records `value` for the series selected by `labels`.
    ///
    /// # Panics
    ///
    /// May panic if `labels` does not match, in count, the label names the
    /// handle was created with.
    fn observe(&self, value: f64, labels: &[&str]);
}

/// Handle that accumulates values.
pub type Counter = Arc<dyn Observer>;

/// Handle that records values into histogram buckets.
pub type Sampler = Arc<dyn Observer>;

/// Shared, type-erased metric node.
pub type MetricNode = Arc<dyn Node>;

/// Creates metric handles and derives labeled views.
pub trait Node: Send + Sync {
    /// Returns the counter called `name`, creating it on first request.
    ///
    /// # Errors
    ///
    /// [`MetricError::Conflict`] if `name` is already used with another
    /// kind or other label names.
    fn counter(&self, name: &str, desc: &str, labels: &[&str]) -> Result<Counter, MetricError>;

    /// Returns the histogram called `name`, with exponential buckets spanning
    /// `[min, max]`, creating it on first request.
    ///
    /// # Errors
    ///
    /// [`MetricError::InvalidRange`] for a bad range, and
    /// [`MetricError::Conflict`] as for [`Node::counter`].
    fn sampler(
        &self,
        name: &str,
        desc: &str,
        min: f64,
        max: f64,
        labels: &[&str],
    ) -> Result<Sampler, MetricError>;

    /// A view of this node whose metrics carry `key=value` as a constant
    /// label. The receiver is left unchanged.
    fn with_label(&self, key: &str, value: &str) -> MetricNode;
}

/// Observes the seconds elapsed since it was started, one sample per step.
///
/// The sampler must have been declared with a single label, which receives
/// the step name.
pub struct StopWatch {
    sampler: Sampler,
    start: Instant,
}

impl StopWatch {
    pub fn start(sampler: Sampler) -> Self {
        Self {
            sampler,
            start: Instant::now(),
        }
    }

    /// Records the time since [`StopWatch::start`] under `step`.
    pub fn lap(&self, step: &str) {
        self.sampler
            .observe(self.start.elapsed().as_secs_f64(), &[step]);
    }
}
