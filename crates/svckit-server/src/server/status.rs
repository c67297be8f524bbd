//! HTTP status surface, served on the status listener.
//!
//! - `GET /metrics`: every registered series in the Prometheus text format.
//! - `GET /debug/pprof/`: index of the profiling endpoints (`pprof` feature).
//! - `GET /debug/pprof/profile?seconds=N`: samples the whole process for `N`
//!   seconds (default 30, at most 300) and answers with a CPU flamegraph
//!   (`pprof` feature). One profile at a time; concurrent requests get
//!   `409 Conflict`.

use axum::Router;
use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use svckit_core::metric::{CONTENT_TYPE, Exporter};

#[cfg(feature = "pprof")]
use std::sync::Arc;
#[cfg(feature = "pprof")]
use std::sync::atomic::{AtomicBool, Ordering};

#[cfg(feature = "pprof")]
pub const DEFAULT_PROFILE_SECS: u64 = 30;
#[cfg(feature = "pprof")]
pub const MAX_PROFILE_SECS: u64 = 300;
#[cfg(feature = "pprof")]
const PROFILE_FREQUENCY_HZ: i32 = 99;

#[derive(Clone)]
struct StatusState {
    exporter: Exporter,
    #[cfg(feature = "pprof")]
    profiling: Arc<AtomicBool>,
}

/// Builds the status router for `exporter`.
pub fn router(exporter: Exporter) -> Router {
    with_state(StatusState {
        exporter,
        #[cfg(feature = "pprof")]
        profiling: Arc::new(AtomicBool::new(false)),
    })
}

fn with_state(state: StatusState) -> Router {
    let router = Router::new().route("/metrics", get(metrics));

    #[cfg(feature = "pprof")]
    let router = router
        .route("/debug/pprof/", get(profiling::index))
        .route("/debug/pprof/profile", get(profiling::profile));

    router.with_state(state)
}

async fn metrics(State(state): State<StatusState>) -> Response {
    match state.exporter.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(err) => {
            tracing::warn!(%err, "can't encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
        }
    }
}

#[cfg(feature = "pprof")]
mod profiling {
    use super::*;
    use axum::extract::Query;
    use serde::Deserialize;
    use std::time::Duration;

    const INDEX: &str = "\
/debug/pprof/

profile?seconds=N   CPU flamegraph (SVG) sampled over N seconds (default 30, max 300)
";

    #[derive(Debug, Deserialize)]
    pub(super) struct ProfileParams {
        seconds: Option<u64>,
    }

    /// Marks the process as being profiled until dropped.
    pub(super) struct Busy(Arc<AtomicBool>);

    impl Busy {
        pub(super) fn acquire(flag: &Arc<AtomicBool>) -> Option<Self> {
            flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .ok()
                .map(|_| Self(Arc::clone(flag)))
        }
    }

    impl Drop for Busy {
        fn drop(&mut self) {
            self.0.store(false, Ordering::Release);
        }
    }

    pub(super) async fn index() -> &'static str {
        INDEX
    }

    pub(super) async fn profile(
        State(state): State<StatusState>,
        Query(params): Query<ProfileParams>,
    ) -> Response {
        let seconds = params
            .seconds
            .unwrap_or(DEFAULT_PROFILE_SECS)
            .clamp(1, MAX_PROFILE_SECS);

        let Some(busy) = Busy::acquire(&state.profiling) else {
            return (StatusCode::CONFLICT, "a profile is already being collected\n").into_response();
        };

        tracing::info!(seconds, "collecting cpu profile");
        let collected = tokio::task::spawn_blocking(move || {
            let _busy = busy;
            flamegraph(Duration::from_secs(seconds))
        })
        .await;

        match collected {
            Ok(Ok(svg)) => ([(header::CONTENT_TYPE, "image/svg+xml")], svg).into_response(),
            Ok(Err(err)) => {
                tracing::warn!(%err, "cpu profile failed");
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
            Err(err) => {
                tracing::warn!(%err, "cpu profile task failed");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }

    fn flamegraph(duration: Duration) -> Result<Vec<u8>, ::pprof::Error> {
        let guard = ::pprof::ProfilerGuardBuilder::default()
            .frequency(PROFILE_FREQUENCY_HZ)
            .blocklist(&["libc", "libgcc", "pthread", "vdso"])
            .build()?;
        std::thread::sleep(duration);

        let mut svg = Vec::new();
        guard.report().build()?.flamegraph(&mut svg)?;
        Ok(svg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use svckit_core::metric::prometheus;
    use tower::ServiceExt;

    async fn get_path(router: Router, uri: &str) -> (StatusCode, Option<String>, String) {
        let response = router
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .map(|v| v.to_str().unwrap().to_owned());
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, content_type, String::from_utf8_lossy(&body).into_owned())
    }

    #[tokio::test]
    async fn metrics_are_scrapeable() {
        let (node, exporter) = prometheus();
        node.with_label("appname", "appd")
            .counter("widgets_total", "Widgets", &["color"])
            .unwrap()
            .observe(2.0, &["blue"]);

        let (status, content_type, body) = get_path(router(exporter), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(content_type.as_deref(), Some(CONTENT_TYPE));
        assert!(
            body.contains("widgets_total{appname=\"appd\",color=\"blue\"} 2"),
            "{body}"
        );
    }

    #[tokio::test]
    async fn unknown_paths_are_not_found() {
        let (_, exporter) = prometheus();
        let (status, _, _) = get_path(router(exporter), "/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[cfg(feature = "pprof")]
    #[tokio::test]
    async fn pprof_index_lists_the_profile() {
        let (_, exporter) = prometheus();
        let (status, _, body) = get_path(router(exporter), "/debug/pprof/").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("profile?seconds=N"), "{body}");
    }

    #[cfg(feature = "pprof")]
    #[tokio::test]
    async fn only_one_profile_at_a_time() {
        let (_, exporter) = prometheus();
        let state = StatusState {
            exporter,
            profiling: Arc::new(AtomicBool::new(false)),
        };
        let _held = profiling::Busy::acquire(&state.profiling).unwrap();

        let (status, _, _) = get_path(with_state(state), "/debug/pprof/profile?seconds=1").await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[cfg(feature = "pprof")]
    #[tokio::test]
    async fn malformed_seconds_are_rejected() {
        let (_, exporter) = prometheus();
        let (status, _, _) =
            get_path(router(exporter), "/debug/pprof/profile?seconds=soon").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
