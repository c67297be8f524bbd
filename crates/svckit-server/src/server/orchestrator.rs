use super::config::Settings;
use super::error::{Listener, ServiceError};
use super::instrument::{InstrumentLayer, Instrumentor, MethodTable, StreamShape};
use super::lifecycle::{BoundAddrs, Shared, State};
use super::status;
use super::telemetry::fatal;
use super::ServiceHandle;
use axum::response::IntoResponse;
use std::convert::Infallible;
use std::fmt::Display;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use svckit_core::discover::Provider;
use svckit_core::flag::FlagSet;
use svckit_core::metric::{self, MetricNode};
use svckit_core::{ConfigError, DiscoveryError, ServiceDescriptor};
use tokio::net::TcpListener;
use tokio::signal;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::server::NamedService;
use tonic::service::{Routes, RoutesBuilder};
use tonic::transport::Server;
use tracing::{Instrument, Span, debug, error, info, warn};

/// The gRPC services a registration callback attaches.
///
/// Services added here are served behind the call instrumentor; there is no
/// other way onto the RPC listener.
pub struct RpcRoutes {
    builder: RoutesBuilder,
    methods: MethodTable,
}

impl RpcRoutes {
    fn new(methods: MethodTable) -> Self {
        Self {
            builder: RoutesBuilder::default(),
            methods,
        }
    }

    /// Adds a tonic service. Its methods are labelled by their full path in
    /// the call metrics.
    ///
    /// Every method of the service counts as unary until declared otherwise
    /// with [`RpcRoutes::streaming`]; a streaming method left undeclared is
    /// reported in the `unary_*` series.
    pub fn add_service<S>(&mut self, svc: S) -> &mut Self
    where
        S: tower::Service<http::Request<tonic::body::Body>, Error = Infallible>
            + NamedService
            + Clone
            + Send
            + Sync
            + 'static,
        S::Response: IntoResponse,
        S::Future: Send + 'static,
    {
        self.methods.add_service(S::NAME);
        self.builder.add_service(svc);
        self
    }

    /// Declares `path` (`/package.Service/Method`) as streaming, so its calls
    /// are counted in the `stream_*` series. Methods are unary otherwise.
    pub fn streaming(&mut self, path: &str, shape: StreamShape) -> &mut Self {
        self.methods.add_streaming(path, shape);
        self
    }

    fn into_routes(self) -> Routes {
        for service in self.methods.unshaped_services() {
            debug!(%service, "no streaming methods declared, all calls count as unary");
        }
        self.builder.routes()
    }
}

/// Everything the registration callback gets to work with.
pub struct Registration<'r, C, D> {
    /// The parsed settings.
    pub settings: &'r C,
    /// The `service` span, tagged with the app name.
    pub span: &'r Span,
    /// Metric node labelled with `appname`.
    pub metrics: &'r MetricNode,
    /// What the discovery provider returned.
    pub dialer: D,
    /// Where the gRPC services go.
    pub rpc: &'r mut RpcRoutes,
}

/// A gRPC service with a status server, tied to a discovery backend.
///
/// Startup is strictly ordered: parse the flags, bind the gRPC listener then
/// the status listener, register with discovery, let the caller add its
/// services, and finally serve both listeners. Any startup failure is
/// returned and nothing is retried.
///
/// Once running, both servers share one fate: when either stops, for any
/// reason, the other is stopped too.
pub struct Service<P, C> {
    appname: String,
    about: String,
    provider: P,
    settings: C,
    status_routes: axum::Router,
    handle_signals: bool,
    shared: Arc<Shared>,
}

impl<P, C> Service<P, C>
where
    P: Provider,
    C: Settings,
{
    pub fn new(appname: impl Into<String>, provider: P, settings: C) -> Self {
        Self {
            appname: appname.into(),
            about: String::new(),
            provider,
            settings,
            status_routes: axum::Router::new(),
            handle_signals: true,
            shared: Shared::new(),
        }
    }

    /// One-line description shown in the usage listing.
    pub fn about(mut self, about: impl Into<String>) -> Self {
        self.about = about.into();
        self
    }

    /// Extra routes served on the status listener next to `/metrics`.
    ///
    /// # Panics
    ///
    /// [`Service::run`] panics if a route overlaps one of the built-in ones.
    pub fn with_status_routes(mut self, routes: axum::Router) -> Self {
        self.status_routes = self.status_routes.merge(routes);
        self
    }

    /// Whether Ctrl-C and `SIGTERM` stop the service. On by default.
    pub fn handle_signals(mut self, enabled: bool) -> Self {
        self.handle_signals = enabled;
        self
    }

    pub fn handle(&self) -> ServiceHandle {
        ServiceHandle::new(Arc::clone(&self.shared))
    }

    /// Runs the service until it is shut down.
    ///
    /// `args` starts with the program name. `register` runs once discovery
    /// has succeeded and must add the service's gRPC handlers.
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`] raised before both servers are running. Once
    /// they run, stopping is not an error, and neither is a shutdown
    /// requested while starting up.
    pub async fn run<I, A, E, K, V, R>(self, args: I, environ: E, register: R) -> Result<(), ServiceError>
    where
        I: IntoIterator<Item = A>,
        A: Into<String>,
        E: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
        R: FnOnce(Registration<'_, C, P::Dialer>) -> anyhow::Result<()>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        let environ: Vec<(String, String)> = environ
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();

        let span = tracing::info_span!("service", appname = %self.appname);
        let shared = Arc::clone(&self.shared);

        let result = self
            .drive(span.clone(), args, environ, register)
            .instrument(span)
            .await;

        if result.is_err() {
            shared.shutdown().cancel();
            shared.set_state(State::Stopped);
        }
        result
    }

    async fn drive<R>(
        mut self,
        span: Span,
        args: Vec<String>,
        environ: Vec<(String, String)>,
        register: R,
    ) -> Result<(), ServiceError>
    where
        R: FnOnce(Registration<'_, C, P::Dialer>) -> anyhow::Result<()>,
    {
        info!("preparing");
        let (root, exporter) = metric::prometheus();
        let metrics = root.with_label("appname", &self.appname);

        info!("parsing flags");
        {
            let mut fs = FlagSet::new(self.appname.clone());
            fs.about(self.about.clone());
            self.settings.declare(&mut fs);
            fs.parse_from(args, environ)?;
        }
        let addrs = self.settings.addrs();
        addrs.validate()?;

        self.shared.set_state(State::Binding);
        let (rpc_listener, rpc_addr) = bind(Listener::Rpc, &addrs.rpc).await?;
        let (status_listener, status_addr) = bind(Listener::Status, &addrs.status).await?;
        let bound = BoundAddrs {
            rpc: rpc_addr,
            status: status_addr,
        };
        self.shared.set_bound(bound);

        self.shared.set_state(State::Registering);
        let instrumentor = Instrumentor::new(metrics.as_ref())?;
        let mut rpc = RpcRoutes::new(instrumentor.methods().clone());

        info!(discover.addr = %addrs.discovery, "registering with discovery");
        let desc = ServiceDescriptor::new(
            self.appname.as_str(),
            bound.rpc.to_string(),
            bound.status.to_string(),
        );
        let registered = self
            .provider
            .register(self.shared.shutdown().child_token(), &addrs.discovery, &desc)
            .await;
        let dialer = match registered {
            Ok(dialer) => dialer,
            Err(DiscoveryError::Cancelled) if self.shared.shutdown().is_cancelled() => {
                info!("shutdown requested while starting, stopping");
                self.shared.set_state(State::ShuttingDown);
                self.shared.set_state(State::Stopped);
                return Ok(());
            }
            Err(source) => {
                return Err(ServiceError::Discovery {
                    addr: addrs.discovery.clone(),
                    source,
                });
            }
        };

        info!("registering service");
        register(Registration {
            settings: &self.settings,
            span: &span,
            metrics: &metrics,
            dialer,
            rpc: &mut rpc,
        })
        .map_err(ServiceError::Setup)?;

        let status_router = status::router(exporter).merge(self.status_routes);

        info!(addr = %bound.status, "starting status server");
        let status_task = tokio::spawn(
            serve_status(
                status_listener,
                status_router,
                self.shared.status_stop().clone(),
                self.shared.shutdown().clone(),
            )
            .instrument(span.clone()),
        );

        info!(addr = %bound.rpc, "starting rpc server");
        let rpc_task = tokio::spawn(
            serve_rpc(
                rpc_listener,
                instrumentor.layer(),
                rpc.into_routes(),
                self.shared.rpc_stop().clone(),
                self.shared.shutdown().clone(),
            )
            .instrument(span),
        );

        self.shared.set_state(State::Running);
        wait_for_shutdown(self.shared.shutdown(), self.handle_signals).await;

        self.shared.set_state(State::ShuttingDown);
        info!("shutting down");
        for (listener, task) in [(Listener::Rpc, rpc_task), (Listener::Status, status_task)] {
            if let Err(err) = task.await {
                warn!(%err, "failed to close {listener} listener");
            }
        }

        self.shared.set_state(State::Stopped);
        info!("stopped");
        Ok(())
    }
}

/// Runs `service` with the process arguments and environment.
///
/// `-h`/`-help` prints the usage listing to stderr and exits with status 1.
/// Any other startup failure is logged and exits with status 1 as well.
pub async fn start<P, C, R>(service: Service<P, C>, register: R)
where
    P: Provider,
    C: Settings,
    R: FnOnce(Registration<'_, C, P::Dialer>) -> anyhow::Result<()>,
{
    let args = std::env::args_os().map(|a| a.to_string_lossy().into_owned());
    let environ = std::env::vars_os().map(|(k, v)| {
        (
            k.to_string_lossy().into_owned(),
            v.to_string_lossy().into_owned(),
        )
    });

    match service.run(args, environ, register).await {
        Ok(()) => {}
        Err(ServiceError::Config(ConfigError::HelpRequested { usage })) => {
            eprintln!("{usage}");
            std::process::exit(1);
        }
        Err(err) => fatal(err, "can't start service"),
    }
}

/// Binds `addr` and returns the listener with the address it ended up on.
async fn bind(
    listener: Listener,
    addr: &str,
) -> Result<(TcpListener, SocketAddr), ServiceError> {
    let invalid = |source| ServiceError::InvalidAddress {
        listener,
        addr: addr.to_owned(),
        source,
    };
    let resolved = tokio::net::lookup_host(addr)
        .await
        .map_err(invalid)?
        .next()
        .ok_or_else(|| {
            invalid(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "resolves to no address",
            ))
        })?;

    let failed = |source| ServiceError::Bind {
        listener,
        addr: resolved,
        source,
    };
    let socket = TcpListener::bind(resolved).await.map_err(failed)?;
    let local = socket.local_addr().map_err(failed)?;
    Ok((socket, local))
}

/// Serves until `stop` fires, then drops the server along with its listener.
/// Connections still open are not waited for.
async fn serve_status(
    listener: TcpListener,
    router: axum::Router,
    stop: CancellationToken,
    shutdown: CancellationToken,
) {
    let _fail_together = shutdown.clone().drop_guard();
    let result = tokio::select! {
        result = axum::serve(listener, router).into_future() => result,
        () = stop.cancelled() => Ok(()),
    };
    report_exit("http", &shutdown, result);
}

async fn serve_rpc(
    listener: TcpListener,
    layer: InstrumentLayer,
    routes: Routes,
    stop: CancellationToken,
    shutdown: CancellationToken,
) {
    let _fail_together = shutdown.clone().drop_guard();
    let server = Server::builder()
        .layer(layer)
        .add_routes(routes)
        .serve_with_incoming(TcpListenerStream::new(listener));
    let result = tokio::select! {
        result = server => result,
        () = stop.cancelled() => Ok(()),
    };
    report_exit("rpc", &shutdown, result);
}

fn report_exit<E: Display>(server: &str, shutdown: &CancellationToken, result: Result<(), E>) {
    match result {
        Err(err) => error!(%err, "{server} server quit unexpectedly"),
        Ok(()) if shutdown.is_cancelled() => info!("{server} server stopped"),
        Ok(()) => error!("{server} server quit unexpectedly"),
    }
}

async fn wait_for_shutdown(shutdown: &CancellationToken, handle_signals: bool) {
    if !handle_signals {
        shutdown.cancelled().await;
        return;
    }

    tokio::select! {
        () = shutdown.cancelled() => {}
        () = shutdown_signal() => {
            info!("shutdown signal received, stopping");
            shutdown.cancel();
        }
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM signal");
            }
            Err(err) => {
                warn!(%err, "can't install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("received Ctrl+C signal"),
            Err(err) => {
                warn!(%err, "can't install Ctrl+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::StandardAddrs;
    use std::time::Duration;
    use svckit_core::discover::{Catalog, LocalDialer, LocalProvider};
    use tokio::task::JoinHandle;
    use tonic_health::pb::HealthCheckRequest;
    use tonic_health::pb::health_client::HealthClient;

    const APP: &str = "svckit-test";
    const WAIT: Duration = Duration::from_secs(10);

    fn args(discovery: &str) -> Vec<String> {
        vec![
            APP.to_owned(),
            "-rpc.addr=127.0.0.1:0".to_owned(),
            "-status.addr=127.0.0.1:0".to_owned(),
            format!("-discovery.addr={discovery}"),
        ]
    }

    fn no_env() -> Vec<(String, String)> {
        Vec::new()
    }

    fn health_service(reg: Registration<'_, StandardAddrs, LocalDialer>) -> anyhow::Result<()> {
        let (_reporter, health) = tonic_health::server::health_reporter();
        reg.rpc
            .add_service(health)
            .streaming("/grpc.health.v1.Health/Watch", StreamShape::SERVER);
        Ok(())
    }

    fn spawn_service(
        provider: LocalProvider,
    ) -> (ServiceHandle, JoinHandle<Result<(), ServiceError>>) {
        let service = Service::new(APP, provider, StandardAddrs::default()).handle_signals(false);
        let handle = service.handle();
        let task = tokio::spawn(service.run(args("127.0.0.1:8500"), no_env(), health_service));
        (handle, task)
    }

    async fn scrape_until(url: &str, needle: &str) -> String {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            let body = reqwest::get(url).await.unwrap().text().await.unwrap();
            if body.contains(needle) || tokio::time::Instant::now() > deadline {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn serves_instrumented_rpc_and_metrics() {
        let catalog = Catalog::default();
        let (handle, task) = spawn_service(LocalProvider::new(catalog.clone()));
        let bound = handle.bound_addrs().await.unwrap();
        assert_eq!(handle.wait_for(State::Running).await, State::Running);

        assert_eq!(
            catalog.resolve(APP),
            vec![ServiceDescriptor::new(
                APP,
                bound.rpc.to_string(),
                bound.status.to_string()
            )]
        );

        let mut client = HealthClient::new(
            tonic::transport::Endpoint::from_shared(format!("http://{}", bound.rpc))
                .unwrap()
                .connect()
                .await
                .unwrap(),
        );
        client
            .check(HealthCheckRequest {
                service: String::new(),
            })
            .await
            .unwrap();
        let missing = client
            .check(HealthCheckRequest {
                service: "nope".to_owned(),
            })
            .await
            .unwrap_err();
        assert_eq!(missing.code(), tonic::Code::NotFound);

        let url = format!("http://{}/metrics", bound.status);
        let needle = "unary_response_total{appname=\"svckit-test\",code=\"NotFound\",method=\"/grpc.health.v1.Health/Check\"} 1";
        let body = scrape_until(&url, needle).await;
        assert!(body.contains(needle), "{body}");
        assert!(
            body.contains("unary_request_total{appname=\"svckit-test\",method=\"/grpc.health.v1.Health/Check\"} 2"),
            "{body}"
        );
        assert!(
            body.contains("unary_response_total{appname=\"svckit-test\",code=\"Ok\",method=\"/grpc.health.v1.Health/Check\"} 1"),
            "{body}"
        );
        assert!(
            body.contains("unary_response_duration_seconds_count{appname=\"svckit-test\",code=\"Ok\",method=\"/grpc.health.v1.Health/Check\"} 1"),
            "{body}"
        );

        handle.shutdown();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.state(), State::Stopped);

        tokio::time::timeout(WAIT, async {
            while !catalog.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn losing_the_status_server_stops_rpc() {
        let (handle, task) = spawn_service(LocalProvider::default());
        let bound = handle.bound_addrs().await.unwrap();
        handle.wait_for(State::Running).await;

        handle.close_status_listener();
        tokio::time::timeout(WAIT, handle.stopped()).await.unwrap();
        task.await.unwrap().unwrap();

        assert!(handle.is_shutdown_requested());
        assert!(tokio::net::TcpStream::connect(bound.rpc).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn open_streams_do_not_hold_up_shutdown() {
        let (handle, task) = spawn_service(LocalProvider::default());
        let bound = handle.bound_addrs().await.unwrap();
        handle.wait_for(State::Running).await;

        let mut client = HealthClient::new(
            tonic::transport::Endpoint::from_shared(format!("http://{}", bound.rpc))
                .unwrap()
                .connect()
                .await
                .unwrap(),
        );
        let mut updates = client
            .watch(HealthCheckRequest {
                service: String::new(),
            })
            .await
            .unwrap()
            .into_inner();
        assert!(updates.message().await.unwrap().is_some());

        handle.close_status_listener();
        tokio::time::timeout(WAIT, handle.stopped()).await.unwrap();
        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();

        assert!(tokio::net::TcpStream::connect(bound.rpc).await.is_err());
        assert!(tokio::net::TcpStream::connect(bound.status).await.is_err());
        drop(updates);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn losing_the_rpc_server_stops_status() {
        let (handle, task) = spawn_service(LocalProvider::default());
        let bound = handle.bound_addrs().await.unwrap();
        handle.wait_for(State::Running).await;

        handle.close_rpc_listener();
        tokio::time::timeout(WAIT, handle.stopped()).await.unwrap();
        task.await.unwrap().unwrap();

        assert!(tokio::net::TcpStream::connect(bound.status).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_shutdown_requests_stop_once() {
        let (handle, task) = spawn_service(LocalProvider::default());
        handle.wait_for(State::Running).await;

        let signallers: Vec<_> = (0..8)
            .map(|i| {
                let handle = handle.clone();
                tokio::spawn(async move {
                    match i % 3 {
                        0 => handle.shutdown(),
                        1 => handle.close_rpc_listener(),
                        _ => handle.close_status_listener(),
                    }
                })
            })
            .collect();
        for signaller in signallers {
            signaller.await.unwrap();
        }

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.state(), State::Stopped);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn busy_rpc_port_is_a_bind_error() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();

        let service = Service::new(APP, LocalProvider::default(), StandardAddrs::default())
            .handle_signals(false);
        let handle = service.handle();
        let argv = vec![
            APP.to_owned(),
            format!("-rpc.addr=127.0.0.1:{port}"),
            "-status.addr=127.0.0.1:0".to_owned(),
        ];
        let err = service.run(argv, no_env(), health_service).await.unwrap_err();

        match err {
            ServiceError::Bind {
                listener: Listener::Rpc,
                addr,
                ..
            } => assert_eq!(addr.port(), port),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(handle.state(), State::Stopped);
        assert!(handle.is_shutdown_requested());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn bad_flags_fail_before_binding() {
        let service = Service::new(APP, LocalProvider::default(), StandardAddrs::default())
            .handle_signals(false);
        let handle = service.handle();

        let err = service
            .run([APP, "-rpc.adr=127.0.0.1:0"], no_env(), health_service)
            .await
            .unwrap_err();

        assert!(
            matches!(err, ServiceError::Config(ConfigError::BadUsage { .. })),
            "{err:?}"
        );
        assert_eq!(handle.bound_addrs().await, None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn help_is_reported_as_such() {
        let service = Service::new(APP, LocalProvider::default(), StandardAddrs::default())
            .about("health checks over gRPC")
            .handle_signals(false);

        let err = service
            .run([APP, "-help"], no_env(), health_service)
            .await
            .unwrap_err();

        assert!(err.is_help());
        assert!(err.to_string().contains("health checks over gRPC"), "{err}");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn environment_supplies_addresses() {
        let service = Service::new(APP, LocalProvider::default(), StandardAddrs::default())
            .handle_signals(false);
        let handle = service.handle();
        let env = vec![
            ("SVCKIT-TEST_RPC_ADDR", "127.0.0.1:0"),
            ("SVCKIT-TEST_STATUS_ADDR", "127.0.0.1:0"),
        ];
        let task = tokio::spawn(service.run([APP], env, health_service));

        assert!(handle.bound_addrs().await.is_some());
        assert_eq!(handle.wait_for(State::Running).await, State::Running);
        handle.shutdown();
        task.await.unwrap().unwrap();
    }

    struct Refusing;

    impl Provider for Refusing {
        type Dialer = LocalDialer;

        async fn register(
            &self,
            _: CancellationToken,
            _: &str,
            _: &ServiceDescriptor,
        ) -> Result<LocalDialer, DiscoveryError> {
            Err(DiscoveryError::Rejected {
                reason: "catalog is full".to_owned(),
            })
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn discovery_failure_releases_the_listeners() {
        let service =
            Service::new(APP, Refusing, StandardAddrs::default()).handle_signals(false);
        let handle = service.handle();

        let err = service
            .run(args("127.0.0.1:8500"), no_env(), |reg| health_service(reg))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Discovery { .. }), "{err:?}");

        let bound = handle.bound_addrs().await.unwrap();
        assert!(tokio::net::TcpStream::connect(bound.rpc).await.is_err());
        assert!(tokio::net::TcpStream::connect(bound.status).await.is_err());
    }

    /// Holds registration open until the service is told to stop.
    struct Stalling;

    impl Provider for Stalling {
        type Dialer = LocalDialer;

        async fn register(
            &self,
            cancel: CancellationToken,
            _: &str,
            _: &ServiceDescriptor,
        ) -> Result<LocalDialer, DiscoveryError> {
            cancel.cancelled().await;
            Err(DiscoveryError::Cancelled)
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn shutdown_while_registering_is_not_an_error() {
        let service =
            Service::new(APP, Stalling, StandardAddrs::default()).handle_signals(false);
        let handle = service.handle();
        let task = tokio::spawn(service.run(args("127.0.0.1:8500"), no_env(), |reg| {
            health_service(reg)
        }));

        assert_eq!(handle.wait_for(State::Registering).await, State::Registering);
        handle.shutdown();

        tokio::time::timeout(WAIT, task).await.unwrap().unwrap().unwrap();
        assert_eq!(handle.state(), State::Stopped);

        let bound = handle.bound_addrs().await.unwrap();
        assert!(tokio::net::TcpStream::connect(bound.rpc).await.is_err());
        assert!(tokio::net::TcpStream::connect(bound.status).await.is_err());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_setup_withdraws_the_registration() {
        let catalog = Catalog::default();
        let service = Service::new(
            APP,
            LocalProvider::new(catalog.clone()),
            StandardAddrs::default(),
        )
        .handle_signals(false);

        let err = service
            .run(args("127.0.0.1:8500"), no_env(), |reg| {
                assert_eq!(reg.dialer.backend(), "127.0.0.1:8500".parse::<SocketAddr>().unwrap());
                assert_eq!(reg.dialer.resolve(APP).len(), 1);
                anyhow::bail!("handler wiring failed")
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Setup(_)), "{err:?}");

        tokio::time::timeout(WAIT, async {
            while !catalog.is_empty() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
    }
}
