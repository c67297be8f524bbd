use svckit_core::discover::LocalProvider;
use svckit_server::server::telemetry::{LogFormat, init_telemetry};
use svckit_server::{Service, StandardAddrs, State, StreamShape, start};
use tonic_health::ServingStatus;
use tonic_reflection::server::Builder;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

const APPNAME: &str = "svckit-demo";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();

    let providers = init_telemetry(APPNAME, LogFormat::from_env())?;

    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    let service = Service::new(APPNAME, LocalProvider::default(), StandardAddrs::default())
        .about("gRPC health and reflection behind the svckit harness");
    let handle = service.handle();

    tokio::spawn(async move {
        handle.wait_for(State::Running).await;
        health_reporter
            .set_service_status(APPNAME, ServingStatus::Serving)
            .await;
        handle.wait_for(State::ShuttingDown).await;
        health_reporter
            .set_service_status(APPNAME, ServingStatus::NotServing)
            .await;
    });

    start(service, move |reg| {
        let reflection = Builder::configure()
            .register_encoded_file_descriptor_set(tonic_health::pb::FILE_DESCRIPTOR_SET)
            .build_v1()?;

        reg.rpc
            .add_service(health_service)
            .add_service(reflection)
            .streaming("/grpc.health.v1.Health/Watch", StreamShape::SERVER)
            .streaming(
                "/grpc.reflection.v1.ServerReflection/ServerReflectionInfo",
                StreamShape::BIDI,
            );

        tracing::info!(parent: reg.span, backend = %reg.dialer.backend(), "handlers attached");
        Ok(())
    })
    .await;

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}
