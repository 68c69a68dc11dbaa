use clap::Parser;
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::{codec::CompressionEncoding, transport::Server};
use tonic_health::server::HealthReporter;
use tonic_reflection::server::Builder;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use userstats_core::proto::{FILE_DESCRIPTOR_SET, point_server_server::PointServerServer};
use userstats_server::{
    config::{PointsServerArgs, PointsServerConfig},
    repository::{MemoryLedger, PointsLedger},
    service::PointsService,
    signal::shutdown_signal,
    telemetry::{TelemetryProviders, init_telemetry},
};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let args = PointsServerArgs::parse();
    let config = PointsServerConfig::try_from(args)?;

    let providers = init_telemetry("points-server")?;

    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let ledger =
            userstats_server::repository::PgLedger::connect(url, config.db_max_open).await?;
        tracing::info!("Using PostgreSQL points ledger");
        return serve(&config, PointsService::new(ledger), providers).await;
    }

    let ledger = match &config.points_file {
        Some(path) => MemoryLedger::from_json_file(path).await?,
        None => MemoryLedger::default(),
    };
    tracing::info!(balances = ledger.len(), "Using in-memory points ledger");

    serve(&config, PointsService::new(ledger), providers).await
}

async fn serve<L: PointsLedger>(
    config: &PointsServerConfig,
    service: PointsService<L>,
    providers: TelemetryProviders,
) -> anyhow::Result<()> {
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<PointServerServer<PointsService<L>>>()
        .await;

    let reflection = Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let listener = TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Starting points service on {}", config.server_addr);

    Server::builder()
        .http2_adaptive_window(Some(true))
        .layer(
            ServiceBuilder::new().layer(
                CorsLayer::new()
                    .allow_origin(Any)
                    .allow_methods(Any)
                    .allow_headers(Any),
            ),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_points_service(service))
        .serve_with_incoming_shutdown(
            TcpListenerStream::new(listener),
            drain::<L>(health_reporter),
        )
        .await?;

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn build_points_service<L: PointsLedger>(
    service: PointsService<L>,
) -> PointServerServer<PointsService<L>> {
    PointServerServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}

async fn drain<L: PointsLedger>(health_reporter: HealthReporter) {
    shutdown_signal().await;
    tracing::info!("Shutdown signal received, terminating gracefully...");
    health_reporter
        .set_not_serving::<PointServerServer<PointsService<L>>>()
        .await;
}
