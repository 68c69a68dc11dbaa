use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tonic::transport::Channel;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use userstats_server::{
    config::{UserServiceArgs, UserServiceConfig},
    pool::{ConnectionPool, Pool},
    repository::{MemoryRepository, Repository},
    service::{EnrichmentClient, UserService, handler},
    signal::shutdown_signal,
    telemetry::{TelemetryProviders, init_telemetry},
};

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = UserServiceArgs::parse();
    let config = UserServiceConfig::try_from(args)?;

    let providers = init_telemetry("userstats-server")?;

    // One pool for the whole process, shared by every request.
    let pool = Arc::new(Pool::grpc(
        config.point_service_addr.clone(),
        config.point_service_max,
        config.connect_timeout,
    )?);
    let enrichment = EnrichmentClient::new(config.rpc_deadline);

    #[cfg(feature = "postgres")]
    if let Some(url) = &config.database_url {
        let repo = userstats_server::repository::PgRepository::connect(url, config.db_max_open)
            .await?;
        tracing::info!("Using PostgreSQL user repository");
        let service = UserService::new(
            Arc::new(repo),
            pool,
            enrichment,
            config.pool_acquire_timeout,
        );
        return serve(&config, service, providers).await;
    }

    let repo = match &config.users_file {
        Some(path) => MemoryRepository::from_json_file(path).await?,
        None => MemoryRepository::default(),
    };
    tracing::info!(users = repo.len(), "Using in-memory user repository");

    let service = UserService::new(
        Arc::new(repo),
        pool,
        enrichment,
        config.pool_acquire_timeout,
    );
    serve(&config, service, providers).await
}

async fn serve<R, P>(
    config: &UserServiceConfig,
    service: UserService<R, P>,
    providers: TelemetryProviders,
) -> anyhow::Result<()>
where
    R: Repository,
    P: ConnectionPool<Conn = Channel>,
{
    log_startup_info(config);

    let app = handler::router(service.clone())
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    let listener = TcpListener::bind(&config.http_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shutdown signal received, closing connection pool");
    service.pool().close();

    tracing::info!("Service shut down successfully");
    providers.shutdown();
    Ok(())
}

fn log_startup_info(config: &UserServiceConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting user service on {} with full config: {:#?}",
            config.http_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting user service on {} (points service {}, pool size {})",
            config.http_addr,
            config.point_service_addr,
            config.point_service_max
        );
    }
}
