use anyhow::bail;
use clap::Parser;
use core::time::Duration;
use std::path::PathBuf;

/// Runtime configuration for the `userstats-server` binary.
///
/// Every value can be given as a CLI flag or an environment variable (a
/// `.env` file in the working directory is loaded first).
#[derive(Parser, Debug, Clone)]
#[command(
    name = "userstats-server",
    version,
    about = "HTTP service returning paginated users with table-wide statistics"
)]
pub struct UserServiceArgs {
    /// Address the HTTP server listens on.
    ///
    /// Environment variable: `HTTP_ADDR`
    #[arg(long, env = "HTTP_ADDR", default_value_t = String::from("0.0.0.0:8185"))]
    pub http_addr: String,

    /// URI of the points service, e.g. `http://points:50051`.
    ///
    /// Environment variable: `POINT_SRVC_ADDR`
    #[arg(long, env = "POINT_SRVC_ADDR", default_value_t = String::from("http://127.0.0.1:50051"))]
    pub point_service_addr: String,

    /// Maximum number of live connections to the points service.
    ///
    /// Environment variable: `POINT_SRVC_MAX`
    #[arg(long, env = "POINT_SRVC_MAX", default_value_t = 10)]
    pub point_service_max: usize,

    /// Timeout for dialing a new connection to the points service.
    ///
    /// Environment variable: `CONNECT_TIMEOUT_MS`
    #[arg(long, env = "CONNECT_TIMEOUT_MS", default_value_t = 1_000)]
    pub connect_timeout_ms: u64,

    /// Deadline for a single points lookup.
    ///
    /// Environment variable: `RPC_DEADLINE_MS`
    #[arg(long, env = "RPC_DEADLINE_MS", default_value_t = 5_000)]
    pub rpc_deadline_ms: u64,

    /// How long an aggregation waits for a pooled connection when every
    /// connection is checked out.
    ///
    /// Environment variable: `POOL_ACQUIRE_TIMEOUT_MS`
    #[arg(long, env = "POOL_ACQUIRE_TIMEOUT_MS", default_value_t = 5_000)]
    pub pool_acquire_timeout_ms: u64,

    /// JSON array of users to serve from memory. Without it (and without a
    /// database) the table starts empty.
    ///
    /// Environment variable: `USERS_FILE`
    #[arg(long, env = "USERS_FILE")]
    pub users_file: Option<PathBuf>,

    /// PostgreSQL connection string. Takes precedence over `USERS_FILE`.
    ///
    /// Environment variable: `DATABASE_URL`
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of open database connections.
    ///
    /// Environment variable: `DB_MAX_OPEN`
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DB_MAX_OPEN", default_value_t = 10)]
    pub db_max_open: u32,
}

#[derive(Debug, Clone)]
pub struct UserServiceConfig {
    pub http_addr: String,
    pub point_service_addr: String,
    pub point_service_max: usize,
    pub connect_timeout: Duration,
    pub rpc_deadline: Duration,
    pub pool_acquire_timeout: Duration,
    pub users_file: Option<PathBuf>,
    #[cfg(feature = "postgres")]
    pub database_url: Option<String>,
    #[cfg(feature = "postgres")]
    pub db_max_open: u32,
}

impl TryFrom<UserServiceArgs> for UserServiceConfig {
    type Error = anyhow::Error;

    fn try_from(args: UserServiceArgs) -> Result<Self, Self::Error> {
        if args.http_addr.trim().is_empty() {
            bail!("HTTP_ADDR must not be empty");
        }
        if args.point_service_addr.trim().is_empty() {
            bail!("POINT_SRVC_ADDR must not be empty");
        }
        if args.point_service_max == 0 {
            bail!("POINT_SRVC_MAX must be greater than 0");
        }
        if args.connect_timeout_ms == 0 {
            bail!("CONNECT_TIMEOUT_MS must be greater than 0");
        }
        if args.rpc_deadline_ms == 0 {
            bail!("RPC_DEADLINE_MS must be greater than 0");
        }
        if args.pool_acquire_timeout_ms == 0 {
            bail!("POOL_ACQUIRE_TIMEOUT_MS must be greater than 0");
        }
        #[cfg(feature = "postgres")]
        if args.db_max_open == 0 {
            bail!("DB_MAX_OPEN must be greater than 0");
        }

        Ok(Self {
            http_addr: args.http_addr,
            point_service_addr: args.point_service_addr,
            point_service_max: args.point_service_max,
            connect_timeout: Duration::from_millis(args.connect_timeout_ms),
            rpc_deadline: Duration::from_millis(args.rpc_deadline_ms),
            pool_acquire_timeout: Duration::from_millis(args.pool_acquire_timeout_ms),
            users_file: args.users_file,
            #[cfg(feature = "postgres")]
            database_url: args.database_url,
            #[cfg(feature = "postgres")]
            db_max_open: args.db_max_open,
        })
    }
}

/// Runtime configuration for the `points-server` binary.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "points-server",
    version,
    about = "A gRPC service answering user point balances"
)]
pub struct PointsServerArgs {
    /// Address to listen on.
    ///
    /// Environment variable: `SERVER_ADDR`
    #[arg(long, env = "SERVER_ADDR", default_value_t = String::from("0.0.0.0:50051"))]
    pub server_addr: String,

    /// JSON object mapping user IDs to point balances.
    ///
    /// Environment variable: `POINTS_FILE`
    #[arg(long, env = "POINTS_FILE")]
    pub points_file: Option<PathBuf>,

    /// PostgreSQL connection string for the `points` table. Takes precedence
    /// over `POINTS_FILE`.
    ///
    /// Environment variable: `DATABASE_URL`
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Maximum number of open database connections.
    ///
    /// Environment variable: `DB_MAX_OPEN`
    #[cfg(feature = "postgres")]
    #[arg(long, env = "DB_MAX_OPEN", default_value_t = 10)]
    pub db_max_open: u32,
}

#[derive(Debug, Clone)]
pub struct PointsServerConfig {
    pub server_addr: String,
    pub points_file: Option<PathBuf>,
    #[cfg(feature = "postgres")]
    pub database_url: Option<String>,
    #[cfg(feature = "postgres")]
    pub db_max_open: u32,
}

impl TryFrom<PointsServerArgs> for PointsServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: PointsServerArgs) -> Result<Self, Self::Error> {
        if args.server_addr.trim().is_empty() {
            bail!("SERVER_ADDR must not be empty");
        }
        #[cfg(feature = "postgres")]
        if args.db_max_open == 0 {
            bail!("DB_MAX_OPEN must be greater than 0");
        }

        Ok(Self {
            server_addr: args.server_addr,
            points_file: args.points_file,
            #[cfg(feature = "postgres")]
            database_url: args.database_url,
            #[cfg(feature = "postgres")]
            db_max_open: args.db_max_open,
        })
    }
}
