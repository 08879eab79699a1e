use crate::server::error::{Error, Result};
use clap::{Parser, ValueEnum};
use core::{fmt, time::Duration};
use sqlx::postgres::{PgConnectOptions, PgSslMode};
use std::net::SocketAddr;

/// Runtime configuration for the `users-api-server` binary.
///
/// Every value is read from a CLI flag, falling back to an environment
/// variable (a `.env` file in the working directory is loaded first), then to
/// a default suited to local development against a stock PostgreSQL
/// container.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "users-api-server",
    version,
    about = "A gRPC users service with a REST/JSON gateway"
)]
pub struct CliArgs {
    /// Database host.
    ///
    /// Environment variable: `DB_HOST`
    #[arg(long, env = "DB_HOST", default_value_t = String::from("localhost"))]
    pub db_host: String,

    /// Database port.
    ///
    /// Environment variable: `DB_PORT`
    #[arg(long, env = "DB_PORT", default_value_t = 5432)]
    pub db_port: u16,

    /// Database user.
    ///
    /// Environment variable: `DB_USER`
    #[arg(long, env = "DB_USER", default_value_t = String::from("postgres"))]
    pub db_user: String,

    /// Database password.
    ///
    /// Environment variable: `DB_PASSWORD`
    #[arg(long, env = "DB_PASSWORD", default_value_t = String::from("postgres"), hide_env_values = true)]
    pub db_password: String,

    /// Database name.
    ///
    /// Environment variable: `DB_NAME`
    #[arg(long, env = "DB_NAME", default_value_t = String::from("users_api"))]
    pub db_name: String,

    /// Database SSL mode: disable, allow, prefer, require, verify-ca or
    /// verify-full.
    ///
    /// Environment variable: `DB_SSLMODE`
    #[arg(long, env = "DB_SSLMODE", default_value_t = String::from("disable"))]
    pub db_ssl_mode: String,

    /// Address the gRPC server listens on.
    ///
    /// Environment variable: `GRPC_ADDR`
    #[arg(long, env = "GRPC_ADDR", default_value_t = SocketAddr::from(([0, 0, 0, 0], 8080)))]
    pub grpc_addr: SocketAddr,

    /// Address the REST/JSON gateway listens on.
    ///
    /// Environment variable: `HTTP_ADDR`
    #[arg(long, env = "HTTP_ADDR", default_value_t = SocketAddr::from(([0, 0, 0, 0], 8081)))]
    pub http_addr: SocketAddr,

    /// Upper bound, in seconds, on how long the HTTP gateway may take to
    /// drain in-flight requests during shutdown.
    ///
    /// Environment variable: `DRAIN_TIMEOUT_SECS`
    #[arg(long, env = "DRAIN_TIMEOUT_SECS", default_value_t = 10)]
    pub drain_timeout_secs: u64,

    /// Service name reported to telemetry backends.
    ///
    /// Environment variable: `SERVICE_NAME`
    #[arg(long, env = "SERVICE_NAME", default_value_t = String::from("users-api"))]
    pub service_name: String,

    /// Console log format.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

/// Output format of the console log layer.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Multi-line, human readable.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

/// Connection settings for the record store.
#[derive(Clone)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub name: String,
    pub ssl_mode: PgSslMode,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("name", &self.name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

impl DatabaseConfig {
    /// Builds the driver connection options.
    pub fn connect_options(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.user)
            .password(&self.password)
            .database(&self.name)
            .ssl_mode(self.ssl_mode)
    }
}

/// Settings for the logging subscriber and telemetry resource.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: String::from("users-api"),
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database: DatabaseConfig,
    pub grpc_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub drain_timeout: Duration,
    pub telemetry: TelemetryConfig,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = Error;

    fn try_from(args: CliArgs) -> Result<Self> {
        let ssl_mode = args
            .db_ssl_mode
            .parse::<PgSslMode>()
            .map_err(|_| Error::Config {
                reason: format!("DB_SSLMODE `{}` is not a valid SSL mode", args.db_ssl_mode),
            })?;

        if args.drain_timeout_secs == 0 {
            return Err(Error::Config {
                reason: "DRAIN_TIMEOUT_SECS must be greater than 0".to_string(),
            });
        }

        if args.grpc_addr == args.http_addr {
            return Err(Error::Config {
                reason: format!(
                    "GRPC_ADDR and HTTP_ADDR must differ (both are {})",
                    args.grpc_addr
                ),
            });
        }

        Ok(Self {
            database: DatabaseConfig {
                host: args.db_host,
                port: args.db_port,
                user: args.db_user,
                password: args.db_password,
                name: args.db_name,
                ssl_mode,
            },
            grpc_addr: args.grpc_addr,
            http_addr: args.http_addr,
            drain_timeout: Duration::from_secs(args.drain_timeout_secs),
            telemetry: TelemetryConfig {
                service_name: args.service_name,
                log_format: args.log_format,
            },
        })
    }
}
