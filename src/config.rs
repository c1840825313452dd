use crate::error::{ClassroomError, Result};
use std::env;
use std::time::Duration;
use url::Url;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP + WebSocket server configuration
    pub api: ApiServerConfig,
    /// Per-connection real-time settings
    pub realtime: RealtimeConfig,
    /// Sandboxed execution settings
    pub sandbox: SandboxConfig,
    /// Execution audit database configuration
    pub database: DatabaseConfig,
    /// Logging configuration
    pub log: LogConfig,
}

#[derive(Debug, Clone)]
pub struct ApiServerConfig {
    /// Port for the API server (default: 8081)
    pub port: u16,
    /// Host to bind to (default: 0.0.0.0)
    pub host: String,
    /// Allowed CORS origins (comma-separated, empty = localhost only)
    pub cors_origins: Vec<String>,
    /// Public base URL clients use to open classroom sockets
    pub public_ws_url: Url,
    /// Require bearer tokens on /api routes
    pub auth_enabled: bool,
    /// JWT secret used to validate bearer tokens
    pub jwt_secret: String,
}

#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Outbound queue capacity per connection
    pub send_buffer: usize,
    /// Keepalive ping interval on the write side
    pub ping_interval_secs: u64,
    /// How often the liveness task checks for staleness
    pub liveness_check_secs: u64,
    /// Inactivity window after which a connection is force-closed
    pub stale_timeout_secs: u64,
}

impl RealtimeConfig {
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }

    pub fn liveness_check(&self) -> Duration {
        Duration::from_secs(self.liveness_check_secs)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_secs(self.stale_timeout_secs)
    }
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            send_buffer: 256,
            ping_interval_secs: 54,
            liveness_check_secs: 30,
            stale_timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Isolation runtime binary (default: docker)
    pub runtime: String,
    /// Runner image (default: python:3.11-alpine)
    pub image: String,
    /// Submissions allowed per requester per minute
    pub quota_per_minute: u32,
    /// Burst allowance on top of the per-minute rate
    pub quota_burst: u32,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: "docker".to_string(),
            image: "python:3.11-alpine".to_string(),
            quota_per_minute: 30,
            quota_burst: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Persist terminal execution records
    pub audit_enabled: bool,
    /// Database host
    pub host: String,
    /// Database port
    pub port: u16,
    /// Database user
    pub user: String,
    /// Database password
    pub password: String,
    /// Database name
    pub name: String,
    /// SSL mode (disable, require, prefer)
    pub ssl_mode: String,
    /// Maximum connections in pool
    pub max_connections: u32,
    /// Minimum connections in pool
    pub min_connections: u32,
}

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Log level (debug, info, warn, error)
    pub level: String,
    /// Output format (json, pretty)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let public_ws_url = get_env_or("PUBLIC_WS_URL", "ws://localhost:8081");
        let public_ws_url = Url::parse(public_ws_url.trim()).map_err(|e| {
            ClassroomError::InvalidConfig(format!("PUBLIC_WS_URL must be a valid URL: {}", e))
        })?;
        if !matches!(public_ws_url.scheme(), "ws" | "wss") {
            return Err(ClassroomError::InvalidConfig(
                "PUBLIC_WS_URL must use the ws or wss scheme".into(),
            ));
        }

        Ok(Config {
            api: ApiServerConfig {
                port: get_env_or("API_PORT", "8081").parse().map_err(|_| {
                    ClassroomError::InvalidConfig("API_PORT must be a valid port number".into())
                })?,
                host: get_env_or("API_HOST", "0.0.0.0"),
                cors_origins: get_env_or("CORS_ORIGINS", "")
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
                public_ws_url,
                auth_enabled: get_env_or("AUTH_ENABLED", "false")
                    .parse()
                    .unwrap_or(false),
                jwt_secret: get_env_or("JWT_SECRET", ""),
            },
            realtime: RealtimeConfig {
                send_buffer: parse_positive("WS_SEND_BUFFER", "256")?,
                ping_interval_secs: parse_positive("WS_PING_INTERVAL_SECS", "54")?,
                liveness_check_secs: parse_positive("WS_LIVENESS_CHECK_SECS", "30")?,
                stale_timeout_secs: parse_positive("WS_STALE_TIMEOUT_SECS", "90")?,
            },
            sandbox: SandboxConfig {
                runtime: get_env_or("SANDBOX_RUNTIME", "docker"),
                image: get_env_or("SANDBOX_IMAGE", "python:3.11-alpine"),
                quota_per_minute: get_env_or("EXEC_QUOTA_PER_MINUTE", "30")
                    .parse()
                    .unwrap_or(30),
                quota_burst: get_env_or("EXEC_QUOTA_BURST", "5").parse().unwrap_or(5),
            },
            database: DatabaseConfig {
                audit_enabled: get_env_or("AUDIT_ENABLED", "false")
                    .parse()
                    .unwrap_or(false),
                host: get_env_or("DB_HOST", "localhost"),
                port: get_env_or("DB_PORT", "5432").parse().map_err(|_| {
                    ClassroomError::InvalidConfig("DB_PORT must be a valid port number".into())
                })?,
                user: get_env_or("DB_USER", "classroom"),
                password: get_env_or("DB_PASSWORD", "classroom"),
                name: get_env_or("DB_NAME", "classroom"),
                ssl_mode: get_env_or("DB_SSLMODE", "disable"),
                max_connections: get_env_or("DB_MAX_CONNECTIONS", "10")
                    .parse()
                    .map_err(|_| {
                        ClassroomError::InvalidConfig(
                            "DB_MAX_CONNECTIONS must be a valid number".into(),
                        )
                    })?,
                min_connections: get_env_or("DB_MIN_CONNECTIONS", "1").parse().map_err(|_| {
                    ClassroomError::InvalidConfig("DB_MIN_CONNECTIONS must be a valid number".into())
                })?,
            },
            log: LogConfig {
                level: get_env_or("LOG_LEVEL", "info"),
                format: get_env_or("LOG_FORMAT", "pretty"),
            },
        })
    }

    /// Get the database connection URL
    pub fn database_url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode={}",
            self.database.user,
            self.database.password,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.ssl_mode
        )
    }

    /// Get the API server address
    pub fn api_addr(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }
}

/// Parse a strictly positive integer setting
fn parse_positive<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    get_env_or(key, default)
        .parse::<T>()
        .ok()
        .filter(|v| *v > T::default())
        .ok_or_else(|| ClassroomError::InvalidConfig(format!("{} must be a positive number", key)))
}

/// Get environment variable with a default value
fn get_env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}
