// Server configuration.
//
// Centralizes environment variable parsing with defaults for local
// development. Every knob the server reads lives here.

use std::{net::SocketAddr, time::Duration};

use crate::db::pool::PoolConfig;

const DEV_JWT_SECRET: &str = "huddle_local_development_jwt_secret_must_be_32_chars";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 5_000;

/// Which broadcast channel links this instance to its peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackplaneKind {
    /// In-process only. Correct for a single instance.
    Local,
    /// PostgreSQL `LISTEN`/`NOTIFY`, shared by every instance on the same database.
    Postgres,
}

impl BackplaneKind {
    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "local" => Some(Self::Local),
            "postgres" | "pg" => Some(Self::Postgres),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Core server configuration.
///
/// Constructed via [`ServerConfig::from_env`] which reads environment
/// variables and falls back to development defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub jwt_secret: String,
    pub access_token_ttl_secs: i64,
    /// PostgreSQL connection string. Without one the server keeps all state in memory.
    pub database_url: Option<String>,
    pub pool: PoolConfig,
    pub backplane: BackplaneKind,
    /// Comma-separated CORS origins (or `"*"` for any).
    pub cors_origins: Option<String>,
    pub log_filter: String,
    pub log_format: LogFormat,
    /// How long an unauthenticated socket may wait before sending its auth frame.
    pub handshake_timeout: Duration,
}

impl ServerConfig {
    /// Parse configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |---|---|
    /// | `HUDDLE_HOST` | `0.0.0.0` |
    /// | `HUDDLE_PORT` | `3000` |
    /// | `HUDDLE_JWT_SECRET` | dev-only placeholder |
    /// | `HUDDLE_ACCESS_TOKEN_TTL_SECS` | `86400` |
    /// | `HUDDLE_DATABASE_URL` | *(none, in-memory store)* |
    /// | `HUDDLE_DB_MIN_CONNECTIONS` | `2` |
    /// | `HUDDLE_DB_MAX_CONNECTIONS` | `20` |
    /// | `HUDDLE_DB_ACQUIRE_TIMEOUT_SECS` | `10` |
    /// | `HUDDLE_BACKPLANE` | `local` |
    /// | `HUDDLE_CORS_ORIGINS` | *(none, cors.rs uses dev defaults)* |
    /// | `HUDDLE_LOG_FILTER` | `info` |
    /// | `HUDDLE_LOG_FORMAT` | `text` |
    /// | `HUDDLE_HANDSHAKE_TIMEOUT_MS` | `5000` |
    pub fn from_env() -> Self {
        Self::from_env_fn(|key| std::env::var(key))
    }

    fn from_env_fn<F>(env: F) -> Self
    where
        F: Fn(&str) -> Result<String, std::env::VarError>,
    {
        let parsed = |key: &str| env(key).ok().and_then(|value| value.trim().parse::<u64>().ok());

        let host = env("HUDDLE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let port = env("HUDDLE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(DEFAULT_PORT);
        let listen_addr = format!("{host}:{port}")
            .parse()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));

        let jwt_secret = env("HUDDLE_JWT_SECRET").unwrap_or_else(|_| DEV_JWT_SECRET.into());
        let access_token_ttl_secs = parsed("HUDDLE_ACCESS_TOKEN_TTL_SECS")
            .and_then(|value| i64::try_from(value).ok())
            .filter(|value| *value > 0)
            .unwrap_or(DEFAULT_ACCESS_TOKEN_TTL_SECS);

        let database_url = env("HUDDLE_DATABASE_URL").ok().filter(|value| !value.trim().is_empty());

        let defaults = PoolConfig::default();
        let pool = PoolConfig {
            min_connections: parsed("HUDDLE_DB_MIN_CONNECTIONS")
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(defaults.min_connections),
            max_connections: parsed("HUDDLE_DB_MAX_CONNECTIONS")
                .and_then(|value| u32::try_from(value).ok())
                .unwrap_or(defaults.max_connections),
            acquire_timeout: parsed("HUDDLE_DB_ACQUIRE_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.acquire_timeout),
        };

        let backplane = env("HUDDLE_BACKPLANE")
            .ok()
            .and_then(|value| BackplaneKind::parse(&value))
            .unwrap_or(BackplaneKind::Local);

        let cors_origins = env("HUDDLE_CORS_ORIGINS").ok();
        let log_filter = env("HUDDLE_LOG_FILTER").unwrap_or_else(|_| "info".into());
        let log_format = match env("HUDDLE_LOG_FORMAT").ok().as_deref().map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let handshake_timeout = Duration::from_millis(
            parsed("HUDDLE_HANDSHAKE_TIMEOUT_MS")
                .filter(|value| *value > 0)
                .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT_MS),
        );

        Self {
            listen_addr,
            jwt_secret,
            access_token_ttl_secs,
            database_url,
            pool,
            backplane,
            cors_origins,
            log_filter,
            log_format,
            handshake_timeout,
        }
    }

    /// Returns true when using the development-only JWT secret.
    pub fn is_dev_jwt_secret(&self) -> bool {
        self.jwt_secret == DEV_JWT_SECRET
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from_map(
        map: HashMap<&'static str, &'static str>,
    ) -> impl Fn(&str) -> Result<String, std::env::VarError> {
        move |key: &str| map.get(key).map(|v| v.to_string()).ok_or(std::env::VarError::NotPresent)
    }

    #[test]
    fn defaults_when_no_env_vars() {
        let cfg = ServerConfig::from_env_fn(env_from_map(HashMap::new()));
        assert_eq!(cfg.listen_addr.port(), 3000);
        assert_eq!(cfg.listen_addr.ip().to_string(), "0.0.0.0");
        assert!(cfg.is_dev_jwt_secret());
        assert_eq!(cfg.access_token_ttl_secs, 86_400);
        assert!(cfg.database_url.is_none());
        assert_eq!(cfg.backplane, BackplaneKind::Local);
        assert!(cfg.cors_origins.is_none());
        assert_eq!(cfg.log_filter, "info");
        assert_eq!(cfg.log_format, LogFormat::Text);
        assert_eq!(cfg.handshake_timeout, Duration::from_millis(5_000));
        assert_eq!(cfg.pool.max_connections, 20);
    }

    #[test]
    fn custom_host_and_port() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_HOST", "127.0.0.1");
        m.insert("HUDDLE_PORT", "8088");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.to_string(), "127.0.0.1:8088");
    }

    #[test]
    fn invalid_port_falls_back_to_default() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_PORT", "not-a-number");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.listen_addr.port(), 3000);
    }

    #[test]
    fn custom_jwt_secret_is_not_dev() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_JWT_SECRET", "production_secret_at_least_32_chars!!");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert!(!cfg.is_dev_jwt_secret());
    }

    #[test]
    fn backplane_and_database_settings() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_DATABASE_URL", "postgres://localhost/huddle");
        m.insert("HUDDLE_BACKPLANE", "Postgres");
        m.insert("HUDDLE_DB_MAX_CONNECTIONS", "5");
        m.insert("HUDDLE_DB_ACQUIRE_TIMEOUT_SECS", "3");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/huddle"));
        assert_eq!(cfg.backplane, BackplaneKind::Postgres);
        assert_eq!(cfg.pool.max_connections, 5);
        assert_eq!(cfg.pool.acquire_timeout, Duration::from_secs(3));
    }

    #[test]
    fn unknown_backplane_falls_back_to_local() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_BACKPLANE", "redis");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.backplane, BackplaneKind::Local);
    }

    #[test]
    fn empty_database_url_means_in_memory() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_DATABASE_URL", "  ");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn handshake_timeout_and_token_ttl_overrides() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_HANDSHAKE_TIMEOUT_MS", "250");
        m.insert("HUDDLE_ACCESS_TOKEN_TTL_SECS", "60");
        m.insert("HUDDLE_LOG_FORMAT", "JSON");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.handshake_timeout, Duration::from_millis(250));
        assert_eq!(cfg.access_token_ttl_secs, 60);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn zero_handshake_timeout_is_ignored() {
        let mut m = HashMap::new();
        m.insert("HUDDLE_HANDSHAKE_TIMEOUT_MS", "0");
        let cfg = ServerConfig::from_env_fn(env_from_map(m));
        assert_eq!(cfg.handshake_timeout, Duration::from_millis(5_000));
    }
}
