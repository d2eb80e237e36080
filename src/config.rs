use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use utoipa::ToSchema;

const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8080;
const DEFAULT_POOL_SIZE: u32 = 10;
const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 5;

/// How new prices enter the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ServerMode {
    /// Periodic fetch from the upstream source
    #[default]
    Auto,
    /// Prices arrive through `POST /api/add` only
    Manual,
}

impl FromStr for ServerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(ServerMode::Auto),
            "manual" => Ok(ServerMode::Manual),
            other => Err(format!("unknown server mode '{}'", other)),
        }
    }
}

impl fmt::Display for ServerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerMode::Auto => write!(f, "auto"),
            ServerMode::Manual => write!(f, "manual"),
        }
    }
}

/// Process configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub mode: ServerMode,
    pub host: String,
    pub port: u16,
    /// Unset runs the in-process pub/sub backend
    pub redis_url: Option<String>,
    /// Unset keeps prices in memory only
    pub database_url: Option<String>,
    pub db_pool_size: u32,
    pub update_interval: Duration,
    /// Unset serves the built-in sample quotes
    pub price_api_url: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: ServerMode::Auto,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            redis_url: None,
            database_url: None,
            db_pool_size: DEFAULT_POOL_SIZE,
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
            price_api_url: None,
        }
    }
}

impl AppConfig {
    /// Read configuration from environment variables and `--mode=` / `--port=`
    /// command line arguments; arguments win
    pub fn from_env() -> Self {
        Self::from_sources(|key| std::env::var(key).ok(), std::env::args().skip(1))
    }

    pub fn from_sources<F, I>(lookup: F, args: I) -> Self
    where
        F: Fn(&str) -> Option<String>,
        I: IntoIterator<Item = String>,
    {
        let defaults = Self::default();
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let mut mode_raw = non_empty("SERVER_MODE");
        let mut port_raw = non_empty("PORT");

        for arg in args {
            if let Some(value) = arg.strip_prefix("--mode=") {
                mode_raw = Some(value.to_string());
            } else if let Some(value) = arg.strip_prefix("--port=") {
                port_raw = Some(value.to_string());
            }
        }

        let mode = match mode_raw.as_deref().map(ServerMode::from_str) {
            None => defaults.mode,
            Some(Ok(mode)) => mode,
            Some(Err(e)) => {
                tracing::warn!("⚠️  {}, falling back to auto", e);
                ServerMode::Auto
            }
        };

        let port = port_raw
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(defaults.port);

        let update_interval = non_empty("UPDATE_INTERVAL_SECS")
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
            .unwrap_or(defaults.update_interval);

        Self {
            mode,
            host: non_empty("SERVER_HOST").unwrap_or(defaults.host),
            port,
            redis_url: non_empty("REDIS_URL"),
            database_url: non_empty("DATABASE_URL"),
            db_pool_size: non_empty("DB_POOL_MAX_SIZE")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(defaults.db_pool_size),
            update_interval,
            price_api_url: non_empty("PRICE_API_URL"),
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)], args: &[&str]) -> AppConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_sources(
            |key| vars.get(key).cloned(),
            args.iter().map(|a| a.to_string()),
        )
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[], &[]);
        assert_eq!(cfg, AppConfig::default());
        assert_eq!(cfg.bind_address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_reads_environment() {
        let cfg = config(
            &[
                ("SERVER_MODE", "manual"),
                ("PORT", "9000"),
                ("REDIS_URL", "redis://localhost:6379"),
                ("DATABASE_URL", "postgres://localhost/gold"),
                ("DB_POOL_MAX_SIZE", "4"),
                ("UPDATE_INTERVAL_SECS", "30"),
            ],
            &[],
        );

        assert_eq!(cfg.mode, ServerMode::Manual);
        assert_eq!(cfg.port, 9000);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://localhost:6379"));
        assert_eq!(cfg.database_url.as_deref(), Some("postgres://localhost/gold"));
        assert_eq!(cfg.db_pool_size, 4);
        assert_eq!(cfg.update_interval, Duration::from_secs(30));
        assert!(cfg.price_api_url.is_none());
    }

    #[test]
    fn test_arguments_override_environment() {
        let cfg = config(
            &[("SERVER_MODE", "auto"), ("PORT", "9000")],
            &["--mode=manual", "--port=7000"],
        );
        assert_eq!(cfg.mode, ServerMode::Manual);
        assert_eq!(cfg.port, 7000);
    }

    #[test]
    fn test_unknown_mode_falls_back_to_auto() {
        assert_eq!(config(&[("SERVER_MODE", "turbo")], &[]).mode, ServerMode::Auto);
    }

    #[test]
    fn test_invalid_numbers_use_defaults() {
        let cfg = config(&[("PORT", "http"), ("UPDATE_INTERVAL_SECS", "0")], &[]);
        assert_eq!(cfg.port, 8080);
        assert_eq!(cfg.update_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_blank_urls_are_unset() {
        let cfg = config(&[("REDIS_URL", "  "), ("DATABASE_URL", "")], &[]);
        assert!(cfg.redis_url.is_none());
        assert!(cfg.database_url.is_none());
    }

    #[test]
    fn test_mode_parsing_is_case_insensitive() {
        assert_eq!("MANUAL".parse::<ServerMode>().unwrap(), ServerMode::Manual);
        assert_eq!(ServerMode::Manual.to_string(), "manual");
    }
}
