use std::net::SocketAddr;

use axum::http::{HeaderValue, Method};
use tower_http::cors::{Any, CorsLayer};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://roomcast.db?mode=rwc";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:5000";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 16;

#[derive(Debug, thiserror::Error)]
#[error("invalid {key}={value:?}: {reason}")]
pub struct ConfigError {
    key: &'static str,
    value: String,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: SocketAddr,
    pub db_max_connections: u32,
    /// Allowed browser origin; any origin when unset.
    pub cors_origin: Option<HeaderValue>,
}

impl Config {
    /// Reads the process environment, after loading `.env` if there is one.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| dotenv::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        fn invalid(key: &'static str, value: String, reason: impl ToString) -> ConfigError {
            ConfigError {
                key,
                value,
                reason: reason.to_string(),
            }
        }

        let database_url =
            lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_owned());

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| DEFAULT_BIND_ADDR.to_owned());
        let bind_addr = bind_addr
            .parse::<SocketAddr>()
            .map_err(|err| invalid("BIND_ADDR", bind_addr.clone(), err))?;

        let db_max_connections = match lookup("DB_MAX_CONNECTIONS") {
            None => DEFAULT_DB_MAX_CONNECTIONS,
            Some(value) => match value.parse::<u32>() {
                Ok(0) => return Err(invalid("DB_MAX_CONNECTIONS", value, "must be at least 1")),
                Ok(n) => n,
                Err(err) => return Err(invalid("DB_MAX_CONNECTIONS", value, err)),
            },
        };

        let cors_origin = lookup("CORS_ORIGIN")
            .map(|value| {
                HeaderValue::from_str(&value)
                    .map_err(|err| invalid("CORS_ORIGIN", value.clone(), err))
            })
            .transpose()?;

        Ok(Self {
            database_url,
            bind_addr,
            db_max_connections,
            cors_origin,
        })
    }

    pub fn cors_layer(&self) -> CorsLayer {
        let layer = CorsLayer::new().allow_methods([Method::GET]);
        match &self.cors_origin {
            Some(origin) => layer.allow_origin(origin.clone()),
            None => layer.allow_origin(Any),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.bind_addr, "0.0.0.0:5000".parse().unwrap());
        assert_eq!(config.db_max_connections, 16);
        assert!(config.cors_origin.is_none());
    }

    #[test]
    fn overrides() {
        let config = config(&[
            ("DATABASE_URL", "sqlite::memory:"),
            ("BIND_ADDR", "127.0.0.1:8080"),
            ("DB_MAX_CONNECTIONS", "4"),
            ("CORS_ORIGIN", "http://localhost:5173"),
        ])
        .unwrap();
        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.db_max_connections, 4);
        assert_eq!(config.cors_origin.unwrap(), "http://localhost:5173");
    }

    #[test]
    fn rejects_bad_values() {
        let err = config(&[("BIND_ADDR", "localhost")]).unwrap_err();
        assert!(err.to_string().contains("BIND_ADDR"));
        assert!(config(&[("DB_MAX_CONNECTIONS", "0")]).is_err());
        assert!(config(&[("DB_MAX_CONNECTIONS", "many")]).is_err());
        assert!(config(&[("CORS_ORIGIN", "bad\norigin")]).is_err());
    }
}
