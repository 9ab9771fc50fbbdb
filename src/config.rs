use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

const DEFAULT_BIND: &str = "0.0.0.0:3001";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} is not set")]
    Missing(&'static str),
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Postgres,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: Option<String>,
    pub max_connections: u32,
    pub store: StoreKind,
    pub init_schema: bool,
    pub bind_addr: SocketAddr,
    pub admin_token: Option<String>,
    pub translate: bool,
    pub translate_target: String,
    pub auto_close: bool,
    pub auto_close_interval: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let store = match get("POLLS_STORE").as_deref() {
            None | Some("postgres") => StoreKind::Postgres,
            Some("memory") => StoreKind::Memory,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    name: "POLLS_STORE",
                    value: other.to_string(),
                });
            }
        };

        let bind_raw = get("POLLS_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw.parse().map_err(|_| ConfigError::Invalid {
            name: "POLLS_BIND",
            value: bind_raw.clone(),
        })?;

        let interval_secs: u64 = parse_or("POLLS_AUTO_CLOSE_INTERVAL_SECS", get("POLLS_AUTO_CLOSE_INTERVAL_SECS"), 60)?;
        if interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "POLLS_AUTO_CLOSE_INTERVAL_SECS",
                value: "0".to_string(),
            });
        }

        Ok(Self {
            database_url: get("DATABASE_URL"),
            max_connections: parse_or("DATABASE_MAX_CONNECTIONS", get("DATABASE_MAX_CONNECTIONS"), 5)?,
            store,
            init_schema: flag("POLLS_INIT_SCHEMA", get("POLLS_INIT_SCHEMA"), true)?,
            bind_addr,
            admin_token: get("POLLS_ADMIN_TOKEN"),
            translate: flag("POLLS_TRANSLATE", get("POLLS_TRANSLATE"), false)?,
            translate_target: get("POLLS_TRANSLATE_TARGET").unwrap_or_else(|| "en".to_string()),
            auto_close: flag("POLLS_AUTO_CLOSE", get("POLLS_AUTO_CLOSE"), false)?,
            auto_close_interval: Duration::from_secs(interval_secs),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    name: &'static str,
    raw: Option<String>,
    default: T,
) -> Result<T, ConfigError> {
    match raw {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::Invalid { name, value }),
    }
}

fn flag(name: &'static str, raw: Option<String>, default: bool) -> Result<bool, ConfigError> {
    match raw.as_deref().map(str::to_ascii_lowercase).as_deref() {
        None => Ok(default),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(_) => Err(ConfigError::Invalid {
            name,
            value: raw.unwrap_or_default(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.store, StoreKind::Postgres);
        assert!(config.database_url.is_none());
        assert_eq!(config.max_connections, 5);
        assert!(config.init_schema);
        assert_eq!(config.bind_addr.port(), 3001);
        assert!(config.admin_token.is_none());
        assert!(!config.translate);
        assert_eq!(config.translate_target, "en");
        assert!(!config.auto_close);
        assert_eq!(config.auto_close_interval, Duration::from_secs(60));
    }

    #[test]
    fn reads_overrides() {
        let config = config_from(&[
            ("DATABASE_URL", "postgres://localhost/polls"),
            ("POLLS_STORE", "memory"),
            ("POLLS_BIND", "127.0.0.1:8080"),
            ("POLLS_ADMIN_TOKEN", "s3cret"),
            ("POLLS_TRANSLATE", "TRUE"),
            ("POLLS_AUTO_CLOSE", "on"),
            ("POLLS_AUTO_CLOSE_INTERVAL_SECS", "15"),
            ("POLLS_INIT_SCHEMA", "0"),
        ])
        .unwrap();
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/polls"));
        assert_eq!(config.store, StoreKind::Memory);
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.admin_token.as_deref(), Some("s3cret"));
        assert!(config.translate);
        assert!(config.auto_close);
        assert!(!config.init_schema);
        assert_eq!(config.auto_close_interval, Duration::from_secs(15));
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = config_from(&[("POLLS_ADMIN_TOKEN", "   ")]).unwrap();
        assert!(config.admin_token.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config_from(&[("POLLS_STORE", "redis")]),
            Err(ConfigError::Invalid { name: "POLLS_STORE", .. })
        ));
        assert!(matches!(
            config_from(&[("DATABASE_MAX_CONNECTIONS", "many")]),
            Err(ConfigError::Invalid { name: "DATABASE_MAX_CONNECTIONS", .. })
        ));
        assert!(matches!(
            config_from(&[("POLLS_AUTO_CLOSE", "maybe")]),
            Err(ConfigError::Invalid { name: "POLLS_AUTO_CLOSE", .. })
        ));
        assert!(matches!(
            config_from(&[("POLLS_AUTO_CLOSE_INTERVAL_SECS", "0")]),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
