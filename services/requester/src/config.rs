use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::store::DbConfig;

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    /// Base URL the coordinator uses to post offers back to us.
    pub public_url: String,
    pub coordinator_url: String,
    pub framework_name: String,
    pub http_timeout: Duration,
    /// How long an appliance may wait for an offer. `None` disables expiry.
    pub offer_timeout: Option<Duration>,
    pub expiry_interval: Duration,
    pub log_level: String,
    pub dev_mode: bool,
    /// Postgres settings; `None` keeps registries in memory.
    pub database: Option<DbConfig>,
}

/// Typed view over a variable lookup. Set-but-invalid values are errors.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name)
    }

    fn parse<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.string(name)
            .map(|raw| {
                raw.trim()
                    .parse::<T>()
                    .map_err(|e| anyhow::anyhow!("{e}"))
                    .with_context(|| format!("invalid {name}: {raw:?}"))
            })
            .transpose()
    }

    /// Whole seconds, non-zero.
    fn secs(&self, name: &str) -> Result<Option<Duration>> {
        match self.parse::<u64>(name)? {
            Some(0) => bail!("{name} must be at least 1 second"),
            secs => Ok(secs.map(Duration::from_secs)),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let vars = Vars { lookup };

        let listen_addr = vars
            .parse::<SocketAddr>("REQUESTER_LISTEN_ADDR")?
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 9090)));

        let public_url = vars
            .string("REQUESTER_PUBLIC_URL")
            .unwrap_or_else(|| format!("http://{listen_addr}"));

        let coordinator_url = vars
            .string("REQUESTER_COORDINATOR_URL")
            .unwrap_or_else(|| "http://127.0.0.1:8000/requests".to_string());

        let framework_name = vars
            .string("REQUESTER_FRAMEWORK_NAME")
            .unwrap_or_else(|| "requester".to_string());

        let http_timeout = vars
            .secs("REQUESTER_HTTP_TIMEOUT_SECS")?
            .unwrap_or(Duration::from_secs(30));
        let offer_timeout = vars.secs("REQUESTER_OFFER_TIMEOUT_SECS")?;
        let expiry_interval = vars
            .secs("REQUESTER_EXPIRY_INTERVAL_SECS")?
            .unwrap_or(Duration::from_secs(30));

        let log_level = vars
            .string("REQUESTER_LOG_LEVEL")
            .unwrap_or_else(|| "info".to_string());

        let dev_mode = vars
            .string("REQUESTER_DEV")
            .is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));

        let database = match vars.string("DATABASE_URL") {
            Some(database_url) => {
                let defaults = DbConfig::default();
                let max_connections = vars
                    .parse("DB_MAX_CONNECTIONS")?
                    .unwrap_or(defaults.max_connections);
                let min_connections = vars
                    .parse("DB_MIN_CONNECTIONS")?
                    .unwrap_or(defaults.min_connections);
                if max_connections == 0 || min_connections > max_connections {
                    bail!(
                        "DB_MAX_CONNECTIONS must be positive and at least DB_MIN_CONNECTIONS \
                         (got max {max_connections}, min {min_connections})"
                    );
                }
                Some(DbConfig {
                    database_url,
                    max_connections,
                    min_connections,
                    ..defaults
                })
            }
            None => None,
        };

        Ok(Self {
            listen_addr,
            public_url,
            coordinator_url,
            framework_name,
            http_timeout,
            offer_timeout,
            expiry_interval,
            log_level,
            dev_mode,
            database,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.listen_addr.to_string(), "127.0.0.1:9090");
        assert_eq!(config.public_url, "http://127.0.0.1:9090");
        assert_eq!(config.expiry_interval, Duration::from_secs(30));
        assert!(config.offer_timeout.is_none());
        assert!(config.database.is_none());
        assert!(!config.dev_mode);
    }

    #[test]
    fn test_database_settings() {
        let config = load(&[
            ("DATABASE_URL", "postgres://db/requester"),
            ("DB_MAX_CONNECTIONS", "20"),
            ("DB_MIN_CONNECTIONS", "2"),
            ("REQUESTER_OFFER_TIMEOUT_SECS", "300"),
        ])
        .unwrap();
        let database = config.database.unwrap();
        assert_eq!(database.max_connections, 20);
        assert_eq!(database.min_connections, 2);
        assert_eq!(config.offer_timeout, Some(Duration::from_secs(300)));
    }

    #[rstest]
    #[case("REQUESTER_EXPIRY_INTERVAL_SECS", "0")]
    #[case("REQUESTER_OFFER_TIMEOUT_SECS", "0")]
    #[case("REQUESTER_HTTP_TIMEOUT_SECS", "soon")]
    #[case("REQUESTER_LISTEN_ADDR", "localhost")]
    fn test_invalid_values_fail(#[case] name: &str, #[case] value: &str) {
        let err = load(&[(name, value)]).unwrap_err();
        assert!(format!("{err:#}").contains(name));
    }

    #[rstest]
    #[case("DB_MAX_CONNECTIONS", "lots")]
    #[case("DB_MIN_CONNECTIONS", "-1")]
    #[case("DB_MAX_CONNECTIONS", "0")]
    fn test_invalid_pool_settings_fail(#[case] name: &str, #[case] value: &str) {
        let err = load(&[("DATABASE_URL", "postgres://db/requester"), (name, value)]).unwrap_err();
        assert!(format!("{err:#}").contains("DB_"));
    }
}
