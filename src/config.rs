//! Configuration loaded from `pipeql.toml`.
//!
//! ```toml
//! dialect = "clickhouse"
//!
//! [store]
//! url = "mysql://default:@localhost:9004/default"
//! max_connections = 5
//!
//! [limits]
//! macro_depth = 16
//! enrichment_targets = 4
//! nesting_depth = 256
//!
//! [macros.recent]
//! params = ["column"]
//! body = "$last($column, 15, MINUTE)"
//!
//! [enrichments.asn]
//! table = "asn_data"
//! key = "asn"
//! columns = ["org", "country"]
//!
//! [timeseries.timestamp_fields]
//! my_logs = "event_time"
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlSslMode};
use tracing::{debug, warn};

use crate::error::{PipeError, PipeResult};
use crate::parser::tree::MAX_NESTING;
use crate::parser::Dialect;

/// Port of ClickHouse's MySQL-compatible interface.
const MYSQL_PORT: u16 = 9004;
/// Port of ClickHouse's native protocol, as found in `CLICKHOUSE_HOST`.
const NATIVE_PORT: u16 = 9000;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipeConfig {
    /// `clickhouse` (default) or `ansi`.
    pub dialect: Option<String>,
    pub store: StoreConfig,
    pub limits: Limits,
    /// User macros, added to the built-in allow-list.
    pub macros: BTreeMap<String, MacroConfig>,
    pub enrichments: BTreeMap<String, EnrichmentConfig>,
    pub timeseries: TimeseriesConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
        }
    }
}

/// Bounds on work done for a single query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Maximum chain of macro expansions.
    pub macro_depth: usize,
    /// Maximum distinct enrichment tables per query.
    pub enrichment_targets: usize,
    /// Maximum bracket nesting in a query.
    pub nesting_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            macro_depth: 16,
            enrichment_targets: 4,
            nesting_depth: MAX_NESTING,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MacroConfig {
    #[serde(default)]
    pub params: Vec<String>,
    pub body: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrichmentConfig {
    pub table: String,
    pub key: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TimeseriesConfig {
    /// Table name to timestamp column.
    pub timestamp_fields: BTreeMap<String, String>,
}

/// Timestamp columns of the bundled sample datasets.
const TIMESTAMP_FIELDS: &[(&str, &str)] = &[
    ("kibana_sample_data_logs", "utc_time"),
    ("device_logs", "epoch_time"),
    ("apache_logs", "timestamp"),
    ("linux_logs", "timestamp"),
    ("hadoop_logs", "timestamp"),
    ("openssh_logs", "timestamp"),
    ("machines_metrics", "timestamp"),
];

const DEFAULT_TIMESTAMP_FIELD: &str = "@timestamp";

impl PipeConfig {
    /// Load configuration.
    ///
    /// An explicit path must exist. Otherwise `./pipeql.toml` and then
    /// `<config dir>/pipeql/config.toml` are tried, falling back to defaults.
    pub fn load(path: Option<&Path>) -> PipeResult<Self> {
        if let Some(path) = path {
            return Self::from_file(path);
        }
        for candidate in Self::default_paths() {
            if candidate.is_file() {
                return Self::from_file(&candidate);
            }
        }
        debug!("no configuration file found, using defaults");
        Ok(Self::default())
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from("pipeql.toml")];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("pipeql").join("config.toml"));
        }
        paths
    }

    pub fn from_file(path: &Path) -> PipeResult<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| PipeError::Config(format!("{}: {e}", path.display())))?;
        debug!(path = %path.display(), "loading configuration");
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> PipeResult<Self> {
        toml::from_str(content).map_err(|e| PipeError::Config(e.to_string()))
    }

    pub fn dialect(&self) -> PipeResult<Dialect> {
        match &self.dialect {
            None => Ok(Dialect::default()),
            Some(name) => Dialect::from_name(name)
                .ok_or_else(|| PipeError::Config(format!("unknown dialect '{name}'"))),
        }
    }

    /// Timestamp column used for time-series queries over `table`.
    pub fn timestamp_field(&self, table: &str) -> String {
        if let Some(field) = self.timeseries.timestamp_fields.get(table) {
            return field.clone();
        }
        TIMESTAMP_FIELDS
            .iter()
            .find(|(t, _)| *t == table)
            .map_or(DEFAULT_TIMESTAMP_FIELD, |(_, f)| f)
            .to_string()
    }

    /// Connection options for the store.
    ///
    /// `url` (from the command line) wins over `[store].url`; without either,
    /// the `CLICKHOUSE_*` environment variables are used.
    pub fn connect_options(&self, url: Option<&str>) -> PipeResult<MySqlConnectOptions> {
        if let Some(url) = url.or(self.store.url.as_deref()) {
            return url
                .parse::<MySqlConnectOptions>()
                .map_err(|e| PipeError::Config(format!("invalid store URL: {e}")));
        }

        let address = env_or_warn("CLICKHOUSE_HOST", "host.docker.internal:9000");
        let (host, port) = split_host_port(&address)?;
        let mut options = MySqlConnectOptions::new()
            .host(&host)
            .port(port)
            .username(&env_or_warn("CLICKHOUSE_USER", "default"))
            .password(&env_or_warn("CLICKHOUSE_PASSWORD", ""))
            .database(&env_or_warn("CLICKHOUSE_DATABASE", "default"));

        let tls = env::var("CLICKHOUSE_USE_TLS").is_ok_and(|v| v.eq_ignore_ascii_case("true"));
        options = options.ssl_mode(if tls {
            MySqlSslMode::Required
        } else {
            MySqlSslMode::Disabled
        });
        Ok(options)
    }
}

fn env_or_warn(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{name} not set, using default '{default}'");
        default.to_string()
    })
}

/// Split `host[:port]`; the native-protocol port maps to the MySQL interface.
fn split_host_port(address: &str) -> PipeResult<(String, u16)> {
    match address.rsplit_once(':') {
        None => Ok((address.to_string(), MYSQL_PORT)),
        Some((host, port)) => {
            let port: u16 = port
                .parse()
                .map_err(|_| PipeError::Config(format!("invalid port in '{address}'")))?;
            let port = if port == NATIVE_PORT { MYSQL_PORT } else { port };
            Ok((host.to_string(), port))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipeConfig::default();
        assert_eq!(config.limits, Limits::default());
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.dialect().unwrap(), Dialect::ClickHouse);
    }

    #[test]
    fn test_parse_full_file() {
        let config = PipeConfig::from_toml_str(
            r#"
            dialect = "ansi"

            [store]
            url = "mysql://default:@localhost:9004/default"

            [limits]
            macro_depth = 4
            nesting_depth = 64

            [macros.recent]
            params = ["column"]
            body = "$last($column, 15, MINUTE)"

            [enrichments.asn]
            table = "asn_data"
            key = "asn"
            columns = ["org"]

            [timeseries.timestamp_fields]
            my_logs = "event_time"
            "#,
        )
        .unwrap();

        assert_eq!(config.dialect().unwrap(), Dialect::Ansi);
        assert_eq!(config.limits.macro_depth, 4);
        assert_eq!(config.limits.enrichment_targets, 4);
        assert_eq!(config.limits.nesting_depth, 64);
        assert_eq!(config.store.max_connections, 5);
        assert_eq!(config.macros["recent"].params, vec!["column".to_string()]);
        assert_eq!(config.enrichments["asn"].columns, vec!["org".to_string()]);
        assert_eq!(config.timestamp_field("my_logs"), "event_time");
    }

    #[test]
    fn test_timestamp_fields() {
        let config = PipeConfig::default();
        assert_eq!(config.timestamp_field("kibana_sample_data_logs"), "utc_time");
        assert_eq!(config.timestamp_field("device_logs"), "epoch_time");
        assert_eq!(config.timestamp_field("openssh_logs"), "timestamp");
        assert_eq!(config.timestamp_field("anything_else"), "@timestamp");
    }

    #[test]
    fn test_invalid_config() {
        let err = PipeConfig::from_toml_str("[limits]\nmacro_depth = \"deep\"").unwrap_err();
        assert_eq!(err.kind(), "ConfigError");
        let err = PipeConfig::from_toml_str("dialect = \"oracle\"").unwrap().dialect().unwrap_err();
        assert!(err.to_string().contains("oracle"));
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("ch:9000").unwrap(), ("ch".to_string(), 9004));
        assert_eq!(split_host_port("ch:3306").unwrap(), ("ch".to_string(), 3306));
        assert_eq!(split_host_port("ch").unwrap(), ("ch".to_string(), 9004));
        assert!(split_host_port("ch:port").is_err());
    }

    #[test]
    fn test_url_wins() {
        let config = PipeConfig::default();
        assert!(config.connect_options(Some("mysql://u:p@db:9004/logs")).is_ok());
        assert!(config.connect_options(Some("not a url")).is_err());
    }
}
