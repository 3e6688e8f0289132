use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use wysci_core::CsvOptions;

pub const DEFAULT_CONFIG_PATH: &str = "wysci.toml";
pub const DEFAULT_MAX_CONNECTIONS: usize = 16;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub connection: ConnectionConfig,
    pub output: OutputConfig,
    pub queries: BTreeMap<String, QueryConfig>,
    pub endpoints: BTreeMap<String, EndpointConfig>,
}

/// Database settings as written in the file. Unset fields fall through to
/// the environment or built-in defaults.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub port: Option<u16>,
    /// Upper bound on concurrently streaming queries, one connection each.
    pub max_connections: Option<usize>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ConnectionConfig {
    pub address: String,
    pub port: u16,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            address: "0.0.0.0".into(),
            port: 8080,
        }
    }
}

impl ConnectionConfig {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub delimiter: String,
    pub null_string: String,
    pub query_timeout_secs: Option<u64>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            delimiter: ",".into(),
            null_string: String::new(),
            query_timeout_secs: None,
        }
    }
}

impl OutputConfig {
    pub fn csv_options(&self) -> anyhow::Result<CsvOptions> {
        let mut chars = self.delimiter.chars();
        let delimiter = match (chars.next(), chars.next()) {
            (Some(c), None) => c,
            _ => {
                return Err(anyhow::anyhow!(
                    "output delimiter must be a single character, got {:?}",
                    self.delimiter
                ))
            }
        };
        let options = CsvOptions {
            delimiter,
            null_placeholder: self.null_string.clone(),
        };
        options.validate()?;
        Ok(options)
    }

    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueryConfig {
    pub sql: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EndpointConfig {
    pub query: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, ParameterConfig>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ParameterType {
    Number,
    String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ParameterConfig {
    #[serde(rename = "type")]
    pub kind: ParameterType,
    #[serde(default)]
    pub required: bool,
    pub ordinal: usize,
}

impl EndpointConfig {
    /// Parameters sorted by their placeholder ordinal.
    pub fn ordered_parameters(&self) -> Vec<(&str, &ParameterConfig)> {
        let mut params: Vec<_> = self
            .parameters
            .iter()
            .map(|(name, param)| (name.as_str(), param))
            .collect();
        params.sort_by_key(|(_, param)| param.ordinal);
        params
    }
}

/// Command-line or environment values that win over the file.
#[derive(Debug, Clone, Default)]
pub struct DatabaseOverrides {
    pub host: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub port: Option<u16>,
}

/// Fully resolved connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub port: u16,
    pub max_connections: usize,
}

impl DatabaseSettings {
    pub fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .user(&self.user)
            .password(&self.password)
            .dbname(&self.database)
            .port(self.port);
        config
    }
}

impl Config {
    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        self.output.csv_options()?;
        if self.database.max_connections == Some(0) {
            return Err(anyhow::anyhow!("database max_connections must be at least 1"));
        }
        for (name, endpoint) in &self.endpoints {
            if !self.queries.contains_key(&endpoint.query) {
                return Err(anyhow::anyhow!(format!(
                    "endpoint {} references unknown query {}",
                    name, endpoint.query
                )));
            }
            let ordered = endpoint.ordered_parameters();
            for (expected, (param, config)) in (1..).zip(&ordered) {
                if config.ordinal != expected {
                    return Err(anyhow::anyhow!(format!(
                        "endpoint {} parameter {} has ordinal {}, expected ordinals 1..={} without gaps or repeats",
                        name,
                        param,
                        config.ordinal,
                        ordered.len()
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn database_settings(&self, overrides: &DatabaseOverrides) -> DatabaseSettings {
        let file = &self.database;
        DatabaseSettings {
            host: pick(&overrides.host, &file.host, "localhost"),
            user: pick(&overrides.user, &file.user, "postgres"),
            password: pick(&overrides.password, &file.password, ""),
            database: pick(&overrides.database, &file.database, "postgres"),
            port: overrides.port.or(file.port).unwrap_or(5432),
            max_connections: file.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        }
    }
}

fn pick(flag: &Option<String>, file: &Option<String>, default: &str) -> String {
    flag.clone()
        .or_else(|| file.clone())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::{Config, DatabaseOverrides, ParameterType};
    use std::time::Duration;
    use tempfile::TempDir;

    const SAMPLE: &str = r#"
[database]
host = "db.internal"
port = 6543
max_connections = 4

[connection]
address = "127.0.0.1"
port = 9000

[output]
delimiter = "\t"
null_string = "NULL"
query_timeout_secs = 30

[queries.by_owner]
sql = "SELECT id, name FROM widgets WHERE owner = $1 AND id > $2"

[endpoints.widgets]
query = "by_owner"

[endpoints.widgets.parameters.owner]
type = "string"
required = true
ordinal = 1

[endpoints.widgets.parameters.after]
type = "number"
ordinal = 2
"#;

    fn write(dir: &TempDir, contents: &str) -> std::path::PathBuf {
        let path = dir.path().join("wysci.toml");
        std::fs::write(&path, contents).expect("write config");
        path
    }

    #[test]
    fn parses_every_section() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::from_path(write(&dir, SAMPLE)).expect("config");
        assert_eq!(config.connection.listen_addr(), "127.0.0.1:9000");
        assert_eq!(config.output.query_timeout(), Some(Duration::from_secs(30)));
        let options = config.output.csv_options().expect("options");
        assert_eq!(options.delimiter, '\t');
        assert_eq!(options.null_placeholder, "NULL");

        let endpoint = &config.endpoints["widgets"];
        let ordered = endpoint.ordered_parameters();
        assert_eq!(ordered[0].0, "owner");
        assert!(ordered[0].1.required);
        assert_eq!(ordered[1].0, "after");
        assert_eq!(ordered[1].1.kind, ParameterType::Number);
        assert!(!ordered[1].1.required);
    }

    #[test]
    fn flags_override_file_and_defaults_fill_the_rest() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::from_path(write(&dir, SAMPLE)).expect("config");

        let settings = config.database_settings(&DatabaseOverrides::default());
        assert_eq!(settings.host, "db.internal");
        assert_eq!(settings.port, 6543);
        assert_eq!(settings.user, "postgres");
        assert_eq!(settings.password, "");
        assert_eq!(settings.database, "postgres");
        assert_eq!(settings.max_connections, 4);

        let overrides = DatabaseOverrides {
            host: Some("override".into()),
            port: Some(5433),
            ..DatabaseOverrides::default()
        };
        let settings = config.database_settings(&overrides);
        assert_eq!(settings.host, "override");
        assert_eq!(settings.port, 5433);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::from_path(write(&dir, "")).expect("config");
        assert_eq!(config.connection.listen_addr(), "0.0.0.0:8080");
        assert!(config.endpoints.is_empty());
        assert_eq!(config.output.csv_options().expect("options").delimiter, ',');
        assert_eq!(config.output.query_timeout(), None);
    }

    #[test]
    fn rejects_unknown_query() {
        let dir = TempDir::new().expect("tempdir");
        let err = Config::from_path(write(&dir, "[endpoints.x]\nquery = \"missing\"\n"))
            .expect_err("unknown query");
        assert!(err.to_string().contains("unknown query missing"));
    }

    #[test]
    fn rejects_gapped_or_repeated_ordinals() {
        let dir = TempDir::new().expect("tempdir");
        let gapped = r#"
[queries.q]
sql = "SELECT $1"
[endpoints.x]
query = "q"
[endpoints.x.parameters.a]
type = "number"
ordinal = 2
"#;
        assert!(Config::from_path(write(&dir, gapped)).is_err());

        let repeated = r#"
[queries.q]
sql = "SELECT $1, $2"
[endpoints.x]
query = "q"
[endpoints.x.parameters.a]
type = "number"
ordinal = 1
[endpoints.x.parameters.b]
type = "string"
ordinal = 1
"#;
        assert!(Config::from_path(write(&dir, repeated)).is_err());
    }

    #[test]
    fn defaults_and_rejects_connection_limits() {
        let dir = TempDir::new().expect("tempdir");
        let config = Config::from_path(write(&dir, "")).expect("config");
        let settings = config.database_settings(&DatabaseOverrides::default());
        assert_eq!(settings.max_connections, super::DEFAULT_MAX_CONNECTIONS);
        assert!(Config::from_path(write(&dir, "[database]\nmax_connections = 0\n")).is_err());
    }

    #[test]
    fn rejects_bad_delimiters() {
        let dir = TempDir::new().expect("tempdir");
        assert!(Config::from_path(write(&dir, "[output]\ndelimiter = \"\\\"\"\n")).is_err());
        assert!(Config::from_path(write(&dir, "[output]\ndelimiter = \"ab\"\n")).is_err());
        assert!(Config::from_path(write(&dir, "[output]\ndelimiter = \"\"\n")).is_err());
    }
}
