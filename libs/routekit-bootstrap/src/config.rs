use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration with strongly-typed sections.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Core server configuration.
    pub server: ServerConfig,
    /// Where route descriptors and validation schemas live.
    pub paths: PathsConfig,
    /// Logging configuration (optional, uses defaults if None).
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Request body cap, in bytes.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,
    /// Grace between the first fatal error and forced process exit.
    #[serde(with = "humantime_serde", default = "default_fatal_grace")]
    pub fatal_grace: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub routes_dir: PathBuf,
    pub schemas_dir: PathBuf,
}

/// One logging sink configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// "trace", "debug", "info", "warn", "error" or "off".
    pub console_level: String,
    /// Rotating JSON log file, e.g. "logs/routekit.log". None disables it.
    #[serde(default)]
    pub file: Option<String>,
    #[serde(default)]
    pub file_level: String,
    /// How many rotated files to keep.
    #[serde(default)]
    pub max_backups: Option<usize>,
    /// Max size of one file in MB before rotation.
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

fn default_body_limit() -> usize {
    2 * 1024 * 1024
}

fn default_fatal_grace() -> Duration {
    Duration::from_secs(10)
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            body_limit_bytes: default_body_limit(),
            fatal_grace: default_fatal_grace(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            routes_dir: PathBuf::from("config/routes"),
            schemas_dir: PathBuf::from("config/schemas"),
        }
    }
}

/// Create a default logging configuration.
pub fn default_logging_config() -> LoggingConfig {
    LoggingConfig {
        console_level: "info".to_string(),
        file: Some("logs/routekit.log".to_string()),
        file_level: "debug".to_string(),
        max_backups: Some(3),
        max_size_mb: Some(100),
    }
}

/// Command-line overrides applied on top of the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub port: Option<u16>,
    pub routes_dir: Option<PathBuf>,
    pub schemas_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration with layered loading: defaults → YAML file →
    /// environment variables (`ROUTEKIT__SERVER__PORT=8081` maps to
    /// `server.port`).
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(config_path.as_ref()))
            .merge(Env::prefixed("ROUTEKIT__").split("__"));

        figment
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())
    }

    /// Load configuration from file or fall back to defaults.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Ok(Self::default()),
        }
    }

    /// Serialize configuration to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config to YAML")
    }

    /// Apply overrides from command line arguments.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }
        if let Some(routes_dir) = &args.routes_dir {
            self.paths.routes_dir = routes_dir.clone();
        }
        if let Some(schemas_dir) = &args.schemas_dir {
            self.paths.schemas_dir = schemas_dir.clone();
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sensible() {
        let config = AppConfig::default();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.server.fatal_grace, Duration::from_secs(10));
        assert_eq!(config.paths.routes_dir, PathBuf::from("config/routes"));
        assert!(config.logging.is_none());
    }

    #[test]
    fn yaml_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.yaml");
        std::fs::write(
            &path,
            r#"
server:
  host: 0.0.0.0
  port: 9090
  fatal_grace: 3s
paths:
  routes_dir: /etc/routekit/routes
  schemas_dir: /etc/routekit/schemas
logging:
  console_level: debug
"#,
        )
        .unwrap();

        let config = AppConfig::load_layered(&path).unwrap();
        assert_eq!(config.bind_addr(), "0.0.0.0:9090");
        assert_eq!(config.server.fatal_grace, Duration::from_secs(3));
        assert_eq!(config.server.body_limit_bytes, 2 * 1024 * 1024);
        assert_eq!(
            config.paths.routes_dir,
            PathBuf::from("/etc/routekit/routes")
        );
        assert_eq!(config.logging.unwrap().console_level, "debug");
    }

    #[test]
    fn cli_overrides_win_over_file() {
        let mut config = AppConfig::default();
        config.apply_cli_overrides(&CliArgs {
            port: Some(7070),
            routes_dir: Some(PathBuf::from("/tmp/routes")),
            schemas_dir: None,
        });
        assert_eq!(config.server.port, 7070);
        assert_eq!(config.paths.routes_dir, PathBuf::from("/tmp/routes"));
        assert_eq!(config.paths.schemas_dir, PathBuf::from("config/schemas"));
    }

    #[test]
    fn config_round_trips_through_yaml() {
        let mut config = AppConfig::default();
        config.logging = Some(default_logging_config());
        let yaml = config.to_yaml().unwrap();
        let parsed: AppConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
        assert_eq!(parsed.logging.unwrap().file, config.logging.unwrap().file);
    }
}
