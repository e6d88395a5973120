//! Configuration
//!
//! Settings are layered, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. A TOML file: `stepwise.toml` in the working directory, or the path
//!    given explicitly / through `STEPWISE_CONFIG_PATH`
//! 3. `STEPWISE_*` environment variables (a `.env` file is honored)

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::controller::RunOptions;
use crate::interpreter::instrument::Granularity;

pub const ENV_PREFIX: &str = "STEPWISE";
pub const CONFIG_PATH_ENV: &str = "STEPWISE_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "stepwise.toml";

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub granularity: Granularity,

    /// Default delay applied to steps that don't name one
    #[serde(default)]
    pub step_delay_ms: Option<u64>,

    #[serde(default)]
    pub baseline_dialect: bool,

    #[serde(default = "default_destroy_after_run")]
    pub destroy_after_run: bool,

    #[serde(default)]
    pub synchronous: bool,

    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

fn default_destroy_after_run() -> bool {
    true
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            granularity: Granularity::default(),
            step_delay_ms: None,
            baseline_dialect: false,
            destroy_after_run: default_destroy_after_run(),
            synchronous: false,
            log_filter: default_log_filter(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    pub fn step_delay(&self) -> Option<Duration> {
        self.step_delay_ms.map(Duration::from_millis)
    }

    /// Run options seeded from these settings
    pub fn run_options(&self) -> RunOptions {
        RunOptions::new()
            .granularity(self.granularity)
            .step_delay(self.step_delay())
            .transform_to_baseline_dialect(self.baseline_dialect)
            .destroy_after_run(self.destroy_after_run)
            .synchronous(self.synchronous)
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    use_env: Option<bool>,
}

impl ConfigBuilder {
    /// Explicit config file; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    /// Whether `.env` and `STEPWISE_*` variables are read (default: yes)
    pub fn use_env(mut self, enabled: bool) -> Self {
        self.use_env = Some(enabled);
        self
    }

    pub fn build(self) -> Result<Config> {
        let use_env = self.use_env.unwrap_or(true);
        if use_env {
            // A missing .env file is fine
            dotenvy::dotenv().ok();
        }

        let explicit = self.config_path.or_else(|| {
            if use_env {
                std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
            } else {
                None
            }
        });

        let mut builder = ::config::Config::builder();
        builder = match &explicit {
            Some(path) => {
                if !path.exists() {
                    anyhow::bail!("Config file not found: {}", path.display());
                }
                builder.add_source(file_source(path).required(true))
            }
            None => builder.add_source(file_source(Path::new(DEFAULT_CONFIG_FILE)).required(false)),
        };
        if use_env {
            builder = builder.add_source(
                ::config::Environment::with_prefix(ENV_PREFIX).try_parsing(true),
            );
        }

        let settings = builder.build().context("Failed to read configuration")?;
        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        Ok(config)
    }
}

fn file_source(path: &Path) -> ::config::File<::config::FileSourceFile, ::config::FileFormat> {
    ::config::File::from(path).format(::config::FileFormat::Toml)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use uuid::Uuid;

    fn write_temp(contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("stepwise-{}.toml", Uuid::new_v4()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.granularity, Granularity::Boundaries);
        assert!(config.destroy_after_run);
        assert_eq!(config.step_delay(), None);
        assert_eq!(config.log_filter, "info");
    }

    #[test]
    fn test_file_overrides_defaults() {
        let path = write_temp(
            r#"
            granularity = "statements"
            step_delay_ms = 250
            destroy_after_run = false
            "#,
        );
        let config = Config::builder()
            .config_path(Some(path.clone()))
            .use_env(false)
            .build()
            .unwrap();
        fs::remove_file(path).ok();

        assert_eq!(config.granularity, Granularity::Statements);
        assert_eq!(config.step_delay(), Some(Duration::from_millis(250)));
        assert!(!config.destroy_after_run);
        assert!(!config.synchronous);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let result = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/stepwise.toml")))
            .use_env(false)
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_invalid_value_is_an_error() {
        let path = write_temp(r#"granularity = "sometimes""#);
        let result = Config::builder()
            .config_path(Some(path.clone()))
            .use_env(false)
            .build();
        fs::remove_file(path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_run_options_from_config() {
        let config = Config {
            synchronous: true,
            baseline_dialect: true,
            step_delay_ms: Some(5),
            ..Config::default()
        };
        let options = config.run_options();
        assert!(options.synchronous);
        assert!(options.transform_to_baseline_dialect);
        assert_eq!(options.step_delay, Some(Duration::from_millis(5)));
    }
}
