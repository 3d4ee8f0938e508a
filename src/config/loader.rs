//! Configuration Loader
//!
//! Environment-aware configuration loading. Sources are layered with the `config`
//! crate, later layers winning per key:
//!
//! 1. built-in defaults ([`WatcherConfig::default`])
//! 2. `<config_dir>/task_watcher.toml`
//! 3. `<config_dir>/task_watcher.<environment>.toml`
//! 4. `TASK_WATCHER__<SECTION>__<KEY>` environment variables

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use tracing::debug;

use super::error::{ConfigResult, ConfigurationError};
use super::WatcherConfig;

const CONFIG_FILE_STEM: &str = "task_watcher";
const ENV_PREFIX: &str = "TASK_WATCHER";

/// Loaded configuration plus the context it was resolved in
#[derive(Debug)]
pub struct ConfigManager {
    config: WatcherConfig,
    environment: String,
    config_directory: PathBuf,
}

impl ConfigManager {
    /// Load configuration with environment auto-detection
    pub fn load() -> ConfigResult<Arc<ConfigManager>> {
        let environment = Self::detect_environment();
        let config_directory = Self::default_config_directory();
        let config = Self::build(&config_directory, &environment, None)?;
        Ok(Arc::new(Self {
            config,
            environment,
            config_directory,
        }))
    }

    /// Load configuration from a specific directory with explicit environment.
    /// Process environment variables are still applied last.
    pub fn load_from_directory_with_env(
        config_dir: impl AsRef<Path>,
        environment: &str,
    ) -> ConfigResult<Arc<ConfigManager>> {
        Self::load_with_overrides(config_dir, environment, None)
    }

    /// Like [`Self::load_from_directory_with_env`], but reads variable overrides from
    /// `overrides` instead of the process environment.
    pub fn load_with_overrides(
        config_dir: impl AsRef<Path>,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<Arc<ConfigManager>> {
        let config_directory = config_dir.as_ref().to_path_buf();
        if !config_directory.is_dir() {
            return Err(ConfigurationError::DirectoryNotFound {
                path: config_directory,
            });
        }

        let config = Self::build(&config_directory, environment, overrides)?;
        Ok(Arc::new(Self {
            config,
            environment: environment.to_string(),
            config_directory,
        }))
    }

    pub fn config(&self) -> &WatcherConfig {
        &self.config
    }

    pub fn environment(&self) -> &str {
        &self.environment
    }

    pub fn config_directory(&self) -> &Path {
        &self.config_directory
    }

    fn build(
        config_directory: &Path,
        environment: &str,
        overrides: Option<HashMap<String, String>>,
    ) -> ConfigResult<WatcherConfig> {
        let base_file = config_directory.join(format!("{CONFIG_FILE_STEM}.toml"));
        let env_file = config_directory.join(format!("{CONFIG_FILE_STEM}.{environment}.toml"));

        debug!(
            environment = %environment,
            base_file = %base_file.display(),
            env_file = %env_file.display(),
            "Loading watcher configuration"
        );

        let defaults = Config::try_from(&WatcherConfig::default())?;

        let config: WatcherConfig = Config::builder()
            .add_source(defaults)
            .add_source(
                File::from(base_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                File::from(env_file.as_path())
                    .format(FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("timer.delay_buckets_seconds")
                    .try_parsing(true)
                    .source(overrides),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;

        debug!(
            environment = %environment,
            buckets = ?config.timer.delay_buckets_seconds,
            group_id = %config.broker.group_id,
            "Watcher configuration loaded"
        );

        Ok(config)
    }

    /// Detect current environment from environment variables
    pub fn detect_environment() -> String {
        env::var("TASK_WATCHER_ENV")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string())
            .to_lowercase()
    }

    fn default_config_directory() -> PathBuf {
        env::var("TASK_WATCHER_CONFIG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) {
        fs::write(dir.path().join(name), content).unwrap();
    }

    #[test]
    fn test_empty_directory_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let manager =
            ConfigManager::load_with_overrides(dir.path(), "test", Some(HashMap::new())).unwrap();

        assert_eq!(manager.config(), &WatcherConfig::default());
        assert_eq!(manager.environment(), "test");
    }

    #[test]
    fn test_environment_file_overrides_base_file() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "task_watcher.toml",
            r#"
[timer]
delay_buckets_seconds = [10, 100]
poll_batch_size = 50

[broker]
group_id = "base-group"
"#,
        );
        write(
            &dir,
            "task_watcher.production.toml",
            r#"
[timer]
poll_batch_size = 250
"#,
        );

        let manager =
            ConfigManager::load_with_overrides(dir.path(), "production", Some(HashMap::new()))
                .unwrap();
        let config = manager.config();

        assert_eq!(config.timer.delay_buckets_seconds, vec![10, 100]);
        assert_eq!(config.timer.poll_batch_size, 250);
        assert_eq!(config.broker.group_id, "base-group");
        assert_eq!(config.topics.timer, "timer");
    }

    #[test]
    fn test_variable_overrides_win() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "task_watcher.toml",
            r#"
[topics]
event = "file-event"
"#,
        );

        let mut overrides = HashMap::new();
        overrides.insert("TASK_WATCHER__TOPICS__EVENT".to_string(), "env-event".to_string());
        overrides.insert(
            "TASK_WATCHER__TIMER__DELAY_BUCKETS_SECONDS".to_string(),
            "2,20".to_string(),
        );

        let manager = ConfigManager::load_with_overrides(dir.path(), "test", Some(overrides)).unwrap();

        assert_eq!(manager.config().topics.event, "env-event");
        assert_eq!(manager.config().timer.delay_buckets_seconds, vec![2, 20]);
    }

    #[test]
    fn test_invalid_values_fail_validation() {
        let dir = TempDir::new().unwrap();
        write(
            &dir,
            "task_watcher.toml",
            r#"
[topic_creation]
num_partitions = 0
"#,
        );

        let result = ConfigManager::load_with_overrides(dir.path(), "test", Some(HashMap::new()));
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_malformed_toml_is_load_error() {
        let dir = TempDir::new().unwrap();
        write(&dir, "task_watcher.toml", "[timer\npoll_batch_size = ");

        let result = ConfigManager::load_with_overrides(dir.path(), "test", Some(HashMap::new()));
        assert!(matches!(result, Err(ConfigurationError::LoadError { .. })));
    }

    #[test]
    fn test_missing_directory() {
        let result = ConfigManager::load_with_overrides(
            "/nonexistent/task-watcher-config",
            "test",
            Some(HashMap::new()),
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::DirectoryNotFound { .. })
        ));
    }
}
