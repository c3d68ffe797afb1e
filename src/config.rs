use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub locks: LockConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Upper bound on outstanding (queued + in-flight) intents
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Bounded recent-history window of execution records
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
}

fn default_queue_capacity() -> usize {
    64
}

fn default_history_capacity() -> usize {
    1024
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            history_capacity: default_history_capacity(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LockConfig {
    /// How long a dispatcher worker waits for a symbol lock (ms)
    #[serde(default = "default_acquire_timeout_ms")]
    pub acquire_timeout_ms: u64,
    /// Maximum hold before a lock is considered stale and evicted (ms)
    #[serde(default = "default_max_hold_ms")]
    pub max_hold_ms: u64,
    /// Interval of the stale-lock sweep (ms)
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
}

fn default_acquire_timeout_ms() -> u64 {
    2_000
}

fn default_max_hold_ms() -> u64 {
    30_000
}

fn default_sweep_interval_ms() -> u64 {
    1_000
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout_ms: default_acquire_timeout_ms(),
            max_hold_ms: default_max_hold_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Number of dispatcher worker tasks
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Fallback poll interval for idle workers (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Requeue attempts after a lock-acquire timeout before failing the trade
    #[serde(default = "default_max_lock_retries")]
    pub max_lock_retries: u32,
    /// Timeout around the external execution call (ms)
    #[serde(default = "default_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_poll_interval_ms() -> u64 {
    200
}

fn default_max_lock_retries() -> u32 {
    1
}

fn default_execution_timeout_ms() -> u64 {
    10_000
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            max_lock_retries: default_max_lock_retries(),
            execution_timeout_ms: default_execution_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directives, e.g. "info" or "info,baton=debug"
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("queue.capacity", default_queue_capacity() as u64)?
            .set_default("queue.history_capacity", default_history_capacity() as u64)?
            .set_default("locks.acquire_timeout_ms", default_acquire_timeout_ms())?
            .set_default("locks.max_hold_ms", default_max_hold_ms())?
            .set_default("locks.sweep_interval_ms", default_sweep_interval_ms())?
            .set_default("dispatcher.workers", default_workers() as u64)?
            .set_default("dispatcher.poll_interval_ms", default_poll_interval_ms())?
            .set_default("dispatcher.max_lock_retries", default_max_lock_retries())?
            .set_default(
                "dispatcher.execution_timeout_ms",
                default_execution_timeout_ms(),
            )?
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("BATON_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (BATON_QUEUE__CAPACITY, etc.)
            .add_source(
                Environment::with_prefix("BATON")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.queue.capacity == 0 {
            errors.push("queue.capacity must be at least 1".to_string());
        }

        // Unresolved records are pinned in the history window, so the window
        // must be able to hold every outstanding intent at once.
        if self.queue.history_capacity < self.queue.capacity {
            errors.push(format!(
                "queue.history_capacity ({}) must be >= queue.capacity ({})",
                self.queue.history_capacity, self.queue.capacity
            ));
        }

        if self.locks.acquire_timeout_ms == 0 {
            errors.push("locks.acquire_timeout_ms must be positive".to_string());
        }

        if self.locks.max_hold_ms == 0 {
            errors.push("locks.max_hold_ms must be positive".to_string());
        }

        if self.locks.sweep_interval_ms == 0 {
            errors.push("locks.sweep_interval_ms must be positive".to_string());
        }

        if self.dispatcher.workers == 0 {
            errors.push("dispatcher.workers must be at least 1".to_string());
        }

        if self.dispatcher.poll_interval_ms == 0 {
            errors.push("dispatcher.poll_interval_ms must be positive".to_string());
        }

        if self.dispatcher.execution_timeout_ms == 0 {
            errors.push("dispatcher.execution_timeout_ms must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.queue.capacity, 64);
        assert_eq!(config.dispatcher.workers, 4);
        assert_eq!(config.logging.level, "info");
        assert!(!config.logging.json);
    }

    #[test]
    fn validate_collects_all_errors() {
        let mut config = AppConfig::default();
        config.queue.capacity = 0;
        config.dispatcher.workers = 0;
        config.locks.max_hold_ms = 0;

        let errors = config.validate().unwrap_err();
        assert!(errors.len() >= 3);
        assert!(errors.iter().any(|e| e.contains("queue.capacity")));
        assert!(errors.iter().any(|e| e.contains("dispatcher.workers")));
    }

    #[test]
    fn validate_rejects_history_smaller_than_capacity() {
        let mut config = AppConfig::default();
        config.queue.capacity = 100;
        config.queue.history_capacity = 50;

        let errors = config.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("history_capacity")));
    }
}
