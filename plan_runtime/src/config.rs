//! Runtime configuration.
//!
//! Configuration is layered with figment. Precedence, lowest to highest:
//!
//! 1. Programmatic defaults
//! 2. A YAML file, when one is given
//! 3. `PLANKIT_*` environment variables, `__` separating nested keys
//!    (`PLANKIT_EXECUTOR__MAX_CONCURRENCY=8`)

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use plan_agent::workflow::{RunTimeout, TaskTimeout};
use plan_agent::{DependencyAnalyzer, PrerequisiteRule, TimeoutConfig, DEFAULT_EVENT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PLANKIT_";

/// Configuration error types
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Invalid max_concurrency: {0}. Must be between 1 and 256")]
    InvalidMaxConcurrency(usize),

    #[error("Invalid task_timeout_secs: {0}. Must be positive")]
    InvalidTaskTimeout(u64),

    #[error("Invalid run_timeout_secs: {0}. Must be positive")]
    InvalidRunTimeout(u64),

    #[error("Invalid event capacity: {0}. Must be at least 1")]
    InvalidEventCapacity(usize),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid prerequisite rule for tool '{tool}': {reason}")]
    InvalidPrerequisite { tool: String, reason: String },
}

/// Executor settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Invocations allowed in flight at once
    pub max_concurrency: usize,
    /// Per-invocation limit; `None` disables it
    pub task_timeout_secs: Option<u64>,
    /// Whole-run limit; `None` disables it
    pub run_timeout_secs: Option<u64>,
    /// Alias tasks equivalent to an earlier task
    pub reuse_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrency: plan_agent::workflow::DEFAULT_MAX_CONCURRENCY,
            task_timeout_secs: Some(30),
            run_timeout_secs: None,
            reuse_enabled: true,
        }
    }
}

/// Event stream settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Broadcast channel capacity
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default level when `RUST_LOG` is unset
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Complete runtime configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub executor: ExecutorConfig,
    pub events: EventsConfig,
    pub logging: LoggingConfig,
    /// Tools that need a lookup task before they can run
    pub prerequisites: Vec<PrerequisiteRule>,
}

impl RuntimeConfig {
    /// Returns the executor time limits.
    pub fn timeout_config(&self) -> TimeoutConfig {
        let mut config = TimeoutConfig::no_timeouts();
        if let Some(secs) = self.executor.task_timeout_secs {
            config = config.with_task_timeout(TaskTimeout::from_secs(secs));
        }
        if let Some(secs) = self.executor.run_timeout_secs {
            config = config.with_run_timeout(RunTimeout::from_secs(secs));
        }
        config
    }

    /// Builds a dependency analyzer from the reuse flag and prerequisite rules.
    pub fn analyzer(&self) -> DependencyAnalyzer {
        DependencyAnalyzer::new()
            .with_reuse(self.executor.reuse_enabled)
            .with_rules(self.prerequisites.clone())
    }
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<RuntimeConfig> {
        let mut figment = Figment::new().merge(Serialized::defaults(RuntimeConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Yaml::file(path));
        }
        let config: RuntimeConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Loads defaults and a YAML file, ignoring the environment.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<RuntimeConfig> {
        let config: RuntimeConfig = Figment::new()
            .merge(Serialized::defaults(RuntimeConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &RuntimeConfig) -> Result<(), ConfigError> {
        let executor = &config.executor;
        if executor.max_concurrency == 0 || executor.max_concurrency > 256 {
            return Err(ConfigError::InvalidMaxConcurrency(executor.max_concurrency));
        }
        if executor.task_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidTaskTimeout(0));
        }
        if executor.run_timeout_secs == Some(0) {
            return Err(ConfigError::InvalidRunTimeout(0));
        }

        if config.events.capacity == 0 {
            return Err(ConfigError::InvalidEventCapacity(config.events.capacity));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        for rule in &config.prerequisites {
            let invalid = |reason: &str| ConfigError::InvalidPrerequisite {
                tool: rule.tool.clone(),
                reason: reason.to_string(),
            };
            if rule.tool.is_empty() || rule.argument.is_empty() {
                return Err(invalid("tool and argument cannot be empty"));
            }
            if rule.lookup_tool.is_empty() || rule.extract_field.is_empty() {
                return Err(invalid("lookup_tool and extract_field cannot be empty"));
            }
            if rule.lookup_tool == rule.tool {
                return Err(invalid("a tool cannot be its own prerequisite"));
            }
        }

        Ok(())
    }
}
