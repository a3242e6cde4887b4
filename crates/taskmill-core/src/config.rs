use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Age after which a `locked` timestamp is treated as abandoned by a crashed
/// holder and may be overwritten by the next caller.
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 300;

/// Upper bound for the forward scan when resolving a cron expression to its
/// next match. Guards against impossible field combinations (e.g. Feb 31).
pub const DEFAULT_CRON_HORIZON_DAYS: u32 = 1461; // 4 years, covers leap cycles

/// Top-level config (taskmill.toml + TASKMILL_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TaskmillConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

/// Knobs consumed by the scheduler core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Lock staleness threshold in seconds.
    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_secs: u64,
    /// Maximum days scanned forward for a cron match.
    #[serde(default = "default_cron_horizon")]
    pub cron_horizon_days: u32,
    /// How the due-task queue is ordered when picking candidates.
    #[serde(default)]
    pub ordering: QueueOrdering,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            lock_timeout_secs: default_lock_timeout(),
            cron_horizon_days: default_cron_horizon(),
            ordering: QueueOrdering::default(),
        }
    }
}

/// Queue ordering policy. The default mirrors "most urgent wins":
/// priority descending, earliest due time breaking ties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum QueueOrdering {
    #[default]
    PriorityThenDue,
    Id,
}

fn default_lock_timeout() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}
fn default_cron_horizon() -> u32 {
    DEFAULT_CRON_HORIZON_DAYS
}
fn default_db_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.taskmill/taskmill.db", home)
}

impl TaskmillConfig {
    /// Load config from a TOML file with TASKMILL_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. ~/.taskmill/taskmill.toml
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: TaskmillConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("TASKMILL_").split("_"))
            .extract()
            .map_err(|e| crate::error::CoreError::Config(e.to_string()))?;

        Ok(config)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.taskmill/taskmill.toml", home)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = TaskmillConfig::default();
        assert_eq!(cfg.scheduler.lock_timeout_secs, 300);
        assert_eq!(cfg.scheduler.cron_horizon_days, 1461);
        assert_eq!(cfg.scheduler.ordering, QueueOrdering::PriorityThenDue);
        assert!(cfg.database.path.ends_with("taskmill.db"));
    }
}
