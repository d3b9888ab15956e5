//! Process configuration, loaded once from the environment.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// All tunables from the "Configuration" table, gathered into one struct
/// rather than read ad hoc at each call site.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sync_enabled: bool,
    pub check_interval: Duration,
    pub default_sync_interval: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub auto_register: bool,
    pub history_capacity: usize,
    pub max_concurrent: usize,
    pub metadata_dir: PathBuf,
    pub repos_dir: PathBuf,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            check_interval: Duration::from_secs(60),
            default_sync_interval: Duration::from_secs(60 * 60),
            max_retries: 3,
            retry_base_delay: Duration::from_secs(30),
            auto_register: true,
            history_capacity: 50,
            max_concurrent: 1,
            metadata_dir: PathBuf::from("./data/sync_metadata"),
            repos_dir: PathBuf::from("./data/repos"),
        }
    }
}

impl SchedulerConfig {
    /// Load configuration from the process environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            sync_enabled: env_bool("SYNC_ENABLED", defaults.sync_enabled),
            check_interval: env_secs("SYNC_CHECK_INTERVAL_SECONDS", defaults.check_interval),
            default_sync_interval: env_mins(
                "SYNC_DEFAULT_INTERVAL_MINUTES",
                defaults.default_sync_interval,
            ),
            max_retries: env::var("SYNC_MAX_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            retry_base_delay: env_secs(
                "SYNC_RETRY_BASE_DELAY_SECONDS",
                defaults.retry_base_delay,
            ),
            auto_register: env_bool("SYNC_AUTO_REGISTER", defaults.auto_register),
            history_capacity: env::var("SYNC_HISTORY_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.history_capacity),
            max_concurrent: env::var("SYNC_MAX_CONCURRENT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_concurrent),
            metadata_dir: env::var("SYNC_METADATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.metadata_dir),
            repos_dir: env::var("SYNC_REPOS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.repos_dir),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_mins(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(|m| Duration::from_secs(m * 60))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let config = SchedulerConfig::default();
        assert!(config.sync_enabled);
        assert_eq!(config.check_interval, Duration::from_secs(60));
        assert_eq!(config.default_sync_interval, Duration::from_secs(3600));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_base_delay, Duration::from_secs(30));
        assert!(config.auto_register);
        assert_eq!(config.history_capacity, 50);
        assert_eq!(config.max_concurrent, 1);
    }
}
