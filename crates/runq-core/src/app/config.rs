//! TaskConfig - manager settings.
//!
//! Layered with figment: built-in defaults, then an optional TOML file,
//! then `RUNQ_*` environment variables.

use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Test mode: `TaskManager::launch` does not start the worker loops.
    pub test: bool,

    /// Seconds to sleep between passes. 0 disables the sleep.
    pub sleep: u64,

    /// Number of worker loops.
    pub threads: usize,

    /// Prepended to every operator name at registration.
    pub queue_prefix: String,

    /// Backoff ceiling in seconds, shared by all operators.
    pub max_delay: u64,

    /// Let at most one worker loop drain an operator at a time.
    pub no_suffocating: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            test: false,
            sleep: 2,
            threads: 1,
            queue_prefix: String::new(),
            max_delay: 3600,
            no_suffocating: true,
        }
    }
}

impl TaskConfig {
    pub fn load(config_path: Option<&str>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(TaskConfig::default()));

        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("RUNQ_").split("__"));

        figment.extract()
    }

    /// Config for driving a manager by hand: no loops, no sleep.
    pub fn for_test() -> Self {
        Self {
            test: true,
            sleep: 0,
            ..Self::default()
        }
    }

    pub fn sleep_interval(&self) -> Duration {
        Duration::from_secs(self.sleep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults() {
        let config = TaskConfig::default();
        assert!(!config.test);
        assert_eq!(config.sleep_interval(), Duration::from_secs(2));
        assert_eq!(config.threads, 1);
        assert_eq!(config.max_delay, 3600);
        assert!(config.no_suffocating);
        assert!(config.queue_prefix.is_empty());
    }

    #[test]
    fn file_then_env_override_defaults() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "runq.toml",
                r#"
                    threads = 4
                    sleep = 0
                    queue_prefix = "tenant-a:"
                "#,
            )?;
            jail.set_env("RUNQ_THREADS", "8");
            jail.set_env("RUNQ_NO_SUFFOCATING", "false");

            let config = TaskConfig::load(Some("runq.toml"))?;
            assert_eq!(config.threads, 8);
            assert_eq!(config.sleep, 0);
            assert_eq!(config.queue_prefix, "tenant-a:");
            assert!(!config.no_suffocating);
            assert_eq!(config.max_delay, 3600);
            Ok(())
        });
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = TaskConfig::load(Some("absent.toml"))?;
            assert_eq!(config, TaskConfig::default());
            Ok(())
        });
    }
}
