//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a [`Factory`](crate::Factory).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Upper bound on tasks run by a single
    /// [`Factory::run_until_idle`](crate::Factory::run_until_idle) call.
    pub max_task_turns: usize,

    /// Version used when opening a database that does not exist without
    /// naming a version.
    pub default_open_version: u64,

    /// Whether to emit a trace event for every executed request.
    pub log_requests: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_task_turns: 1_000_000,
            default_open_version: 1,
            log_requests: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the task budget of a single run.
    #[must_use]
    pub const fn max_task_turns(mut self, turns: usize) -> Self {
        self.max_task_turns = turns;
        self
    }

    /// Sets the version used for first opens without a version.
    #[must_use]
    pub const fn default_open_version(mut self, version: u64) -> Self {
        self.default_open_version = version;
        self
    }

    /// Sets whether executed requests are traced.
    #[must_use]
    pub const fn log_requests(mut self, value: bool) -> Self {
        self.log_requests = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.max_task_turns, 1_000_000);
        assert_eq!(config.default_open_version, 1);
        assert!(!config.log_requests);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .max_task_turns(10)
            .default_open_version(3)
            .log_requests(true);

        assert_eq!(config.max_task_turns, 10);
        assert_eq!(config.default_open_version, 3);
        assert!(config.log_requests);
    }
}
