//! Server configuration
//!
//! All knobs come from environment variables with sensible defaults,
//! so a bare `sluice-server` starts locally with no setup.

use std::time::Duration;

/// Server configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP listener binds to
    pub bind_addr: String,

    /// How often the dataset poller wakes up to scan triggers
    pub dataset_poll_interval: Duration,
}

impl Config {
    /// Creates configuration from environment variables
    ///
    /// - SLUICE_BIND_ADDR (optional, default: 0.0.0.0:8080)
    /// - SLUICE_DATASET_POLL_INTERVAL (optional, seconds, default: 30)
    pub fn from_env() -> Self {
        let bind_addr =
            std::env::var("SLUICE_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let dataset_poll_interval = std::env::var("SLUICE_DATASET_POLL_INTERVAL")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(30));

        Self {
            bind_addr,
            dataset_poll_interval,
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }

        if self.dataset_poll_interval.as_secs() == 0 {
            anyhow::bail!("dataset_poll_interval must be greater than 0");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            dataset_poll_interval: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.dataset_poll_interval, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.bind_addr = String::new();
        assert!(config.validate().is_err());

        config.bind_addr = "127.0.0.1:9090".to_string();
        config.dataset_poll_interval = Duration::from_secs(0);
        assert!(config.validate().is_err());
    }
}
