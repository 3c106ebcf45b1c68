//! Operator configuration
//!
//! Values are resolved once at process start (see the operator binary's CLI)
//! and handed to the builders and controller contexts. Nothing here reads the
//! environment; that keeps builders pure and tests free of global state.

use std::time::Duration;

use crate::retry::RetryConfig;
use crate::{DEFAULT_IMAGE, DEFAULT_PORT, DEFAULT_TELEMETRY_PATH};

/// Process-wide defaults used by the resource builders
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDefaults {
    /// Image used when neither the spec nor the previous status names one
    pub image: String,
    /// Port used when the spec leaves it unset or non-positive
    pub port: i32,
    /// Telemetry path used when the spec leaves it empty
    pub telemetry_path: String,
}

impl Default for ResourceDefaults {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            port: DEFAULT_PORT,
            telemetry_path: DEFAULT_TELEMETRY_PATH.to_string(),
        }
    }
}

impl ResourceDefaults {
    /// Defaults with a different base image
    pub fn with_image(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            ..Default::default()
        }
    }
}

/// Timing knobs for the Pushgateway controller
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Limit applied to every individual Cluster Store call
    pub api_timeout: Duration,
    /// Requeue delay after a pass that created or updated something
    pub requeue_delay: Duration,
    /// Requeue delay after a pass that found everything in sync
    pub resync_interval: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(10),
            requeue_delay: Duration::from_secs(5),
            resync_interval: Duration::from_secs(300),
        }
    }
}

/// Knobs for the Job/CronJob injection controller
#[derive(Clone, Debug)]
pub struct InjectionConfig {
    /// Limit applied to every individual Cluster Store call
    pub api_timeout: Duration,
    /// Retry policy for re-creating a workload after its delete
    pub recreate_retry: RetryConfig,
}

/// Default number of create attempts after a delete (first try + 6 retries)
pub const DEFAULT_RECREATE_ATTEMPTS: u32 = 7;

/// Default wait between create attempts
pub const DEFAULT_RECREATE_DELAY: Duration = Duration::from_secs(10);

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            api_timeout: Duration::from_secs(10),
            recreate_retry: RetryConfig::fixed(DEFAULT_RECREATE_ATTEMPTS, DEFAULT_RECREATE_DELAY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_pushgateway_defaults() {
        let defaults = ResourceDefaults::default();
        assert_eq!(defaults.image, "prom/pushgateway");
        assert_eq!(defaults.port, 9091);
        assert_eq!(defaults.telemetry_path, "/metrics");

        let custom = ResourceDefaults::with_image("registry.local/pushgateway:v1.9.0");
        assert_eq!(custom.image, "registry.local/pushgateway:v1.9.0");
        assert_eq!(custom.port, 9091);
    }

    #[test]
    fn injection_retries_six_times_ten_seconds_apart() {
        let config = InjectionConfig::default();
        assert_eq!(config.recreate_retry.max_attempts, 7);
        assert_eq!(config.recreate_retry.delay, Duration::from_secs(10));
    }
}
