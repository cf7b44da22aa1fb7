use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, ThrottleError};

/// Admission policy for a fixed-window limiter
///
/// The policy is immutable once a limiter is constructed from it. In YAML
/// the window is expressed in integer milliseconds (`window_ms`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixedWindowConfig {
    /// Maximum permits granted per window, must be > 0
    pub permit_limit: u32,
    /// Length of each window, must be > 0
    #[serde(rename = "window_ms", with = "duration_ms")]
    pub window: Duration,
    /// Maximum callers allowed to wait for the next window; 0 disables queueing
    #[serde(default)]
    pub queue_limit: usize,
    #[serde(default)]
    pub queue_order: QueueOrder,
    /// Whether a background task rotates the window on a timer
    #[serde(default = "default_auto_rotation")]
    pub auto_rotation: bool,
}

/// Drain order for queued waiters when a rotation frees permits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueOrder {
    OldestFirst,
    NewestFirst,
}

impl Default for QueueOrder {
    fn default() -> Self {
        QueueOrder::OldestFirst
    }
}

fn default_auto_rotation() -> bool {
    true
}

impl FixedWindowConfig {
    /// Create a policy with queueing disabled and timer-driven rotation on
    pub fn new(permit_limit: u32, window: Duration) -> Self {
        Self {
            permit_limit,
            window,
            queue_limit: 0,
            queue_order: QueueOrder::default(),
            auto_rotation: default_auto_rotation(),
        }
    }

    /// Allow up to `queue_limit` callers to wait for the next window
    pub fn with_queue(mut self, queue_limit: usize, queue_order: QueueOrder) -> Self {
        self.queue_limit = queue_limit;
        self.queue_order = queue_order;
        self
    }

    /// Enable or disable the background rotation task
    pub fn with_auto_rotation(mut self, enabled: bool) -> Self {
        self.auto_rotation = enabled;
        self
    }

    /// Check the policy for values a limiter cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.permit_limit == 0 {
            return Err(ThrottleError::Config(
                "permit_limit must be greater than zero".to_string(),
            ));
        }
        if self.window.is_zero() {
            return Err(ThrottleError::Config(
                "window_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Load a policy from a YAML string
pub fn load_config_from_yaml(yaml: &str) -> Result<FixedWindowConfig> {
    let config: FixedWindowConfig = serde_yaml::from_str(yaml)?;
    config.validate()?;
    Ok(config)
}

/// Load a policy from a YAML file
pub fn load_config_from_file(path: &str) -> Result<FixedWindowConfig> {
    let content = std::fs::read_to_string(path)?;
    load_config_from_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_from_yaml() {
        let yaml = r#"
permit_limit: 2
window_ms: 10000
queue_limit: 4
queue_order: newest_first
"#;

        let config = load_config_from_yaml(yaml).unwrap();
        assert_eq!(config.permit_limit, 2);
        assert_eq!(config.window, Duration::from_secs(10));
        assert_eq!(config.queue_limit, 4);
        assert_eq!(config.queue_order, QueueOrder::NewestFirst);
        assert!(config.auto_rotation);
    }

    #[test]
    fn test_optional_fields_default() {
        let yaml = r#"
permit_limit: 100
window_ms: 60000
"#;

        let config = load_config_from_yaml(yaml).unwrap();
        assert_eq!(config.queue_limit, 0);
        assert_eq!(config.queue_order, QueueOrder::OldestFirst);
        assert!(config.auto_rotation);
    }

    #[test]
    fn test_rejects_zero_permit_limit() {
        let config = FixedWindowConfig::new(0, Duration::from_secs(1));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ThrottleError::Config(msg) if msg.contains("permit_limit")));
    }

    #[test]
    fn test_rejects_zero_window() {
        let config = FixedWindowConfig::new(5, Duration::ZERO);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ThrottleError::Config(msg) if msg.contains("window_ms")));
    }

    #[test]
    fn test_rejects_malformed_yaml() {
        let result = load_config_from_yaml("permit_limit: [not-a-number");
        assert!(matches!(result, Err(ThrottleError::Yaml(_))));
    }

    #[test]
    fn test_builder_queueing() {
        let config = FixedWindowConfig::new(10, Duration::from_millis(500))
            .with_queue(3, QueueOrder::NewestFirst)
            .with_auto_rotation(false);

        assert_eq!(config.queue_limit, 3);
        assert_eq!(config.queue_order, QueueOrder::NewestFirst);
        assert!(!config.auto_rotation);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_serialization_uses_millis() {
        let config = FixedWindowConfig::new(2, Duration::from_secs(10));
        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("window_ms: 10000"));
    }
}
