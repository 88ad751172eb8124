//! Per-flow execution settings: concurrency policy, timeouts, retries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// What happens when a trigger arrives while the flow is already running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyMode {
    /// Always admit; no run-set accounting.
    #[default]
    Allow,
    /// Reject new triggers once the cap is reached.
    Deny,
    /// Queue new triggers FIFO once the cap is reached.
    Queue,
    /// Cancel the running executions and admit the new trigger.
    Replace,
}

/// Granularity of the concurrency-control key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    /// One run-set per flow.
    #[default]
    Flow,
    /// One run-set per `flow + key_expression(trigger payload)` value.
    Key,
}

/// Concurrency policy of one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcurrencyPolicy {
    /// Admission mode.
    #[serde(default)]
    pub mode: ConcurrencyMode,
    /// Run-set granularity.
    #[serde(default)]
    pub scope: ConcurrencyScope,
    /// Maximum concurrently running executions per scope key (≥ 1).
    #[serde(default = "default_max_instances")]
    pub max_instances: u32,
    /// Dotted path into the trigger payload, used for [`ConcurrencyScope::Key`].
    #[serde(default)]
    pub key_expression: Option<String>,
}

fn default_max_instances() -> u32 {
    1
}

impl Default for ConcurrencyPolicy {
    fn default() -> Self {
        Self {
            mode: ConcurrencyMode::default(),
            scope: ConcurrencyScope::default(),
            max_instances: default_max_instances(),
            key_expression: None,
        }
    }
}

impl ConcurrencyPolicy {
    /// The effective cap; a configured value of 0 is treated as 1.
    #[must_use]
    pub fn cap(&self) -> usize {
        self.max_instances.max(1) as usize
    }
}

/// Retry policy for failed node attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts per node, including the first (≥ 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Backoff before the first retry.
    #[serde(with = "crate::serde_millis", default = "default_backoff")]
    pub initial_backoff: Duration,
    /// Backoff multiplier per further retry.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

fn default_max_attempts() -> u32 {
    1
}

fn default_backoff() -> Duration {
    Duration::from_millis(1_000)
}

fn default_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff: default_backoff(),
            multiplier: default_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// The effective attempt cap; a configured value of 0 is treated as 1.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Backoff before re-running a node that has already failed
    /// `retry_count` times: `initial_backoff × multiplier^retry_count`.
    #[must_use]
    pub fn backoff_for(&self, retry_count: u32) -> Duration {
        let factor = self.multiplier.max(0.0).powi(retry_count as i32);
        self.initial_backoff.mul_f64(factor)
    }
}

/// Everything the engine needs to know about running one flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowSettings {
    /// Disabled flows reject every trigger at admission.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Concurrency policy.
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    /// Wall-clock budget for the whole execution.
    #[serde(with = "crate::serde_millis_opt", default)]
    pub flow_timeout: Option<Duration>,
    /// Deadline applied to each node invocation.
    #[serde(with = "crate::serde_millis_opt", default)]
    pub node_timeout: Option<Duration>,
    /// Retry policy for failed nodes.
    #[serde(default)]
    pub retry: RetryPolicy,
}

fn default_enabled() -> bool {
    true
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            concurrency: ConcurrencyPolicy::default(),
            flow_timeout: None,
            node_timeout: None,
            retry: RetryPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[test]
    fn defaults() {
        let settings = FlowSettings::default();
        assert!(settings.enabled);
        assert_eq!(settings.concurrency.mode, ConcurrencyMode::Allow);
        assert_eq!(settings.concurrency.cap(), 1);
        assert_eq!(settings.retry.attempts(), 1);
        assert!(settings.flow_timeout.is_none());
    }

    #[test]
    fn zero_caps_are_clamped() {
        let policy = ConcurrencyPolicy {
            max_instances: 0,
            ..ConcurrencyPolicy::default()
        };
        assert_eq!(policy.cap(), 1);

        let retry = RetryPolicy {
            max_attempts: 0,
            ..RetryPolicy::default()
        };
        assert_eq!(retry.attempts(), 1);
    }

    #[rstest]
    #[case(0, 20)]
    #[case(1, 40)]
    #[case(2, 80)]
    #[case(3, 160)]
    fn backoff_grows_geometrically(#[case] retry_count: u32, #[case] expected_ms: u64) {
        let retry = RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(20),
            multiplier: 2.0,
        };
        assert_eq!(
            retry.backoff_for(retry_count),
            Duration::from_millis(expected_ms)
        );
    }

    #[test]
    fn serde_durations_as_millis() {
        let settings = FlowSettings {
            flow_timeout: Some(Duration::from_secs(2)),
            node_timeout: Some(Duration::from_millis(250)),
            ..FlowSettings::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert_eq!(json["flow_timeout"], 2_000);
        assert_eq!(json["node_timeout"], 250);
        assert_eq!(json["retry"]["initial_backoff"], 1_000);

        let back: FlowSettings = serde_json::from_value(json).unwrap();
        assert_eq!(back, settings);
    }

    #[test]
    fn serde_mode_snake_case() {
        let json = serde_json::to_string(&ConcurrencyMode::Replace).unwrap();
        assert_eq!(json, "\"replace\"");
    }

    #[test]
    fn deserialize_empty_object_uses_defaults() {
        let settings: FlowSettings = serde_json::from_str("{}").unwrap();
        assert_eq!(settings, FlowSettings::default());
    }
}
