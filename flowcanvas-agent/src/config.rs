//! Agent configuration.
//!
//! Every section has a [`Default`]; [`AgentConfig::from_env`] overlays the
//! `FLOWCANVAS_*` environment variables on top of those defaults.

use std::str::FromStr;
use std::time::Duration;

use flowcanvas_core::{ApplyMode, LintOptions};

/// Generator endpoint URL.
pub const ENV_GENERATOR_URL: &str = "FLOWCANVAS_GENERATOR_URL";
/// Generator call timeout in milliseconds.
pub const ENV_CALL_TIMEOUT_MS: &str = "FLOWCANVAS_CALL_TIMEOUT_MS";
/// Validation attempts per stage.
pub const ENV_MAX_ATTEMPTS: &str = "FLOWCANVAS_MAX_ATTEMPTS";
/// Scheduler base debounce wait in milliseconds.
pub const ENV_BASE_WAIT_MS: &str = "FLOWCANVAS_BASE_WAIT_MS";
/// Scheduler cooldown in milliseconds.
pub const ENV_COOLDOWN_MS: &str = "FLOWCANVAS_COOLDOWN_MS";
/// Apply mode, `replace` or `incremental`.
pub const ENV_APPLY_MODE: &str = "FLOWCANVAS_APPLY_MODE";

/// Timing for the adaptive debounced scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Debounce wait after a fast or first execution.
    pub base_wait: Duration,
    /// Debounce wait after a slow execution.
    pub slow_wait: Duration,
    /// Executions longer than this raise the wait to `slow_wait`.
    pub slow_threshold: Duration,
    /// Executions shorter than this relax the wait to `base_wait`.
    pub fast_threshold: Duration,
    /// Minimum spacing between a completed execution and the next start.
    pub cooldown: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            base_wait: Duration::from_millis(1000),
            slow_wait: Duration::from_millis(2500),
            slow_threshold: Duration::from_secs(8),
            fast_threshold: Duration::from_secs(3),
            cooldown: Duration::from_millis(1500),
        }
    }
}

/// Configuration for HTTP retry with exponential backoff.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Initial delay between retries in milliseconds.
    pub initial_delay_ms: u64,
    /// Maximum delay between retries in milliseconds.
    pub max_delay_ms: u64,
    /// Multiplier for exponential backoff.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 200,
            max_delay_ms: 5000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        initial_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            initial_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    /// Calculate the delay for a given retry attempt (0-indexed).
    ///
    /// Uses exponential backoff: `delay = initial * multiplier^attempt`,
    /// capped at `max_delay_ms`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.initial_delay_ms as f64 * self.multiplier.powi(attempt as i32);
        Duration::from_millis(base.min(self.max_delay_ms as f64) as u64)
    }
}

/// Generator endpoint and call limits.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorConfig {
    /// Endpoint of the HTTP generator, if one is configured.
    pub url: Option<String>,
    /// Wall-clock limit for a single generator call.
    pub call_timeout: Duration,
    /// Transport-level retry policy.
    pub retry: RetryConfig,
    /// User agent sent with every request.
    pub user_agent: String,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            url: None,
            call_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            user_agent: format!("flowcanvas-agent/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Validation loop limits.
#[derive(Debug, Clone)]
pub struct ValidationConfig {
    /// Failed attempts allowed per stage before giving up.
    pub max_attempts_per_stage: u32,
    /// Linter rules.
    pub lint: LintOptions,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_stage: 5,
            lint: LintOptions::default(),
        }
    }
}

/// Per-session behavior.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    /// Transcript chunks below this confidence are ignored.
    pub min_confidence: f32,
    /// How accepted diagrams are applied to a non-empty canvas.
    pub apply_mode: ApplyMode,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            apply_mode: ApplyMode::ReplaceCanvas,
        }
    }
}

/// Complete agent configuration.
#[derive(Debug, Clone, Default)]
pub struct AgentConfig {
    /// Scheduler timing.
    pub scheduler: SchedulerConfig,
    /// Generator endpoint.
    pub generator: GeneratorConfig,
    /// Validation limits.
    pub validation: ValidationConfig,
    /// Session behavior.
    pub session: SessionConfig,
}

impl AgentConfig {
    /// Defaults overlaid with the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overlaid with values from `lookup`.
    ///
    /// Values that fail to parse leave the default in place.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parsed = |key: &str| parse_var::<u64>(&lookup, key);

        if let Some(url) = lookup(ENV_GENERATOR_URL).filter(|u| !u.trim().is_empty()) {
            config.generator.url = Some(url.trim().to_string());
        }
        if let Some(ms) = parsed(ENV_CALL_TIMEOUT_MS) {
            config.generator.call_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<u32>(&lookup, ENV_MAX_ATTEMPTS).filter(|n| *n > 0) {
            config.validation.max_attempts_per_stage = n;
        }
        if let Some(ms) = parsed(ENV_BASE_WAIT_MS) {
            config.scheduler.base_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed(ENV_COOLDOWN_MS) {
            config.scheduler.cooldown = Duration::from_millis(ms);
        }
        if let Some(mode) = parse_var::<ApplyMode>(&lookup, ENV_APPLY_MODE) {
            config.session.apply_mode = mode;
        }
        config
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.scheduler.base_wait, Duration::from_millis(1000));
        assert_eq!(config.scheduler.slow_wait, Duration::from_millis(2500));
        assert_eq!(config.scheduler.cooldown, Duration::from_millis(1500));
        assert_eq!(config.generator.call_timeout, Duration::from_secs(30));
        assert_eq!(config.generator.retry.max_attempts, 3);
        assert_eq!(config.validation.max_attempts_per_stage, 5);
        assert!((config.session.min_confidence - 0.5).abs() < f32::EPSILON);
        assert_eq!(config.session.apply_mode, ApplyMode::ReplaceCanvas);
    }

    #[test]
    fn test_overlay_from_lookup() {
        let config = AgentConfig::from_lookup(lookup(&[
            (ENV_GENERATOR_URL, " http://localhost:9000/generate "),
            (ENV_CALL_TIMEOUT_MS, "5000"),
            (ENV_MAX_ATTEMPTS, "2"),
            (ENV_BASE_WAIT_MS, "250"),
            (ENV_COOLDOWN_MS, "0"),
            (ENV_APPLY_MODE, "incremental"),
        ]));
        assert_eq!(
            config.generator.url.as_deref(),
            Some("http://localhost:9000/generate")
        );
        assert_eq!(config.generator.call_timeout, Duration::from_secs(5));
        assert_eq!(config.validation.max_attempts_per_stage, 2);
        assert_eq!(config.scheduler.base_wait, Duration::from_millis(250));
        assert_eq!(config.scheduler.cooldown, Duration::ZERO);
        assert_eq!(config.session.apply_mode, ApplyMode::Incremental);
    }

    #[test]
    fn test_unparsable_values_keep_defaults() {
        let config = AgentConfig::from_lookup(lookup(&[
            (ENV_CALL_TIMEOUT_MS, "soon"),
            (ENV_MAX_ATTEMPTS, "0"),
            (ENV_APPLY_MODE, "sideways"),
        ]));
        assert_eq!(config.generator.call_timeout, Duration::from_secs(30));
        assert_eq!(config.validation.max_attempts_per_stage, 5);
        assert_eq!(config.session.apply_mode, ApplyMode::ReplaceCanvas);
    }

    #[test]
    fn test_retry_config_exponential_backoff_sequence() {
        let config = RetryConfig::default();
        assert_eq!(config.delay_for_attempt(0), Duration::from_millis(200));
        assert_eq!(config.delay_for_attempt(1), Duration::from_millis(400));
        assert_eq!(config.delay_for_attempt(2), Duration::from_millis(800));
        assert_eq!(config.delay_for_attempt(10), Duration::from_millis(5000));
    }
}
