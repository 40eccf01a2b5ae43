use std::env;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix shared by every task system env var.
const ENV_PREFIX: &str = "TASKWEAVE";

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled key: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_opt(lookup: &impl Fn(&str) -> Option<String>, profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = lookup(&prefixed) {
            return Some(v);
        }
    }
    lookup(key)
}

fn profiled_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    profile: &str,
    key: &str,
    default: T,
) -> T {
    profiled_opt(lookup, profile, key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

// ── Task system config ────────────────────────────────────────

/// Worker pool and frame budget settings for the task system.
///
/// Thread counts of 0 mean "pick a default from the number of CPU cores".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSystemConfig {
    /// Workers for short, frame-bound tasks. 0 = auto.
    #[serde(default)]
    pub short_task_threads: usize,
    /// Workers for long-running tasks. 0 = auto.
    #[serde(default)]
    pub long_task_threads: usize,
    /// Workers for file access tasks.
    #[serde(default = "default_file_access_threads")]
    pub file_access_threads: usize,
    /// Frame duration (ms) that `SomeFrameMainThread` work must not push us over.
    #[serde(default = "default_target_frame_time_ms")]
    pub target_frame_time_ms: f64,
    /// Upper bound of `SomeFrameMainThread` tasks run per frame.
    #[serde(default = "default_some_frame_tasks")]
    pub some_frame_tasks_per_frame: u32,
}

fn default_file_access_threads() -> usize { 1 }
fn default_target_frame_time_ms() -> f64 { 1000.0 / 40.0 }
fn default_some_frame_tasks() -> u32 { 4 }

impl Default for TaskSystemConfig {
    fn default() -> Self {
        Self {
            short_task_threads: 0,
            long_task_threads: 0,
            file_access_threads: default_file_access_threads(),
            target_frame_time_ms: default_target_frame_time_ms(),
            some_frame_tasks_per_frame: default_some_frame_tasks(),
        }
    }
}

impl TaskSystemConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TASKWEAVE_PROFILE`. When set (e.g. `BENCH`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_opt("TASKWEAVE_PROFILE").unwrap_or_default().to_uppercase();
        Self::from_lookup(&profile, env_opt)
    }

    /// Build config from an arbitrary key lookup, using the env var naming scheme.
    pub fn from_lookup(profile: &str, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let p = profile.to_uppercase();
        let key = |name: &str| format!("{}_{}", ENV_PREFIX, name);
        let defaults = Self::default();
        Self {
            short_task_threads: profiled_parse(&lookup, &p, &key("SHORT_TASK_THREADS"), defaults.short_task_threads),
            long_task_threads: profiled_parse(&lookup, &p, &key("LONG_TASK_THREADS"), defaults.long_task_threads),
            file_access_threads: profiled_parse(&lookup, &p, &key("FILE_ACCESS_THREADS"), defaults.file_access_threads),
            target_frame_time_ms: profiled_parse(&lookup, &p, &key("TARGET_FRAME_TIME_MS"), defaults.target_frame_time_ms),
            some_frame_tasks_per_frame: profiled_parse(&lookup, &p, &key("SOME_FRAME_TASKS"), defaults.some_frame_tasks_per_frame),
        }
    }

    /// Parse a TOML document. Missing fields take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file_access_threads == 0 {
            return Err(ConfigError::Invalid(
                "file_access_threads must be at least 1".to_string(),
            ));
        }
        if !(self.target_frame_time_ms > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "target_frame_time_ms must be positive, got {}",
                self.target_frame_time_ms
            )));
        }
        Ok(())
    }

    /// Resolve short task worker count (0 means derive from available cores).
    pub fn resolved_short_task_threads(&self) -> usize {
        resolve_thread_count(self.short_task_threads)
    }

    /// Resolve long task worker count (0 means derive from available cores).
    pub fn resolved_long_task_threads(&self) -> usize {
        resolve_thread_count(self.long_task_threads)
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Task system config:");
        tracing::info!("  short tasks:  {} threads", self.resolved_short_task_threads());
        tracing::info!("  long tasks:   {} threads", self.resolved_long_task_threads());
        tracing::info!("  file access:  {} threads", self.file_access_threads);
        tracing::info!(
            "  frame budget: {:.2} ms, up to {} some-frame tasks",
            self.target_frame_time_ms,
            self.some_frame_tasks_per_frame
        );
    }

    /// Resolved values as JSON, for reports.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "short_task_threads": self.resolved_short_task_threads(),
            "long_task_threads": self.resolved_long_task_threads(),
            "file_access_threads": self.file_access_threads,
            "target_frame_time_ms": self.target_frame_time_ms,
            "some_frame_tasks_per_frame": self.some_frame_tasks_per_frame,
        })
    }
}

/// Two threads are kept free for the main thread and the OS; never fewer than 2, never more than 8.
fn resolve_thread_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    cores.saturating_sub(2).clamp(2, 8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = TaskSystemConfig::default();
        assert_eq!(config.short_task_threads, 0);
        assert_eq!(config.long_task_threads, 0);
        assert_eq!(config.file_access_threads, 1);
        assert_eq!(config.target_frame_time_ms, 25.0);
        assert_eq!(config.some_frame_tasks_per_frame, 4);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn auto_thread_counts_are_clamped() {
        let config = TaskSystemConfig::default();
        let short = config.resolved_short_task_threads();
        assert!((2..=8).contains(&short), "got {}", short);

        let explicit = TaskSystemConfig {
            short_task_threads: 12,
            long_task_threads: 1,
            ..Default::default()
        };
        assert_eq!(explicit.resolved_short_task_threads(), 12);
        assert_eq!(explicit.resolved_long_task_threads(), 1);
    }

    #[test]
    fn lookup_reads_prefixed_keys() {
        let config = TaskSystemConfig::from_lookup(
            "",
            lookup_from(&[
                ("TASKWEAVE_SHORT_TASK_THREADS", "6"),
                ("TASKWEAVE_TARGET_FRAME_TIME_MS", "16.6"),
                ("TASKWEAVE_SOME_FRAME_TASKS", "not-a-number"),
            ]),
        );
        assert_eq!(config.short_task_threads, 6);
        assert_eq!(config.long_task_threads, 0);
        assert!((config.target_frame_time_ms - 16.6).abs() < 1e-9);
        assert_eq!(config.some_frame_tasks_per_frame, 4);
    }

    #[test]
    fn profile_overrides_fall_back_to_plain_keys() {
        let config = TaskSystemConfig::from_lookup(
            "bench",
            lookup_from(&[
                ("BENCH_TASKWEAVE_SHORT_TASK_THREADS", "3"),
                ("TASKWEAVE_SHORT_TASK_THREADS", "6"),
                ("TASKWEAVE_LONG_TASK_THREADS", "2"),
            ]),
        );
        assert_eq!(config.short_task_threads, 3);
        assert_eq!(config.long_task_threads, 2);
    }

    #[test]
    fn toml_partial_document_uses_defaults() {
        let config = TaskSystemConfig::from_toml_str("short_task_threads = 4\n").unwrap();
        assert_eq!(config.short_task_threads, 4);
        assert_eq!(config.file_access_threads, 1);
    }

    #[test]
    fn toml_rejects_invalid_values() {
        let err = TaskSystemConfig::from_toml_str("file_access_threads = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = TaskSystemConfig::from_toml_str("target_frame_time_ms = -1.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = TaskSystemConfig::from_toml_str("short_task_threads = \"many\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn from_file_round_trips_serialized_config() {
        let config = TaskSystemConfig {
            short_task_threads: 3,
            long_task_threads: 2,
            file_access_threads: 1,
            target_frame_time_ms: 16.0,
            some_frame_tasks_per_frame: 8,
        };
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml::to_string_pretty(&config).unwrap().as_bytes())
            .unwrap();

        let loaded = TaskSystemConfig::from_file(file.path()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn from_file_missing_is_io_error() {
        let err = TaskSystemConfig::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
