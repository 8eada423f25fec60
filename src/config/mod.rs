//! Runtime configuration loaded from the environment
//!
//! All knobs are read once at startup from `GAVEL_*` variables, clamped into
//! their valid ranges, and frozen. Out-of-range values are clamped with a
//! warning rather than rejected; unparseable values fall back to defaults.

pub mod session;

pub use session::{extract_inline_config, AuditScope, PartialSessionConfig, SessionConfig};

use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Immutable runtime configuration for the audit orchestrator
#[derive(Debug, Clone)]
pub struct GavelConfig {
    /// Where session files live
    pub state_dir: PathBuf,
    /// Per-audit deadline
    pub audit_timeout: Duration,
    /// Heartbeat cadence while awaiting the judge
    pub progress_interval: Duration,
    pub max_concurrent_audits: usize,
    pub max_concurrent_sessions: usize,
    /// How long an audit may wait for a free slot
    pub queue_timeout: Duration,
    pub session_cleanup_interval: Duration,
    pub max_session_age: Duration,
    pub enable_caching: bool,
    pub enable_persistence: bool,
    pub judge_executable: String,
    /// Retries for transient judge failures
    pub judge_retries: u32,
    /// Retries after a judge timeout that produced a partial verdict
    pub timeout_retry_attempts: u32,
    pub cache_ttl: Duration,
    pub cache_capacity: usize,
    /// Average-similarity level treated as stagnation
    pub stagnation_threshold: f64,
    /// How many recent candidates the similarity window covers
    pub similarity_window: usize,
}

impl Default for GavelConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".mcp-gan-state"),
            audit_timeout: Duration::from_secs(30),
            progress_interval: Duration::from_millis(5_000),
            max_concurrent_audits: 10,
            max_concurrent_sessions: 50,
            queue_timeout: Duration::from_millis(30_000),
            session_cleanup_interval: Duration::from_millis(3_600_000),
            max_session_age: Duration::from_millis(86_400_000),
            enable_caching: true,
            enable_persistence: true,
            judge_executable: "codex".to_string(),
            judge_retries: 2,
            timeout_retry_attempts: 1,
            cache_ttl: Duration::from_secs(600),
            cache_capacity: 256,
            stagnation_threshold: 0.95,
            similarity_window: 10,
        }
    }
}

impl GavelConfig {
    /// Load configuration from `GAVEL_*` environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            state_dir: std::env::var("GAVEL_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            audit_timeout: Duration::from_secs(clamped_env_u64(
                "GAVEL_AUDIT_TIMEOUT_SECONDS",
                30,
                5,
                300,
            )),
            progress_interval: Duration::from_millis(clamped_env_u64(
                "GAVEL_PROGRESS_INTERVAL_MS",
                5_000,
                100,
                60_000,
            )),
            max_concurrent_audits: clamped_env_u64("GAVEL_MAX_CONCURRENT_AUDITS", 10, 1, 1_000)
                as usize,
            max_concurrent_sessions: clamped_env_u64("GAVEL_MAX_CONCURRENT_SESSIONS", 50, 1, 10_000)
                as usize,
            queue_timeout: Duration::from_millis(clamped_env_u64(
                "GAVEL_QUEUE_TIMEOUT_MS",
                30_000,
                100,
                600_000,
            )),
            session_cleanup_interval: Duration::from_millis(clamped_env_u64(
                "GAVEL_SESSION_CLEANUP_INTERVAL_MS",
                3_600_000,
                1_000,
                86_400_000,
            )),
            max_session_age: Duration::from_millis(clamped_env_u64(
                "GAVEL_MAX_SESSION_AGE_MS",
                86_400_000,
                1_000,
                u64::MAX / 2,
            )),
            enable_caching: bool_env("GAVEL_ENABLE_CACHING", true),
            enable_persistence: bool_env("GAVEL_ENABLE_PERSISTENCE", true),
            judge_executable: std::env::var("GAVEL_JUDGE_EXECUTABLE")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.judge_executable),
            judge_retries: clamped_env_u64("GAVEL_JUDGE_RETRIES", 2, 0, 10) as u32,
            timeout_retry_attempts: clamped_env_u64("GAVEL_TIMEOUT_RETRY_ATTEMPTS", 1, 0, 5) as u32,
            cache_ttl: Duration::from_secs(clamped_env_u64("GAVEL_CACHE_TTL_SECONDS", 600, 1, 86_400)),
            cache_capacity: clamped_env_u64("GAVEL_CACHE_CAPACITY", 256, 1, 65_536) as usize,
            stagnation_threshold: defaults.stagnation_threshold,
            similarity_window: defaults.similarity_window,
        }
    }
}

/// Parse a boolean option: exactly "true"/"false", case-insensitive.
/// Anything else parses as false; absence keeps the default.
fn bool_env(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" => true,
            "false" => false,
            other => {
                warn!("{name}={other:?} is not a boolean, treating as false");
                false
            }
        },
        Err(_) => default,
    }
}

/// Read a numeric option, clamping into [min, max] with a warning
fn clamped_env_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    let raw = match std::env::var(name) {
        Ok(raw) => raw,
        Err(_) => return default,
    };
    let value = match raw.trim().parse::<u64>() {
        Ok(v) => v,
        Err(_) => {
            warn!("{name}={raw:?} is not a number, using default {default}");
            return default;
        }
    };
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("{name}={value} out of range [{min}, {max}], clamped to {clamped}");
    }
    clamped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = GavelConfig::default();
        assert_eq!(config.state_dir, PathBuf::from(".mcp-gan-state"));
        assert_eq!(config.audit_timeout, Duration::from_secs(30));
        assert_eq!(config.progress_interval, Duration::from_millis(5_000));
        assert_eq!(config.max_concurrent_audits, 10);
        assert_eq!(config.max_concurrent_sessions, 50);
        assert_eq!(config.queue_timeout, Duration::from_millis(30_000));
        assert_eq!(config.max_session_age, Duration::from_millis(86_400_000));
        assert!(config.enable_caching);
        assert!(config.enable_persistence);
        assert_eq!(config.judge_executable, "codex");
        assert_eq!(config.judge_retries, 2);
    }

    #[test]
    fn bool_env_rejects_non_boolean_text() {
        std::env::set_var("GAVEL_TEST_BOOL_A", "yes");
        assert!(!bool_env("GAVEL_TEST_BOOL_A", true));
        std::env::set_var("GAVEL_TEST_BOOL_A", "TRUE");
        assert!(bool_env("GAVEL_TEST_BOOL_A", false));
        std::env::set_var("GAVEL_TEST_BOOL_A", "False");
        assert!(!bool_env("GAVEL_TEST_BOOL_A", true));
        std::env::remove_var("GAVEL_TEST_BOOL_A");
        assert!(bool_env("GAVEL_TEST_BOOL_A", true));
    }

    #[test]
    fn numeric_env_clamps_out_of_range() {
        std::env::set_var("GAVEL_TEST_NUM_A", "900");
        assert_eq!(clamped_env_u64("GAVEL_TEST_NUM_A", 30, 5, 300), 300);
        std::env::set_var("GAVEL_TEST_NUM_A", "1");
        assert_eq!(clamped_env_u64("GAVEL_TEST_NUM_A", 30, 5, 300), 5);
        std::env::set_var("GAVEL_TEST_NUM_A", "garbage");
        assert_eq!(clamped_env_u64("GAVEL_TEST_NUM_A", 30, 5, 300), 30);
        std::env::remove_var("GAVEL_TEST_NUM_A");
    }
}
