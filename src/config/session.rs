//! Per-session audit configuration and inline config extraction
//!
//! Sessions are configured through a fenced ```gan-config``` (or ```json```)
//! block embedded in the submitted thought text. Values are sanitized rather
//! than rejected: out-of-range numbers clamp, empty collections revert to
//! defaults, and an impossible scope rewrites itself with a warning.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// What the context packer includes for the judge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditScope {
    Diff,
    Paths,
    Workspace,
}

/// Effective per-session parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
    /// Human-readable audit intent
    pub task: String,
    pub scope: AuditScope,
    /// Required when scope is `paths`
    pub paths: Vec<String>,
    /// Minimum passing score for the lowest completion tier
    pub threshold: u32,
    /// Soft per-request retry budget
    pub max_cycles: u32,
    /// Judges per iteration
    pub candidates: u32,
    /// Judge model identifiers
    pub judges: Vec<String>,
    /// Whether the judge may emit a proposed diff
    pub apply_fixes: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            task: "Audit and improve the candidate".to_string(),
            scope: AuditScope::Diff,
            paths: Vec::new(),
            threshold: 85,
            max_cycles: 1,
            candidates: 1,
            judges: vec!["internal".to_string()],
            apply_fixes: false,
        }
    }
}

/// Partial config parsed from an inline block; absent fields keep the
/// session's current values.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PartialSessionConfig {
    pub task: Option<String>,
    pub scope: Option<AuditScope>,
    pub paths: Option<Vec<String>>,
    pub threshold: Option<i64>,
    pub max_cycles: Option<i64>,
    pub candidates: Option<i64>,
    pub judges: Option<Vec<String>>,
    pub apply_fixes: Option<bool>,
}

impl SessionConfig {
    /// Merge a partial config into this one, then sanitize.
    /// Returns the warnings produced by sanitization.
    pub fn merge(&mut self, partial: PartialSessionConfig) -> Vec<String> {
        if let Some(task) = partial.task {
            self.task = task;
        }
        if let Some(scope) = partial.scope {
            self.scope = scope;
        }
        if let Some(paths) = partial.paths {
            self.paths = paths;
        }
        if let Some(threshold) = partial.threshold {
            self.threshold = clamp_i64(threshold, 0, 100, "threshold");
        }
        if let Some(max_cycles) = partial.max_cycles {
            self.max_cycles = clamp_i64(max_cycles, 1, 10, "maxCycles");
        }
        if let Some(candidates) = partial.candidates {
            self.candidates = clamp_i64(candidates, 1, 5, "candidates");
        }
        if let Some(judges) = partial.judges {
            self.judges = judges;
        }
        if let Some(apply_fixes) = partial.apply_fixes {
            self.apply_fixes = apply_fixes;
        }
        self.sanitize()
    }

    /// Enforce invariants in place, returning human-readable warnings
    pub fn sanitize(&mut self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.task.trim().is_empty() {
            self.task = SessionConfig::default().task;
            warnings.push("task was empty, reverted to default".to_string());
        }
        self.judges.retain(|j| !j.trim().is_empty());
        if self.judges.is_empty() {
            self.judges = SessionConfig::default().judges;
            warnings.push("judges was empty, reverted to [\"internal\"]".to_string());
        }
        self.paths.retain(|p| !p.trim().is_empty());
        if self.scope == AuditScope::Paths && self.paths.is_empty() {
            self.scope = AuditScope::Workspace;
            warnings.push(
                "scope=paths requires non-empty paths, falling back to workspace".to_string(),
            );
        }
        if self.threshold > 100 {
            self.threshold = 100;
            warnings.push("threshold clamped to 100".to_string());
        }
        if self.max_cycles == 0 || self.max_cycles > 10 {
            self.max_cycles = self.max_cycles.clamp(1, 10);
            warnings.push(format!("maxCycles clamped to {}", self.max_cycles));
        }
        if self.candidates == 0 || self.candidates > 5 {
            self.candidates = self.candidates.clamp(1, 5);
            warnings.push(format!("candidates clamped to {}", self.candidates));
        }

        for warning in &warnings {
            warn!("session config: {warning}");
        }
        warnings
    }
}

fn clamp_i64(value: i64, min: i64, max: i64, name: &str) -> u32 {
    let clamped = value.clamp(min, max);
    if clamped != value {
        warn!("session config: {name}={value} out of range [{min}, {max}], clamped to {clamped}");
    }
    clamped as u32
}

fn config_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?s)```(?:gan-config|json)[ \t]*\r?\n(.*?)```").expect("valid regex")
    })
}

/// Extract the first inline configuration block from thought text.
///
/// Returns the parsed partial config plus warnings. An empty or unparseable
/// block yields no config change, only a warning.
pub fn extract_inline_config(text: &str) -> (Option<PartialSessionConfig>, Vec<String>) {
    let captures = match config_block_re().captures(text) {
        Some(c) => c,
        None => return (None, Vec::new()),
    };
    let body = captures.get(1).map(|m| m.as_str().trim()).unwrap_or("");
    if body.is_empty() {
        return (
            None,
            vec!["inline config block was empty, keeping current config".to_string()],
        );
    }
    match serde_json::from_str::<PartialSessionConfig>(body) {
        Ok(partial) => (Some(partial), Vec::new()),
        Err(e) => (
            None,
            vec![format!("inline config block failed to parse ({e}), keeping current config")],
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SessionConfig::default();
        assert_eq!(config.threshold, 85);
        assert_eq!(config.max_cycles, 1);
        assert_eq!(config.candidates, 1);
        assert_eq!(config.judges, vec!["internal".to_string()]);
        assert_eq!(config.scope, AuditScope::Diff);
        assert!(!config.apply_fixes);
    }

    #[test]
    fn out_of_range_values_clamp_with_warnings() {
        let mut config = SessionConfig::default();
        let warnings = config.merge(PartialSessionConfig {
            threshold: Some(250),
            max_cycles: Some(0),
            candidates: Some(99),
            ..Default::default()
        });
        assert_eq!(config.threshold, 100);
        assert_eq!(config.max_cycles, 1);
        assert_eq!(config.candidates, 5);
        // merge clamps before sanitize runs, so clamping itself warns via
        // tracing; sanitize sees in-range values and stays quiet
        assert!(warnings.is_empty());
    }

    #[test]
    fn paths_scope_without_paths_rewrites_to_workspace() {
        let mut config = SessionConfig {
            scope: AuditScope::Paths,
            paths: vec![],
            ..Default::default()
        };
        let warnings = config.sanitize();
        assert_eq!(config.scope, AuditScope::Workspace);
        assert!(warnings.iter().any(|w| w.contains("workspace")));
    }

    #[test]
    fn empty_task_and_judges_revert_to_defaults() {
        let mut config = SessionConfig {
            task: "   ".to_string(),
            judges: vec!["".to_string()],
            ..Default::default()
        };
        let warnings = config.sanitize();
        assert_eq!(config.task, "Audit and improve the candidate");
        assert_eq!(config.judges, vec!["internal".to_string()]);
        assert_eq!(warnings.len(), 2);
    }

    #[test]
    fn extracts_gan_config_block() {
        let text = "Some reasoning.\n```gan-config\n{\"threshold\": 90, \"scope\": \"workspace\"}\n```\nmore text";
        let (partial, warnings) = extract_inline_config(text);
        assert!(warnings.is_empty());
        let partial = partial.unwrap();
        assert_eq!(partial.threshold, Some(90));
        assert_eq!(partial.scope, Some(AuditScope::Workspace));
    }

    #[test]
    fn first_block_wins() {
        let text = "```json\n{\"threshold\": 70}\n```\n```gan-config\n{\"threshold\": 95}\n```";
        let (partial, _) = extract_inline_config(text);
        assert_eq!(partial.unwrap().threshold, Some(70));
    }

    #[test]
    fn empty_block_warns_without_change() {
        let (partial, warnings) = extract_inline_config("```gan-config\n\n```");
        assert!(partial.is_none());
        assert_eq!(warnings.len(), 1);
    }

    #[test]
    fn bad_json_warns_without_change() {
        let (partial, warnings) = extract_inline_config("```gan-config\n{not json\n```");
        assert!(partial.is_none());
        assert!(warnings[0].contains("failed to parse"));
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = SessionConfig {
            scope: AuditScope::Paths,
            paths: vec!["src/lib.rs".to_string()],
            threshold: 92,
            ..Default::default()
        };
        let raw = serde_json::to_string(&config).unwrap();
        assert!(raw.contains("\"applyFixes\""));
        let back: SessionConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, config);
    }
}
