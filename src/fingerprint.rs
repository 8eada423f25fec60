//! Deterministic audit fingerprints
//!
//! A fingerprint is a stable SHA-256 digest over the tuple (task text,
//! candidate, rubric, workflow config subset). It keys the audit cache and
//! witnesses resubmission of identical work. Computing one never fails.

use sha2::{Digest, Sha256};

use crate::config::SessionConfig;
use crate::judge::Rubric;

/// The slice of session configuration that affects judge output
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowKey {
    pub scope: String,
    pub threshold: u32,
    pub max_cycles: u32,
    pub candidates: u32,
    pub judges: Vec<String>,
}

impl From<&SessionConfig> for WorkflowKey {
    fn from(config: &SessionConfig) -> Self {
        Self {
            scope: format!("{:?}", config.scope).to_lowercase(),
            threshold: config.threshold,
            max_cycles: config.max_cycles,
            candidates: config.candidates,
            judges: config.judges.clone(),
        }
    }
}

/// Collapse line endings to `\n` and strip trailing whitespace per line
pub fn normalize(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for line in text.replace("\r\n", "\n").split('\n') {
        out.push_str(line.trim_end());
        out.push('\n');
    }
    // drop the synthetic trailing newline added by the loop
    out.pop();
    out
}

/// Hex-encoded 256-bit digest identifying one (input, configuration) pair
pub fn fingerprint(
    task: &str,
    candidate: &str,
    rubric: &Rubric,
    workflow: &WorkflowKey,
) -> String {
    let mut hasher = Sha256::new();
    // length-prefixed fields prevent boundary collisions between segments
    for field in [normalize(task), normalize(candidate)] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    for dim in &rubric.dimensions {
        hasher.update((dim.name.len() as u64).to_le_bytes());
        hasher.update(dim.name.as_bytes());
        hasher.update(dim.weight.to_le_bytes());
    }
    hasher.update((workflow.scope.len() as u64).to_le_bytes());
    hasher.update(workflow.scope.as_bytes());
    hasher.update(workflow.threshold.to_le_bytes());
    hasher.update(workflow.max_cycles.to_le_bytes());
    hasher.update(workflow.candidates.to_le_bytes());
    for judge in &workflow.judges {
        hasher.update((judge.len() as u64).to_le_bytes());
        hasher.update(judge.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}
