//! External judge integration
//!
//! The judge is an external adversarial reviewer process. This module owns
//! the wire types exchanged with it, the [`JudgeClient`] trait the engine
//! calls through, and the subprocess-backed [`CodexJudgeClient`]
//! implementation with retry, deadline, and partial-result recovery.

pub mod client;
pub mod parse;

pub use client::{CodexJudgeClient, JudgeClient};

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{GavelError, Result};

pub const MIN_SCORE: u32 = 0;
pub const MAX_SCORE: u32 = 100;

/// The judge's overall recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VerdictKind {
    Pass,
    Revise,
    Reject,
}

/// One weighted axis of the scoring rubric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RubricDimension {
    pub name: String,
    pub weight: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rubric {
    pub dimensions: Vec<RubricDimension>,
}

impl Rubric {
    /// The standard six-dimension rubric; weights sum to 1.0
    pub fn standard() -> Self {
        let dims = [
            ("Correctness", 0.30),
            ("Tests", 0.20),
            ("Style", 0.15),
            ("Security", 0.15),
            ("Performance", 0.10),
            ("Docs", 0.10),
        ];
        Self {
            dimensions: dims
                .iter()
                .map(|(name, weight)| RubricDimension {
                    name: (*name).to_string(),
                    weight: *weight,
                    description: None,
                })
                .collect(),
        }
    }

    /// Weights must sum to 1.0 within ±0.01
    pub fn validate(&self) -> Result<()> {
        if self.dimensions.is_empty() {
            return Err(GavelError::Config("rubric has no dimensions".to_string()));
        }
        let total: f64 = self.dimensions.iter().map(|d| d.weight).sum();
        if (total - 1.0).abs() > 0.01 {
            return Err(GavelError::Config(format!(
                "rubric weights sum to {total:.3}, expected 1.0 ±0.01"
            )));
        }
        Ok(())
    }

    /// Weighted overall score from per-dimension scores; `None` when no
    /// known dimension was scored.
    pub fn weighted_overall(&self, scores: &[DimensionScore]) -> Option<u32> {
        let mut total = 0.0;
        let mut weight_seen = 0.0;
        for dim in &self.dimensions {
            if let Some(score) = scores.iter().find(|s| s.name == dim.name) {
                total += score.score.min(MAX_SCORE) as f64 * dim.weight;
                weight_seen += dim.weight;
            }
        }
        if weight_seen == 0.0 {
            return None;
        }
        Some((total / weight_seen).round() as u32)
    }
}

/// One scored rubric axis in a verdict
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub name: String,
    pub score: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineComment {
    pub path: String,
    pub line: u32,
    pub comment: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Review {
    pub summary: String,
    pub inline: Vec<InlineComment>,
    pub citations: Vec<String>,
}

/// Per-judge scoring card
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeCard {
    pub model: String,
    pub score: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// Structured scoring and recommendations for one candidate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeVerdict {
    pub overall: u32,
    pub dimensions: Vec<DimensionScore>,
    pub verdict: VerdictKind,
    pub review: Review,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proposed_diff: Option<String>,
    /// Loop index at which the judge ran
    pub iterations: u32,
    pub judge_cards: Vec<JudgeCard>,
}

impl Default for JudgeVerdict {
    fn default() -> Self {
        Self {
            overall: 0,
            dimensions: Vec::new(),
            verdict: VerdictKind::Revise,
            review: Review::default(),
            proposed_diff: None,
            iterations: 0,
            judge_cards: Vec::new(),
        }
    }
}

impl JudgeVerdict {
    /// Synthetic verdict for thoughts that contain no code candidate
    pub fn auto_pass() -> Self {
        Self {
            overall: MAX_SCORE,
            verdict: VerdictKind::Pass,
            review: Review {
                summary: "No code candidate detected; nothing to audit".to_string(),
                ..Review::default()
            },
            ..Self::default()
        }
    }

    /// Clamp all scores into [0, 100] in place
    pub fn clamp_scores(&mut self) {
        self.overall = self.overall.min(MAX_SCORE);
        for dim in &mut self.dimensions {
            dim.score = dim.score.min(MAX_SCORE);
        }
        for card in &mut self.judge_cards {
            card.score = card.score.min(MAX_SCORE);
        }
    }
}

/// Resource budget forwarded to the judge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeBudget {
    pub max_cycles: u32,
    pub candidates: u32,
    pub threshold: u32,
}

/// Request sent to the judge on stdin as a single JSON object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeRequest {
    pub task: String,
    pub candidate: String,
    #[serde(rename = "contextPack")]
    pub context_pack: String,
    pub rubric: Rubric,
    pub budget: JudgeBudget,
}

/// Outcome of one judge invocation
#[derive(Debug, Clone)]
pub struct JudgeOutcome {
    pub verdict: JudgeVerdict,
    /// The response was recovered via greedy JSON extraction
    pub used_fallback: bool,
    /// The call hit its deadline and the verdict is partial
    pub timed_out: bool,
    /// Fraction of expected dimensions scored, when partial
    pub completion_percentage: Option<f64>,
    pub duration: Duration,
}
