//! Session state: the durable thread of iterations for one piece of work
//!
//! A session is exclusively owned by the [`SessionStore`]; the engine holds
//! short-lived read snapshots and issues update commands. Iterations are
//! append-only and a session that has completed or been terminated accepts
//! no further ones.

pub mod store;

pub use store::{LoadOutcome, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::judge::JudgeVerdict;

/// Why a session finished (or has not yet)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionReason {
    #[serde(rename = "score_95_at_10")]
    Score95At10,
    #[serde(rename = "score_90_at_15")]
    Score90At15,
    #[serde(rename = "score_85_at_20")]
    Score85At20,
    #[serde(rename = "max_loops_reached")]
    MaxLoopsReached,
    #[serde(rename = "stagnation_detected")]
    StagnationDetected,
    #[serde(rename = "in_progress")]
    InProgress,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionReason::Score95At10 => "score_95_at_10",
            CompletionReason::Score90At15 => "score_90_at_15",
            CompletionReason::Score85At20 => "score_85_at_20",
            CompletionReason::MaxLoopsReached => "max_loops_reached",
            CompletionReason::StagnationDetected => "stagnation_detected",
            CompletionReason::InProgress => "in_progress",
        }
    }
}

/// One append-only turn of the audit loop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    pub thought_number: u32,
    pub candidate: String,
    pub verdict: JudgeVerdict,
    pub timestamp: DateTime<Utc>,
}

/// Emitted once the loop detector sees too little movement between candidates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StagnationRecord {
    pub is_stagnant: bool,
    pub detected_at_loop: u32,
    pub similarity_score: f64,
    pub recommendation: String,
}

/// A kill-switch stop, independent of quality
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationRecord {
    pub reason: CompletionReason,
    pub failure_rate: f64,
    pub final_assessment: String,
    pub terminated_at: DateTime<Utc>,
}

/// Mutually exclusive session lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    InProgress,
    Complete,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionState {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub config: SessionConfig,
    pub iterations: Vec<Iteration>,
    pub current_loop: u32,
    pub is_complete: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_reason: Option<CompletionReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagnation: Option<StagnationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination: Option<TerminationRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_verdict: Option<JudgeVerdict>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, config: SessionConfig) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            created_at: now,
            updated_at: now,
            config,
            iterations: Vec::new(),
            current_loop: 0,
            is_complete: false,
            completion_reason: None,
            stagnation: None,
            termination: None,
            last_verdict: None,
        }
    }

    pub fn status(&self) -> SessionStatus {
        if self.termination.is_some() {
            SessionStatus::Terminated
        } else if self.is_complete {
            SessionStatus::Complete
        } else {
            SessionStatus::InProgress
        }
    }

    /// No further iterations are accepted in this state
    pub fn is_closed(&self) -> bool {
        self.status() != SessionStatus::InProgress
    }

    /// The last `n` candidate texts, oldest first
    pub fn recent_candidates(&self, n: usize) -> Vec<&str> {
        let skip = self.iterations.len().saturating_sub(n);
        self.iterations[skip..]
            .iter()
            .map(|i| i.candidate.as_str())
            .collect()
    }

    pub fn score_progression(&self) -> Vec<u32> {
        self.iterations.iter().map(|i| i.verdict.overall).collect()
    }

    pub fn best_score(&self) -> Option<u32> {
        self.score_progression().into_iter().max()
    }

    /// Arithmetic mean of consecutive score deltas; 0 with fewer than two
    /// iterations
    pub fn average_improvement(&self) -> f64 {
        let scores = self.score_progression();
        if scores.len() < 2 {
            return 0.0;
        }
        let deltas: i64 = scores
            .windows(2)
            .map(|w| w[1] as i64 - w[0] as i64)
            .sum();
        deltas as f64 / (scores.len() - 1) as f64
    }
}

/// Snapshot of how a session is trending
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressAnalysis {
    pub current_loop: u32,
    pub score_progression: Vec<u32>,
    pub average_improvement: f64,
    pub is_stagnant: bool,
}
