//! Transport-facing audit response records
//!
//! One explicit record per concern rather than a dynamic property bag; the
//! outer transport serializes these as-is.

use serde::{Deserialize, Serialize};

use super::feedback::Feedback;
use crate::completion::MAX_LOOPS;
use crate::judge::JudgeVerdict;
use crate::session::{CompletionReason, StagnationRecord};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionStatus {
    pub is_complete: bool,
    pub reason: CompletionReason,
    pub next_thought_needed: bool,
    pub current_loop: u32,
    pub score: u32,
    pub threshold: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopInfo {
    pub current_loop: u32,
    pub max_loops: u32,
    pub score_progression: Vec<u32>,
    pub average_improvement: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stagnation: Option<StagnationRecord>,
}

impl LoopInfo {
    pub fn new(
        current_loop: u32,
        score_progression: Vec<u32>,
        average_improvement: f64,
        stagnation: Option<StagnationRecord>,
    ) -> Self {
        Self {
            current_loop,
            max_loops: MAX_LOOPS,
            score_progression,
            average_improvement,
            stagnation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminationInfo {
    pub reason: CompletionReason,
    pub failure_rate: f64,
    pub final_assessment: String,
}

/// The full structured result of one audited thought
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditResponse {
    pub thought_number: u32,
    pub total_thoughts: u32,
    pub next_thought_needed: bool,
    pub session_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Served from the audit cache without a judge call
    pub cached: bool,
    /// The judge hit its deadline; the verdict may be partial
    pub timed_out: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verdict: Option<JudgeVerdict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion_status: Option<CompletionStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loop_info: Option<LoopInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub termination_info: Option<TerminationInfo>,
}

impl AuditResponse {
    /// Skeleton response echoing the thought's routing fields
    pub fn for_thought(thought: &super::Thought, session_id: &str) -> Self {
        Self {
            thought_number: thought.thought_number,
            total_thoughts: thought.total_thoughts,
            next_thought_needed: thought.next_thought_needed,
            session_id: session_id.to_string(),
            success: true,
            error: None,
            cached: false,
            timed_out: false,
            duration_ms: 0,
            warnings: Vec::new(),
            verdict: None,
            feedback: None,
            completion_status: None,
            loop_info: None,
            termination_info: None,
        }
    }

    /// A failed audit that still echoes routing fields so the caller can
    /// correlate it
    pub fn failure(thought: &super::Thought, session_id: &str, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::for_thought(thought, session_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::Thought;

    #[test]
    fn response_serializes_camel_case() {
        let thought = Thought {
            thought: "text".to_string(),
            thought_number: 3,
            total_thoughts: 5,
            next_thought_needed: true,
            session_id: None,
        };
        let mut response = AuditResponse::for_thought(&thought, "s1");
        response.completion_status = Some(CompletionStatus {
            is_complete: false,
            reason: CompletionReason::InProgress,
            next_thought_needed: true,
            current_loop: 3,
            score: 72,
            threshold: 85,
        });
        let raw = serde_json::to_string(&response).unwrap();
        assert!(raw.contains("\"thoughtNumber\":3"));
        assert!(raw.contains("\"completionStatus\""));
        assert!(raw.contains("\"in_progress\""));
        assert!(!raw.contains("\"error\""));
    }

    #[test]
    fn failure_echoes_routing_fields() {
        let thought = Thought {
            thought: "text".to_string(),
            thought_number: 7,
            total_thoughts: 9,
            next_thought_needed: true,
            session_id: Some("explicit".to_string()),
        };
        let response = AuditResponse::failure(&thought, "explicit", "judge died".to_string());
        assert!(!response.success);
        assert_eq!(response.thought_number, 7);
        assert_eq!(response.error.as_deref(), Some("judge died"));
    }
}
