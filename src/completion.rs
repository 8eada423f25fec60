//! Completion and termination policy
//!
//! A pure decision table maps (score, loop, stagnation) to a completion
//! decision. Quality tiers are evaluated before hard stops so a session
//! that just crossed a tier is rewarded rather than killed, and stagnation
//! can never short-circuit a legitimate completion.

use crate::session::{CompletionReason, SessionState, StagnationRecord};
use crate::judge::VerdictKind;

/// Hard cap on loops per session
pub const MAX_LOOPS: u32 = 25;

/// Quality tiers: reaching `score` at or after `loop` completes the session
const TIERS: &[(u32, u32, CompletionReason)] = &[
    (95, 10, CompletionReason::Score95At10),
    (90, 15, CompletionReason::Score90At15),
    (85, 20, CompletionReason::Score85At20),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompletionDecision {
    pub is_complete: bool,
    /// Completion came from a kill switch, not a quality tier
    pub terminated: bool,
    pub reason: CompletionReason,
    pub next_thought_needed: bool,
}

impl CompletionDecision {
    fn complete(reason: CompletionReason) -> Self {
        Self {
            is_complete: true,
            terminated: false,
            reason,
            next_thought_needed: false,
        }
    }

    fn terminated(reason: CompletionReason) -> Self {
        Self {
            is_complete: true,
            terminated: true,
            reason,
            next_thought_needed: false,
        }
    }

    fn in_progress() -> Self {
        Self {
            is_complete: false,
            terminated: false,
            reason: CompletionReason::InProgress,
            next_thought_needed: true,
        }
    }
}

/// Decision table, first matching row wins
pub fn evaluate(
    score: u32,
    loop_number: u32,
    stagnation: Option<&StagnationRecord>,
) -> CompletionDecision {
    for (tier_score, tier_loop, reason) in TIERS {
        if score >= *tier_score && loop_number >= *tier_loop {
            return CompletionDecision::complete(*reason);
        }
    }
    if loop_number >= MAX_LOOPS {
        return CompletionDecision::terminated(CompletionReason::MaxLoopsReached);
    }
    if let Some(stagnation) = stagnation {
        if stagnation.is_stagnant && stagnation.detected_at_loop >= 10 {
            return CompletionDecision::terminated(CompletionReason::StagnationDetected);
        }
    }
    CompletionDecision::in_progress()
}

/// Whole-session termination assessment
#[derive(Debug, Clone)]
pub struct TerminationAnalysis {
    pub should_terminate: bool,
    pub reason: Option<CompletionReason>,
    /// Fraction of iterations whose verdict was not `pass`
    pub failure_rate: f64,
    pub final_assessment: String,
}

/// Inspect a session and decide whether a kill switch applies
pub fn should_terminate(session: &SessionState) -> TerminationAnalysis {
    let failure_rate = failure_rate(session);

    let reason = if session.current_loop >= MAX_LOOPS {
        Some(CompletionReason::MaxLoopsReached)
    } else if session
        .stagnation
        .as_ref()
        .map(|s| s.is_stagnant && s.detected_at_loop >= 10)
        .unwrap_or(false)
    {
        Some(CompletionReason::StagnationDetected)
    } else {
        None
    };

    TerminationAnalysis {
        should_terminate: reason.is_some(),
        reason,
        failure_rate,
        final_assessment: final_assessment(session, failure_rate),
    }
}

pub fn failure_rate(session: &SessionState) -> f64 {
    if session.iterations.is_empty() {
        return 0.0;
    }
    let failed = session
        .iterations
        .iter()
        .filter(|i| i.verdict.verdict != VerdictKind::Pass)
        .count();
    failed as f64 / session.iterations.len() as f64
}

/// Human-readable trajectory summary for the terminated session
fn final_assessment(session: &SessionState, failure_rate: f64) -> String {
    let best = session.best_score().unwrap_or(0);
    let improvement = session.average_improvement();
    let critical_issues: usize = session
        .iterations
        .iter()
        .map(|i| {
            i.verdict
                .review
                .inline
                .iter()
                .filter(|c| {
                    let lower = c.comment.to_lowercase();
                    lower.contains("critical") || lower.contains("blocker")
                })
                .count()
        })
        .sum();

    format!(
        "Session ran {} loops. Best score {best}/100, average improvement {improvement:.1} \
         per loop, failure rate {:.0}%, {critical_issues} critical issue(s) flagged.",
        session.current_loop,
        failure_rate * 100.0
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::judge::{InlineComment, JudgeVerdict, Review};
    use crate::session::Iteration;
    use chrono::Utc;

    fn stagnant_at(loop_n: u32) -> StagnationRecord {
        StagnationRecord {
            is_stagnant: true,
            detected_at_loop: loop_n,
            similarity_score: 0.98,
            recommendation: "change approach".to_string(),
        }
    }

    #[test]
    fn tier_one_fires_at_95_and_loop_10() {
        let decision = evaluate(95, 10, None);
        assert!(decision.is_complete);
        assert!(!decision.terminated);
        assert_eq!(decision.reason, CompletionReason::Score95At10);
        assert!(!decision.next_thought_needed);
    }

    #[test]
    fn tier_boundaries_hold() {
        assert_eq!(evaluate(94, 10, None).reason, CompletionReason::InProgress);
        assert_eq!(evaluate(95, 9, None).reason, CompletionReason::InProgress);
        assert_eq!(evaluate(95, 10, None).reason, CompletionReason::Score95At10);
        assert_eq!(evaluate(90, 15, None).reason, CompletionReason::Score90At15);
        assert_eq!(evaluate(89, 15, None).reason, CompletionReason::InProgress);
        assert_eq!(evaluate(85, 20, None).reason, CompletionReason::Score85At20);
        assert_eq!(evaluate(84, 24, None).reason, CompletionReason::InProgress);
    }

    #[test]
    fn higher_tiers_win_over_lower_ones() {
        // at loop 20 with score 96, the 95@10 row matches first
        assert_eq!(evaluate(96, 20, None).reason, CompletionReason::Score95At10);
        // score 92 at loop 20 falls through to the 90@15 row
        assert_eq!(evaluate(92, 20, None).reason, CompletionReason::Score90At15);
    }

    #[test]
    fn loop_25_is_a_hard_stop() {
        let decision = evaluate(60, 25, None);
        assert!(decision.is_complete);
        assert!(decision.terminated);
        assert_eq!(decision.reason, CompletionReason::MaxLoopsReached);
    }

    #[test]
    fn hard_stop_wins_when_no_tier_matched_first() {
        // score 100 at loop 25 matches the 95@10 tier before the hard stop
        assert_eq!(evaluate(100, 25, None).reason, CompletionReason::Score95At10);
        // but score 84 at loop 25 has no tier, so the hard stop fires
        assert_eq!(evaluate(84, 25, None).reason, CompletionReason::MaxLoopsReached);
    }

    #[test]
    fn stagnation_terminates_only_from_loop_10() {
        let decision = evaluate(60, 12, Some(&stagnant_at(11)));
        assert!(decision.terminated);
        assert_eq!(decision.reason, CompletionReason::StagnationDetected);

        let early = stagnant_at(8);
        assert_eq!(evaluate(60, 12, Some(&early)).reason, CompletionReason::InProgress);
    }

    #[test]
    fn stagnation_cannot_override_a_tier() {
        let decision = evaluate(95, 12, Some(&stagnant_at(10)));
        assert_eq!(decision.reason, CompletionReason::Score95At10);
        assert!(!decision.terminated);
    }

    #[test]
    fn in_progress_requests_another_thought() {
        let decision = evaluate(70, 3, None);
        assert!(!decision.is_complete);
        assert!(decision.next_thought_needed);
        assert_eq!(decision.reason, CompletionReason::InProgress);
    }

    fn session_scoring(scores: &[u32]) -> SessionState {
        let mut session = SessionState::new("s", SessionConfig::default());
        for (index, score) in scores.iter().enumerate() {
            session.iterations.push(Iteration {
                thought_number: index as u32 + 1,
                candidate: "candidate".to_string(),
                verdict: JudgeVerdict {
                    overall: *score,
                    verdict: if *score >= 85 {
                        VerdictKind::Pass
                    } else {
                        VerdictKind::Revise
                    },
                    ..JudgeVerdict::default()
                },
                timestamp: Utc::now(),
            });
        }
        session.current_loop = session.iterations.len() as u32;
        session
    }

    #[test]
    fn failure_rate_counts_non_pass_verdicts() {
        let session = session_scoring(&[60, 60, 90, 60]);
        assert!((failure_rate(&session) - 0.75).abs() < 1e-9);
        assert_eq!(failure_rate(&SessionState::new("e", SessionConfig::default())), 0.0);
    }

    #[test]
    fn max_loops_session_should_terminate() {
        let scores = vec![60u32; 25];
        let session = session_scoring(&scores);
        let analysis = should_terminate(&session);
        assert!(analysis.should_terminate);
        assert_eq!(analysis.reason, Some(CompletionReason::MaxLoopsReached));
        assert!(analysis.failure_rate >= 0.96);
        assert!(analysis.final_assessment.contains("25 loops"));
        assert!(analysis.final_assessment.contains("Best score 60/100"));
    }

    #[test]
    fn assessment_counts_critical_inline_comments() {
        let mut session = session_scoring(&[50]);
        session.iterations[0].verdict.review = Review {
            summary: "issues".to_string(),
            inline: vec![
                InlineComment {
                    path: "src/auth.rs".to_string(),
                    line: 3,
                    comment: "CRITICAL: credentials logged in plaintext".to_string(),
                },
                InlineComment {
                    path: "src/auth.rs".to_string(),
                    line: 9,
                    comment: "prefer a named constant".to_string(),
                },
            ],
            citations: vec![],
        };
        let analysis = should_terminate(&session);
        assert!(analysis.final_assessment.contains("1 critical issue(s)"));
    }

    #[test]
    fn healthy_session_is_not_terminated() {
        let session = session_scoring(&[70, 80, 85]);
        let analysis = should_terminate(&session);
        assert!(!analysis.should_terminate);
        assert!(analysis.reason.is_none());
    }
}
