//! Structured feedback derivation
//!
//! Inline judge comments are classified into issue categories and
//! priorities by keyword heuristics, then distilled into the improvement
//! list, critical-issue list, and 3-5 ordered next steps the model acts on.

use serde::{Deserialize, Serialize};

use crate::completion::MAX_LOOPS;
use crate::judge::{JudgeVerdict, VerdictKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    Security,
    Performance,
    Style,
    Logic,
    ErrorHandling,
    Maintainability,
    Testing,
    Documentation,
    Architecture,
    Compatibility,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Low,
}

/// One classified, actionable finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Improvement {
    pub category: IssueCategory,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub summary: String,
    pub improvements: Vec<Improvement>,
    pub critical_issues: Vec<Improvement>,
    pub next_steps: Vec<String>,
}

/// Distill a verdict into model-facing feedback
pub fn derive_feedback(verdict: &JudgeVerdict, loop_number: u32) -> Feedback {
    let mut improvements: Vec<Improvement> = verdict
        .review
        .inline
        .iter()
        .map(|comment| {
            let category = classify_category(&comment.comment);
            Improvement {
                category,
                priority: classify_priority(&comment.comment, category),
                path: Some(comment.path.clone()),
                line: Some(comment.line),
                description: comment.comment.clone(),
            }
        })
        .collect();
    improvements.sort_by_key(|i| i.priority);

    let critical_issues: Vec<Improvement> = improvements
        .iter()
        .filter(|i| i.priority == Priority::Critical)
        .cloned()
        .collect();

    let summary = if verdict.review.summary.trim().is_empty() {
        format!(
            "Scored {}/100 with verdict '{}'",
            verdict.overall,
            verdict_label(verdict.verdict)
        )
    } else {
        verdict.review.summary.clone()
    };

    let next_steps = next_steps(&improvements, verdict, loop_number);

    Feedback {
        summary,
        improvements,
        critical_issues,
        next_steps,
    }
}

fn verdict_label(kind: VerdictKind) -> &'static str {
    match kind {
        VerdictKind::Pass => "pass",
        VerdictKind::Revise => "revise",
        VerdictKind::Reject => "reject",
    }
}

const CATEGORY_KEYWORDS: &[(IssueCategory, &[&str])] = &[
    (
        IssueCategory::Security,
        &[
            "security", "vulnerab", "injection", "xss", "csrf", "auth", "password", "secret",
            "credential", "sanitize", "escape", "exploit",
        ],
    ),
    (
        IssueCategory::Performance,
        &[
            "performance", "slow", "latency", "allocat", "memory leak", "inefficien", "quadratic",
            "o(n^2)", "throughput",
        ],
    ),
    (
        IssueCategory::Testing,
        &["test", "coverage", "assertion", "regression"],
    ),
    (
        IssueCategory::Documentation,
        &["document", "docstring", "doc comment", "readme", "changelog"],
    ),
    (
        IssueCategory::ErrorHandling,
        &["error", "unwrap", "panic", "exception", "unhandled", "fallback", "recover"],
    ),
    (
        IssueCategory::Architecture,
        &["architecture", "coupling", "layering", "separation of concerns", "boundary", "design"],
    ),
    (
        IssueCategory::Compatibility,
        &["compatib", "deprecat", "breaking change", "platform", "portab"],
    ),
    (
        IssueCategory::Maintainability,
        &["maintain", "duplicat", "complexity", "refactor", "magic number", "dead code"],
    ),
    (
        IssueCategory::Style,
        &["style", "naming", "format", "lint", "convention", "readab", "idiomatic"],
    ),
];

/// Keyword classification; unmatched comments default to logic
pub fn classify_category(comment: &str) -> IssueCategory {
    let lower = comment.to_lowercase();
    for (category, keywords) in CATEGORY_KEYWORDS {
        if keywords.iter().any(|k| lower.contains(k)) {
            return *category;
        }
    }
    IssueCategory::Logic
}

const CRITICAL_HINTS: &[&str] = &[
    "critical", "blocker", "severe", "must fix", "crash", "data loss", "vulnerability", "exploit",
    "remote code",
];
const HIGH_HINTS: &[&str] = &["important", "bug", "incorrect", "wrong", "fails", "broken", "race"];
const MEDIUM_HINTS: &[&str] = &["should", "consider", "improve", "prefer", "missing"];

/// Priority from severity wording, tightened for security findings
pub fn classify_priority(comment: &str, category: IssueCategory) -> Priority {
    let lower = comment.to_lowercase();
    let base = if CRITICAL_HINTS.iter().any(|h| lower.contains(h)) {
        Priority::Critical
    } else if HIGH_HINTS.iter().any(|h| lower.contains(h)) {
        Priority::High
    } else if MEDIUM_HINTS.iter().any(|h| lower.contains(h)) {
        Priority::Medium
    } else {
        Priority::Low
    };

    // security findings never rank below high
    if category == IssueCategory::Security {
        return base.min(Priority::High);
    }
    base
}

/// 3-5 ordered actions from the highest-priority findings and loop position
fn next_steps(improvements: &[Improvement], verdict: &JudgeVerdict, loop_number: u32) -> Vec<String> {
    let mut steps = Vec::new();

    for improvement in improvements.iter().take(3) {
        let location = match (&improvement.path, improvement.line) {
            (Some(path), Some(line)) => format!(" ({path}:{line})"),
            (Some(path), None) => format!(" ({path})"),
            _ => String::new(),
        };
        steps.push(format!(
            "Fix {:?}: {}{location}",
            improvement.category, improvement.description
        ));
    }

    if loop_number + 3 >= MAX_LOOPS {
        steps.push(format!(
            "Only {} loop(s) remain before the hard stop at {MAX_LOOPS}; focus on the highest-impact fixes",
            MAX_LOOPS.saturating_sub(loop_number)
        ));
    }

    if verdict.verdict == VerdictKind::Pass {
        steps.push("Polish remaining low-priority findings, then finish".to_string());
    } else {
        steps.push("Resubmit the revised candidate for another audit".to_string());
    }

    while steps.len() < 3 {
        steps.push("Review the judge summary and address anything unclear".to_string());
    }
    steps.truncate(5);
    steps
}
