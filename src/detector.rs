//! Loop-gated stagnation detection
//!
//! Wraps the similarity analyzer with a gating policy: similarity is only
//! computed once a session has run at least [`MIN_DETECTION_LOOP`] loops,
//! so early exploration is never reported as stagnation. The first
//! detection pins `detectedAtLoop`; later detections only refresh the
//! similarity score.

use tracing::info;

use crate::session::{SessionState, StagnationRecord};
use crate::similarity::SimilarityAnalyzer;

/// Sessions younger than this many loops are never reported stagnant
pub const MIN_DETECTION_LOOP: u32 = 10;

#[derive(Debug, Clone, Default)]
pub struct LoopDetector {
    analyzer: SimilarityAnalyzer,
}

impl LoopDetector {
    pub fn new(analyzer: SimilarityAnalyzer) -> Self {
        Self { analyzer }
    }

    /// Inspect the session's recent candidates and produce a stagnation
    /// record if the loop is gated in and similarity is over threshold.
    pub fn check(&self, session: &SessionState) -> Option<StagnationRecord> {
        if session.current_loop < MIN_DETECTION_LOOP {
            return None;
        }

        let candidates = session.recent_candidates(self.analyzer.window());
        let report = self.analyzer.analyze(&candidates);
        if !report.is_stagnant {
            return None;
        }

        // a prior record keeps its original detection loop
        let detected_at_loop = session
            .stagnation
            .as_ref()
            .filter(|s| s.is_stagnant)
            .map(|s| s.detected_at_loop)
            .unwrap_or(session.current_loop);

        let mut recommendation = format!(
            "Consider changing approach: stagnation detected at loop {} with similarity {:.2}",
            detected_at_loop, report.average_similarity
        );
        if let Some(pattern) = report.repeated_patterns.first() {
            recommendation.push_str(&format!(
                "; the candidate keeps repeating \"{}\"",
                snippet(pattern)
            ));
        }

        info!(
            "session '{}' stagnant at loop {} (similarity {:.3})",
            session.id, session.current_loop, report.average_similarity
        );

        Some(StagnationRecord {
            is_stagnant: true,
            detected_at_loop,
            similarity_score: report.average_similarity,
            recommendation,
        })
    }
}

fn snippet(pattern: &str) -> String {
    const MAX: usize = 80;
    let flat = pattern.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= MAX {
        flat
    } else {
        let clipped: String = flat.chars().take(MAX).collect();
        format!("{clipped}…")
    }
}
