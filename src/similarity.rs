//! Candidate similarity analysis
//!
//! Measures how much recent candidates differ from each other. The measure
//! is token-bag Jaccard over whitespace-normalized text: symmetric, bounded
//! to [0, 1], and exactly 1.0 for texts that are identical after whitespace
//! normalization. Near-identical resubmissions push the pairwise average
//! toward 1.0, which the loop detector reads as stagnation.

use std::collections::{HashMap, HashSet};

/// Default number of recent candidates considered
pub const DEFAULT_WINDOW: usize = 10;
/// Average similarity at or above this counts as stagnation
pub const DEFAULT_STAGNATION_THRESHOLD: f64 = 0.95;
/// Repeated patterns must be at least this long
const MIN_PATTERN_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityReport {
    /// Mean pairwise similarity across all C(N,2) pairs
    pub average_similarity: f64,
    pub is_stagnant: bool,
    /// Substrings of at least 16 chars recurring in at least half the inputs
    pub repeated_patterns: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SimilarityAnalyzer {
    window: usize,
    threshold: f64,
}

impl Default for SimilarityAnalyzer {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            threshold: DEFAULT_STAGNATION_THRESHOLD,
        }
    }
}

impl SimilarityAnalyzer {
    pub fn new(window: usize, threshold: f64) -> Self {
        Self {
            window: window.max(2),
            threshold,
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Analyze the given candidates, oldest first. Fewer than two inputs
    /// yield a zero report.
    pub fn analyze(&self, candidates: &[&str]) -> SimilarityReport {
        let window: Vec<&str> = candidates
            .iter()
            .skip(candidates.len().saturating_sub(self.window))
            .copied()
            .collect();

        if window.len() < 2 {
            return SimilarityReport {
                average_similarity: 0.0,
                is_stagnant: false,
                repeated_patterns: Vec::new(),
            };
        }

        let token_sets: Vec<HashSet<&str>> = window
            .iter()
            .map(|text| text.split_whitespace().collect())
            .collect();

        let mut total = 0.0;
        let mut pairs = 0u32;
        for i in 0..token_sets.len() {
            for j in (i + 1)..token_sets.len() {
                total += jaccard(&token_sets[i], &token_sets[j]);
                pairs += 1;
            }
        }
        let average_similarity = total / pairs as f64;

        SimilarityReport {
            average_similarity,
            is_stagnant: average_similarity >= self.threshold,
            repeated_patterns: repeated_patterns(&window),
        }
    }
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

/// Lines of at least [`MIN_PATTERN_LEN`] chars recurring in at least
/// ⌈N/2⌉ inputs; all-identical inputs report the whole text instead.
fn repeated_patterns(window: &[&str]) -> Vec<String> {
    let first_normalized = normalize_ws(window[0]);
    if window.iter().all(|text| normalize_ws(text) == first_normalized) {
        return vec![window[0].to_string()];
    }

    let majority = window.len().div_ceil(2);
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for text in window {
        let mut seen = HashSet::new();
        for line in text.lines() {
            let line = line.trim();
            if line.len() >= MIN_PATTERN_LEN && seen.insert(line) {
                *counts.entry(line).or_insert(0) += 1;
            }
        }
    }

    let mut patterns: Vec<String> = counts
        .into_iter()
        .filter(|(_, count)| *count >= majority)
        .map(|(line, _)| line.to_string())
        .collect();
    patterns.sort();
    patterns
}

fn normalize_ws(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
