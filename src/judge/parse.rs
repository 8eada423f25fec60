//! Lenient parsing of judge output
//!
//! Judges are external processes and their output is only mostly JSON: it
//! may be wrapped in prose, truncated by a kill, or shaped slightly wrong.
//! Parsing is a typed pipeline, not exception-driven: the result carries an
//! explicit `used_fallback` flag when the object had to be dug out of
//! surrounding text, and shape problems degrade field-by-field (clamped
//! scores, unknown verdicts mapped to `revise`) instead of failing the call.

use serde_json::Value;
use tracing::warn;

use super::{
    DimensionScore, InlineComment, JudgeCard, JudgeVerdict, Review, Rubric, VerdictKind, MAX_SCORE,
};
use crate::error::{GavelError, Result};

#[derive(Debug)]
pub struct ParsedVerdict {
    pub verdict: JudgeVerdict,
    pub used_fallback: bool,
}

/// Parse raw judge stdout into a verdict.
///
/// Tries the whole string first, then the first balanced `{…}` substring,
/// then the first balanced `[…]`.
pub fn parse_verdict(raw: &str, rubric: &Rubric) -> Result<ParsedVerdict> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(GavelError::JudgeResponse("empty response".to_string()));
    }

    let (value, used_fallback) = match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => (value, false),
        Err(_) => {
            let extracted = extract_balanced(trimmed, '{', '}')
                .or_else(|| extract_balanced(trimmed, '[', ']'))
                .ok_or_else(|| {
                    GavelError::JudgeResponse("no JSON object found in response".to_string())
                })?;
            let value = serde_json::from_str::<Value>(extracted).map_err(|e| {
                GavelError::JudgeResponse(format!("extracted JSON failed to parse: {e}"))
            })?;
            warn!("judge response required greedy JSON extraction");
            (value, true)
        }
    };

    let object = match value {
        Value::Object(_) => value,
        Value::Array(items) => items
            .into_iter()
            .find(|item| item.is_object())
            .ok_or_else(|| {
                GavelError::JudgeResponse("response array holds no object".to_string())
            })?,
        other => {
            return Err(GavelError::JudgeResponse(format!(
                "expected a JSON object, got {}",
                type_name(&other)
            )))
        }
    };

    Ok(ParsedVerdict {
        verdict: lenient_verdict(&object, rubric),
        used_fallback,
    })
}

/// Fraction of rubric dimensions the verdict actually scored
pub fn completion_fraction(verdict: &JudgeVerdict, rubric: &Rubric) -> f64 {
    if rubric.dimensions.is_empty() {
        return 1.0;
    }
    let scored = rubric
        .dimensions
        .iter()
        .filter(|dim| verdict.dimensions.iter().any(|s| s.name == dim.name))
        .count();
    scored as f64 / rubric.dimensions.len() as f64
}

/// Build a verdict from a JSON object, clamping and defaulting per field
fn lenient_verdict(object: &Value, rubric: &Rubric) -> JudgeVerdict {
    let dimensions: Vec<DimensionScore> = object
        .get("dimensions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let name = item.get("name")?.as_str()?.to_string();
                    let score = clamp_score(item.get("score")?.as_i64()?);
                    Some(DimensionScore { name, score })
                })
                .collect()
        })
        .unwrap_or_default();

    let overall = match object.get("overall").and_then(Value::as_i64) {
        Some(score) => clamp_score(score),
        // a partial response without an overall is scored from whatever
        // dimensions arrived, or 0 when none did
        None => rubric.weighted_overall(&dimensions).unwrap_or(0),
    };

    let verdict = match object.get("verdict").and_then(Value::as_str) {
        Some("pass") => VerdictKind::Pass,
        Some("revise") => VerdictKind::Revise,
        Some("reject") => VerdictKind::Reject,
        Some(other) => {
            warn!("unknown verdict {other:?}, mapping to revise");
            VerdictKind::Revise
        }
        None => VerdictKind::Revise,
    };

    let review = object
        .get("review")
        .map(|review| Review {
            summary: review
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            inline: review
                .get("inline")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| {
                            Some(InlineComment {
                                path: item.get("path")?.as_str()?.to_string(),
                                line: item.get("line")?.as_i64()?.max(0) as u32,
                                comment: item.get("comment")?.as_str()?.to_string(),
                            })
                        })
                        .collect()
                })
                .unwrap_or_default(),
            citations: review
                .get("citations")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default(),
        })
        .unwrap_or_default();

    let judge_cards = object
        .get("judge_cards")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    Some(JudgeCard {
                        model: item.get("model")?.as_str()?.to_string(),
                        score: clamp_score(item.get("score")?.as_i64()?),
                        notes: item
                            .get("notes")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    JudgeVerdict {
        overall,
        dimensions,
        verdict,
        review,
        proposed_diff: object
            .get("proposed_diff")
            .and_then(Value::as_str)
            .map(str::to_string),
        iterations: object
            .get("iterations")
            .and_then(Value::as_i64)
            .unwrap_or(0)
            .max(0) as u32,
        judge_cards,
    }
}

fn clamp_score(score: i64) -> u32 {
    score.clamp(0, MAX_SCORE as i64) as u32
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// First balanced `open…close` substring, string- and escape-aware
fn extract_balanced(text: &str, open: char, close: char) -> Option<&str> {
    let mut depth = 0usize;
    let mut start = None;
    let mut in_string = false;
    let mut escaped = false;

    for (index, ch) in text.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' if depth > 0 => in_string = true,
            c if c == open => {
                if depth == 0 {
                    start = Some(index);
                }
                depth += 1;
            }
            c if c == close && depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start?..index + close.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}
