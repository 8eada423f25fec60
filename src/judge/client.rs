//! Subprocess-backed judge invocation
//!
//! One judge call = one subprocess: the serialized request goes in on
//! stdin, one JSON verdict comes back on stdout. Transient failures retry
//! with jittered exponential backoff; timeouts are recovered into partial
//! verdicts when stdout already held a parseable object; cancellation kills
//! the process and returns without retrying.

use async_trait::async_trait;
use rand::Rng;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::parse::{completion_fraction, parse_verdict};
use super::{JudgeOutcome, JudgeRequest};
use crate::error::{GavelError, Result};
use crate::subprocess::{
    ExitStatus, ProcessCommandBuilder, ProcessError, ProcessRunner,
};

const MIN_DEADLINE: Duration = Duration::from_secs(5);
const MAX_DEADLINE: Duration = Duration::from_secs(300);
const BACKOFF_BASE_MS: u64 = 500;
const BACKOFF_CAP_MS: u64 = 8_000;

#[async_trait]
pub trait JudgeClient: Send + Sync {
    /// Run the judge once against a candidate, under a per-call deadline
    async fn execute(
        &self,
        request: &JudgeRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome>;

    /// Probe whether the judge executable can be invoked at all
    async fn check_availability(&self) -> Result<bool>;
}

pub struct CodexJudgeClient {
    runner: Arc<dyn ProcessRunner>,
    executable: String,
    retries: u32,
    working_dir: Option<PathBuf>,
}

impl CodexJudgeClient {
    pub fn new(runner: Arc<dyn ProcessRunner>, executable: impl Into<String>, retries: u32) -> Self {
        Self {
            runner,
            executable: executable.into(),
            retries,
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: PathBuf) -> Self {
        self.working_dir = Some(dir);
        self
    }

    fn build_command(
        &self,
        payload: String,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> crate::subprocess::ProcessCommand {
        let mut builder = ProcessCommandBuilder::new(&self.executable)
            .stdin(payload)
            .timeout(deadline)
            .cancel(cancel.clone());
        if let Some(dir) = &self.working_dir {
            builder = builder.current_dir(dir);
        }
        builder.build()
    }
}

#[async_trait]
impl JudgeClient for CodexJudgeClient {
    async fn execute(
        &self,
        request: &JudgeRequest,
        deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome> {
        if request.candidate.trim().is_empty() {
            return Err(GavelError::Config("candidate is empty".to_string()));
        }
        request.rubric.validate()?;

        let deadline = deadline.clamp(MIN_DEADLINE, MAX_DEADLINE);
        let payload = serde_json::to_string(request)?;

        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                let delay = backoff_delay(attempt);
                debug!("retrying judge after {delay:?} (attempt {attempt}/{})", self.retries);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => return Err(GavelError::Cancelled),
                }
            }

            let command = self.build_command(payload.clone(), deadline, cancel);
            let output = match self.runner.run(command).await {
                Ok(output) => output,
                Err(ProcessError::CommandNotFound(exe)) => {
                    return Err(GavelError::JudgeNotAvailable(exe))
                }
                Err(ProcessError::Io(e)) if attempt < self.retries => {
                    warn!("judge spawn failed ({e}), retrying");
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            match output.status {
                ExitStatus::Success => {
                    match parse_verdict(&output.stdout, &request.rubric) {
                        Ok(parsed) => {
                            let mut verdict = parsed.verdict;
                            verdict.clamp_scores();
                            return Ok(JudgeOutcome {
                                verdict,
                                used_fallback: parsed.used_fallback,
                                timed_out: false,
                                completion_percentage: None,
                                duration: output.duration,
                            });
                        }
                        Err(e) if attempt < self.retries => {
                            warn!("judge output unparseable ({e}), retrying");
                            attempt += 1;
                        }
                        Err(e) => return Err(e),
                    }
                }
                ExitStatus::Timeout => {
                    // whatever made it to stdout before the kill may already
                    // hold a usable partial verdict
                    return match parse_verdict(&output.stdout, &request.rubric) {
                        Ok(parsed) => {
                            let mut verdict = parsed.verdict;
                            verdict.clamp_scores();
                            let fraction = completion_fraction(&verdict, &request.rubric);
                            warn!(
                                "judge timed out; recovered partial verdict covering {:.0}% of dimensions",
                                fraction * 100.0
                            );
                            Ok(JudgeOutcome {
                                verdict,
                                used_fallback: parsed.used_fallback,
                                timed_out: true,
                                completion_percentage: Some(fraction),
                                duration: output.duration,
                            })
                        }
                        Err(_) => Err(GavelError::JudgeTimeout {
                            seconds: deadline.as_secs(),
                        }),
                    };
                }
                ExitStatus::Cancelled => return Err(GavelError::Cancelled),
                ExitStatus::Error(_) | ExitStatus::Signal(_) => {
                    let stderr = output.stderr.trim();
                    if is_transient_error(stderr) && attempt < self.retries {
                        warn!(
                            "transient judge failure: {}",
                            stderr.lines().next().unwrap_or("unknown")
                        );
                        attempt += 1;
                    } else if is_transient_error(stderr) {
                        return Err(GavelError::JudgeTransient(first_line(stderr)));
                    } else {
                        return Err(GavelError::JudgeFatal(first_line(stderr)));
                    }
                }
            }
        }
    }

    async fn check_availability(&self) -> Result<bool> {
        let result = self
            .runner
            .run(
                ProcessCommandBuilder::new(&self.executable)
                    .arg("--version")
                    .timeout(Duration::from_secs(10))
                    .build(),
            )
            .await;
        match result {
            Ok(output) => Ok(output.status.success()),
            Err(ProcessError::CommandNotFound(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Exponential backoff with full jitter, capped below the audit deadline
fn backoff_delay(attempt: u32) -> Duration {
    let exp = BACKOFF_BASE_MS.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
    let capped = exp.min(BACKOFF_CAP_MS);
    Duration::from_millis(rand::rng().random_range(0..=capped))
}

/// Stderr wording that indicates a failure worth retrying
fn is_transient_error(stderr: &str) -> bool {
    let transient_patterns = [
        "rate limit",
        "timeout",
        "timed out",
        "connection refused",
        "connection reset",
        "temporary failure",
        "network",
        "503",
        "429",
        "could not connect",
        "broken pipe",
    ];
    let lower = stderr.to_lowercase();
    transient_patterns.iter().any(|p| lower.contains(p))
}

fn first_line(stderr: &str) -> String {
    let line = stderr.lines().next().unwrap_or("judge exited with an error");
    if line.is_empty() {
        "judge exited with an error".to_string()
    } else {
        line.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{JudgeBudget, Rubric, VerdictKind};
    use crate::subprocess::MockProcessRunner;

    fn request() -> JudgeRequest {
        JudgeRequest {
            task: "Audit and improve the candidate".to_string(),
            candidate: "fn main() {}".to_string(),
            context_pack: "context".to_string(),
            rubric: Rubric::standard(),
            budget: JudgeBudget {
                max_cycles: 1,
                candidates: 1,
                threshold: 85,
            },
        }
    }

    fn client(mock: &MockProcessRunner) -> CodexJudgeClient {
        CodexJudgeClient::new(Arc::new(mock.clone()), "codex", 2)
    }

    fn verdict_json(overall: u32) -> String {
        format!(
            r#"{{"overall": {overall}, "dimensions": [], "verdict": "pass",
                "review": {{"summary": "ok", "inline": [], "citations": []}},
                "proposed_diff": null, "iterations": 1, "judge_cards": []}}"#
        )
    }

    #[tokio::test]
    async fn successful_call_parses_verdict() {
        let mock = MockProcessRunner::new();
        mock.expect_success("codex", &verdict_json(91));
        let outcome = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.verdict.overall, 91);
        assert_eq!(outcome.verdict.verdict, VerdictKind::Pass);
        assert!(!outcome.timed_out);
        assert!(!outcome.used_fallback);
        // the request went in on stdin
        let calls = mock.calls();
        assert!(calls[0].stdin.as_deref().unwrap().contains("\"contextPack\""));
    }

    #[tokio::test]
    async fn transient_failure_retries_then_succeeds() {
        let mock = MockProcessRunner::new();
        mock.expect_failure("codex", 1, "error: connection refused by upstream");
        mock.expect_success("codex", &verdict_json(75));
        let outcome = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.verdict.overall, 75);
        assert_eq!(mock.call_count("codex"), 2);
    }

    #[tokio::test]
    async fn fatal_stderr_surfaces_immediately() {
        let mock = MockProcessRunner::new();
        mock.expect_failure("codex", 2, "invalid api key");
        let err = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::JudgeFatal(_)));
        assert_eq!(mock.call_count("codex"), 1);
    }

    #[tokio::test]
    async fn transient_errors_exhaust_retries() {
        let mock = MockProcessRunner::new();
        for _ in 0..3 {
            mock.expect_failure("codex", 1, "network unreachable");
        }
        let err = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::JudgeTransient(_)));
        assert_eq!(mock.call_count("codex"), 3);
    }

    #[tokio::test]
    async fn missing_executable_is_not_retried() {
        let mock = MockProcessRunner::new();
        mock.expect_not_found("codex");
        let err = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::JudgeNotAvailable(_)));
        assert_eq!(mock.call_count("codex"), 1);
    }

    #[tokio::test]
    async fn timeout_with_partial_verdict_is_recovered() {
        let mock = MockProcessRunner::new();
        mock.expect_timeout(
            "codex",
            r#"{"dimensions": [{"name": "Correctness", "score": 80},
                               {"name": "Tests", "score": 60}]}"#,
        );
        let outcome = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.verdict.overall, 72);
        let fraction = outcome.completion_percentage.unwrap();
        assert!((fraction - 2.0 / 6.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn timeout_without_partial_is_an_error() {
        let mock = MockProcessRunner::new();
        mock.expect_timeout("codex", "thinking...");
        let err = client(&mock)
            .execute(&request(), Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::JudgeTimeout { .. }));
    }

    #[tokio::test]
    async fn empty_candidate_rejected_before_spawn() {
        let mock = MockProcessRunner::new();
        let mut req = request();
        req.candidate = "  ".to_string();
        let err = client(&mock)
            .execute(&req, Duration::from_secs(30), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, GavelError::Config(_)));
        assert_eq!(mock.call_count("codex"), 0);
    }

    #[tokio::test]
    async fn availability_probe_reports_missing_binary() {
        let mock = MockProcessRunner::new();
        mock.expect_not_found("codex");
        assert!(!client(&mock).check_availability().await.unwrap());
        mock.expect_success("codex", "codex 1.2.3");
        assert!(client(&mock).check_availability().await.unwrap());
    }

    #[test]
    fn backoff_grows_and_caps() {
        for attempt in 1..6 {
            let delay = backoff_delay(attempt);
            assert!(delay <= Duration::from_millis(BACKOFF_CAP_MS));
        }
    }

    #[test]
    fn transient_classification_matches_known_wording() {
        assert!(is_transient_error("Rate limit exceeded (429)"));
        assert!(is_transient_error("could not connect to host"));
        assert!(!is_transient_error("invalid credentials"));
        assert!(!is_transient_error(""));
    }
}
