//! The audit engine: end-to-end orchestration for a single thought
//!
//! One call to [`AuditEngine::audit_and_wait`] takes a submitted thought
//! through the whole loop: session resolution, inline config merge, code
//! detection, cache consult, context packing, the judge call under a
//! deadline with progress heartbeats, iteration persistence, stagnation
//! detection, and the completion decision, ending in the structured
//! feedback the model revises against.

pub mod feedback;
pub mod response;

pub use feedback::{derive_feedback, Feedback, Improvement, IssueCategory, Priority};
pub use response::{AuditResponse, CompletionStatus, LoopInfo, TerminationInfo};

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::AuditCache;
use crate::completion::{self, CompletionDecision};
use crate::config::{extract_inline_config, GavelConfig};
use crate::context::{ContextPacker, FsContextPacker};
use crate::detector::LoopDetector;
use crate::error::{GavelError, Result};
use crate::fingerprint::{fingerprint, WorkflowKey};
use crate::judge::{
    CodexJudgeClient, JudgeBudget, JudgeClient, JudgeOutcome, JudgeRequest, JudgeVerdict, Rubric,
};
use crate::session::{CompletionReason, Iteration, SessionState, SessionStore, TerminationRecord};
use crate::similarity::SimilarityAnalyzer;
use crate::subprocess::{ProcessRunner, TokioProcessRunner};

/// A submitted unit of work: free-form text that may embed a fenced code
/// candidate and an inline config block
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub thought: String,
    pub thought_number: u32,
    pub total_thoughts: u32,
    pub next_thought_needed: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub session_id: Option<String>,
}

/// Structured callback hooks at well-defined points of the audit lifecycle.
/// All methods default to no-ops.
pub trait AuditHooks: Send + Sync {
    fn on_audit_started(&self, _session_id: &str, _loop_number: u32) {}
    fn on_audit_completed(&self, _session_id: &str, _response: &AuditResponse) {}
    fn on_session_terminated(&self, _session_id: &str, _reason: CompletionReason) {}
    fn on_progress(&self, _session_id: &str, _elapsed: Duration) {}
}

pub struct NoopHooks;

impl AuditHooks for NoopHooks {}

pub struct AuditEngine {
    config: GavelConfig,
    judge: Arc<dyn JudgeClient>,
    store: Arc<SessionStore>,
    packer: Arc<dyn ContextPacker>,
    cache: AuditCache,
    detector: LoopDetector,
    hooks: Arc<dyn AuditHooks>,
    working_dir: PathBuf,
}

impl AuditEngine {
    pub fn new(
        config: GavelConfig,
        judge: Arc<dyn JudgeClient>,
        store: Arc<SessionStore>,
        packer: Arc<dyn ContextPacker>,
        working_dir: PathBuf,
    ) -> Self {
        let cache = AuditCache::new(config.cache_capacity, config.cache_ttl, config.enable_caching);
        let detector = LoopDetector::new(SimilarityAnalyzer::new(
            config.similarity_window,
            config.stagnation_threshold,
        ));
        Self {
            config,
            judge,
            store,
            packer,
            cache,
            detector,
            hooks: Arc::new(NoopHooks),
            working_dir,
        }
    }

    /// Wire up the real judge subprocess, filesystem packer, and session
    /// store for the given working directory
    pub fn production(config: GavelConfig, working_dir: PathBuf) -> Result<Self> {
        let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner);
        let judge = Arc::new(
            CodexJudgeClient::new(
                Arc::clone(&runner),
                config.judge_executable.clone(),
                config.judge_retries,
            )
            .with_working_dir(working_dir.clone()),
        );
        let store = Arc::new(SessionStore::new(
            working_dir.join(&config.state_dir),
            config.enable_persistence,
        )?);
        let packer = Arc::new(FsContextPacker::new(runner));
        Ok(Self::new(config, judge, store, packer, working_dir))
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn AuditHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn config(&self) -> &GavelConfig {
        &self.config
    }

    /// Audit one thought and wait for the full result
    pub async fn audit_and_wait(
        &self,
        thought: &Thought,
        cancel: &CancellationToken,
    ) -> Result<AuditResponse> {
        let started = Instant::now();
        let session_id = self.resolve_session_id(thought);
        let mut warnings = Vec::new();

        // session resolution, with corruption recovery surfaced as a warning
        let loaded = self.store.get_or_create(&session_id).await?;
        if let Some(archived) = &loaded.recovered_from {
            warnings.push(format!(
                "session file was corrupted and archived as {archived}; starting fresh"
            ));
        }
        let mut session = loaded.state;

        // inline config merge
        let (partial, mut config_warnings) = extract_inline_config(&thought.thought);
        warnings.append(&mut config_warnings);
        if let Some(partial) = partial {
            let mut config = session.config.clone();
            warnings.extend(config.merge(partial));
            session = self.store.update_config(&session_id, config).await?;
        }

        self.hooks.on_audit_started(&session_id, session.current_loop);

        // no code, no judge: short-circuit with an auto-pass
        let Some(candidate) = extract_candidate(&thought.thought) else {
            debug!("no code candidate in thought {}, auto-passing", thought.thought_number);
            let mut response = AuditResponse::for_thought(thought, &session_id);
            response.verdict = Some(JudgeVerdict::auto_pass());
            response.warnings = warnings;
            response.duration_ms = 0;
            self.hooks.on_audit_completed(&session_id, &response);
            return Ok(response);
        };

        // a closed session accepts no further work; echo its final state
        if session.is_closed() {
            warnings.push("session is already closed; no audit was performed".to_string());
            let mut response = AuditResponse::for_thought(thought, &session_id);
            response.next_thought_needed = false;
            response.verdict = session.last_verdict.clone();
            response.warnings = warnings;
            response.completion_status = Some(self.completion_status(&session, &CompletionDecision {
                is_complete: true,
                terminated: session.termination.is_some(),
                reason: session.completion_reason.unwrap_or(CompletionReason::InProgress),
                next_thought_needed: false,
            }));
            response.termination_info = session.termination.as_ref().map(termination_info);
            return Ok(response);
        }

        let rubric = Rubric::standard();
        let workflow = WorkflowKey::from(&session.config);
        let candidate_fingerprint =
            fingerprint(&session.config.task, &candidate, &rubric, &workflow);

        let mut cached = false;
        let outcome = match self.cache.get(&candidate_fingerprint) {
            Some(verdict) => {
                cached = true;
                info!("serving audit from cache for session '{session_id}'");
                JudgeOutcome {
                    verdict,
                    used_fallback: false,
                    timed_out: false,
                    completion_percentage: None,
                    duration: Duration::ZERO,
                }
            }
            None => {
                let context = self.packer.pack(&session.config, &self.working_dir).await;
                if context.fallback {
                    warnings.push("context packing fell back to a degraded blob".to_string());
                    debug!("context packer produced a fallback blob");
                }
                let request = JudgeRequest {
                    task: session.config.task.clone(),
                    candidate: candidate.clone(),
                    context_pack: context.content,
                    rubric: rubric.clone(),
                    budget: JudgeBudget {
                        max_cycles: session.config.max_cycles,
                        candidates: session.config.candidates,
                        threshold: session.config.threshold,
                    },
                };
                match self.invoke_judge(&request, &session_id, cancel).await {
                    Ok(outcome) => outcome,
                    Err(GavelError::Cancelled) => return Err(GavelError::Cancelled),
                    Err(e) => {
                        // transport failures do not pollute session history
                        warn!("audit failed for session '{session_id}': {e}");
                        let mut response =
                            AuditResponse::failure(thought, &session_id, e.to_string());
                        response.warnings = warnings;
                        response.duration_ms = started.elapsed().as_millis() as u64;
                        response.verdict = session.last_verdict.clone();
                        self.hooks.on_audit_completed(&session_id, &response);
                        return Ok(response);
                    }
                }
            }
        };

        if outcome.used_fallback {
            warnings.push("judge response required greedy JSON extraction".to_string());
        }
        if outcome.timed_out {
            warnings.push(format!(
                "judge timed out; verdict is partial ({:.0}% of dimensions scored)",
                outcome.completion_percentage.unwrap_or(0.0) * 100.0
            ));
        }

        let mut verdict = outcome.verdict;
        if !cached {
            verdict.iterations = session.current_loop + 1;
            // only full verdicts are worth replaying for identical resubmissions
            if !outcome.timed_out {
                self.cache.put(&candidate_fingerprint, verdict.clone(), None);
            }
        }

        // persist the iteration; a persistence failure still returns the
        // verdict so the model keeps its feedback
        let iteration = Iteration {
            thought_number: thought.thought_number,
            candidate,
            verdict: verdict.clone(),
            timestamp: Utc::now(),
        };
        session = match self.store.append_iteration(&session_id, iteration).await {
            Ok(state) => state,
            Err(e @ (GavelError::Filesystem(_) | GavelError::Serialization(_))) => {
                warn!("failed to persist iteration for '{session_id}': {e}");
                warnings.push("iteration could not be persisted; it will be retried".to_string());
                self.store
                    .snapshot(&session_id)
                    .await
                    .unwrap_or(session)
            }
            Err(e) => return Err(e),
        };

        // stagnation check against the updated history
        if let Some(record) = self.detector.check(&session) {
            match self.store.record_stagnation(&session_id, record).await {
                Ok(state) => session = state,
                Err(e) => warn!("failed to persist stagnation for '{session_id}': {e}"),
            }
        }

        let decision = completion::evaluate(
            verdict.overall,
            session.current_loop,
            session.stagnation.as_ref(),
        );

        let mut termination = None;
        if decision.is_complete {
            if decision.terminated {
                let analysis = completion::should_terminate(&session);
                let record = TerminationRecord {
                    reason: decision.reason,
                    failure_rate: analysis.failure_rate,
                    final_assessment: analysis.final_assessment,
                    terminated_at: Utc::now(),
                };
                termination = Some(record.clone());
                match self.store.record_termination(&session_id, record).await {
                    Ok(state) => session = state,
                    Err(e) => warn!("failed to persist termination for '{session_id}': {e}"),
                }
                self.hooks.on_session_terminated(&session_id, decision.reason);
                info!(
                    "session '{session_id}' terminated at loop {} ({})",
                    session.current_loop,
                    decision.reason.as_str()
                );
            } else {
                match self.store.record_completion(&session_id, decision.reason).await {
                    Ok(state) => session = state,
                    Err(e) => warn!("failed to persist completion for '{session_id}': {e}"),
                }
                info!(
                    "session '{session_id}' complete at loop {} ({})",
                    session.current_loop,
                    decision.reason.as_str()
                );
            }
        }

        let mut response = AuditResponse::for_thought(thought, &session_id);
        response.next_thought_needed = decision.next_thought_needed;
        response.cached = cached;
        response.timed_out = outcome.timed_out;
        response.duration_ms = started.elapsed().as_millis() as u64;
        response.warnings = warnings;
        response.feedback = Some(derive_feedback(&verdict, session.current_loop));
        response.completion_status = Some(self.completion_status(&session, &decision));
        response.loop_info = Some(LoopInfo::new(
            session.current_loop,
            session.score_progression(),
            session.average_improvement(),
            session.stagnation.clone(),
        ));
        response.termination_info = termination.as_ref().map(termination_info);
        response.verdict = Some(verdict);

        self.hooks.on_audit_completed(&session_id, &response);
        Ok(response)
    }

    /// One judge call under the audit deadline, retrying timeouts up to the
    /// configured budget and falling back to the best partial seen
    async fn invoke_judge(
        &self,
        request: &JudgeRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome> {
        let mut best_partial: Option<JudgeOutcome> = None;
        let mut attempts_left = self.config.timeout_retry_attempts;

        loop {
            match self.call_with_heartbeat(request, session_id, cancel).await {
                Ok(outcome) if outcome.timed_out && attempts_left > 0 => {
                    attempts_left -= 1;
                    debug!("judge timed out with a partial; retrying for a full verdict");
                    best_partial = Some(outcome);
                }
                Ok(outcome) => return Ok(outcome),
                Err(GavelError::JudgeTimeout { .. }) if attempts_left > 0 => {
                    attempts_left -= 1;
                    debug!("judge timed out with no usable output; retrying");
                }
                Err(e @ GavelError::JudgeTimeout { .. }) => {
                    return best_partial.map(Ok).unwrap_or(Err(e));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn call_with_heartbeat(
        &self,
        request: &JudgeRequest,
        session_id: &str,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome> {
        let start = Instant::now();
        let fut = self.judge.execute(request, self.config.audit_timeout, cancel);
        tokio::pin!(fut);
        let mut ticker = tokio::time::interval(self.config.progress_interval);
        ticker.tick().await;

        loop {
            tokio::select! {
                result = &mut fut => return result,
                _ = ticker.tick() => {
                    self.hooks.on_progress(session_id, start.elapsed());
                    info!(
                        "audit for session '{session_id}' still awaiting the judge ({:?} elapsed)",
                        start.elapsed()
                    );
                }
            }
        }
    }

    fn completion_status(
        &self,
        session: &SessionState,
        decision: &CompletionDecision,
    ) -> CompletionStatus {
        CompletionStatus {
            is_complete: decision.is_complete,
            reason: decision.reason,
            next_thought_needed: decision.next_thought_needed,
            current_loop: session.current_loop,
            score: session.last_verdict.as_ref().map(|v| v.overall).unwrap_or(0),
            threshold: session.config.threshold,
        }
    }

    /// Explicit hint wins; otherwise the session is derived from the
    /// working directory so one connection keeps reusing it
    pub(crate) fn resolve_session_id(&self, thought: &Thought) -> String {
        if let Some(id) = &thought.session_id {
            if !id.trim().is_empty() {
                return id.clone();
            }
        }
        let mut hasher = Sha256::new();
        hasher.update(self.working_dir.to_string_lossy().as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        format!("default-{}", &digest[..12])
    }
}

fn termination_info(record: &TerminationRecord) -> TerminationInfo {
    TerminationInfo {
        reason: record.reason,
        failure_rate: record.failure_rate,
        final_assessment: record.final_assessment.clone(),
    }
}

fn fenced_block_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```([A-Za-z0-9_+\-]*)[ \t]*\r?\n(.*?)```").expect("valid regex"))
}

/// Extract the code candidate from thought text.
///
/// Fenced code blocks win (config blocks are skipped); unfenced text falls
/// back to a line-shape heuristic so raw code still audits. Prose-only
/// thoughts yield `None`.
pub fn extract_candidate(text: &str) -> Option<String> {
    for captures in fenced_block_re().captures_iter(text) {
        let lang = captures.get(1).map(|m| m.as_str()).unwrap_or("");
        if lang.eq_ignore_ascii_case("gan-config") || lang.eq_ignore_ascii_case("json") {
            continue;
        }
        let body = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");
        if !body.is_empty() {
            return Some(body.to_string());
        }
    }

    // strip fenced blocks (config included) before judging the remainder
    let stripped = fenced_block_re().replace_all(text, "");
    let lines: Vec<&str> = stripped.lines().filter(|l| !l.trim().is_empty()).collect();
    if lines.len() < 3 {
        return None;
    }
    let codeish = lines.iter().filter(|l| looks_like_code(l)).count();
    if codeish >= 3 && codeish * 10 >= lines.len() * 3 {
        return Some(stripped.trim().to_string());
    }
    None
}

fn looks_like_code(line: &str) -> bool {
    const TOKENS: &[&str] = &[
        "{", "};", "();", "fn ", "def ", "class ", "function ", "=>", "let ", "const ", "impl ",
        "return ", "::", "if (", "for (", "#include", "import ",
    ];
    let trimmed = line.trim();
    trimmed.ends_with(';') || trimmed.ends_with('{') || TOKENS.iter().any(|t| trimmed.contains(t))
}
