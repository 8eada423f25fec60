//! Mock judge, context packer, and fixture builders

use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::audit::Thought;
use crate::config::SessionConfig;
use crate::context::{ContextPack, ContextPacker};
use crate::error::{GavelError, Result};
use crate::judge::{JudgeClient, JudgeOutcome, JudgeRequest, JudgeVerdict, VerdictKind};

/// One scripted judge behavior
pub enum ScriptedResponse {
    Success(JudgeVerdict),
    /// Partial verdict recovered from a timeout, with completion fraction
    Partial(JudgeVerdict, f64),
    /// Timeout with nothing recoverable
    Timeout,
    Fatal(String),
    Transient(String),
    NotAvailable,
}

/// Scripted [`JudgeClient`]: queued responses drain in FIFO order, then the
/// sticky default serves. An optional artificial delay simulates a slow
/// judge and honors cancellation.
#[derive(Clone, Default)]
pub struct MockJudgeClient {
    script: Arc<Mutex<VecDeque<ScriptedResponse>>>,
    default_response: Arc<Mutex<Option<JudgeVerdict>>>,
    delay: Arc<Mutex<Option<Duration>>>,
    requests: Arc<Mutex<Vec<JudgeRequest>>>,
}

impl MockJudgeClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, response: ScriptedResponse) {
        self.script.lock().unwrap().push_back(response);
    }

    pub fn always_return(&self, verdict: JudgeVerdict) {
        *self.default_response.lock().unwrap() = Some(verdict);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn requests(&self) -> Vec<JudgeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl JudgeClient for MockJudgeClient {
    async fn execute(
        &self,
        request: &JudgeRequest,
        _deadline: Duration,
        cancel: &CancellationToken,
    ) -> Result<JudgeOutcome> {
        self.requests.lock().unwrap().push(request.clone());

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return Err(GavelError::Cancelled),
            }
        }

        let scripted = self.script.lock().unwrap().pop_front();
        let scripted = match scripted {
            Some(scripted) => scripted,
            None => match self.default_response.lock().unwrap().clone() {
                Some(verdict) => ScriptedResponse::Success(verdict),
                None => ScriptedResponse::Fatal("mock judge has no scripted response".to_string()),
            },
        };

        match scripted {
            ScriptedResponse::Success(verdict) => Ok(JudgeOutcome {
                verdict,
                used_fallback: false,
                timed_out: false,
                completion_percentage: None,
                duration: Duration::from_millis(5),
            }),
            ScriptedResponse::Partial(verdict, fraction) => Ok(JudgeOutcome {
                verdict,
                used_fallback: false,
                timed_out: true,
                completion_percentage: Some(fraction),
                duration: Duration::from_millis(5),
            }),
            ScriptedResponse::Timeout => Err(GavelError::JudgeTimeout { seconds: 30 }),
            ScriptedResponse::Fatal(message) => Err(GavelError::JudgeFatal(message)),
            ScriptedResponse::Transient(message) => Err(GavelError::JudgeTransient(message)),
            ScriptedResponse::NotAvailable => {
                Err(GavelError::JudgeNotAvailable("codex".to_string()))
            }
        }
    }

    async fn check_availability(&self) -> Result<bool> {
        Ok(true)
    }
}

/// [`ContextPacker`] returning a fixed blob
pub struct StaticContextPacker {
    content: String,
}

impl StaticContextPacker {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

#[async_trait]
impl ContextPacker for StaticContextPacker {
    async fn pack(&self, _config: &SessionConfig, _working_dir: &Path) -> ContextPack {
        ContextPack {
            content: self.content.clone(),
            fallback: false,
            truncated: false,
            files_included: 1,
        }
    }
}

/// A verdict with the given overall score; passes at 85 and above
pub fn passing_verdict(overall: u32) -> JudgeVerdict {
    JudgeVerdict {
        overall,
        verdict: if overall >= 85 {
            VerdictKind::Pass
        } else {
            VerdictKind::Revise
        },
        ..JudgeVerdict::default()
    }
}

/// A thought carrying a small fenced code candidate
pub fn thought_with_code(thought_number: u32, session_id: Option<&str>) -> Thought {
    Thought {
        thought: format!(
            "Attempt {thought_number}:\n```js\nfunction add(a, b) {{ return a + b; }}\n```"
        ),
        thought_number,
        total_thoughts: 10,
        next_thought_needed: true,
        session_id: session_id.map(str::to_string),
    }
}

/// A thought whose candidate text is supplied by the caller
pub fn thought_with_candidate(thought_number: u32, session_id: Option<&str>, code: &str) -> Thought {
    Thought {
        thought: format!("Attempt {thought_number}:\n```rust\n{code}\n```"),
        thought_number,
        total_thoughts: 10,
        next_thought_needed: true,
        session_id: session_id.map(str::to_string),
    }
}

/// A prose-only thought with no code candidate
pub fn prose_thought(thought_number: u32, session_id: Option<&str>) -> Thought {
    Thought {
        thought: "Thinking through the design before writing anything. The tricky part is \
                  ordering, and I want to confirm the invariants first."
            .to_string(),
        thought_number,
        total_thoughts: 10,
        next_thought_needed: true,
        session_id: session_id.map(str::to_string),
    }
}
