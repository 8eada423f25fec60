//! Concurrency gate around the audit engine
//!
//! Bounds in-flight audits with a semaphore (waiters give up after the
//! queue timeout and surface a busy error with a retry-after hint) and
//! caps the number of tracked sessions. A background task evicts sessions
//! idle past their maximum age.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audit::{AuditEngine, AuditResponse, Thought};
use crate::error::{GavelError, Result};

pub struct ConcurrencyGate {
    engine: Arc<AuditEngine>,
    audit_slots: Arc<Semaphore>,
    queue_timeout: Duration,
    max_sessions: usize,
}

impl ConcurrencyGate {
    pub fn new(engine: Arc<AuditEngine>) -> Self {
        let config = engine.config();
        Self {
            audit_slots: Arc::new(Semaphore::new(config.max_concurrent_audits)),
            queue_timeout: config.queue_timeout,
            max_sessions: config.max_concurrent_sessions,
            engine,
        }
    }

    pub fn engine(&self) -> &Arc<AuditEngine> {
        &self.engine
    }

    /// Run one audit under the global concurrency bounds
    pub async fn audit(&self, thought: &Thought, cancel: &CancellationToken) -> Result<AuditResponse> {
        // creating yet another session past the cap is refused up front;
        // audits for known sessions still go through
        let session_id = self.engine.resolve_session_id(thought);
        let known = self.engine.store().list_ids().await;
        if !known.contains(&session_id) && known.len() >= self.max_sessions {
            warn!("session cap of {} reached, refusing new session", self.max_sessions);
            return Err(self.busy());
        }

        let permit = tokio::select! {
            acquired = tokio::time::timeout(self.queue_timeout, self.audit_slots.acquire()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => {
                        return Err(GavelError::Internal("audit semaphore closed".to_string()))
                    }
                    Err(_) => {
                        warn!("no audit slot free within {:?}", self.queue_timeout);
                        return Err(self.busy());
                    }
                }
            }
            _ = cancel.cancelled() => return Err(GavelError::Cancelled),
        };

        let result = self.engine.audit_and_wait(thought, cancel).await;
        drop(permit);
        result
    }

    fn busy(&self) -> GavelError {
        GavelError::Busy {
            retry_after_ms: (self.queue_timeout.as_millis() as u64 / 2).max(100),
        }
    }

    /// Spawn the periodic idle-session eviction task; it runs until the
    /// token is cancelled
    pub fn spawn_cleanup(&self, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self.engine.store());
        let interval = self.engine.config().session_cleanup_interval;
        let max_age = self.engine.config().max_session_age;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        match store.evict_idle(max_age).await {
                            Ok(evicted) if !evicted.is_empty() => {
                                debug!("cleanup evicted {} idle session(s)", evicted.len());
                            }
                            Ok(_) => {}
                            Err(e) => warn!("session cleanup failed: {e}"),
                        }
                    }
                }
            }
        })
    }
}
