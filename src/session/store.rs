//! Durable session persistence
//!
//! One JSON file per session under the state directory, written atomically
//! (temp file + rename) so a crash mid-write never leaves a torn file under
//! the canonical name. A corrupted file is archived under a
//! `.corrupt-<timestamp>` suffix and replaced by a fresh session, surfaced
//! to the caller as a recoverable warning rather than an error.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

use super::{
    CompletionReason, Iteration, ProgressAnalysis, SessionState, StagnationRecord,
    TerminationRecord,
};
use crate::config::SessionConfig;
use crate::error::{GavelError, Result};

pub struct SessionStore {
    state_dir: PathBuf,
    persist: bool,
    /// Per-session cells; the inner mutex serializes read-modify-write-save
    sessions: RwLock<HashMap<String, Arc<Mutex<SessionState>>>>,
}

/// Result of loading or creating a session
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    pub state: SessionState,
    /// Set when a corrupted file was archived and a fresh session created;
    /// holds the archive filename
    pub recovered_from: Option<String>,
}

impl SessionStore {
    pub fn new(state_dir: impl Into<PathBuf>, persist: bool) -> Result<Self> {
        let state_dir = state_dir.into();
        if persist {
            std::fs::create_dir_all(&state_dir)?;
        }
        Ok(Self {
            state_dir,
            persist,
            sessions: RwLock::new(HashMap::new()),
        })
    }

    fn session_path(&self, id: &str) -> PathBuf {
        // session ids become filenames; strip anything path-hostile
        let safe: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.state_dir.join(format!("{safe}.json"))
    }

    /// Fetch the session cell, loading from disk or creating as needed
    async fn cell(&self, id: &str) -> Result<(Arc<Mutex<SessionState>>, Option<String>)> {
        {
            let sessions = self.sessions.read().await;
            if let Some(cell) = sessions.get(id) {
                return Ok((Arc::clone(cell), None));
            }
        }

        let mut sessions = self.sessions.write().await;
        // racing creators resolve on the second lookup
        if let Some(cell) = sessions.get(id) {
            return Ok((Arc::clone(cell), None));
        }

        let mut recovered_from = None;
        let state = if self.persist {
            match self.load_from_disk(id)? {
                Loaded::State(state) => state,
                Loaded::Corrupt(archived) => {
                    recovered_from = Some(archived);
                    SessionState::new(id, SessionConfig::default())
                }
                Loaded::Missing => SessionState::new(id, SessionConfig::default()),
            }
        } else {
            SessionState::new(id, SessionConfig::default())
        };

        let cell = Arc::new(Mutex::new(state));
        sessions.insert(id.to_string(), Arc::clone(&cell));
        Ok((cell, recovered_from))
    }

    fn load_from_disk(&self, id: &str) -> Result<Loaded> {
        let path = self.session_path(id);
        if !path.exists() {
            return Ok(Loaded::Missing);
        }
        let contents = std::fs::read_to_string(&path)?;
        match serde_json::from_str::<SessionState>(&contents) {
            Ok(state) => Ok(Loaded::State(state)),
            Err(e) => {
                let stem = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("session")
                    .to_string();
                let archive = self
                    .state_dir
                    .join(format!("{stem}.corrupt-{}", Utc::now().timestamp()));
                warn!(
                    "session file for '{id}' is corrupted ({e}), archiving to {:?}",
                    archive
                );
                if let Err(rename_err) = std::fs::rename(&path, &archive) {
                    warn!("failed to archive corrupted session file: {rename_err}");
                }
                Ok(Loaded::Corrupt(
                    archive.file_name().unwrap_or_default().to_string_lossy().to_string(),
                ))
            }
        }
    }

    /// Atomic write: serialize to an adjacent temp file, then rename over
    /// the canonical name
    fn save(&self, state: &SessionState) -> Result<()> {
        if !self.persist {
            return Ok(());
        }
        let path = self.session_path(&state.id);
        let temp = path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(state)?;
        std::fs::write(&temp, json)?;
        std::fs::rename(&temp, &path)?;
        Ok(())
    }

    /// Return the session, creating it with defaults if absent
    pub async fn get_or_create(&self, id: &str) -> Result<LoadOutcome> {
        let (cell, recovered_from) = self.cell(id).await?;
        let state = cell.lock().await.clone();
        if recovered_from.is_some() {
            // persist the fresh replacement right away
            self.save(&state)?;
        }
        Ok(LoadOutcome {
            state,
            recovered_from,
        })
    }

    /// Read-only copy of the current state
    pub async fn snapshot(&self, id: &str) -> Option<SessionState> {
        let sessions = self.sessions.read().await;
        match sessions.get(id) {
            Some(cell) => Some(cell.lock().await.clone()),
            None => None,
        }
    }

    /// Replace the session's effective config
    pub async fn update_config(&self, id: &str, config: SessionConfig) -> Result<SessionState> {
        self.mutate(id, |state| {
            state.config = config;
            Ok(())
        })
        .await
    }

    /// Append one iteration. Fails if the session is complete or terminated.
    pub async fn append_iteration(&self, id: &str, iteration: Iteration) -> Result<SessionState> {
        self.mutate(id, |state| {
            if state.is_closed() {
                return Err(GavelError::Internal(format!(
                    "session '{}' is {:?} and accepts no further iterations",
                    state.id,
                    state.status()
                )));
            }
            state.last_verdict = Some(iteration.verdict.clone());
            state.iterations.push(iteration);
            state.current_loop = state.iterations.len() as u32;
            Ok(())
        })
        .await
    }

    /// Record stagnation; the first detection pins `detectedAtLoop`,
    /// later ones only refresh the similarity score
    pub async fn record_stagnation(
        &self,
        id: &str,
        record: StagnationRecord,
    ) -> Result<SessionState> {
        self.mutate(id, |state| {
            match &mut state.stagnation {
                Some(existing) => {
                    existing.is_stagnant = record.is_stagnant;
                    existing.similarity_score = record.similarity_score;
                    existing.recommendation = record.recommendation;
                }
                None => state.stagnation = Some(record),
            }
            Ok(())
        })
        .await
    }

    pub async fn record_completion(
        &self,
        id: &str,
        reason: CompletionReason,
    ) -> Result<SessionState> {
        self.mutate(id, |state| {
            state.is_complete = true;
            state.completion_reason = Some(reason);
            Ok(())
        })
        .await
    }

    pub async fn record_termination(
        &self,
        id: &str,
        record: TerminationRecord,
    ) -> Result<SessionState> {
        self.mutate(id, |state| {
            state.completion_reason = Some(record.reason);
            state.termination = Some(record);
            Ok(())
        })
        .await
    }

    /// Score trajectory and improvement trend for a session
    pub async fn analyze_progress(&self, id: &str) -> Result<ProgressAnalysis> {
        let (cell, _) = self.cell(id).await?;
        let state = cell.lock().await;
        Ok(ProgressAnalysis {
            current_loop: state.current_loop,
            score_progression: state.score_progression(),
            average_improvement: state.average_improvement(),
            is_stagnant: state
                .stagnation
                .as_ref()
                .map(|s| s.is_stagnant)
                .unwrap_or(false),
        })
    }

    /// Delete sessions whose last update predates the cutoff.
    /// Returns the evicted ids.
    pub async fn evict_idle(&self, max_age: Duration) -> Result<Vec<String>> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age)
                .map_err(|e| GavelError::Internal(e.to_string()))?;
        let mut evicted = Vec::new();

        let mut sessions = self.sessions.write().await;
        let mut stale = Vec::new();
        for (id, cell) in sessions.iter() {
            let state = cell.lock().await;
            if state.updated_at < cutoff {
                stale.push(id.clone());
            }
        }
        for id in stale {
            sessions.remove(&id);
            if self.persist {
                let _ = std::fs::remove_file(self.session_path(&id));
            }
            evicted.push(id);
        }
        drop(sessions);

        // on-disk sessions never loaded this run are judged by file mtime
        if self.persist {
            evicted.extend(self.evict_idle_files(cutoff).await?);
        }

        if !evicted.is_empty() {
            debug!("evicted {} idle session(s)", evicted.len());
        }
        Ok(evicted)
    }

    async fn evict_idle_files(&self, cutoff: DateTime<Utc>) -> Result<Vec<String>> {
        let mut evicted = Vec::new();
        let sessions = self.sessions.read().await;
        for entry in std::fs::read_dir(&self.state_dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(String::from) else {
                continue;
            };
            if sessions.contains_key(&id) {
                continue;
            }
            let Ok(modified) = entry.metadata().and_then(|m| m.modified()) else {
                continue;
            };
            if DateTime::<Utc>::from(modified) < cutoff {
                let _ = std::fs::remove_file(&path);
                evicted.push(id);
            }
        }
        Ok(evicted)
    }

    /// Ids of all known sessions, in memory or on disk
    pub async fn list_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        if self.persist {
            if let Ok(entries) = std::fs::read_dir(&self.state_dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    if path.extension().and_then(|e| e.to_str()) != Some("json") {
                        continue;
                    }
                    if let Some(id) = path.file_stem().and_then(|s| s.to_str()) {
                        if !ids.iter().any(|known| known == id) {
                            ids.push(id.to_string());
                        }
                    }
                }
            }
        }
        ids.sort();
        ids
    }

    pub async fn session_count(&self) -> usize {
        self.list_ids().await.len()
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    async fn mutate<F>(&self, id: &str, apply: F) -> Result<SessionState>
    where
        F: FnOnce(&mut SessionState) -> Result<()>,
    {
        let (cell, _) = self.cell(id).await?;
        let mut state = cell.lock().await;
        apply(&mut state)?;
        // updatedAt is monotonic even if the wall clock hiccups
        state.updated_at = Utc::now().max(state.updated_at);
        self.save(&state)?;
        Ok(state.clone())
    }
}

enum Loaded {
    State(SessionState),
    Corrupt(String),
    Missing,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::judge::{JudgeVerdict, VerdictKind};
    use tempfile::TempDir;

    fn iteration(number: u32, score: u32) -> Iteration {
        Iteration {
            thought_number: number,
            candidate: format!("candidate {number}"),
            verdict: JudgeVerdict {
                overall: score,
                verdict: VerdictKind::Revise,
                ..JudgeVerdict::default()
            },
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn get_or_create_persists_new_sessions_lazily() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        let outcome = store.get_or_create("alpha").await.unwrap();
        assert_eq!(outcome.state.id, "alpha");
        assert!(outcome.recovered_from.is_none());

        store.append_iteration("alpha", iteration(1, 70)).await.unwrap();
        assert!(dir.path().join("alpha.json").exists());
    }

    #[tokio::test]
    async fn append_updates_loop_counter_and_last_verdict() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.get_or_create("s").await.unwrap();

        let state = store.append_iteration("s", iteration(1, 70)).await.unwrap();
        assert_eq!(state.current_loop, 1);
        let state = store.append_iteration("s", iteration(2, 80)).await.unwrap();
        assert_eq!(state.current_loop, 2);
        assert_eq!(state.last_verdict.unwrap().overall, 80);
        assert_eq!(state.iterations.len(), 2);
        assert!(state.updated_at >= state.created_at);
    }

    #[tokio::test]
    async fn closed_sessions_reject_appends() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.get_or_create("s").await.unwrap();
        store
            .record_completion("s", CompletionReason::Score95At10)
            .await
            .unwrap();

        let err = store.append_iteration("s", iteration(1, 99)).await.unwrap_err();
        assert!(matches!(err, GavelError::Internal(_)));
    }

    #[tokio::test]
    async fn state_survives_reload_from_disk() {
        let dir = TempDir::new().unwrap();
        {
            let store = SessionStore::new(dir.path(), true).unwrap();
            store.get_or_create("reborn").await.unwrap();
            store.append_iteration("reborn", iteration(1, 66)).await.unwrap();
        }
        let store = SessionStore::new(dir.path(), true).unwrap();
        let outcome = store.get_or_create("reborn").await.unwrap();
        assert_eq!(outcome.state.current_loop, 1);
        assert_eq!(outcome.state.iterations[0].verdict.overall, 66);
    }

    #[tokio::test]
    async fn corrupted_file_is_archived_and_replaced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{invalid").unwrap();

        let store = SessionStore::new(dir.path(), true).unwrap();
        let outcome = store.get_or_create("broken").await.unwrap();
        let archived = outcome.recovered_from.expect("corruption was reported");
        assert!(archived.starts_with("broken.corrupt-"));
        assert!(dir.path().join(&archived).exists());
        assert_eq!(outcome.state.current_loop, 0);

        // the replacement is immediately usable
        store.append_iteration("broken", iteration(1, 50)).await.unwrap();
    }

    #[tokio::test]
    async fn stagnation_detection_loop_is_pinned() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.get_or_create("s").await.unwrap();

        let record = |loop_n: u32, score: f64| StagnationRecord {
            is_stagnant: true,
            detected_at_loop: loop_n,
            similarity_score: score,
            recommendation: "change approach".to_string(),
        };
        store.record_stagnation("s", record(10, 0.96)).await.unwrap();
        let state = store.record_stagnation("s", record(14, 0.99)).await.unwrap();
        let stagnation = state.stagnation.unwrap();
        assert_eq!(stagnation.detected_at_loop, 10);
        assert!((stagnation.similarity_score - 0.99).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_temp_file_remains_after_save() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.get_or_create("atomic").await.unwrap();
        store.append_iteration("atomic", iteration(1, 50)).await.unwrap();

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn evict_idle_removes_old_sessions() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.get_or_create("old").await.unwrap();
        store.get_or_create("fresh").await.unwrap();

        // backdate the old session well past any cutoff
        {
            let sessions = store.sessions.read().await;
            let mut state = sessions.get("old").unwrap().lock().await;
            state.updated_at = Utc::now() - chrono::Duration::hours(48);
        }

        let evicted = store.evict_idle(Duration::from_secs(3600)).await.unwrap();
        assert_eq!(evicted, vec!["old".to_string()]);
        assert!(store.snapshot("old").await.is_none());
        assert!(store.snapshot("fresh").await.is_some());
    }

    #[tokio::test]
    async fn in_memory_mode_keeps_no_files() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path().join("never-created"), false).unwrap();
        store.get_or_create("ghost").await.unwrap();
        store.append_iteration("ghost", iteration(1, 70)).await.unwrap();
        assert!(!dir.path().join("never-created").exists());
        assert_eq!(store.snapshot("ghost").await.unwrap().current_loop, 1);
    }

    #[tokio::test]
    async fn hostile_ids_are_sanitized_into_filenames() {
        let dir = TempDir::new().unwrap();
        let store = SessionStore::new(dir.path(), true).unwrap();
        store.get_or_create("../../etc/passwd").await.unwrap();
        store
            .append_iteration("../../etc/passwd", iteration(1, 10))
            .await
            .unwrap();
        // everything stays inside the state dir
        for entry in std::fs::read_dir(dir.path()).unwrap().flatten() {
            assert!(entry.path().starts_with(dir.path()));
        }
    }
}
