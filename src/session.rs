//! In-memory session registry and the record a finished session leaves behind.
//!
//! Each session sits behind its own async mutex, so one participant's turns
//! run strictly in order while different sessions proceed independently.
//! Finished and idle sessions are released; their records live in the sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::gauge;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::criteria::{ContradictionEvent, CriteriaStore};
use crate::diagnosis::{Classification, Diagnosis, GroupSnapshot};
use crate::flow::{FlowController, FlowOutput, FlowSnapshot, InterviewDeps, SessionError};
use crate::metrics as m;
use crate::storage::DynSink;
use crate::transcript::{ConversationTurn, QuestionResult};

/// Everything a completed interview produced. Written once to the result sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub diagnosis: Diagnosis,
    /// Rule engine verdict at the end; `continue` when the session ran out of questions.
    pub classification: Classification,
    /// Stopped by the `normal` rule before the question list ran out.
    pub early_stop: bool,
    pub criteria: CriteriaStore,
    pub groups: GroupSnapshot,
    pub answers: Vec<QuestionResult>,
    pub transcript: Vec<ConversationTurn>,
    #[serde(default)]
    pub contradictions: Vec<ContradictionEvent>,
    #[serde(default)]
    pub total_clarifications: u32,
}

/// One live session plus when a participant last touched it.
struct Slot {
    flow: Mutex<FlowController>,
    /// Milliseconds since the registry was created.
    touched_ms: AtomicU64,
}

/// Live sessions only. A session leaves the registry once its record is
/// stored, when it is abandoned, or when it sits idle past the sweep limit;
/// finished records are then served by the result sink.
pub struct SessionRegistry {
    deps: InterviewDeps,
    sessions: RwLock<HashMap<String, Arc<Slot>>>,
    epoch: Instant,
}

impl SessionRegistry {
    pub fn new(deps: InterviewDeps) -> Self {
        Self {
            deps,
            sessions: RwLock::new(HashMap::new()),
            epoch: Instant::now(),
        }
    }

    pub fn sink(&self) -> &DynSink {
        &self.deps.sink
    }

    /// Open a new session and return its id with the first question.
    pub async fn create(&self) -> Result<(String, FlowOutput), SessionError> {
        let id = Uuid::new_v4().to_string();
        let mut flow = FlowController::new(id.clone(), self.deps.clone());
        let out = flow.start().await?;

        let slot = Slot {
            flow: Mutex::new(flow),
            touched_ms: AtomicU64::new(self.now_ms()),
        };
        let mut g = self.sessions.write().await;
        g.insert(id.clone(), Arc::new(slot));
        gauge!(m::SESSIONS_ACTIVE).set(g.len() as f64);
        Ok((id, out))
    }

    pub async fn submit(&self, session_id: &str, text: &str) -> Result<FlowOutput, SessionError> {
        let slot = self.get(session_id).await?;
        let out = {
            let mut flow = slot.flow.lock().await;
            slot.touched_ms.store(self.now_ms(), Ordering::Relaxed);
            flow.submit_answer(text).await?
        };
        if out.is_finished() {
            self.remove(session_id).await;
        }
        Ok(out)
    }

    pub async fn snapshot(&self, session_id: &str) -> Result<FlowSnapshot, SessionError> {
        let slot = self.get(session_id).await?;
        let flow = slot.flow.lock().await;
        Ok(flow.snapshot())
    }

    /// Drop a session. Nothing is persisted for an unfinished interview.
    pub async fn abandon(&self, session_id: &str) -> bool {
        let removed = self.remove(session_id).await;
        if removed {
            tracing::info!(session_id, "session abandoned");
        }
        removed
    }

    /// Drop sessions nobody has answered for `max_idle`. Sessions in the
    /// middle of a turn are kept. Returns how many were dropped.
    pub async fn sweep_idle(&self, max_idle: Duration) -> usize {
        let now = self.now_ms();
        let limit = u64::try_from(max_idle.as_millis()).unwrap_or(u64::MAX);
        let mut g = self.sessions.write().await;
        let before = g.len();
        g.retain(|session_id, slot| {
            let idle = now.saturating_sub(slot.touched_ms.load(Ordering::Relaxed));
            let keep = idle < limit || slot.flow.try_lock().is_err();
            if !keep {
                tracing::info!(session_id = %session_id, idle_ms = idle, "idle session dropped");
            }
            keep
        });
        gauge!(m::SESSIONS_ACTIVE).set(g.len() as f64);
        before - g.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    async fn remove(&self, session_id: &str) -> bool {
        let mut g = self.sessions.write().await;
        let removed = g.remove(session_id).is_some();
        gauge!(m::SESSIONS_ACTIVE).set(g.len() as f64);
        removed
    }

    /// Live slot, or `AlreadyComplete` when the sink holds a finished record.
    async fn get(&self, session_id: &str) -> Result<Arc<Slot>, SessionError> {
        let live = self.sessions.read().await.get(session_id).cloned();
        if let Some(slot) = live {
            return Ok(slot);
        }
        match self.deps.sink.load(session_id).await? {
            Some(_) => Err(SessionError::AlreadyComplete),
            None => Err(SessionError::UnknownSession(session_id.to_string())),
        }
    }

    fn now_ms(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Periodically drop idle sessions, like the ingest ticker loops.
pub fn spawn_idle_sweeper(registry: Arc<SessionRegistry>, max_idle: Duration) -> JoinHandle<()> {
    let period = (max_idle / 4).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        loop {
            ticker.tick().await;
            let dropped = registry.sweep_idle(max_idle).await;
            if dropped > 0 {
                let remaining = registry.len().await;
                tracing::debug!(dropped, remaining, "idle sweep");
            }
        }
    })
}
