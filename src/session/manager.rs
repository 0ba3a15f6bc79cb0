//! Session registry: creation, lookup, teardown, and the disconnect grace
//! window that lets a client resume after a dropped channel.

use crate::analysis::CrashAnalyzer;
use crate::error::DispatchError;
use crate::monitor::SessionEvent;
use crate::session::session::{DebugSession, SessionConfig};
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct SessionManager {
    config: SessionConfig,
    analyzer: Option<Arc<dyn CrashAnalyzer>>,
    sessions: Arc<RwLock<HashMap<String, Arc<DebugSession>>>>,
    /// Sessions whose client channel dropped, keyed by id, each holding the
    /// timer that will destroy them when the grace window lapses.
    parked: Arc<RwLock<HashMap<String, JoinHandle<()>>>>,
}

impl SessionManager {
    pub fn new(config: SessionConfig, analyzer: Option<Arc<dyn CrashAnalyzer>>) -> Self {
        Self {
            config,
            analyzer,
            sessions: Arc::new(RwLock::new(HashMap::new())),
            parked: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn create_session(&self) -> Arc<DebugSession> {
        let session = Arc::new(DebugSession::new(
            self.config.clone(),
            self.analyzer.clone(),
        ));
        info!(session_id = %session.id, "session created");
        self.sessions
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        session
    }

    pub async fn get_session(&self, id: &str) -> Result<Arc<DebugSession>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| DispatchError::SessionNotFound(id.to_string()).into())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Subscribe to a session's event stream by id.
    pub async fn events_for(&self, id: &str) -> Result<broadcast::Receiver<SessionEvent>> {
        Ok(self.get_session(id).await?.subscribe())
    }

    /// Attach a session to a debug target by id.
    pub async fn connect(&self, id: &str, target: &str, auto_monitor: bool) -> Result<()> {
        self.get_session(id)
            .await?
            .connect(target, auto_monitor)
            .await
    }

    /// Disconnect and remove a session. Unknown ids are fine — teardown is
    /// idempotent from the caller's point of view.
    pub async fn destroy_session(&self, id: &str) {
        if let Some(handle) = self.parked.write().await.remove(id) {
            handle.abort();
        }
        let session = self.sessions.write().await.remove(id);
        match session {
            Some(session) => {
                session.disconnect().await;
                info!(session_id = %id, "session destroyed");
            }
            None => debug!(session_id = %id, "destroy for unknown session"),
        }
    }

    /// Keep a session alive for `grace` after its client channel dropped. If
    /// nobody resumes it in time it is destroyed.
    pub async fn park_session(&self, id: &str, grace: Duration) {
        if !self.sessions.read().await.contains_key(id) {
            return;
        }
        info!(session_id = %id, grace = ?grace, "parking session");

        let sessions = self.sessions.clone();
        let parked = self.parked.clone();
        let session_id = id.to_string();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            warn!(session_id = %session_id, "grace window lapsed, destroying session");
            parked.write().await.remove(&session_id);
            if let Some(session) = sessions.write().await.remove(&session_id) {
                session.disconnect().await;
            }
        });

        if let Some(previous) = self.parked.write().await.insert(id.to_string(), timer) {
            previous.abort();
        }
    }

    /// Reclaim a parked session for a new client channel. Fails if the grace
    /// window already lapsed (or the id never existed).
    pub async fn resume_session(&self, id: &str) -> Result<Arc<DebugSession>> {
        if let Some(timer) = self.parked.write().await.remove(id) {
            timer.abort();
            info!(session_id = %id, "session resumed");
        }
        self.get_session(id).await
    }

    /// Tear down every session. Used on server shutdown.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        for id in ids {
            self.destroy_session(&id).await;
        }
    }
}
