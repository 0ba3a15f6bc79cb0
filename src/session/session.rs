//! A single debugging session: one bridge, one monitor, one event channel.

use crate::analysis::CrashAnalyzer;
use crate::error::{CommandError, ConnectError, DispatchError};
use crate::mi::{BreakpointInfo, GdbBridge, MemoryBlock, RegisterMap, StackFrame};
use crate::monitor::{EventMonitor, SessionEvent};
use crate::session::state::SessionState;
use crate::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Capacity of the per-session fan-out channel. A subscriber that lags this
/// far behind loses the oldest events and is told so.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub gdb_path: String,
    pub command_timeout: Duration,
    pub analysis_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gdb_path: "gdb".to_string(),
            command_timeout: Duration::from_secs(5),
            analysis_timeout: Duration::from_secs(10),
        }
    }
}

pub struct DebugSession {
    pub id: String,
    config: SessionConfig,
    analyzer: Option<Arc<dyn CrashAnalyzer>>,
    bridge: RwLock<Option<Arc<GdbBridge>>>,
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DebugSession")
            .field("id", &self.id)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DebugSession {
    pub fn new(config: SessionConfig, analyzer: Option<Arc<dyn CrashAnalyzer>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            id: Uuid::new_v4().to_string(),
            config,
            analyzer,
            bridge: RwLock::new(None),
            state: Arc::new(RwLock::new(SessionState::Idle)),
            events,
            monitor: Mutex::new(None),
        }
    }

    pub async fn state(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Subscribe to the session's event stream. Every subscriber sees events
    /// in the same order; a new subscriber sees only events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Spawn gdb and attach it to `target`. On success the monitor task is
    /// started (unless `auto_monitor` is off) and a `Started` event is
    /// published. On failure the session lands in `Failed` and is never
    /// recycled. Only legal from `Idle`: a session holds at most one bridge
    /// for its lifetime, so a second connect is rejected rather than
    /// replacing (and orphaning) the first subprocess.
    pub async fn connect(&self, target: &str, auto_monitor: bool) -> Result<()> {
        {
            let mut state = self.state.write().await;
            if *state != SessionState::Idle {
                return Err(ConnectError::AlreadyStarted.into());
            }
            *state = SessionState::Starting;
        }
        info!(session_id = %self.id, target, "connecting session");

        let bridge = match GdbBridge::start(
            &self.config.gdb_path,
            &[],
            self.config.command_timeout,
        )
        .await
        {
            Ok(bridge) => Arc::new(bridge),
            Err(e) => {
                error!(session_id = %self.id, "gdb spawn failed: {}", e);
                *self.state.write().await = SessionState::Failed {
                    error: e.to_string(),
                };
                return Err(e);
            }
        };

        *self.state.write().await = SessionState::Connecting;
        if let Err(e) = bridge.connect_target(target).await {
            error!(session_id = %self.id, "target connect failed: {}", e);
            bridge.stop().await;
            *self.state.write().await = SessionState::Failed {
                error: e.to_string(),
            };
            return Err(e);
        }

        if auto_monitor {
            let records = bridge
                .event_stream()
                .ok_or_else(|| crate::Error::Internal("event stream already taken".to_string()))?;
            let handle = EventMonitor::spawn(
                bridge.clone(),
                records,
                self.state.clone(),
                self.events.clone(),
                self.analyzer.clone(),
                self.config.analysis_timeout,
            );
            *self.monitor.lock().await = Some(handle);
        }

        *self.bridge.write().await = Some(bridge);
        *self.state.write().await = SessionState::Connected;
        let _ = self.events.send(SessionEvent::Started);
        info!(session_id = %self.id, "session connected");
        Ok(())
    }

    /// Wire an already-running bridge into the session (used by tests).
    #[cfg(test)]
    pub async fn attach_bridge(&self, bridge: Arc<GdbBridge>, auto_monitor: bool) {
        if auto_monitor {
            let records = bridge.event_stream().unwrap();
            let handle = EventMonitor::spawn(
                bridge.clone(),
                records,
                self.state.clone(),
                self.events.clone(),
                self.analyzer.clone(),
                self.config.analysis_timeout,
            );
            *self.monitor.lock().await = Some(handle);
        }
        *self.bridge.write().await = Some(bridge);
        *self.state.write().await = SessionState::Connected;
        let _ = self.events.send(SessionEvent::Started);
    }

    async fn bridge(&self) -> Result<Arc<GdbBridge>> {
        if !self.state.read().await.can_dispatch() {
            return Err(DispatchError::NotConnected.into());
        }
        let bridge = self
            .bridge
            .read()
            .await
            .clone()
            .ok_or(DispatchError::NotConnected)?;

        // Consecutive timeouts or an observed exit mean the subprocess is
        // gone; force the session down instead of queueing doomed commands.
        if !bridge.is_healthy() {
            warn!(session_id = %self.id, "gdb presumed dead, failing session");
            let mut state = self.state.write().await;
            if !state.is_terminal() {
                *state = SessionState::Failed {
                    error: "gdb unresponsive or exited".to_string(),
                };
            }
            return Err(CommandError::ProcessExited.into());
        }
        Ok(bridge)
    }

    pub async fn execute_cli(&self, command: &str) -> Result<String> {
        self.bridge().await?.execute_cli(command).await
    }

    pub async fn send_mi(&self, command: &str) -> Result<crate::mi::MiResponse> {
        let bridge = self.bridge().await?;
        let timeout = bridge.default_timeout();
        bridge.send_command(command, timeout).await
    }

    pub async fn set_breakpoint(&self, location: &str) -> Result<BreakpointInfo> {
        self.bridge().await?.set_breakpoint(location).await
    }

    pub async fn backtrace(&self) -> Result<Vec<StackFrame>> {
        self.bridge().await?.backtrace().await
    }

    pub async fn registers(&self) -> Result<RegisterMap> {
        self.bridge().await?.registers().await
    }

    pub async fn read_memory(&self, address: &str, size: u32) -> Result<MemoryBlock> {
        self.bridge().await?.read_memory(address, size).await
    }

    pub async fn exec_continue(&self) -> Result<()> {
        self.bridge().await?.exec_continue().await
    }

    pub async fn step_over(&self) -> Result<()> {
        self.bridge().await?.step_over().await
    }

    pub async fn step_into(&self) -> Result<()> {
        self.bridge().await?.step_into().await
    }

    /// Tear the session down. Idempotent; the monitor is aborted before the
    /// subprocess is stopped so deliberate teardown never surfaces as a
    /// process-death error event.
    pub async fn disconnect(&self) {
        if let Some(handle) = self.monitor.lock().await.take() {
            handle.abort();
        }

        if let Some(bridge) = self.bridge.write().await.take() {
            bridge.stop().await;
        }

        let mut state = self.state.write().await;
        if !state.is_terminal() {
            *state = SessionState::Disconnected;
        }
        info!(session_id = %self.id, "session disconnected");
    }
}
