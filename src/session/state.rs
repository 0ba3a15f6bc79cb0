use serde::{Deserialize, Serialize};

/// Per-session lifecycle state.
///
/// `idle → starting → connecting → connected ⇄ running ⇄ stopped →
/// disconnected`; `failed` is reachable from `starting`/`connecting` (and
/// from a dead subprocess). `disconnected` and `failed` are terminal —
/// sessions are never recycled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Starting,
    Connecting,
    Connected,
    Running,
    Stopped,
    Disconnected,
    Failed { error: String },
}

impl SessionState {
    /// Commands may only be dispatched while a live debugger conversation
    /// exists.
    pub fn can_dispatch(&self) -> bool {
        matches!(
            self,
            SessionState::Connected | SessionState::Running | SessionState::Stopped
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Disconnected | SessionState::Failed { .. })
    }
}
