use thiserror::Error;

/// Failure to spawn the GDB subprocess.
#[derive(Debug, Error)]
pub enum StartError {
    #[error("failed to spawn gdb: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("gdb child is missing a {0} pipe")]
    MissingPipe(&'static str),

    #[error("gdb exited immediately after spawn")]
    ExitedImmediately,
}

/// Failure to attach the bridge to a debug target.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    #[error("target rejected connection: {0}")]
    Rejected(String),

    #[error("gdb not started")]
    NotStarted,

    #[error("session already started; create a new session to reconnect")]
    AlreadyStarted,
}

/// Failure of a single command sent through the bridge.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("gdb process exited")]
    ProcessExited,

    #[error("command queue full (depth {0})")]
    QueueFull(usize),

    #[error("gdb reported error: {0}")]
    Protocol(String),
}

/// Failure to route a client request to a session.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("session not connected")]
    NotConnected,

    #[error("session not found: {0}")]
    SessionNotFound(String),
}

/// Failure of the crash-analysis collaborator. Always non-fatal to the caller.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("analysis request failed: {0}")]
    Http(String),

    #[error("analysis timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("analysis returned malformed response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("start error: {0}")]
    Start(#[from] StartError),

    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("command error: {0}")]
    Command(#[from] CommandError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("analysis error: {0}")]
    Analysis(#[from] AnalysisError),

    #[error("MI protocol error: {0}")]
    Mi(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Stable machine-checkable kind, carried on every failed gateway result.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Start(_) => "start_error",
            Error::Connect(_) => "connect_error",
            Error::Command(CommandError::Timeout(_)) => "command_timeout",
            Error::Command(CommandError::ProcessExited) => "process_exited",
            Error::Command(CommandError::QueueFull(_)) => "queue_full",
            Error::Command(CommandError::Protocol(_)) => "command_error",
            Error::Dispatch(DispatchError::NotConnected) => "not_connected",
            Error::Dispatch(DispatchError::SessionNotFound(_)) => "session_not_found",
            Error::Analysis(_) => "analysis_error",
            Error::Mi(_) => "mi_protocol",
            Error::Internal(_) => "internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_kind_is_stable_per_variant() {
        let err: Error = CommandError::Timeout(Duration::from_secs(2)).into();
        assert_eq!(err.kind(), "command_timeout");

        let err: Error = CommandError::ProcessExited.into();
        assert_eq!(err.kind(), "process_exited");

        let err: Error = DispatchError::NotConnected.into();
        assert_eq!(err.kind(), "not_connected");
    }

    #[test]
    fn test_display_carries_context() {
        let err: Error = ConnectError::InvalidTarget("bogus".to_string()).into();
        assert!(err.to_string().contains("bogus"));

        let err: Error = CommandError::QueueFull(16).into();
        assert!(err.to_string().contains("16"));
    }
}
