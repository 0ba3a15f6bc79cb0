//! Wire messages exchanged with WebSocket clients. Everything is JSON text
//! frames, tagged by `kind`.

use crate::mi::{BreakpointInfo, MemoryBlock, RegisterMap, StackFrame};
use crate::monitor::SessionEvent;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn default_auto_monitor() -> bool {
    true
}

fn default_memory_size() -> u32 {
    64
}

/// How a `run_command` payload is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    /// A CLI command, run through the console interpreter; its console output
    /// comes back in the result.
    #[default]
    Generic,
    /// A raw MI command, sent verbatim.
    Control,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ClientMessage {
    ConnectTarget {
        target: String,
        #[serde(default = "default_auto_monitor")]
        auto_monitor: bool,
    },
    Disconnect,
    RunCommand {
        command: String,
        #[serde(default)]
        command_type: CommandType,
    },
    Continue,
    StepOver,
    StepInto,
    GetBacktrace,
    GetRegisters,
    SetBreakpoint {
        location: String,
    },
    ReadMemory {
        address: String,
        #[serde(default = "default_memory_size")]
        size: u32,
    },
    ResumeSession {
        session_id: String,
    },
}

/// Outcome of a client request. Failures carry a human-readable message and a
/// stable `error_kind` from [`crate::Error::kind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl Outcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(err: &crate::Error) -> Self {
        Self {
            success: false,
            error: Some(err.to_string()),
            error_kind: Some(err.kind().to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ServerMessage {
    /// First frame on every connection; carries the session id a client needs
    /// to resume after a channel drop.
    SessionReady {
        session_id: String,
    },
    ConnectResult {
        #[serde(flatten)]
        outcome: Outcome,
    },
    DisconnectResult {
        #[serde(flatten)]
        outcome: Outcome,
    },
    CommandResult {
        #[serde(flatten)]
        outcome: Outcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        output: Option<String>,
    },
    BacktraceResult {
        #[serde(flatten)]
        outcome: Outcome,
        #[serde(default)]
        frames: Vec<StackFrame>,
    },
    RegistersResult {
        #[serde(flatten)]
        outcome: Outcome,
        #[serde(default)]
        registers: RegisterMap,
    },
    BreakpointResult {
        #[serde(flatten)]
        outcome: Outcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        breakpoint: Option<BreakpointInfo>,
    },
    MemoryResult {
        #[serde(flatten)]
        outcome: Outcome,
        #[serde(skip_serializing_if = "Option::is_none")]
        memory: Option<MemoryBlock>,
    },
    Event {
        timestamp: DateTime<Utc>,
        #[serde(flatten)]
        event: SessionEvent,
    },
    Error {
        message: String,
    },
}

impl ServerMessage {
    pub fn event_now(event: SessionEvent) -> Self {
        ServerMessage::Event {
            timestamp: Utc::now(),
            event,
        }
    }
}
