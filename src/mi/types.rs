use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// A value inside an MI record payload: a c-string constant, a `{…}` tuple,
/// or a `[…]` list. Serializes as plain JSON (string/object/array) so raw MI
/// payloads can be handed to clients unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum MiValue {
    Const(String),
    Tuple(HashMap<String, MiValue>),
    List(Vec<MiValue>),
}

impl MiValue {
    pub fn get(&self, key: &str) -> Option<&MiValue> {
        match self {
            MiValue::Tuple(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MiValue::Const(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[MiValue]> {
        match self {
            MiValue::List(items) => Some(items),
            _ => None,
        }
    }

    /// Shorthand for `get(key).and_then(as_str)`.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(MiValue::as_str)
    }

    pub fn empty_tuple() -> Self {
        MiValue::Tuple(HashMap::new())
    }
}

/// Result class of a `^` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultClass {
    Done,
    Running,
    Connected,
    Error,
    Exit,
}

impl ResultClass {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "done" => Some(Self::Done),
            "running" => Some(Self::Running),
            "connected" => Some(Self::Connected),
            "error" => Some(Self::Error),
            "exit" => Some(Self::Exit),
            _ => None,
        }
    }
}

/// One line of GDB/MI output, demultiplexed by the bridge.
#[derive(Debug, Clone, PartialEq)]
pub enum MiRecord {
    /// `^done`, `^error`, … — reply to a tokened command.
    Result {
        token: Option<u64>,
        class: ResultClass,
        results: MiValue,
    },
    /// `*stopped`, `*running` — execution state changes.
    ExecAsync {
        token: Option<u64>,
        class: String,
        results: MiValue,
    },
    /// `+…` — ongoing-operation progress.
    StatusAsync {
        token: Option<u64>,
        class: String,
        results: MiValue,
    },
    /// `=thread-created`, … — notifications about the debug environment.
    NotifyAsync {
        token: Option<u64>,
        class: String,
        results: MiValue,
    },
    /// `~"…"` — console output stream.
    Console(String),
    /// `@"…"` — target output stream.
    Target(String),
    /// `&"…"` — gdb's own log stream.
    Log(String),
    /// The `(gdb)` ready prompt.
    Prompt,
    /// Synthesized by the bridge when the subprocess stream ends.
    Sentinel,
}

/// Correlated reply to one command: result class plus payload.
#[derive(Debug, Clone)]
pub struct MiResponse {
    pub class: ResultClass,
    pub results: MiValue,
}

impl MiResponse {
    /// Error message carried by a `^error` record.
    pub fn error_message(&self) -> String {
        self.results
            .str_field("msg")
            .unwrap_or("unknown error")
            .to_string()
    }
}

/// One stack frame, as reported by `-stack-list-frames`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackFrame {
    pub level: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    pub func: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
}

impl StackFrame {
    pub fn from_mi(value: &MiValue) -> Option<Self> {
        Some(Self {
            level: value.str_field("level")?.parse().ok()?,
            addr: value.str_field("addr").map(str::to_string),
            func: value.str_field("func").unwrap_or("??").to_string(),
            file: value.str_field("file").map(str::to_string),
            line: value.str_field("line").and_then(|l| l.parse().ok()),
        })
    }
}

/// Register name → hex value snapshot. BTreeMap keeps output stable.
pub type RegisterMap = BTreeMap<String, String>;

/// Breakpoint as confirmed by `-break-insert`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakpointInfo {
    pub number: u32,
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
}

/// Contiguous memory read result from `-data-read-memory-bytes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryBlock {
    pub address: String,
    pub contents: String,
}
