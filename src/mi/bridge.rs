//! The protocol bridge: owns one gdb subprocess and demultiplexes its MI
//! stream.
//!
//! Every command is written as `<token><mi-command>`; the result record
//! echoing that token resolves the registered oneshot. Async records (exec
//! state, notifications, stream output) are forwarded to the event channel in
//! arrival order — the monitor depends on crash-then-exit ordering.

use super::parser;
use super::transport::{StdioReader, StdioWriter};
use super::transport_trait::{MiReader, MiWriter};
use super::types::*;
use crate::error::{CommandError, ConnectError, StartError};
use crate::{Error, Result};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex, RwLock, Semaphore};
use tracing::{debug, info, warn};

/// Bound on commands admitted while one is in flight. Overflow is rejected
/// with [`CommandError::QueueFull`] rather than silently dropped.
pub const COMMAND_QUEUE_DEPTH: usize = 16;

/// Consecutive command timeouts after which the subprocess is presumed dead.
const TIMEOUT_STRIKE_LIMIT: u32 = 2;

type PendingMap = Arc<RwLock<HashMap<u64, oneshot::Sender<MiResponse>>>>;

pub struct GdbBridge {
    token_counter: AtomicU64,
    pending: PendingMap,
    write_tx: mpsc::UnboundedSender<String>,
    /// FIFO-fair; serializes the send-and-await path so at most one command
    /// is in flight.
    command_gate: Mutex<()>,
    queue_slots: Semaphore,
    exited: Arc<AtomicBool>,
    timeout_strikes: AtomicU32,
    default_timeout: Duration,
    /// When set, console stream records are captured for an in-flight CLI
    /// command instead of being forwarded as events.
    console_capture: Arc<StdMutex<Option<String>>>,
    register_names: Mutex<Option<Vec<String>>>,
    event_rx: StdMutex<Option<mpsc::UnboundedReceiver<MiRecord>>>,
    child: Mutex<Option<Child>>,
}

impl std::fmt::Debug for GdbBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GdbBridge")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl GdbBridge {
    /// Spawn gdb in MI mode with stdio captured. Never retried automatically.
    pub async fn start(
        gdb_path: &str,
        extra_args: &[String],
        default_timeout: Duration,
    ) -> Result<Self> {
        info!("Spawning gdb: {} --interpreter=mi2 -q --nx {:?}", gdb_path, extra_args);

        let mut child = Command::new(gdb_path)
            .arg("--interpreter=mi2")
            .arg("-q")
            .arg("--nx")
            .args(extra_args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(StartError::Spawn)?;

        if child.try_wait().map_err(StartError::Spawn)?.is_some() {
            return Err(StartError::ExitedImmediately.into());
        }

        let stdin = child
            .stdin
            .take()
            .ok_or(StartError::MissingPipe("stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or(StartError::MissingPipe("stdout"))?;

        Ok(Self::new_with_transport(
            Box::new(StdioReader::new(stdout)),
            Box::new(StdioWriter::new(stdin)),
            Some(child),
            default_timeout,
        ))
    }

    /// Assemble a bridge over an arbitrary transport pair (used by tests).
    pub fn new_with_transport(
        reader: Box<dyn MiReader>,
        writer: Box<dyn MiWriter>,
        child: Option<Child>,
        default_timeout: Duration,
    ) -> Self {
        let pending: PendingMap = Arc::new(RwLock::new(HashMap::new()));
        let exited = Arc::new(AtomicBool::new(false));
        let console_capture = Arc::new(StdMutex::new(None));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (write_tx, write_rx) = mpsc::unbounded_channel();

        tokio::spawn(Self::reader_task(
            reader,
            pending.clone(),
            event_tx,
            exited.clone(),
            console_capture.clone(),
        ));
        tokio::spawn(Self::writer_task(writer, write_rx));

        Self {
            token_counter: AtomicU64::new(1),
            pending,
            write_tx,
            command_gate: Mutex::new(()),
            queue_slots: Semaphore::new(COMMAND_QUEUE_DEPTH),
            exited,
            timeout_strikes: AtomicU32::new(0),
            default_timeout,
            console_capture,
            register_names: Mutex::new(None),
            event_rx: StdMutex::new(Some(event_rx)),
            child: Mutex::new(child),
        }
    }

    /// The bridge's async record stream, in arrival order, ending with
    /// [`MiRecord::Sentinel`]. Can be taken exactly once.
    pub fn event_stream(&self) -> Option<mpsc::UnboundedReceiver<MiRecord>> {
        self.event_rx.lock().unwrap().take()
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// False once the subprocess exited or consecutive timeouts suggest it is
    /// gone. One timeout means "possibly slow"; two in a row mean "presumed
    /// dead".
    pub fn is_healthy(&self) -> bool {
        !self.exited.load(Ordering::SeqCst)
            && self.timeout_strikes.load(Ordering::SeqCst) < TIMEOUT_STRIKE_LIMIT
    }

    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::SeqCst)
    }

    async fn reader_task(
        mut reader: Box<dyn MiReader>,
        pending: PendingMap,
        event_tx: mpsc::UnboundedSender<MiRecord>,
        exited: Arc<AtomicBool>,
        console_capture: Arc<StdMutex<Option<String>>>,
    ) {
        loop {
            let line = match reader.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("MI stream ended");
                    break;
                }
                Err(e) => {
                    warn!("MI read failed: {}", e);
                    break;
                }
            };

            if line.trim().is_empty() {
                continue;
            }

            let record = match parser::parse_line(&line) {
                Ok(record) => record,
                Err(e) => {
                    // The protocol may emit records we do not model.
                    debug!("dropping unrecognized MI line: {}", e);
                    continue;
                }
            };

            match record {
                MiRecord::Prompt => {}
                MiRecord::Result {
                    token,
                    class,
                    results,
                } => {
                    if class == ResultClass::Exit {
                        exited.store(true, Ordering::SeqCst);
                    }
                    match token {
                        Some(token) => {
                            let sender = pending.write().await.remove(&token);
                            match sender {
                                Some(sender) => {
                                    let _ = sender.send(MiResponse { class, results });
                                }
                                None => {
                                    debug!("response for unknown or expired token {}", token)
                                }
                            }
                        }
                        None => debug!("dropping untokened result record"),
                    }
                }
                MiRecord::Console(text) => {
                    let captured = {
                        let mut capture = console_capture.lock().unwrap();
                        match capture.as_mut() {
                            Some(buffer) => {
                                buffer.push_str(&text);
                                true
                            }
                            None => false,
                        }
                    };
                    if !captured && event_tx.send(MiRecord::Console(text)).is_err() {
                        break;
                    }
                }
                other => {
                    if event_tx.send(other).is_err() {
                        break;
                    }
                }
            }
        }

        exited.store(true, Ordering::SeqCst);
        // Dropping the senders fails every in-flight await with ProcessExited.
        pending.write().await.clear();
        let _ = event_tx.send(MiRecord::Sentinel);
    }

    async fn writer_task(mut writer: Box<dyn MiWriter>, mut write_rx: mpsc::UnboundedReceiver<String>) {
        while let Some(line) = write_rx.recv().await {
            if let Err(e) = writer.write_line(&line).await {
                warn!("MI write failed: {}", e);
                break;
            }
        }
    }

    /// Send one MI command and await its correlated result record.
    ///
    /// Commands are strictly serialized; callers beyond the queue bound are
    /// rejected immediately. On timeout the pending slot is withdrawn so a
    /// late response is dropped instead of resolving a stale caller.
    pub async fn send_command(&self, command: &str, timeout: Duration) -> Result<MiResponse> {
        let _slot = self
            .queue_slots
            .try_acquire()
            .map_err(|_| CommandError::QueueFull(COMMAND_QUEUE_DEPTH))?;
        let _gate = self.command_gate.lock().await;

        if self.exited.load(Ordering::SeqCst) {
            return Err(CommandError::ProcessExited.into());
        }

        let token = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(token, tx);

        debug!("MI command {}: {}", token, command);
        if self.write_tx.send(format!("{token}{command}")).is_err() {
            self.pending.write().await.remove(&token);
            return Err(CommandError::ProcessExited.into());
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => {
                self.timeout_strikes.store(0, Ordering::SeqCst);
                if response.class == ResultClass::Error {
                    return Err(CommandError::Protocol(response.error_message()).into());
                }
                Ok(response)
            }
            Ok(Err(_)) => Err(CommandError::ProcessExited.into()),
            Err(_) => {
                self.pending.write().await.remove(&token);
                let strikes = self.timeout_strikes.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    "command {} timed out after {:?} (strike {}/{})",
                    token, timeout, strikes, TIMEOUT_STRIKE_LIMIT
                );
                Err(CommandError::Timeout(timeout).into())
            }
        }
    }

    /// `send_command` with the configured default timeout.
    pub async fn command(&self, command: &str) -> Result<MiResponse> {
        self.send_command(command, self.default_timeout).await
    }

    /// Attach to a debug target. `host:port` selects a remote stub, an
    /// existing path loads an executable (or core); anything else is invalid.
    /// The target string itself is not interpreted further.
    pub async fn connect_target(&self, target: &str) -> Result<()> {
        let command = if target.contains(':') {
            info!("Connecting to remote target: {}", target);
            format!("-target-select remote {target}")
        } else if Path::new(target).exists() {
            info!("Loading file: {}", target);
            format!("-file-exec-and-symbols {target}")
        } else {
            return Err(ConnectError::InvalidTarget(target.to_string()).into());
        };

        match self.command(&command).await {
            Ok(_) => Ok(()),
            Err(Error::Command(CommandError::Protocol(msg))) => {
                Err(ConnectError::Rejected(msg).into())
            }
            Err(other) => Err(other),
        }
    }

    /// Run a CLI command through `-interpreter-exec console` and return its
    /// console output. Output is captured out of the event stream so it lands
    /// in the command result rather than being pushed as console events.
    pub async fn execute_cli(&self, command: &str) -> Result<String> {
        let escaped = command.replace('\\', "\\\\").replace('"', "\\\"");
        *self.console_capture.lock().unwrap() = Some(String::new());

        let result = self
            .command(&format!("-interpreter-exec console \"{escaped}\""))
            .await;

        let output = self
            .console_capture
            .lock()
            .unwrap()
            .take()
            .unwrap_or_default();
        result.map(|_| output)
    }

    /// Pass the location string through unmodified; gdb reports errors for
    /// malformed forms (`func`, `file:line`, `*addr`).
    pub async fn set_breakpoint(&self, location: &str) -> Result<BreakpointInfo> {
        let response = self.command(&format!("-break-insert {location}")).await?;
        let bkpt = response
            .results
            .get("bkpt")
            .ok_or_else(|| Error::Mi("break-insert reply missing bkpt".to_string()))?;
        Ok(BreakpointInfo {
            number: bkpt
                .str_field("number")
                .and_then(|n| n.parse().ok())
                .ok_or_else(|| Error::Mi("bkpt missing number".to_string()))?,
            location: location.to_string(),
            address: bkpt.str_field("addr").map(str::to_string),
            func: bkpt.str_field("func").map(str::to_string),
        })
    }

    pub async fn backtrace(&self) -> Result<Vec<StackFrame>> {
        let response = self.command("-stack-list-frames").await?;
        let frames = response
            .results
            .get("stack")
            .and_then(MiValue::as_list)
            .map(|items| items.iter().filter_map(StackFrame::from_mi).collect())
            .unwrap_or_default();
        Ok(frames)
    }

    /// Register snapshot in hex. Register names are fetched once per bridge
    /// and cached; gdb's name table is fixed for the session.
    pub async fn registers(&self) -> Result<RegisterMap> {
        let names = {
            let mut cache = self.register_names.lock().await;
            match cache.as_ref() {
                Some(names) => names.clone(),
                None => {
                    let response = self.command("-data-list-register-names").await?;
                    let names: Vec<String> = response
                        .results
                        .get("register-names")
                        .and_then(MiValue::as_list)
                        .map(|items| {
                            items
                                .iter()
                                .filter_map(MiValue::as_str)
                                .map(str::to_string)
                                .collect()
                        })
                        .unwrap_or_default();
                    *cache = Some(names.clone());
                    names
                }
            }
        };

        let response = self.command("-data-list-register-values x").await?;
        let mut registers = RegisterMap::new();
        if let Some(values) = response.results.get("register-values").and_then(MiValue::as_list) {
            for entry in values {
                let number: usize = match entry.str_field("number").and_then(|n| n.parse().ok()) {
                    Some(n) => n,
                    None => continue,
                };
                let value = match entry.str_field("value") {
                    Some(v) => v,
                    None => continue,
                };
                // gdb pads the name table with empty slots.
                if let Some(name) = names.get(number).filter(|n| !n.is_empty()) {
                    registers.insert(name.clone(), value.to_string());
                }
            }
        }
        Ok(registers)
    }

    pub async fn read_memory(&self, address: &str, size: u32) -> Result<MemoryBlock> {
        let response = self
            .command(&format!("-data-read-memory-bytes {address} {size}"))
            .await?;
        let block = response
            .results
            .get("memory")
            .and_then(MiValue::as_list)
            .and_then(|items| items.first())
            .ok_or_else(|| Error::Mi("memory reply missing contents".to_string()))?;
        Ok(MemoryBlock {
            address: block
                .str_field("begin")
                .unwrap_or(address)
                .to_string(),
            contents: block.str_field("contents").unwrap_or_default().to_string(),
        })
    }

    pub async fn exec_continue(&self) -> Result<()> {
        self.command("-exec-continue").await.map(|_| ())
    }

    pub async fn step_over(&self) -> Result<()> {
        self.command("-exec-next").await.map(|_| ())
    }

    pub async fn step_into(&self) -> Result<()> {
        self.command("-exec-step").await.map(|_| ())
    }

    /// Scoped teardown. Asks gdb to exit, escalates to SIGKILL after a short
    /// wait, and does not return until the subprocess is reaped. Idempotent.
    pub async fn stop(&self) {
        let mut guard = self.child.lock().await;
        let Some(mut child) = guard.take() else {
            return;
        };

        let token = self.token_counter.fetch_add(1, Ordering::SeqCst);
        let _ = self.write_tx.send(format!("{token}-gdb-exit"));

        match tokio::time::timeout(Duration::from_millis(500), child.wait()).await {
            Ok(Ok(status)) => info!("gdb exited: {}", status),
            Ok(Err(e)) => warn!("failed waiting for gdb: {}", e),
            Err(_) => {
                warn!("gdb ignored -gdb-exit, killing");
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
        }
        self.exited.store(true, Ordering::SeqCst);
    }
}
