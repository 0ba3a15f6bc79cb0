//! In-memory scripted gdb for unit tests.
//!
//! `ScriptedGdb` wires a [`MiWriter`] that records every command line into a
//! log and a [`MiReader`] that replies per command, so responses can never
//! outrun the command that solicits them. Unsolicited records (crash
//! notifications, console chatter) can be queued up front or keyed to a
//! command.

use crate::mi::transport_trait::{MiReader, MiWriter};
use crate::Result;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

type Responder = Box<dyn Fn(u64, &str) -> Vec<String> + Send + Sync>;

pub struct ScriptedGdb {
    /// Replies computed from (token, command-without-token).
    responder: Arc<Responder>,
    /// Lines delivered before any command is written.
    preamble: Vec<String>,
    /// Every command line the bridge wrote, in order.
    pub command_log: Arc<Mutex<Vec<String>>>,
}

impl ScriptedGdb {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(u64, &str) -> Vec<String> + Send + Sync + 'static,
    {
        Self {
            responder: Arc::new(Box::new(responder)),
            preamble: Vec::new(),
            command_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Replies `^done` to everything.
    pub fn ack_everything() -> Self {
        Self::new(|token, _| vec![format!("{token}^done")])
    }

    pub fn with_preamble(mut self, lines: &[&str]) -> Self {
        self.preamble = lines.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn split(self) -> (Box<dyn MiReader>, Box<dyn MiWriter>, Arc<Mutex<Vec<String>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let log = self.command_log.clone();
        let reader = ScriptedReader {
            rx,
            responder: self.responder,
            queued: self.preamble.into_iter().collect(),
        };
        let writer = ScriptedWriter {
            tx,
            log: log.clone(),
        };
        (Box::new(reader), Box::new(writer), log)
    }
}

struct ScriptedWriter {
    tx: mpsc::UnboundedSender<String>,
    log: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl MiWriter for ScriptedWriter {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        self.log.lock().unwrap().push(line.to_string());
        let _ = self.tx.send(line.to_string());
        Ok(())
    }
}

struct ScriptedReader {
    rx: mpsc::UnboundedReceiver<String>,
    responder: Arc<Responder>,
    queued: VecDeque<String>,
}

#[async_trait]
impl MiReader for ScriptedReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(line) = self.queued.pop_front() {
                return Ok(Some(line));
            }
            match self.rx.recv().await {
                Some(command) => {
                    let digits: String =
                        command.chars().take_while(|c| c.is_ascii_digit()).collect();
                    let token: u64 = digits.parse().unwrap_or(0);
                    let rest = &command[digits.len()..];
                    self.queued.extend((self.responder)(token, rest));
                }
                None => return Ok(None),
            }
        }
    }
}

/// Reader that never yields a line; for timeout tests.
pub struct NeverReader;

#[async_trait]
impl MiReader for NeverReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        std::future::pending().await
    }
}

/// Writer that accepts and discards everything.
pub struct NullWriter;

#[async_trait]
impl MiWriter for NullWriter {
    async fn write_line(&mut self, _line: &str) -> Result<()> {
        Ok(())
    }
}

/// Canned replies for the enrichment commands, shared by monitor tests.
pub fn enrichment_responder(token: u64, command: &str) -> Vec<String> {
    if command.starts_with("-stack-list-frames") {
        vec![format!(
            r#"{token}^done,stack=[frame={{level="0",addr="0x80001a2c",func="kerneltrap",file="kernel/trap.c",line="142"}},frame={{level="1",addr="0x80001b00",func="usertrap",file="kernel/trap.c",line="67"}}]"#
        )]
    } else if command.starts_with("-data-list-register-names") {
        vec![format!(
            r#"{token}^done,register-names=["zero","ra","sp"]"#
        )]
    } else if command.starts_with("-data-list-register-values") {
        vec![format!(
            r#"{token}^done,register-values=[{{number="0",value="0x0"}},{{number="2",value="0x80009000"}}]"#
        )]
    } else {
        vec![format!("{token}^done")]
    }
}
