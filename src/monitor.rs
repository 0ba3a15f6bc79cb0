//! The event monitor: one task per session, consuming the bridge's raw
//! record stream and classifying it into [`SessionEvent`]s.
//!
//! Crash and breakpoint events are enriched — backtrace and registers are
//! fetched through the same serialized command queue — before they are
//! published, so a subscriber never sees a bare crash notification that is
//! later amended. Enrichment intentionally blocks client commands: the
//! snapshot must reflect the crashed state before anything perturbs it.

use crate::analysis::{render_crash_report, AnalysisReport, CrashAnalyzer};
use crate::mi::{GdbBridge, MiRecord, MiValue, RegisterMap, StackFrame};
use crate::session::state::SessionState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Signals treated as program faults rather than ordinary stops.
const FAULT_SIGNALS: [&str; 4] = ["SIGSEGV", "SIGBUS", "SIGILL", "SIGABRT"];

/// Semantic event published to session subscribers, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Started,
    Running,
    Stopped {
        reason: String,
        backtrace: Vec<StackFrame>,
        registers: RegisterMap,
    },
    Crashed {
        signal: String,
        signal_meaning: String,
        backtrace: Vec<StackFrame>,
        registers: RegisterMap,
        analysis: Option<AnalysisReport>,
    },
    BreakpointHit {
        number: u32,
        backtrace: Vec<StackFrame>,
        registers: RegisterMap,
    },
    Exited {
        code: i32,
    },
    ConsoleOutput {
        text: String,
    },
    Error {
        message: String,
    },
}

pub struct EventMonitor {
    bridge: Arc<GdbBridge>,
    analyzer: Option<Arc<dyn CrashAnalyzer>>,
    analysis_timeout: Duration,
    state: Arc<RwLock<SessionState>>,
    events: broadcast::Sender<SessionEvent>,
}

impl EventMonitor {
    /// Take the bridge's record stream and run the classification loop until
    /// the stream ends or the task is aborted by `disconnect`.
    pub fn spawn(
        bridge: Arc<GdbBridge>,
        records: mpsc::UnboundedReceiver<MiRecord>,
        state: Arc<RwLock<SessionState>>,
        events: broadcast::Sender<SessionEvent>,
        analyzer: Option<Arc<dyn CrashAnalyzer>>,
        analysis_timeout: Duration,
    ) -> JoinHandle<()> {
        let monitor = Self {
            bridge,
            analyzer,
            analysis_timeout,
            state,
            events,
        };
        tokio::spawn(monitor.run(records))
    }

    async fn run(self, mut records: mpsc::UnboundedReceiver<MiRecord>) {
        info!("event monitor started");

        while let Some(record) = records.recv().await {
            match record {
                MiRecord::ExecAsync { class, results, .. } => match class.as_str() {
                    "stopped" => self.on_stopped(&results).await,
                    "running" => {
                        self.set_state(SessionState::Running).await;
                        self.publish(SessionEvent::Running);
                    }
                    other => debug!("unmodeled exec-async record: {}", other),
                },
                MiRecord::Console(text) => {
                    self.publish(SessionEvent::ConsoleOutput { text });
                }
                MiRecord::Log(text) => debug!("gdb log: {}", text.trim_end()),
                MiRecord::Target(text) => debug!("target output: {}", text.trim_end()),
                MiRecord::Sentinel => {
                    warn!("gdb process exited underneath the session");
                    let mut state = self.state.write().await;
                    if !state.is_terminal() {
                        *state = SessionState::Failed {
                            error: "gdb process exited".to_string(),
                        };
                    }
                    drop(state);
                    self.publish(SessionEvent::Error {
                        message: "gdb process exited".to_string(),
                    });
                    break;
                }
                // Notifications, status updates, and stray results we do not
                // model; dropping them is not an error condition.
                other => debug!("dropping unmodeled MI record: {:?}", other),
            }
        }

        info!("event monitor stopped");
    }

    async fn on_stopped(&self, results: &MiValue) {
        let reason = results.str_field("reason").unwrap_or("unknown").to_string();
        debug!("program stopped: {}", reason);

        if reason.starts_with("exited") {
            let code = results
                .str_field("exit-code")
                // MI prints exit codes in octal.
                .and_then(|s| i32::from_str_radix(s, 8).ok())
                .unwrap_or(0);
            info!("program exited with code {}", code);
            // Terminal for the run state only; the session stays connected.
            self.set_state(SessionState::Connected).await;
            self.publish(SessionEvent::Exited { code });
            return;
        }

        self.set_state(SessionState::Stopped).await;

        match reason.as_str() {
            "signal-received" => {
                let signal = results
                    .str_field("signal-name")
                    .unwrap_or("UNKNOWN")
                    .to_string();
                let meaning = results
                    .str_field("signal-meaning")
                    .unwrap_or("")
                    .to_string();
                if FAULT_SIGNALS.contains(&signal.as_str()) {
                    self.on_crash(signal, meaning).await;
                } else {
                    let (backtrace, registers) = self.capture_snapshot().await;
                    self.publish(SessionEvent::Stopped {
                        reason: format!("signal-received ({signal})"),
                        backtrace,
                        registers,
                    });
                }
            }
            "breakpoint-hit" => {
                let number = results
                    .str_field("bkptno")
                    .and_then(|n| n.parse().ok())
                    .unwrap_or(0);
                info!("breakpoint {} hit", number);
                let (backtrace, registers) = self.capture_snapshot().await;
                self.publish(SessionEvent::BreakpointHit {
                    number,
                    backtrace,
                    registers,
                });
            }
            _ => {
                // Step completion and other stop reasons still get a snapshot.
                let (backtrace, registers) = self.capture_snapshot().await;
                self.publish(SessionEvent::Stopped {
                    reason,
                    backtrace,
                    registers,
                });
            }
        }
    }

    async fn on_crash(&self, signal: String, meaning: String) {
        warn!("fault signal received: {} ({})", signal, meaning);

        // Enrich first; the crash event is only published once complete.
        let (backtrace, registers) = self.capture_snapshot().await;

        let analysis = match &self.analyzer {
            Some(analyzer) => {
                let text = render_crash_report(&signal, &meaning, &backtrace, &registers);
                match tokio::time::timeout(self.analysis_timeout, analyzer.analyze(&text)).await {
                    Ok(Ok(report)) => Some(report),
                    Ok(Err(e)) => {
                        warn!("crash analysis failed: {}", e);
                        None
                    }
                    Err(_) => {
                        warn!("crash analysis timed out after {:?}", self.analysis_timeout);
                        None
                    }
                }
            }
            None => None,
        };

        self.publish(SessionEvent::Crashed {
            signal,
            signal_meaning: meaning,
            backtrace,
            registers,
            analysis,
        });
    }

    /// Backtrace and registers through the serialized command queue. Partial
    /// failure degrades to empty collections; the event still ships.
    async fn capture_snapshot(&self) -> (Vec<StackFrame>, RegisterMap) {
        let backtrace = match self.bridge.backtrace().await {
            Ok(frames) => frames,
            Err(e) => {
                warn!("backtrace enrichment failed: {}", e);
                Vec::new()
            }
        };
        let registers = match self.bridge.registers().await {
            Ok(registers) => registers,
            Err(e) => {
                warn!("register enrichment failed: {}", e);
                RegisterMap::new()
            }
        };
        (backtrace, registers)
    }

    async fn set_state(&self, state: SessionState) {
        *self.state.write().await = state;
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine; events are fan-out, not acknowledged.
        let _ = self.events.send(event);
    }
}
