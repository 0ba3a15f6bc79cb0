//! WebSocket gateway: one session per client channel, pushed events, and the
//! resume handshake after a channel drop.

pub mod protocol;

use crate::analysis::{CrashAnalyzer, HttpAnalyzer};
use crate::session::{DebugSession, SessionConfig, SessionManager};
use crate::{Config, Result};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use protocol::{ClientMessage, CommandType, Outcome, ServerMessage};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

pub struct Gateway {
    listener: TcpListener,
    manager: Arc<SessionManager>,
    disconnect_grace: Duration,
}

impl Gateway {
    pub async fn new(config: Config) -> Result<Self> {
        let analyzer: Option<Arc<dyn CrashAnalyzer>> = match &config.analyzer_url {
            Some(url) => {
                info!("crash analysis enabled: {}", url);
                Some(Arc::new(
                    HttpAnalyzer::new(url.clone(), config.analysis_timeout)
                        .map_err(crate::Error::Analysis)?,
                ))
            }
            None => None,
        };

        let session_config = SessionConfig {
            gdb_path: config.gdb_path.clone(),
            command_timeout: config.command_timeout,
            analysis_timeout: config.analysis_timeout,
        };
        let manager = Arc::new(SessionManager::new(session_config, analyzer));

        let listener = TcpListener::bind(&config.bind_addr).await?;
        info!("gateway listening on {}", config.bind_addr);

        Ok(Self {
            listener,
            manager,
            disconnect_grace: config.disconnect_grace,
        })
    }

    pub fn manager(&self) -> Arc<SessionManager> {
        self.manager.clone()
    }

    pub async fn run(self) -> Result<()> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            debug!("client connected from {}", peer);
            let manager = self.manager.clone();
            let grace = self.disconnect_grace;
            tokio::spawn(async move {
                if let Err(e) = handle_client(stream, manager, grace).await {
                    warn!("client channel closed with error: {}", e);
                }
            });
        }
    }
}

async fn handle_client(
    stream: TcpStream,
    manager: Arc<SessionManager>,
    grace: Duration,
) -> Result<()> {
    let ws = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| crate::Error::Internal(format!("websocket handshake failed: {e}")))?;
    let (mut sink, mut inbound) = ws.split();

    // Every channel starts with a fresh session; a resume_session message
    // swaps it for a parked one.
    let mut session = manager.create_session().await;
    let mut events = session.subscribe();
    send(&mut sink, &ServerMessage::SessionReady {
        session_id: session.id.clone(),
    })
    .await?;

    loop {
        tokio::select! {
            frame = inbound.next() => {
                let msg = match frame {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = sink.send(Message::Pong(payload)).await;
                        continue;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!("client read error: {}", e);
                        break;
                    }
                };

                let request: ClientMessage = match serde_json::from_str(&msg) {
                    Ok(request) => request,
                    Err(e) => {
                        send(&mut sink, &ServerMessage::Error {
                            message: format!("malformed message: {e}"),
                        })
                        .await?;
                        continue;
                    }
                };

                if let ClientMessage::ResumeSession { session_id } = &request {
                    match manager.resume_session(session_id).await {
                        Ok(resumed) => {
                            // The fresh placeholder session is no longer needed.
                            manager.destroy_session(&session.id).await;
                            session = resumed;
                            events = session.subscribe();
                            send(&mut sink, &ServerMessage::SessionReady {
                                session_id: session.id.clone(),
                            })
                            .await?;
                        }
                        Err(e) => {
                            send(&mut sink, &ServerMessage::Error {
                                message: e.to_string(),
                            })
                            .await?;
                        }
                    }
                    continue;
                }

                if matches!(request, ClientMessage::Disconnect) {
                    manager.destroy_session(&session.id).await;
                    send(&mut sink, &ServerMessage::DisconnectResult {
                        outcome: Outcome::ok(),
                    })
                    .await?;
                    break;
                }

                let reply = dispatch(&session, request).await;
                send(&mut sink, &reply).await?;
            }

            event = events.recv() => {
                match event {
                    Ok(event) => {
                        send(&mut sink, &ServerMessage::event_now(event)).await?;
                    }
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        warn!(session_id = %session.id, missed, "event subscriber lagged");
                        send(&mut sink, &ServerMessage::Error {
                            message: format!("event stream lagged, {missed} events dropped"),
                        })
                        .await?;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // Session torn down underneath the channel.
                        break;
                    }
                }
            }
        }
    }

    debug!(session_id = %session.id, "client channel closed");
    manager.park_session(&session.id, grace).await;
    Ok(())
}

async fn dispatch(session: &Arc<DebugSession>, request: ClientMessage) -> ServerMessage {
    match request {
        ClientMessage::ConnectTarget {
            target,
            auto_monitor,
        } => match session.connect(&target, auto_monitor).await {
            Ok(()) => ServerMessage::ConnectResult {
                outcome: Outcome::ok(),
            },
            Err(e) => {
                error!(session_id = %session.id, "connect failed: {}", e);
                ServerMessage::ConnectResult {
                    outcome: Outcome::failed(&e),
                }
            }
        },

        ClientMessage::RunCommand {
            command,
            command_type,
        } => {
            let result = match command_type {
                CommandType::Generic => session.execute_cli(&command).await,
                CommandType::Control => session
                    .send_mi(&command)
                    .await
                    .map(|response| serde_json::to_string(&response.results).unwrap_or_default()),
            };
            match result {
                Ok(output) => ServerMessage::CommandResult {
                    outcome: Outcome::ok(),
                    output: Some(output),
                },
                Err(e) => ServerMessage::CommandResult {
                    outcome: Outcome::failed(&e),
                    output: None,
                },
            }
        }

        ClientMessage::Continue => exec_result(session.exec_continue().await),
        ClientMessage::StepOver => exec_result(session.step_over().await),
        ClientMessage::StepInto => exec_result(session.step_into().await),

        ClientMessage::GetBacktrace => match session.backtrace().await {
            Ok(frames) => ServerMessage::BacktraceResult {
                outcome: Outcome::ok(),
                frames,
            },
            Err(e) => ServerMessage::BacktraceResult {
                outcome: Outcome::failed(&e),
                frames: Vec::new(),
            },
        },

        ClientMessage::GetRegisters => match session.registers().await {
            Ok(registers) => ServerMessage::RegistersResult {
                outcome: Outcome::ok(),
                registers,
            },
            Err(e) => ServerMessage::RegistersResult {
                outcome: Outcome::failed(&e),
                registers: Default::default(),
            },
        },

        ClientMessage::SetBreakpoint { location } => match session.set_breakpoint(&location).await
        {
            Ok(breakpoint) => ServerMessage::BreakpointResult {
                outcome: Outcome::ok(),
                breakpoint: Some(breakpoint),
            },
            Err(e) => ServerMessage::BreakpointResult {
                outcome: Outcome::failed(&e),
                breakpoint: None,
            },
        },

        ClientMessage::ReadMemory { address, size } => {
            match session.read_memory(&address, size).await {
                Ok(memory) => ServerMessage::MemoryResult {
                    outcome: Outcome::ok(),
                    memory: Some(memory),
                },
                Err(e) => ServerMessage::MemoryResult {
                    outcome: Outcome::failed(&e),
                    memory: None,
                },
            }
        }

        // Handled by the channel loop before dispatch.
        ClientMessage::Disconnect | ClientMessage::ResumeSession { .. } => ServerMessage::Error {
            message: "internal routing error".to_string(),
        },
    }
}

fn exec_result(result: Result<()>) -> ServerMessage {
    match result {
        Ok(()) => ServerMessage::CommandResult {
            outcome: Outcome::ok(),
            output: None,
        },
        Err(e) => ServerMessage::CommandResult {
            outcome: Outcome::failed(&e),
            output: None,
        },
    }
}

async fn send(sink: &mut WsSink, message: &ServerMessage) -> Result<()> {
    let json = serde_json::to_string(message)?;
    sink.send(Message::Text(json.into()))
        .await
        .map_err(|e| crate::Error::Internal(format!("websocket send failed: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DispatchError;
    use crate::session::SessionConfig;
    use assert_matches::assert_matches;

    #[tokio::test]
    async fn test_dispatch_without_connect_reports_not_connected() {
        let session = Arc::new(DebugSession::new(SessionConfig::default(), None));

        let reply = dispatch(&session, ClientMessage::GetBacktrace).await;
        match reply {
            ServerMessage::BacktraceResult { outcome, frames } => {
                assert!(!outcome.success);
                assert_eq!(outcome.error_kind.as_deref(), Some("not_connected"));
                assert!(frames.is_empty());
            }
            other => panic!("wrong reply: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_connect_invalid_target_reported_in_outcome() {
        let session = Arc::new(DebugSession::new(
            SessionConfig {
                // A path that will not exist; spawn still needs a gdb binary,
                // so use one that cannot spawn either.
                gdb_path: "/no/such/gdb".to_string(),
                ..SessionConfig::default()
            },
            None,
        ));

        let reply = dispatch(
            &session,
            ClientMessage::ConnectTarget {
                target: "localhost:1234".to_string(),
                auto_monitor: true,
            },
        )
        .await;
        match reply {
            ServerMessage::ConnectResult { outcome } => {
                assert!(!outcome.success);
                assert_eq!(outcome.error_kind.as_deref(), Some("start_error"));
            }
            other => panic!("wrong reply: {other:?}"),
        }
        assert_matches!(
            session.state().await,
            crate::session::SessionState::Failed { .. }
        );
    }

    #[tokio::test]
    async fn test_exec_result_maps_errors() {
        let err: crate::Error = DispatchError::NotConnected.into();
        let reply = exec_result(Err(err));
        match reply {
            ServerMessage::CommandResult { outcome, output } => {
                assert!(!outcome.success);
                assert_eq!(outcome.error_kind.as_deref(), Some("not_connected"));
                assert!(output.is_none());
            }
            other => panic!("wrong reply: {other:?}"),
        }
    }
}
