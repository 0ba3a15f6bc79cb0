//! Interface to the crash-analysis collaborator.
//!
//! The collaborator is an external service: it takes a text rendering of a
//! crash (backtrace plus registers, shaped like GDB console output) and
//! returns structured findings. It is stateless, side-effect-free, and safe
//! to call concurrently from every session's monitor. Failures here are
//! always non-fatal — a crash event ships without findings rather than not at
//! all.

use crate::error::AnalysisError;
use crate::mi::{RegisterMap, StackFrame};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Structured diagnosis returned by the collaborator. Findings and
/// hypotheses are opaque to the bridge; they are forwarded verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub findings: Vec<serde_json::Value>,
    #[serde(default)]
    pub hypotheses: Vec<serde_json::Value>,
}

#[async_trait]
pub trait CrashAnalyzer: Send + Sync {
    async fn analyze(&self, text: &str) -> Result<AnalysisReport, AnalysisError>;
}

/// HTTP client for the analysis endpoint (`POST {url}` with `{"text": …}`).
pub struct HttpAnalyzer {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

#[derive(Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct AnalyzeResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    summary: String,
    #[serde(default)]
    all_findings: Vec<serde_json::Value>,
    #[serde(default)]
    hypotheses: Vec<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

impl HttpAnalyzer {
    pub fn new(url: String, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AnalysisError::Http(e.to_string()))?;
        Ok(Self {
            client,
            url,
            timeout,
        })
    }
}

#[async_trait]
impl CrashAnalyzer for HttpAnalyzer {
    async fn analyze(&self, text: &str) -> Result<AnalysisReport, AnalysisError> {
        debug!("Submitting {} bytes of crash text for analysis", text.len());

        let response = self
            .client
            .post(&self.url)
            .json(&AnalyzeRequest { text })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AnalysisError::Timeout(self.timeout)
                } else {
                    AnalysisError::Http(e.to_string())
                }
            })?;

        let body: AnalyzeResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::Malformed(e.to_string()))?;

        if !body.success {
            return Err(AnalysisError::Http(
                body.error.unwrap_or_else(|| "analysis reported failure".to_string()),
            ));
        }

        Ok(AnalysisReport {
            summary: body.summary,
            findings: body.all_findings,
            hypotheses: body.hypotheses,
        })
    }
}

/// Render a crash the way gdb prints it on the console, which is the shape
/// the collaborator's parsers recognize.
pub fn render_crash_report(
    signal: &str,
    meaning: &str,
    frames: &[StackFrame],
    registers: &RegisterMap,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("Program received signal {signal}, {meaning}.\n"));

    for frame in frames {
        let addr = frame.addr.as_deref().unwrap_or("0x0");
        match (&frame.file, frame.line) {
            (Some(file), Some(line)) => out.push_str(&format!(
                "#{}  {} in {} () at {}:{}\n",
                frame.level, addr, frame.func, file, line
            )),
            _ => out.push_str(&format!("#{}  {} in {} ()\n", frame.level, addr, frame.func)),
        }
    }

    if !registers.is_empty() {
        out.push('\n');
        for (name, value) in registers {
            out.push_str(&format!("{name:<15}{value}\n"));
        }
    }
    out
}
