use super::transport_trait::{MiReader, MiWriter};
use crate::Result;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, ChildStdout};
use tracing::trace;

/// Read half over the gdb child's stdout.
pub struct StdioReader {
    stdout: BufReader<ChildStdout>,
}

impl StdioReader {
    pub fn new(stdout: ChildStdout) -> Self {
        Self {
            stdout: BufReader::new(stdout),
        }
    }
}

#[async_trait]
impl MiReader for StdioReader {
    async fn read_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self.stdout.read_line(&mut line).await?;
        if n == 0 {
            return Ok(None);
        }
        trace!("MI recv: {}", line.trim_end());
        Ok(Some(line))
    }
}

/// Write half over the gdb child's stdin.
pub struct StdioWriter {
    stdin: ChildStdin,
}

impl StdioWriter {
    pub fn new(stdin: ChildStdin) -> Self {
        Self { stdin }
    }
}

#[async_trait]
impl MiWriter for StdioWriter {
    async fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("MI send: {}", line);
        self.stdin.write_all(line.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;
        Ok(())
    }
}
