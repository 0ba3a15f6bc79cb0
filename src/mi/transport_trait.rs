use crate::Result;
use async_trait::async_trait;

/// Read half of the line-oriented MI stream. `Ok(None)` is end of stream.
#[async_trait]
pub trait MiReader: Send {
    async fn read_line(&mut self) -> Result<Option<String>>;
}

/// Write half of the line-oriented MI stream.
#[async_trait]
pub trait MiWriter: Send {
    async fn write_line(&mut self, line: &str) -> Result<()>;
}
