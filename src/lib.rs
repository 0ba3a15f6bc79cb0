pub mod analysis;
pub mod error;
pub mod gateway;
pub mod mi;
pub mod monitor;
pub mod session;

#[cfg(test)]
pub(crate) mod testkit;

pub use error::Error;
pub use gateway::Gateway;

pub type Result<T> = std::result::Result<T, Error>;

/// Server-wide knobs, filled in from the CLI.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the WebSocket gateway listens on.
    pub bind_addr: String,
    /// Path to the gdb executable.
    pub gdb_path: String,
    /// Crash-analysis endpoint; `None` disables analysis enrichment.
    pub analyzer_url: Option<String>,
    /// Default per-command timeout.
    pub command_timeout: std::time::Duration,
    /// Timeout for the analysis-collaborator call.
    pub analysis_timeout: std::time::Duration,
    /// How long an orphaned session survives a dropped client channel.
    pub disconnect_grace: std::time::Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:8777".to_string(),
            gdb_path: "gdb".to_string(),
            analyzer_url: None,
            command_timeout: std::time::Duration::from_secs(5),
            analysis_timeout: std::time::Duration::from_secs(10),
            disconnect_grace: std::time::Duration::from_secs(10),
        }
    }
}

pub async fn serve(config: Config) -> Result<()> {
    let gateway = Gateway::new(config).await?;
    gateway.run().await
}
