use clap::{Parser, Subcommand};
use gdb_bridge::{Config, Result};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "gdb-bridge")]
#[command(about = "Real-time GDB session bridge with crash analysis", version, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket gateway
    Serve {
        /// Address to listen on
        #[arg(long, env = "GDB_BRIDGE_BIND", default_value = "127.0.0.1:8777")]
        bind: String,

        /// Path to the gdb executable
        #[arg(long, env = "GDB_BRIDGE_GDB", default_value = "gdb")]
        gdb_path: String,

        /// Crash-analysis endpoint (e.g. http://localhost:5000/api/analyze)
        #[arg(long, env = "GDB_BRIDGE_ANALYZER")]
        analyzer_url: Option<String>,

        /// Default command timeout in seconds
        #[arg(long, default_value_t = 5)]
        command_timeout: u64,

        /// Grace period in seconds before an orphaned session is torn down
        #[arg(long, default_value_t = 10)]
        disconnect_grace: u64,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,

        /// Set log level (trace, debug, info, warn, error)
        #[arg(long, default_value = "info")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            bind,
            gdb_path,
            analyzer_url,
            command_timeout,
            disconnect_grace,
            verbose,
            log_level,
        } => {
            let level = if verbose { "debug" } else { &log_level };
            let filter =
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();

            let config = Config {
                bind_addr: bind,
                gdb_path,
                analyzer_url,
                command_timeout: std::time::Duration::from_secs(command_timeout),
                disconnect_grace: std::time::Duration::from_secs(disconnect_grace),
                ..Config::default()
            };

            gdb_bridge::serve(config).await?;
        }
    }

    Ok(())
}
