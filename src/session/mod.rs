pub mod manager;
pub mod session;
pub mod state;

pub use manager::SessionManager;
pub use session::{DebugSession, SessionConfig};
pub use state::SessionState;
