pub mod bridge;
pub mod parser;
pub mod transport;
pub mod transport_trait;
pub mod types;

pub use bridge::GdbBridge;
pub use types::{
    BreakpointInfo, MemoryBlock, MiRecord, MiResponse, MiValue, RegisterMap, ResultClass,
    StackFrame,
};
