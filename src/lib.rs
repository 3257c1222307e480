//! Turn orchestration and runtime-dimensioned associative memory for
//! conversational agents.
//!
//! - [`ai`]: runs one conversational turn (memory retrieval, a model call,
//!   then bounded tool/action execution)
//! - [`memory`]: dual-tier vector memory whose dimension follows the loaded
//!   embedding model
//! - [`settings`]: TOML configuration

pub mod ai;
pub mod error;
pub mod logging;
pub mod memory;
pub mod settings;
pub mod state;

#[cfg(test)]
pub mod testing;

pub use ai::{TurnOrchestrator, TurnOutcome};
pub use error::{EngramError, Result};
pub use memory::MemoryStore;
pub use state::EngramState;
