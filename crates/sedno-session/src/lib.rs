//! Session reduction, coordination and history for sedno analyses.
//!
//! Provides:
//! - `SessionReducer` - Folds stream events into the trace, artifacts and progress
//! - `SessionCoordinator` - Runs one session at a time and publishes its state
//! - `HistoryStore` - Bounded history of finished analyses
//! - Key-value backends (memory, file)

pub mod coordinator;
pub mod history;
pub mod reducer;
pub mod state;
pub mod storage;

pub use coordinator::SessionCoordinator;
pub use history::{HistoryEntry, HistoryStatus, HistoryStore, NewHistoryEntry};
pub use reducer::{Reduction, SessionReducer};
pub use state::{SessionPhase, SessionState};
