//! Core of the umbra service.
//!
//! - [`state`]: the durable [`ServiceState`] record and its [`StateStore`].
//! - [`orchestrator`]: the single task that applies theme transitions.
//! - [`hotkeys`]: the pump-owning thread and its [`BindingTable`].
//!
//! All OS access goes through an `Arc<dyn Platform>` chosen at startup; tests
//! substitute `umbra_platform::fake::FakePlatform`.

mod error;
pub mod hotkeys;
pub mod orchestrator;
pub mod state;

pub use error::{HotkeyError, OrchestratorError, StateError};
pub use hotkeys::{ApplyReport, BindingSnapshot, BindingState, BindingTable, HotkeyControl};
pub use orchestrator::{
    HotkeySink, Orchestrator, OrchestratorHandle, OrchestratorParams, RequestResult,
};
pub use state::{HistoryEntry, Origin, ServiceState, StateStore, now_ms};

#[cfg(test)]
mod test_bindings;
