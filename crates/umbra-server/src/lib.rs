//! Service layer for umbra.
//!
//! - [`Service`] wires the config, engine and platform together and owns
//!   startup and shutdown ordering.
//! - [`ControlServer`] exposes the orchestrator and config reload over a
//!   loopback TCP control channel speaking the line protocol in [`protocol`].
//! - [`Client`] talks to a running service; `umbra ctl` is built on it.
//!
//! Control channel conventions
//! - One JSON frame per line in each direction.
//! - Exactly one response per request; the next request is read only after
//!   the response is written.
//! - A request enqueued with the orchestrator completes even if the client
//!   disconnects; the response is simply dropped.
//! - When `service.token` is set, every request must carry it.
#![warn(missing_docs)]

mod client;
mod control;
mod coordinator;
mod error;
pub mod protocol;

pub use client::{Client, Connection};
pub use control::{ControlContext, ControlServer};
pub use coordinator::{RunningService, Service, ServiceEvent};
pub use error::{Error, IpcError, Result};
