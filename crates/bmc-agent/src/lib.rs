//! BMC Agent
//!
//! Serves BMC inventory and state entities assembled from the object bus.
//! The catalog lives in [`entities`]; the bus is loaded from a JSON snapshot
//! that is reloaded when the file changes.

pub mod config;
pub mod entities;
pub mod server;
pub mod snapshot;
