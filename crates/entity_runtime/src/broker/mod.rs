//! Broker Engine
//!
//! Keeps cached entities fresh in the background:
//! - a fixed pool of worker threads repeatedly scans all bindings and runs
//!   the due ones against pooled bus connections
//! - a watcher thread marks watched bindings due when a service restarts

mod binding;
mod manager;
mod watcher;

pub use binding::*;
pub use manager::{BrokerConfig, BrokerManager};
pub use watcher::handle_owner_change;
