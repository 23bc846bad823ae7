//! Entity Runtime - Queries, caching and background refresh
//!
//! This crate turns objects exposed on the local object bus into named,
//! typed entities. It contains:
//!
//! - the bus capability ([`bus::Bus`]) and an in-memory implementation
//! - a connection pool shared by request callers and broker workers
//! - formatters and the property to field mapping table
//! - the query strategies (direct, search, introspect, proxy)
//! - [`Entity`] with its source policy and provider links
//! - [`EntityManager`], the registry the protocol layer reads from
//! - the broker engine that keeps cached entities fresh

pub mod broker;
pub mod bus;
pub mod format;
pub mod query;

mod entity;
mod error;
mod manager;
mod pool;

pub use entity::*;
pub use error::*;
pub use manager::*;
pub use pool::*;

pub use entity_types::*;
