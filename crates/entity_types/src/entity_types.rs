//! Entity Types - Core data model for the entity layer
//!
//! This crate contains the pure data structures shared by the query engine and
//! the agent: field values, field declarations, and fetched instances. It has
//! no knowledge of the bus or of scheduling.

mod error;
mod field;
mod instance;
mod value;

pub use error::*;
pub use field::*;
pub use instance::*;
pub use value::*;
