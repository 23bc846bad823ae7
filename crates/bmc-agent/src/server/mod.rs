//! HTTP Server
//!
//! Serves the entity catalog as JSON for monitoring clients.

mod router;
mod state;

pub use router::*;
pub use state::*;
