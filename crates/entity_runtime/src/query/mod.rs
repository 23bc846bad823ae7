//! Queries
//!
//! A query is the strategy an entity uses to obtain its instances. There are
//! four of them:
//!
//! - [`DirectQuery`]: one fixed object on one service
//! - [`SearchQuery`]: every object under a path prefix matching [`SearchCriteria`]
//! - [`IntrospectQuery`]: every object of one service
//! - [`ProxyQuery`]: the instances of a shared provider entity
//!
//! The bus-backed variants share one [`PropertyMapping`] pipeline: map
//! properties to fields, run formatters, then the static-field hook.
//!
//! Remote failures never escape a query. A missing object, property or
//! service degrades to unavailable fields or an empty result.

mod direct;
mod introspect;
mod mapping;
mod proxy;
mod search;

pub use direct::*;
pub use introspect::*;
pub use mapping::*;
pub use proxy::*;
pub use search::*;

use entity_types::Instance;

use crate::QueryResult;
use crate::bus::Bus;

/// Strategy that retrieves a set of instances
pub trait Query: Send + Sync {
    /// One-time preparation, run when the owning entity initializes
    fn initialize(&self) -> QueryResult<()> {
        Ok(())
    }

    /// Execute against a bus connection
    fn process(&self, bus: &dyn Bus) -> QueryResult<Vec<Instance>>;

    /// Names of every field this query can produce
    fn fields(&self) -> Vec<String>;

    /// Whether data owned by `service` feeds this query
    fn concerns_service(&self, service: &str) -> bool;

    /// Short description for logs
    fn describe(&self) -> String;
}
