//! Proxy query
//!
//! Delegates to a provider entity so that several consumers share one fetch.
//! The provider is populated through its own source policy under its own
//! lock, so concurrent consumers serialize into "populate once, read by all".

use std::sync::{Arc, Weak};

use entity_types::{Instance, is_meta_field};

use super::Query;
use crate::bus::Bus;
use crate::{Entity, QueryError, QueryResult};

/// Query that hands back a provider's instances unmodified
pub struct ProxyQuery {
    provider: Weak<Entity>,
    name: String,
}

impl ProxyQuery {
    pub fn new(provider: &Arc<Entity>) -> Self {
        Self {
            provider: Arc::downgrade(provider),
            name: provider.name().to_string(),
        }
    }

    fn provider(&self) -> QueryResult<Arc<Entity>> {
        self.provider
            .upgrade()
            .ok_or_else(|| QueryError::ProviderGone(self.name.clone()))
    }
}

impl Query for ProxyQuery {
    fn process(&self, bus: &dyn Bus) -> QueryResult<Vec<Instance>> {
        let provider = self.provider()?;
        provider.initialize()?;
        provider.populate(bus)?;
        Ok(provider.instances().as_ref().clone())
    }

    fn fields(&self) -> Vec<String> {
        match self.provider.upgrade() {
            Some(provider) => provider
                .schema()
                .names()
                .filter(|name| !is_meta_field(name))
                .map(str::to_string)
                .collect(),
            None => Vec::new(),
        }
    }

    fn concerns_service(&self, service: &str) -> bool {
        self.provider
            .upgrade()
            .is_some_and(|provider| provider.concerns_service(service))
    }

    fn describe(&self) -> String {
        format!("proxy {}", self.name)
    }
}
