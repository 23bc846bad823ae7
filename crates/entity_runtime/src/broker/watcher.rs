//! Owner-change watcher
//!
//! Runs on its own thread with its own bus connection. When a well-known
//! service changes owner (restart, appearance or disappearance), every
//! watch-enabled binding fed by that service is marked due.

use std::sync::Arc;
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::Duration;

use super::Binding;
use super::manager::Signal;
use crate::bus::{Bus, OwnerChange};

/// Mark the bindings affected by `change` as due. Returns how many were marked.
pub fn handle_owner_change(bindings: &[Arc<Binding>], change: &OwnerChange) -> usize {
    if change.is_unique_name() {
        return 0;
    }

    let mut marked = 0;
    for binding in bindings {
        if binding.watch() && binding.concerns_service(&change.name) {
            binding.mark_due();
            marked += 1;
        }
    }

    if marked > 0 {
        tracing::info!(
            service = %change.name,
            vanished = change.vanished(),
            bindings = marked,
            "Service owner changed, refresh scheduled"
        );
    }
    marked
}

/// The dedicated connection that opened `changes` is held for the life of
/// the loop so the subscription stays open.
pub(crate) fn run_watcher(
    _subscription_conn: Arc<dyn Bus>,
    changes: Receiver<OwnerChange>,
    bindings: Arc<[Arc<Binding>]>,
    signal: Arc<Signal>,
    tick: Duration,
) {
    tracing::debug!("Owner-change watcher started");

    while signal.is_active() {
        match changes.recv_timeout(tick) {
            Ok(change) => {
                if handle_owner_change(&bindings, &change) > 0 {
                    signal.wake_all();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                tracing::warn!("Owner-change stream closed, watcher exiting");
                break;
            }
        }
    }

    tracing::debug!("Owner-change watcher stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{DirectQuery, PropertyMapping};
    use crate::{Entity, Refresh};
    use entity_types::FieldDef;

    const HOST: &str = "xyz.openbmc_project.State.Host";

    fn entity(name: &str, service: &str) -> Arc<Entity> {
        Arc::new(
            Entity::builder(name)
                .field(FieldDef::string("State"))
                .query(DirectQuery::new(
                    service,
                    "/xyz/openbmc_project/state/host0",
                    PropertyMapping::new().map(HOST, "CurrentHostState", "State"),
                ))
                .build()
                .unwrap(),
        )
    }

    fn change(name: &str) -> OwnerChange {
        OwnerChange {
            name: name.to_string(),
            old_owner: Some(":1.4".to_string()),
            new_owner: Some(":1.9".to_string()),
        }
    }

    #[test]
    fn test_marks_watched_bindings_of_service() {
        let host = entity("HostPower", HOST);
        let other = entity("Other", "xyz.openbmc_project.Other");
        let bindings: Vec<Arc<Binding>> = vec![
            Arc::new(Binding::new(&host, Refresh::once().watched())),
            Arc::new(Binding::new(&host, Refresh::once())),
            Arc::new(Binding::new(&other, Refresh::once().watched())),
        ];

        assert_eq!(handle_owner_change(&bindings, &change(HOST)), 1);
    }

    #[test]
    fn test_ignores_unique_names() {
        let host = entity("HostPower", HOST);
        let bindings = vec![Arc::new(Binding::new(&host, Refresh::once().watched()))];
        assert_eq!(handle_owner_change(&bindings, &change(":1.4")), 0);
    }
}
