//! Broker bindings
//!
//! A binding pairs one cached entity with its refresh settings. Its state
//! cycles `Idle -> Due -> Running -> Idle`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::{ConnectionPool, Entity, Refresh};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BindingState {
    Idle,
    Due,
    Running,
}

/// Periodic-or-once execution unit for one entity
pub struct Binding {
    entity: Weak<Entity>,
    name: String,
    interval: Duration,
    watch: bool,
    last_run: Mutex<Option<Instant>>,
    forced: AtomicBool,
    running: Mutex<()>,
}

impl Binding {
    pub fn new(entity: &Arc<Entity>, refresh: Refresh) -> Self {
        Self {
            entity: Arc::downgrade(entity),
            name: entity.name().to_string(),
            interval: refresh.interval,
            watch: refresh.watch,
            last_run: Mutex::new(None),
            forced: AtomicBool::new(false),
            running: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn watch(&self) -> bool {
        self.watch
    }

    pub fn last_run(&self) -> Option<Instant> {
        *self.last_run.lock()
    }

    /// True when the binding never ran, or when the interval is non-zero and
    /// has fully elapsed since the last run. A zero interval is single-shot:
    /// true on the first check only.
    pub fn is_timeout(&self) -> bool {
        self.is_timeout_at(Instant::now())
    }

    pub fn is_timeout_at(&self, now: Instant) -> bool {
        match *self.last_run.lock() {
            None => true,
            Some(_) if self.interval.is_zero() => false,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Request a run on the next scan regardless of the interval
    pub fn mark_due(&self) {
        self.forced.store(true, Ordering::Release);
    }

    pub fn is_due(&self) -> bool {
        self.forced.load(Ordering::Acquire) || self.is_timeout()
    }

    pub fn state(&self) -> BindingState {
        match self.running.try_lock() {
            None => BindingState::Running,
            Some(_) if self.is_due() => BindingState::Due,
            Some(_) => BindingState::Idle,
        }
    }

    /// Whether an owner change of `service` should re-run this binding
    pub fn concerns_service(&self, service: &str) -> bool {
        self.entity
            .upgrade()
            .is_some_and(|entity| entity.concerns_service(service))
    }

    fn record_execution(&self, at: Instant) {
        *self.last_run.lock() = Some(at);
    }

    /// Run the binding if it is due and no other worker holds it. Returns
    /// whether the entity was refreshed successfully.
    ///
    /// A failed query still counts as an execution; the binding waits for
    /// its next due time. A missing connection leaves it due, forced marks
    /// included.
    pub fn process(&self, pool: &ConnectionPool) -> bool {
        let Some(_running) = self.running.try_lock() else {
            return false;
        };
        if !self.is_due() {
            return false;
        }
        let forced = self.forced.swap(false, Ordering::AcqRel);

        let Some(entity) = self.entity.upgrade() else {
            self.record_execution(Instant::now());
            return false;
        };

        let conn = match pool.get() {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(binding = %self.name, error = %e, "No bus connection for binding");
                if forced {
                    self.forced.store(true, Ordering::Release);
                }
                return false;
            }
        };

        let started = Instant::now();
        let refreshed = match entity.refresh(&*conn) {
            Ok(count) => {
                tracing::debug!(
                    binding = %self.name,
                    instances = count,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Binding refreshed"
                );
                true
            }
            Err(e) => {
                tracing::warn!(binding = %self.name, error = %e, "Binding refresh failed");
                false
            }
        };
        self.record_execution(Instant::now());
        refreshed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::query::{DirectQuery, PropertyMapping};
    use entity_types::FieldDef;

    const SVC: &str = "xyz.openbmc_project.Software.BMC.Updater";
    const PATH: &str = "/xyz/openbmc_project/software/bmc";
    const IFACE: &str = "xyz.openbmc_project.Software.Version";

    fn entity() -> Arc<Entity> {
        Arc::new(
            Entity::builder("Firmware")
                .field(FieldDef::string("Version"))
                .query(DirectQuery::new(SVC, PATH, PropertyMapping::new().map(IFACE, "Version", "Version")))
                .build()
                .unwrap(),
        )
    }

    fn pool() -> ConnectionPool {
        let bus = MemoryBus::new();
        bus.add_object(SVC, PATH, IFACE, [("Version", "2.1.0")]);
        ConnectionPool::shared(Arc::new(bus), 1).unwrap()
    }

    #[test]
    fn test_single_shot_law() {
        let entity = entity();
        let binding = Binding::new(&entity, Refresh::once());
        let start = Instant::now();

        assert!(binding.is_timeout_at(start));
        binding.record_execution(start);
        assert!(!binding.is_timeout_at(start));
        assert!(!binding.is_timeout_at(start + Duration::from_secs(3600)));
        assert!(!binding.is_timeout_at(start + Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_interval_timeout() {
        let entity = entity();
        let binding = Binding::new(&entity, Refresh::every(Duration::from_secs(5)));
        let start = Instant::now();

        assert!(binding.is_timeout_at(start));
        binding.record_execution(start);
        assert!(!binding.is_timeout_at(start));
        assert!(!binding.is_timeout_at(start + Duration::from_millis(4999)));
        assert!(binding.is_timeout_at(start + Duration::from_secs(5)));
        assert!(binding.is_timeout_at(start + Duration::from_secs(60)));
    }

    #[test]
    fn test_process_runs_once_when_single_shot() {
        let entity = entity();
        let pool = pool();
        let binding = Binding::new(&entity, Refresh::once());

        assert_eq!(binding.state(), BindingState::Due);
        assert!(binding.process(&pool));
        assert_eq!(entity.get_string("Version").unwrap(), Some("2.1.0".to_string()));
        assert_eq!(binding.state(), BindingState::Idle);
        assert!(!binding.process(&pool));
        assert_eq!(entity.generation(), 1);
    }

    #[test]
    fn test_mark_due_forces_run() {
        let entity = entity();
        let pool = pool();
        let binding = Binding::new(&entity, Refresh::once().watched());

        assert!(binding.process(&pool));
        assert!(!binding.is_timeout());
        binding.mark_due();
        assert!(binding.is_due());
        assert!(!binding.is_timeout());
        assert!(binding.process(&pool));
        assert_eq!(entity.generation(), 2);
        assert!(!binding.is_due());
    }

    #[test]
    fn test_forced_mark_survives_exhausted_pool() {
        let entity = entity();
        let pool = pool().with_checkout_timeout(Duration::from_millis(20));
        let binding = Binding::new(&entity, Refresh::once().watched());

        assert!(binding.process(&pool));
        binding.mark_due();

        let held = pool.get().unwrap();
        assert!(!binding.process(&pool));
        assert!(binding.is_due());
        assert_eq!(entity.generation(), 1);

        drop(held);
        assert!(binding.process(&pool));
        assert_eq!(entity.generation(), 2);
        assert!(!binding.is_due());
    }

    #[test]
    fn test_running_binding_is_skipped() {
        let entity = entity();
        let pool = pool();
        let binding = Binding::new(&entity, Refresh::once());

        let guard = binding.running.lock();
        assert_eq!(binding.state(), BindingState::Running);
        assert!(!binding.process(&pool));
        drop(guard);
        assert!(binding.process(&pool));
    }

    #[test]
    fn test_failed_refresh_records_execution() {
        let entity = Arc::new(
            Entity::builder("Broken")
                .field(FieldDef::string("Version"))
                .query(DirectQuery::new(SVC, PATH, PropertyMapping::new().map(IFACE, "Version", "Undeclared")))
                .build()
                .unwrap(),
        );
        let binding = Binding::new(&entity, Refresh::every(Duration::from_secs(30)));

        assert!(!binding.process(&pool()));
        assert!(binding.last_run().is_some());
        assert!(!binding.is_due());
    }
}
