//! Broker Manager
//!
//! Owns the worker pool that keeps cached entities fresh and the watcher
//! thread that reacts to service restarts. Shutdown is cooperative: the
//! active flag is cleared, sleeping threads are woken, and every worker
//! finishes its current binding before exiting.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use super::Binding;
use super::watcher::run_watcher;
use crate::{BrokerError, BrokerResult, ConnectionPool, Entity, EntityManager, Refresh, SourcePolicy};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

fn default_workers() -> usize {
    10
}

fn default_tick_ms() -> u64 {
    250
}

/// Broker tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    /// Worker threads scanning bindings
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Idle wait between scans, in milliseconds
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl BrokerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Signal
// ─────────────────────────────────────────────────────────────────────────────

/// Shared run flag plus a wakeup for idle threads
pub(crate) struct Signal {
    active: AtomicBool,
    lock: Mutex<()>,
    cvar: Condvar,
}

impl Signal {
    fn new() -> Self {
        Self {
            active: AtomicBool::new(false),
            lock: Mutex::new(()),
            cvar: Condvar::new(),
        }
    }

    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Release);
    }

    /// Sleep up to `timeout` unless woken
    pub(crate) fn wait(&self, timeout: Duration) {
        let mut guard = self.lock.lock();
        if self.is_active() {
            self.cvar.wait_for(&mut guard, timeout);
        }
    }

    pub(crate) fn wake_all(&self) {
        let _guard = self.lock.lock();
        self.cvar.notify_all();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Broker Manager
// ─────────────────────────────────────────────────────────────────────────────

pub struct BrokerManager {
    config: BrokerConfig,
    pool: Arc<ConnectionPool>,
    bindings: Vec<Arc<Binding>>,
    signal: Arc<Signal>,
    threads: Vec<JoinHandle<()>>,
}

impl BrokerManager {
    pub fn new(pool: Arc<ConnectionPool>, config: BrokerConfig) -> Self {
        Self {
            config,
            pool,
            bindings: Vec::new(),
            signal: Arc::new(Signal::new()),
            threads: Vec::new(),
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn bindings(&self) -> &[Arc<Binding>] {
        &self.bindings
    }

    pub fn is_running(&self) -> bool {
        !self.threads.is_empty()
    }

    /// Bind an entity. Bindings are fixed once the broker starts.
    pub fn bind(&mut self, entity: &Arc<Entity>, refresh: Refresh) -> BrokerResult<Arc<Binding>> {
        if self.is_running() {
            return Err(BrokerError::AlreadyStarted);
        }
        let binding = Arc::new(Binding::new(entity, refresh));
        tracing::debug!(
            binding = %binding.name(),
            interval_ms = refresh.interval.as_millis() as u64,
            watch = refresh.watch,
            "Binding added"
        );
        self.bindings.push(Arc::clone(&binding));
        Ok(binding)
    }

    /// Bind every cached entity of the manager with its declared refresh
    pub fn bind_cached(&mut self, manager: &EntityManager) -> BrokerResult<usize> {
        let mut bound = 0;
        for entity in manager.entities() {
            if let SourcePolicy::Cached(refresh) = entity.policy() {
                self.bind(entity, refresh)?;
                bound += 1;
            }
        }
        Ok(bound)
    }

    /// Scan every binding once on the calling thread. Returns how many
    /// bindings refreshed successfully.
    pub fn run_once(&self) -> usize {
        self.bindings
            .iter()
            .filter(|b| b.is_due() && b.process(&self.pool))
            .count()
    }

    /// Spawn the workers and the owner-change watcher
    pub fn start(&mut self) -> BrokerResult<()> {
        if self.is_running() {
            return Err(BrokerError::AlreadyStarted);
        }

        let watcher_conn = self.pool.dedicated()?;
        let changes = watcher_conn.subscribe_owner_changes()?;
        let bindings: Arc<[Arc<Binding>]> = self.bindings.clone().into();
        let tick = self.config.tick();

        self.signal.set_active(true);

        for id in 0..self.config.workers.max(1) {
            let bindings = Arc::clone(&bindings);
            let pool = Arc::clone(&self.pool);
            let signal = Arc::clone(&self.signal);
            let spawned = thread::Builder::new()
                .name(format!("broker-worker-{}", id))
                .spawn(move || run_worker(id, bindings, pool, signal, tick));
            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(e) => {
                    self.terminate();
                    return Err(BrokerError::Spawn(e));
                }
            }
        }

        let signal = Arc::clone(&self.signal);
        let watcher = thread::Builder::new()
            .name("broker-watcher".to_string())
            .spawn(move || run_watcher(watcher_conn, changes, bindings, signal, tick));
        match watcher {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                self.terminate();
                return Err(BrokerError::Spawn(e));
            }
        }

        tracing::info!(
            workers = self.config.workers.max(1),
            bindings = self.bindings.len(),
            "Broker started"
        );
        Ok(())
    }

    /// Stop all threads, letting in-flight bindings finish
    pub fn terminate(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.signal.set_active(false);
        self.signal.wake_all();

        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                tracing::error!("Broker thread panicked");
            }
        }
        tracing::info!("Broker stopped");
    }
}

impl Drop for BrokerManager {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn run_worker(
    id: usize,
    bindings: Arc<[Arc<Binding>]>,
    pool: Arc<ConnectionPool>,
    signal: Arc<Signal>,
    tick: Duration,
) {
    tracing::debug!(worker = id, "Broker worker started");

    while signal.is_active() {
        let mut executed = 0;
        for binding in bindings.iter() {
            if !signal.is_active() {
                break;
            }
            if binding.is_due() && binding.process(&pool) {
                executed += 1;
            }
        }
        if executed == 0 {
            signal.wait(tick);
        }
    }

    tracing::debug!(worker = id, "Broker worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::MemoryBus;
    use crate::query::{DirectQuery, PropertyMapping};
    use entity_types::{FieldDef, Value};
    use std::time::Instant;

    const HOST: &str = "xyz.openbmc_project.State.Host";
    const PATH: &str = "/xyz/openbmc_project/state/host0";

    fn setup(refresh: Refresh) -> (Arc<MemoryBus>, EntityManager) {
        let bus = Arc::new(MemoryBus::new());
        bus.add_object(HOST, PATH, HOST, [("CurrentHostState", "Off")]);
        let pool = Arc::new(ConnectionPool::shared(bus.clone(), 2).unwrap());

        let mut manager = EntityManager::new(pool);
        let entity = Entity::builder("HostPower")
            .cached(refresh)
            .field(FieldDef::string("State"))
            .query(DirectQuery::new(HOST, PATH, PropertyMapping::new().map(HOST, "CurrentHostState", "State")))
            .build()
            .unwrap();
        manager.add_entity(entity).unwrap();
        manager.configure().unwrap();
        (bus, manager)
    }

    fn config() -> BrokerConfig {
        BrokerConfig {
            workers: 3,
            tick_ms: 10,
        }
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_bind_cached_skips_lazy() {
        let (_bus, mut manager) = setup(Refresh::once());
        let lazy = Entity::builder("Lazy")
            .lazy()
            .field(FieldDef::string("State"))
            .query(DirectQuery::new(HOST, PATH, PropertyMapping::new().map(HOST, "CurrentHostState", "State")))
            .build()
            .unwrap();
        manager.add_entity(lazy).unwrap();

        let mut broker = BrokerManager::new(Arc::clone(manager.pool()), config());
        assert_eq!(broker.bind_cached(&manager).unwrap(), 1);
        assert_eq!(broker.bindings()[0].name(), "HostPower");
    }

    #[test]
    fn test_run_once_single_shot() {
        let (_bus, manager) = setup(Refresh::once());
        let mut broker = BrokerManager::new(Arc::clone(manager.pool()), config());
        broker.bind_cached(&manager).unwrap();

        assert_eq!(broker.run_once(), 1);
        assert_eq!(broker.run_once(), 0);
        let entity = manager.find("HostPower").unwrap();
        assert_eq!(entity.get_field("State").unwrap(), Value::from("Off"));
    }

    #[test]
    fn test_workers_refresh_on_interval() {
        let (bus, manager) = setup(Refresh::every(Duration::from_millis(20)));
        let mut broker = BrokerManager::new(Arc::clone(manager.pool()), config());
        broker.bind_cached(&manager).unwrap();
        broker.start().unwrap();

        let entity = Arc::clone(manager.find("HostPower").unwrap());
        assert!(wait_for(|| entity.has_data()));

        bus.set_property(HOST, PATH, HOST, "CurrentHostState", "Running").unwrap();
        assert!(wait_for(|| entity.get_field("State").unwrap() == Value::from("Running")));

        broker.terminate();
        assert!(!broker.is_running());
    }

    #[test]
    fn test_watcher_reruns_single_shot_on_restart() {
        let (bus, manager) = setup(Refresh::once().watched());
        let mut broker = BrokerManager::new(Arc::clone(manager.pool()), config());
        broker.bind_cached(&manager).unwrap();
        broker.start().unwrap();

        let entity = Arc::clone(manager.find("HostPower").unwrap());
        assert!(wait_for(|| entity.generation() == 1));

        bus.set_property(HOST, PATH, HOST, "CurrentHostState", "Running").unwrap();
        thread::sleep(Duration::from_millis(50));
        assert_eq!(entity.generation(), 1);

        bus.restart_service(HOST).unwrap();
        assert!(wait_for(|| entity.generation() == 2));
        assert_eq!(entity.get_field("State").unwrap(), Value::from("Running"));
    }

    #[test]
    fn test_bind_after_start_rejected() {
        let (_bus, manager) = setup(Refresh::once());
        let mut broker = BrokerManager::new(Arc::clone(manager.pool()), config());
        broker.start().unwrap();

        let entity = manager.find("HostPower").unwrap();
        assert!(matches!(
            broker.bind(entity, Refresh::once()),
            Err(BrokerError::AlreadyStarted)
        ));
        assert!(matches!(broker.start(), Err(BrokerError::AlreadyStarted)));
    }
}
