//! Bus Snapshots
//!
//! A snapshot is a JSON document describing every service on the bus:
//!
//! ```json
//! { "services": { "<service>": { "<path>": { "<interface>": { "<property>": <value> } } } } }
//! ```
//!
//! Applying a snapshot to a [`MemoryBus`] replaces each service's object
//! tree; services that changed or appeared get a new owner and services
//! missing from the snapshot vanish, so watched entities refresh exactly as
//! they would after a real service restart.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use entity_runtime::Value;
use entity_runtime::bus::{InterfaceMap, ManagedObjects, MemoryBus, PropertyMap};

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Failed to read snapshot {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid snapshot: {0}")]
    Parse(#[from] serde_json::Error),
}

pub type SnapshotResult<T> = Result<T, SnapshotError>;

type RawObjects = BTreeMap<String, BTreeMap<String, BTreeMap<String, serde_json::Value>>>;

#[derive(Deserialize)]
struct RawSnapshot {
    #[serde(default)]
    services: BTreeMap<String, RawObjects>,
}

/// Parsed bus contents
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BusSnapshot {
    pub services: BTreeMap<String, ManagedObjects>,
}

/// What applying a snapshot changed
#[derive(Debug, Default, PartialEq)]
pub struct ApplySummary {
    /// Services that appeared or whose objects changed
    pub changed: Vec<String>,
    /// Services no longer present
    pub vanished: Vec<String>,
}

impl ApplySummary {
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.vanished.is_empty()
    }
}

impl BusSnapshot {
    pub fn from_json(text: &str) -> SnapshotResult<Self> {
        let raw: RawSnapshot = serde_json::from_str(text)?;
        let services = raw
            .services
            .into_iter()
            .map(|(service, objects)| (service, convert_objects(objects)))
            .collect();
        Ok(Self { services })
    }

    pub fn load(path: &Path) -> SnapshotResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text)
    }

    /// Object count across all services
    pub fn object_count(&self) -> usize {
        self.services.values().map(|objects| objects.len()).sum()
    }

    /// Make `bus` mirror this snapshot
    pub fn apply(&self, bus: &MemoryBus) -> ApplySummary {
        let mut summary = ApplySummary::default();

        for (service, objects) in &self.services {
            if bus.replace_service(service, objects.clone()) {
                summary.changed.push(service.clone());
            }
        }

        for service in bus.services() {
            if !self.services.contains_key(&service) && bus.remove_service(&service) {
                summary.vanished.push(service);
            }
        }

        summary
    }
}

fn convert_objects(raw: RawObjects) -> ManagedObjects {
    raw.into_iter()
        .map(|(path, interfaces)| {
            let interfaces: InterfaceMap = interfaces
                .into_iter()
                .map(|(interface, properties)| (interface, convert_properties(properties)))
                .collect();
            (path, interfaces)
        })
        .collect()
}

fn convert_properties(raw: BTreeMap<String, serde_json::Value>) -> PropertyMap {
    raw.into_iter()
        .map(|(name, value)| (name, Value::from(value)))
        .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Watcher
// ─────────────────────────────────────────────────────────────────────────────

/// Reloads the snapshot file into the bus whenever it changes on disk
pub struct SnapshotWatcher {
    path: PathBuf,
    bus: Arc<MemoryBus>,
    rx: mpsc::Receiver<()>,
    /// The underlying watcher (kept alive)
    _watcher: RecommendedWatcher,
}

impl SnapshotWatcher {
    pub fn new(path: impl AsRef<Path>, bus: Arc<MemoryBus>) -> Result<Self, notify::Error> {
        let path = path
            .as_ref()
            .canonicalize()
            .unwrap_or_else(|_| path.as_ref().to_path_buf());
        // Watch the directory: editors often replace the file instead of writing it
        let dir = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let (tx, rx) = mpsc::channel(16);

        let target = path.clone();
        let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
            Ok(event) => {
                if Self::is_relevant(&target, &event) {
                    let _ = tx.try_send(());
                }
            }
            Err(e) => {
                error!("Snapshot watcher error: {}", e);
            }
        })?;

        watcher.watch(&dir, RecursiveMode::NonRecursive)?;
        info!("Watching bus snapshot: {}", path.display());

        Ok(Self {
            path,
            bus,
            rx,
            _watcher: watcher,
        })
    }

    fn is_relevant(target: &Path, event: &Event) -> bool {
        match event.kind {
            EventKind::Modify(_) | EventKind::Create(_) => {}
            _ => return false,
        }
        event
            .paths
            .iter()
            .any(|p| p == target || p.file_name() == target.file_name())
    }

    /// Run the reload loop
    pub async fn run(mut self) {
        while self.rx.recv().await.is_some() {
            self.reload();
        }
        debug!("Snapshot watcher loop ended");
    }

    fn reload(&self) {
        match BusSnapshot::load(&self.path) {
            Ok(snapshot) => {
                let summary = snapshot.apply(&self.bus);
                if summary.is_empty() {
                    debug!("Snapshot rewritten without changes");
                } else {
                    info!(
                        changed = ?summary.changed,
                        vanished = ?summary.vanished,
                        "Bus snapshot reloaded"
                    );
                }
            }
            Err(e) => {
                // Keep serving the previous contents; a half-written file is common
                warn!("Failed to reload bus snapshot: {}", e);
            }
        }
    }
}
