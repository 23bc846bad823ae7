//! Entity Catalog
//!
//! The concrete entities served by the agent. Providers are registered before
//! the resources that proxy or link them, since a declaration resolves its
//! providers from the manager.

mod chassis;
mod power;
mod relations;
mod sensors;
mod sessions;
mod system;

pub use chassis::{Chassis, ChassisStateProvider};
pub use power::HostPower;
pub use relations::Relations;
pub use sensors::Sensors;
pub use sessions::{SessionProvider, Sessions};
pub use system::{
    AssetTagProvider, FirmwareProvider, HostWatchdogProvider, IndicatorLedProvider, PowerRestorePolicyProvider,
    Server,
};

use entity_runtime::{EntityManager, EntityResult};

pub(crate) const HOST_STATE_SERVICE: &str = "xyz.openbmc_project.State.Host";
pub(crate) const HOST_STATE_IFACE: &str = "xyz.openbmc_project.State.Host";
pub(crate) const SETTINGS_SERVICE: &str = "xyz.openbmc_project.Settings";
pub(crate) const ASSET_IFACE: &str = "xyz.openbmc_project.Inventory.Decorator.Asset";
pub(crate) const PLATFORM_IFACE: &str = "com.yadro.Platform";

/// Register the whole catalog
pub fn register_all(manager: &mut EntityManager) -> EntityResult<()> {
    manager.build_entity::<HostPower>()?;

    manager.build_entity::<ChassisStateProvider>()?;
    manager.build_entity::<Chassis>()?;

    manager.build_entity::<Sensors>()?;

    manager.build_entity::<AssetTagProvider>()?;
    manager.build_entity::<IndicatorLedProvider>()?;
    manager.build_entity::<FirmwareProvider>()?;
    manager.build_entity::<HostWatchdogProvider>()?;
    manager.build_entity::<PowerRestorePolicyProvider>()?;
    manager.build_entity::<Server>()?;

    manager.build_entity::<SessionProvider>()?;
    manager.build_entity::<Sessions>()?;

    manager.build_entity::<Relations>()?;

    tracing::info!(entities = manager.len(), "Entity catalog registered");
    Ok(())
}
