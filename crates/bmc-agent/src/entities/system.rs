//! Server (computer system)
//!
//! The base record comes from the chassis inventory item. Everything else is
//! supplemented by providers, each of which is shared and cached on its own:
//! asset tag, identify LED, firmware versions, host watchdog, power restore
//! policy, and the health rollup over all sensors.

use entity_runtime::bus::path_leaf;
use entity_runtime::format::{self, HealthStatus};
use entity_runtime::query::{DirectQuery, PropertyMapping, SearchCriteria, SearchQuery};
use entity_runtime::{
    EntityBuilder, EntityDefinition, EntityManager, EntityResult, FieldDef, Instance, Refresh, Value,
};

use super::sensors::{self, Sensors};
use super::{ASSET_IFACE, SETTINGS_SERVICE};

const CHASSIS_ITEM_IFACE: &str = "xyz.openbmc_project.Inventory.Item.Chassis";
const SYSTEM_ITEM_IFACE: &str = "xyz.openbmc_project.Inventory.Item.System";
const ASSET_TAG_IFACE: &str = "xyz.openbmc_project.Inventory.Decorator.AssetTag";

const LED_SERVICE: &str = "xyz.openbmc_project.LED.GroupManager";
const LED_GROUP_IFACE: &str = "xyz.openbmc_project.Led.Group";
const IDENTIFY_LEDS: [&str; 2] = [
    "/xyz/openbmc_project/led/groups/enclosure_identify",
    "/xyz/openbmc_project/led/groups/enclosure_identify_blink",
];

const VERSION_IFACE: &str = "xyz.openbmc_project.Software.Version";

const WATCHDOG_SERVICE: &str = "xyz.openbmc_project.Watchdog";
const WATCHDOG_PATH: &str = "/xyz/openbmc_project/watchdog/host0";
const WATCHDOG_IFACE: &str = "xyz.openbmc_project.State.Watchdog";

const RESTORE_POLICY_PATH: &str = "/xyz/openbmc_project/control/host0/power_restore_policy";
const RESTORE_POLICY_IFACE: &str = "xyz.openbmc_project.Control.Power.RestorePolicy";

pub const FIELD_INDICATOR_LED: &str = "IndicatorLed";
pub const FIELD_BMC_VERSION: &str = "BmcVersion";
pub const FIELD_BIOS_VERSION: &str = "BiosVersion";
pub const FIELD_STATUS: &str = "Status";

// ─────────────────────────────────────────────────────────────────────────────
// Providers
// ─────────────────────────────────────────────────────────────────────────────

pub struct AssetTagProvider;

impl EntityDefinition for AssetTagProvider {
    const NAME: &'static str = "AssetTagProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let criteria = SearchCriteria::new("/xyz/openbmc_project/inventory")
            .require(ASSET_TAG_IFACE)
            .require(SYSTEM_ITEM_IFACE)
            .subtree();

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .field(FieldDef::string("AssetTag"))
            .query(SearchQuery::new(
                criteria,
                PropertyMapping::new().map(ASSET_TAG_IFACE, "AssetTag", "AssetTag"),
            )))
    }
}

/// State of every LED group
pub struct IndicatorLedProvider;

impl EntityDefinition for IndicatorLedProvider {
    const NAME: &'static str = "IndicatorLedProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let criteria = SearchCriteria::new("/xyz/openbmc_project/led/groups")
            .require(LED_GROUP_IFACE)
            .owned_by(LED_SERVICE);

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .collection()
            .field(FieldDef::boolean("Asserted").with_default(false))
            .query(SearchQuery::new(
                criteria,
                PropertyMapping::new().map(LED_GROUP_IFACE, "Asserted", "Asserted"),
            )))
    }
}

/// Versions of every installed firmware image
pub struct FirmwareProvider;

impl EntityDefinition for FirmwareProvider {
    const NAME: &'static str = "FirmwareProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let criteria = SearchCriteria::new("/xyz/openbmc_project/software").require(VERSION_IFACE);
        let mapping = PropertyMapping::new()
            .map(VERSION_IFACE, "Version", "Version")
            .map_with(VERSION_IFACE, "Purpose", "Purpose", format::suffix());

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .collection()
            .field(FieldDef::string("Version"))
            .field(FieldDef::enumeration("Purpose"))
            .query(SearchQuery::new(criteria, mapping)))
    }
}

pub struct HostWatchdogProvider;

impl EntityDefinition for HostWatchdogProvider {
    const NAME: &'static str = "HostWatchdogProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let actions = format::suffix_dictionary(
            [
                ("None", "None"),
                ("HardReset", "ResetSystem"),
                ("PowerOff", "PowerDown"),
                ("PowerCycle", "PowerCycle"),
            ],
            "None",
        );
        let mapping = PropertyMapping::new()
            .map(WATCHDOG_IFACE, "Enabled", "WatchdogEnabled")
            .map_with(WATCHDOG_IFACE, "ExpireAction", "WatchdogAction", actions);

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .field(FieldDef::boolean("WatchdogEnabled").with_default(false))
            .field(FieldDef::enumeration("WatchdogAction").with_default("None"))
            .query(DirectQuery::new(WATCHDOG_SERVICE, WATCHDOG_PATH, mapping)))
    }
}

pub struct PowerRestorePolicyProvider;

impl EntityDefinition for PowerRestorePolicyProvider {
    const NAME: &'static str = "PowerRestorePolicyProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let policies = format::suffix_dictionary(
            [("AlwaysOn", "AlwaysOn"), ("AlwaysOff", "AlwaysOff"), ("Restore", "LastState")],
            "LastState",
        );
        let mapping = PropertyMapping::new().map_with(
            RESTORE_POLICY_IFACE,
            "PowerRestorePolicy",
            "PowerRestorePolicy",
            policies,
        );

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .field(FieldDef::enumeration("PowerRestorePolicy").with_default("LastState"))
            .query(DirectQuery::new(SETTINGS_SERVICE, RESTORE_POLICY_PATH, mapping)))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Link Rules
// ─────────────────────────────────────────────────────────────────────────────

/// Only an asserted identify group lights the indicator; off is the default
fn link_indicator_led(led: &Instance, target: &mut Instance) {
    let is_identify = led
        .object_path()
        .is_some_and(|path| IDENTIFY_LEDS.contains(&path));
    if is_identify && led.get_field("Asserted").as_bool() == Some(true) {
        target.set(FIELD_INDICATOR_LED, true);
    }
}

fn link_firmware(image: &Instance, target: &mut Instance) {
    let field = match image.get_field("Purpose").as_str() {
        Some("BMC") => FIELD_BMC_VERSION,
        Some("Host") => FIELD_BIOS_VERSION,
        _ => return,
    };
    if let Value::String(version) = image.get_field("Version") {
        target.set(field, version.clone());
    }
}

/// Keep the most severe status seen so far
fn link_status_rollup(sensor: &Instance, target: &mut Instance) {
    let rolled = HealthStatus::highest([target.get_field(FIELD_STATUS), sensor.get_field(sensors::FIELD_STATUS)]);
    target.set(FIELD_STATUS, rolled.as_str());
}

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

fn describe_server(instance: &mut Instance) {
    if let Some(name) = instance.object_path().map(|path| path_leaf(path).to_string()) {
        instance.set("Name", name);
    }
    instance.set("ServiceName", "system");
    instance.set("State", "Enabled");
}

pub struct Server;

impl EntityDefinition for Server {
    const NAME: &'static str = "Server";

    fn declare(manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let criteria = SearchCriteria::new("/xyz/openbmc_project/inventory/system/chassis").require(CHASSIS_ITEM_IFACE);
        let mapping = PropertyMapping::new()
            .map(ASSET_IFACE, "Manufacturer", "Manufacturer")
            .map_with(ASSET_IFACE, "Model", "Model", format::trim())
            .map_with(ASSET_IFACE, "PartNumber", "PartNumber", format::trim())
            .map_with(ASSET_IFACE, "SerialNumber", "SerialNumber", format::trim());

        let mut builder = EntityBuilder::new(Self::NAME)
            .cached(Refresh::every(std::time::Duration::from_secs(30)).watched())
            .field(FieldDef::string("ServiceName"))
            .field(FieldDef::string("Name"))
            .field(FieldDef::enumeration("State").with_default("Enabled"))
            .field(FieldDef::boolean(FIELD_INDICATOR_LED).with_default(false))
            .field(FieldDef::enumeration(FIELD_STATUS).with_default(HealthStatus::OK.as_str()));
        for field in ["Manufacturer", "Model", "PartNumber", "SerialNumber", FIELD_BMC_VERSION, FIELD_BIOS_VERSION] {
            builder = builder.field(FieldDef::string(field));
        }

        Ok(builder
            .query(SearchQuery::new(criteria, mapping).with_hook(describe_server))
            .link(manager.resolve::<AssetTagProvider>()?)
            .link(manager.resolve::<HostWatchdogProvider>()?)
            .link(manager.resolve::<PowerRestorePolicyProvider>()?)
            .link_with(manager.resolve::<IndicatorLedProvider>()?, link_indicator_led)
            .link_with(manager.resolve::<FirmwareProvider>()?, link_firmware)
            .link_with(manager.resolve::<Sensors>()?, link_status_rollup))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::testing::{bus_with, manager_for};
    use entity_runtime::bus::MemoryBus;

    const INVENTORY: &str = "xyz.openbmc_project.Inventory.Manager";
    const CHASSIS: &str = "/xyz/openbmc_project/inventory/system/chassis/R2";

    fn populate(bus: &MemoryBus) {
        bus.add_object(INVENTORY, CHASSIS, CHASSIS_ITEM_IFACE, [("Type", "RackMount")]);
        bus.add_object(
            INVENTORY,
            CHASSIS,
            ASSET_IFACE,
            [("Manufacturer", "YADRO"), ("Model", "VEGMAN R220 "), ("SerialNumber", "SN0001\0")],
        );
        bus.add_object(
            INVENTORY,
            "/xyz/openbmc_project/inventory/system",
            SYSTEM_ITEM_IFACE,
            Vec::<(&str, Value)>::new(),
        );
        bus.add_object(
            INVENTORY,
            "/xyz/openbmc_project/inventory/system",
            ASSET_TAG_IFACE,
            [("AssetTag", "rack-7")],
        );

        bus.add_object(
            LED_SERVICE,
            "/xyz/openbmc_project/led/groups/enclosure_identify",
            LED_GROUP_IFACE,
            [("Asserted", true)],
        );
        bus.add_object(
            LED_SERVICE,
            "/xyz/openbmc_project/led/groups/power_on",
            LED_GROUP_IFACE,
            [("Asserted", true)],
        );

        for (id, version, purpose) in [("bmc_active", "2.14.0", "BMC"), ("bios_active", "1.07", "Host")] {
            bus.add_object(
                "xyz.openbmc_project.Software.BMC.Updater",
                &format!("/xyz/openbmc_project/software/{}", id),
                VERSION_IFACE,
                [
                    ("Version", version.to_string()),
                    ("Purpose", format!("xyz.openbmc_project.Software.Version.VersionPurpose.{}", purpose)),
                ],
            );
        }

        bus.add_object(
            WATCHDOG_SERVICE,
            WATCHDOG_PATH,
            WATCHDOG_IFACE,
            [
                ("Enabled", Value::Bool(true)),
                ("ExpireAction", Value::from("xyz.openbmc_project.State.Watchdog.Action.PowerCycle")),
            ],
        );
        bus.add_object(
            SETTINGS_SERVICE,
            RESTORE_POLICY_PATH,
            RESTORE_POLICY_IFACE,
            [("PowerRestorePolicy", "xyz.openbmc_project.Control.Power.RestorePolicy.Policy.AlwaysOn")],
        );

        bus.add_object(
            "xyz.openbmc_project.Hwmon",
            "/xyz/openbmc_project/sensors/voltage/P12V",
            "xyz.openbmc_project.Sensor.Value",
            [("Value", 12.1)],
        );
        bus.add_object(
            "xyz.openbmc_project.Hwmon",
            "/xyz/openbmc_project/sensors/voltage/P12V",
            "xyz.openbmc_project.Sensor.Threshold.Critical",
            [("CriticalAlarmHigh", true)],
        );
    }

    fn manager(bus: std::sync::Arc<MemoryBus>) -> EntityManager {
        let mut manager = manager_for(bus);
        crate::entities::register_all(&mut manager).unwrap();
        manager
    }

    #[test]
    fn test_server_supplemented_by_providers() {
        let manager = manager(bus_with(populate));
        let server = manager.get::<Server>().unwrap();

        assert_eq!(server.get_string("Name").unwrap(), Some("R2".into()));
        assert_eq!(server.get_string("ServiceName").unwrap(), Some("system".into()));
        assert_eq!(server.get_string("Model").unwrap(), Some("VEGMAN R220".into()));
        assert_eq!(server.get_string("SerialNumber").unwrap(), Some("SN0001".into()));
        assert_eq!(server.get_string("AssetTag").unwrap(), Some("rack-7".into()));
        assert_eq!(server.get_bool(FIELD_INDICATOR_LED).unwrap(), Some(true));
        assert_eq!(server.get_string(FIELD_BMC_VERSION).unwrap(), Some("2.14.0".into()));
        assert_eq!(server.get_string(FIELD_BIOS_VERSION).unwrap(), Some("1.07".into()));
        assert_eq!(server.get_bool("WatchdogEnabled").unwrap(), Some(true));
        assert_eq!(server.get_string("WatchdogAction").unwrap(), Some("PowerCycle".into()));
        assert_eq!(server.get_string("PowerRestorePolicy").unwrap(), Some("AlwaysOn".into()));
        assert_eq!(server.get_string(FIELD_STATUS).unwrap(), Some("Critical".into()));
    }

    #[test]
    fn test_server_defaults_without_providers() {
        let bus = bus_with(|bus| {
            bus.add_object(INVENTORY, CHASSIS, CHASSIS_ITEM_IFACE, [("Type", "RackMount")]);
        });
        let manager = manager(bus);
        let server = manager.get::<Server>().unwrap();

        assert_eq!(server.get_bool(FIELD_INDICATOR_LED).unwrap(), Some(false));
        assert_eq!(server.get_string(FIELD_STATUS).unwrap(), Some("OK".into()));
        assert_eq!(server.get_string("PowerRestorePolicy").unwrap(), Some("LastState".into()));
        assert_eq!(server.get_bool("WatchdogEnabled").unwrap(), Some(false));
        assert_eq!(server.get_string("AssetTag").unwrap(), None);
        assert_eq!(server.get_string("State").unwrap(), Some("Enabled".into()));
    }

    #[test]
    fn test_link_indicator_led_ignores_other_groups() {
        let mut target = Instance::new();
        let power_on = Instance::with_origin("/xyz/openbmc_project/led/groups/power_on", LED_SERVICE)
            .with("Asserted", true);
        link_indicator_led(&power_on, &mut target);
        assert!(!target.has_field(FIELD_INDICATOR_LED));

        let identify = Instance::with_origin(IDENTIFY_LEDS[1], LED_SERVICE).with("Asserted", true);
        link_indicator_led(&identify, &mut target);
        assert_eq!(target.get_field(FIELD_INDICATOR_LED), &Value::Bool(true));
    }

    #[test]
    fn test_status_rollup_keeps_highest() {
        let mut target = Instance::new();
        for status in ["OK", "Warning", "OK"] {
            link_status_rollup(&Instance::new().with(sensors::FIELD_STATUS, status), &mut target);
        }
        assert_eq!(target.get_field(FIELD_STATUS), &Value::from("Warning"));
    }
}
