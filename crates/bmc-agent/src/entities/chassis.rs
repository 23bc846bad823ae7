//! Chassis and its state provider

use entity_runtime::format;
use entity_runtime::query::{DirectQuery, PropertyMapping, SearchCriteria, SearchQuery};
use entity_runtime::{EntityBuilder, EntityDefinition, EntityManager, EntityResult, FieldDef, Refresh};

use super::{ASSET_IFACE, PLATFORM_IFACE};

const CHASSIS_STATE_SERVICE: &str = "xyz.openbmc_project.State.Chassis";
const CHASSIS_STATE_PATH: &str = "/xyz/openbmc_project/state/chassis0";
const CHASSIS_STATE_IFACE: &str = "xyz.openbmc_project.State.Chassis";

/// Power state and last transition time of chassis0
pub struct ChassisStateProvider;

impl EntityDefinition for ChassisStateProvider {
    const NAME: &'static str = "ChassisStateProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let mapping = PropertyMapping::new()
            .map_with(
                CHASSIS_STATE_IFACE,
                "LastStateChangeTime",
                "LastStateChangeTime",
                format::epoch_millis(),
            )
            .map_with(
                CHASSIS_STATE_IFACE,
                "CurrentPowerState",
                "ChassisPowerState",
                format::suffix(),
            );

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .cached(Refresh::once().watched())
            .field(FieldDef::string("LastStateChangeTime"))
            .field(FieldDef::enumeration("ChassisPowerState"))
            .query(DirectQuery::new(CHASSIS_STATE_SERVICE, CHASSIS_STATE_PATH, mapping)))
    }
}

pub struct Chassis;

impl EntityDefinition for Chassis {
    const NAME: &'static str = "Chassis";

    fn declare(manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let state = manager.resolve::<ChassisStateProvider>()?;

        let criteria = SearchCriteria::new("/xyz/openbmc_project/inventory/system/board").require(PLATFORM_IFACE);
        let mapping = PropertyMapping::new()
            .map_with(
                PLATFORM_IFACE,
                "ChassisType",
                "Type",
                format::dictionary([("23", "RackMount")], "Other"),
            )
            .map_with(PLATFORM_IFACE, "ChassisPartNumber", "PartNumber", format::trim())
            .map(ASSET_IFACE, "Manufacturer", "Manufacturer");
        let query = SearchQuery::new(criteria, mapping).with_hook(|instance| instance.set("Name", "MainChassis"));

        Ok(EntityBuilder::new(Self::NAME)
            .cached(Refresh::once().watched())
            .field(FieldDef::string("Name").with_default("MainChassis"))
            .field(FieldDef::enumeration("Type").with_default("Other"))
            .field(FieldDef::string("PartNumber"))
            .field(FieldDef::string("Manufacturer"))
            .query(query)
            .link(state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::testing::{bus_with, manager_for};
    use entity_runtime::Value;

    const BOARD: &str = "/xyz/openbmc_project/inventory/system/board/board0";
    const INVENTORY: &str = "xyz.openbmc_project.Inventory.Manager";

    fn manager(with_state: bool) -> EntityManager {
        let bus = bus_with(|bus| {
            bus.add_object(
                INVENTORY,
                BOARD,
                PLATFORM_IFACE,
                [("ChassisType", "23"), ("ChassisPartNumber", " PN-42 ")],
            );
            bus.add_object(INVENTORY, BOARD, ASSET_IFACE, [("Manufacturer", "YADRO")]);
            if with_state {
                bus.add_object(
                    CHASSIS_STATE_SERVICE,
                    CHASSIS_STATE_PATH,
                    CHASSIS_STATE_IFACE,
                    [
                        ("LastStateChangeTime", Value::UInt(1_600_000_000_500)),
                        (
                            "CurrentPowerState",
                            Value::from("xyz.openbmc_project.State.Chassis.PowerState.On"),
                        ),
                    ],
                );
            }
        });
        let mut manager = manager_for(bus);
        manager.build_entity::<ChassisStateProvider>().unwrap();
        manager.build_entity::<Chassis>().unwrap();
        manager
    }

    #[test]
    fn test_chassis_with_state() {
        let manager = manager(true);
        let chassis = manager.get::<Chassis>().unwrap();

        assert_eq!(chassis.get_string("Name").unwrap(), Some("MainChassis".into()));
        assert_eq!(chassis.get_string("Type").unwrap(), Some("RackMount".into()));
        assert_eq!(chassis.get_string("PartNumber").unwrap(), Some("PN-42".into()));
        assert_eq!(chassis.get_string("Manufacturer").unwrap(), Some("YADRO".into()));
        assert_eq!(
            chassis.get_string("LastStateChangeTime").unwrap(),
            Some("2020-09-13T12:26:40+00:00".into())
        );
        assert_eq!(chassis.get_string("ChassisPowerState").unwrap(), Some("On".into()));
    }

    #[test]
    fn test_chassis_without_state_service() {
        let manager = manager(false);
        let chassis = manager.get::<Chassis>().unwrap();

        assert_eq!(chassis.get_string("Type").unwrap(), Some("RackMount".into()));
        assert_eq!(chassis.get_string("LastStateChangeTime").unwrap(), None);
    }

    #[test]
    fn test_provider_hidden_from_resources() {
        let manager = manager(true);
        assert_eq!(manager.resource_names(), vec!["Chassis"]);
    }
}
