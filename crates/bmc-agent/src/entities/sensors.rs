//! Sensors
//!
//! Every object below `/xyz/openbmc_project/sensors` that carries a reading.
//! The path encodes the sensor group (`.../sensors/<group>/<name>`), and the
//! threshold alarms decide each sensor's health status.

use std::time::Duration;

use entity_runtime::bus::path_leaf;
use entity_runtime::format::{self, HealthStatus};
use entity_runtime::query::{PropertyMapping, SearchCriteria, SearchQuery};
use entity_runtime::{EntityBuilder, EntityDefinition, EntityManager, EntityResult, FieldDef, Instance, Refresh};

pub const SENSORS_ROOT: &str = "/xyz/openbmc_project/sensors";

const VALUE_IFACE: &str = "xyz.openbmc_project.Sensor.Value";
const WARNING_IFACE: &str = "xyz.openbmc_project.Sensor.Threshold.Warning";
const CRITICAL_IFACE: &str = "xyz.openbmc_project.Sensor.Threshold.Critical";
const AVAILABILITY_IFACE: &str = "xyz.openbmc_project.State.Decorator.Availability";
const OPERATIONAL_IFACE: &str = "xyz.openbmc_project.State.Decorator.OperationalStatus";

pub const FIELD_STATUS: &str = "Status";

const CRITICAL_ALARMS: [&str; 2] = ["CriticalAlarmHigh", "CriticalAlarmLow"];
const WARNING_ALARMS: [&str; 2] = ["WarningAlarmHigh", "WarningAlarmLow"];

/// Health of one sensor from its alarm flags
pub fn sensor_health(instance: &Instance) -> HealthStatus {
    let raised = |alarms: &[&str]| {
        alarms
            .iter()
            .any(|alarm| instance.get_field(alarm).as_bool() == Some(true))
    };
    if raised(&CRITICAL_ALARMS) {
        HealthStatus::Critical
    } else if raised(&WARNING_ALARMS) {
        HealthStatus::Warning
    } else {
        HealthStatus::OK
    }
}

/// Sensor group encoded in the path, e.g. `temperature`
fn sensor_group(path: &str) -> Option<&str> {
    path.strip_prefix(SENSORS_ROOT)?
        .trim_start_matches('/')
        .split('/')
        .next()
        .filter(|group| !group.is_empty())
}

fn describe_sensor(instance: &mut Instance) {
    let Some(path) = instance.object_path().map(str::to_string) else {
        return;
    };
    let id = path_leaf(&path);
    instance.set("Id", id);
    instance.set("Name", id.replace('_', " "));
    if let Some(group) = sensor_group(&path) {
        instance.set("Group", group);
    }
    let status = sensor_health(instance);
    instance.set(FIELD_STATUS, status.as_str());
}

pub struct Sensors;

impl EntityDefinition for Sensors {
    const NAME: &'static str = "Sensors";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let units = format::suffix_dictionary(
            [
                ("DegreesC", "Cel"),
                ("RPMS", "RPM"),
                ("Volts", "V"),
                ("Amperes", "A"),
                ("Watts", "W"),
                ("Joules", "J"),
                ("Meters", "m"),
                ("Percent", "%"),
            ],
            "Unknown",
        );

        let mut mapping = PropertyMapping::new()
            .map(VALUE_IFACE, "Value", "Reading")
            .map_with(VALUE_IFACE, "Unit", "Unit", units)
            .map(VALUE_IFACE, "MaxValue", "MaxValue")
            .map(VALUE_IFACE, "MinValue", "MinValue")
            .map(WARNING_IFACE, "WarningLow", "LowWarning")
            .map(WARNING_IFACE, "WarningHigh", "HighWarning")
            .map(CRITICAL_IFACE, "CriticalLow", "LowCritical")
            .map(CRITICAL_IFACE, "CriticalHigh", "HighCritical")
            .map(AVAILABILITY_IFACE, "Available", "Available")
            .map(OPERATIONAL_IFACE, "Functional", "Functional");
        for alarm in WARNING_ALARMS {
            mapping = mapping.map(WARNING_IFACE, alarm, alarm);
        }
        for alarm in CRITICAL_ALARMS {
            mapping = mapping.map(CRITICAL_IFACE, alarm, alarm);
        }

        let criteria = SearchCriteria::new(SENSORS_ROOT).require(VALUE_IFACE).subtree();

        let mut builder = EntityBuilder::new(Self::NAME)
            .collection()
            .cached(Refresh::every(Duration::from_secs(5)).watched())
            .field(FieldDef::string("Id"))
            .field(FieldDef::string("Name"))
            .field(FieldDef::enumeration("Group").with_default("sensors"))
            .field(FieldDef::float("Reading").with_default(0.0))
            .field(FieldDef::enumeration("Unit").with_default("Unknown"))
            .field(FieldDef::enumeration(FIELD_STATUS).with_default(HealthStatus::OK.as_str()))
            .field(FieldDef::boolean("Available").with_default(false))
            .field(FieldDef::boolean("Functional").with_default(false));
        for field in ["MaxValue", "MinValue", "LowWarning", "HighWarning", "LowCritical", "HighCritical"] {
            builder = builder.field(FieldDef::float(field).with_default(0.0));
        }
        for alarm in WARNING_ALARMS.into_iter().chain(CRITICAL_ALARMS) {
            builder = builder.field(FieldDef::boolean(alarm).with_default(false));
        }

        Ok(builder.query(SearchQuery::new(criteria, mapping).with_hook(describe_sensor)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::testing::{bus_with, manager_for};
    use entity_runtime::Value;

    const HWMON: &str = "xyz.openbmc_project.Hwmon";

    fn manager() -> EntityManager {
        let bus = bus_with(|bus| {
            let cpu = "/xyz/openbmc_project/sensors/temperature/CPU0_Temp";
            bus.add_object(
                HWMON,
                cpu,
                VALUE_IFACE,
                [
                    ("Value", Value::Float(71.5)),
                    ("Unit", Value::from("xyz.openbmc_project.Sensor.Value.Unit.DegreesC")),
                ],
            );
            bus.add_object(
                HWMON,
                cpu,
                WARNING_IFACE,
                [
                    ("WarningHigh", Value::Float(70.0)),
                    ("WarningAlarmHigh", Value::Bool(true)),
                    ("WarningAlarmLow", Value::Bool(false)),
                ],
            );

            let fan = "/xyz/openbmc_project/sensors/fan_tach/Fan0";
            bus.add_object(
                HWMON,
                fan,
                VALUE_IFACE,
                [
                    ("Value", Value::Int(5200)),
                    ("Unit", Value::from("xyz.openbmc_project.Sensor.Value.Unit.RPMS")),
                ],
            );
            bus.add_object(HWMON, fan, AVAILABILITY_IFACE, [("Available", true)]);

            bus.add_object(HWMON, "/xyz/openbmc_project/sensors/notes", "xyz.Other", [("A", 1)]);
        });
        let mut manager = manager_for(bus);
        manager.build_entity::<Sensors>().unwrap();
        manager
    }

    #[test]
    fn test_sensor_group() {
        assert_eq!(sensor_group("/xyz/openbmc_project/sensors/voltage/P12V"), Some("voltage"));
        assert_eq!(sensor_group("/xyz/openbmc_project/sensors"), None);
        assert_eq!(sensor_group("/xyz/openbmc_project/state/host0"), None);
    }

    #[test]
    fn test_health_from_alarms() {
        let critical = Instance::new().with("CriticalAlarmLow", true).with("WarningAlarmHigh", true);
        assert_eq!(sensor_health(&critical), HealthStatus::Critical);
        let warning = Instance::new().with("WarningAlarmHigh", true);
        assert_eq!(sensor_health(&warning), HealthStatus::Warning);
        assert_eq!(sensor_health(&Instance::new()), HealthStatus::OK);
    }

    #[test]
    fn test_sensor_collection() {
        let manager = manager();
        let sensors = manager.get::<Sensors>().unwrap().instances();
        assert_eq!(sensors.len(), 2);

        let fan = sensors.iter().find(|s| s.get_field("Id") == &Value::from("Fan0")).unwrap();
        assert_eq!(fan.get_field("Group"), &Value::from("fan_tach"));
        assert_eq!(fan.get_field("Unit"), &Value::from("RPM"));
        assert_eq!(fan.get_field("Available"), &Value::Bool(true));
        assert_eq!(fan.get_field("Functional"), &Value::Bool(false));
        assert_eq!(fan.get_field(FIELD_STATUS), &Value::from("OK"));
        assert_eq!(fan.get_field("HighCritical"), &Value::Float(0.0));

        let cpu = sensors.iter().find(|s| s.get_field("Id") == &Value::from("CPU0_Temp")).unwrap();
        assert_eq!(cpu.get_field("Name"), &Value::from("CPU0 Temp"));
        assert_eq!(cpu.get_field("Unit"), &Value::from("Cel"));
        assert_eq!(cpu.get_f64("Reading").unwrap(), Some(71.5));
        assert_eq!(cpu.get_field(FIELD_STATUS), &Value::from("Warning"));
    }
}
