//! Host power

use entity_runtime::format::enum_suffix;
use entity_runtime::query::{PropertyMapping, SearchCriteria, SearchQuery};
use entity_runtime::{EntityBuilder, EntityDefinition, EntityManager, EntityResult, FieldDef, Instance, Refresh};

use super::{HOST_STATE_IFACE, HOST_STATE_SERVICE};

pub const FIELD_POWER_STATE: &str = "PowerState";
pub const FIELD_STATUS: &str = "Status";

/// Raw host state, consumed by the derivation hook
const RAW_HOST_STATE: &str = "__meta_field__host_state";

/// Map a `HostState` enum suffix to `(PowerState, Status)`
pub fn host_power(state: &str) -> (&'static str, &'static str) {
    match state {
        "Running" => ("On", "Enabled"),
        "Quiesced" => ("On", "Quiesced"),
        "DiagnosticMode" => ("On", "InTest"),
        _ => ("Off", "Disabled"),
    }
}

fn derive_power(instance: &mut Instance) {
    let raw = instance.remove(RAW_HOST_STATE);
    let suffix = raw
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(enum_suffix)
        .unwrap_or_default();
    let (state, status) = host_power(suffix);
    tracing::debug!(host_state = %suffix, power = state, "Host power state derived");
    instance.set(FIELD_POWER_STATE, state);
    instance.set(FIELD_STATUS, status);
}

pub struct HostPower;

impl EntityDefinition for HostPower {
    const NAME: &'static str = "HostPower";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let criteria = SearchCriteria::new("/xyz/openbmc_project/state")
            .require(HOST_STATE_IFACE)
            .owned_by(HOST_STATE_SERVICE);
        let mapping = PropertyMapping::new().map(HOST_STATE_IFACE, "CurrentHostState", RAW_HOST_STATE);

        Ok(EntityBuilder::new(Self::NAME)
            .cached(Refresh::once().watched())
            .field(FieldDef::enumeration(FIELD_POWER_STATE).with_default("Off"))
            .field(FieldDef::enumeration(FIELD_STATUS).with_default("Disabled"))
            .query(SearchQuery::new(criteria, mapping).with_hook(derive_power)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::testing::{bus_with, manager_for};

    const HOST0: &str = "/xyz/openbmc_project/state/host0";

    #[test]
    fn test_host_power_table() {
        assert_eq!(host_power("Running"), ("On", "Enabled"));
        assert_eq!(host_power("Quiesced"), ("On", "Quiesced"));
        assert_eq!(host_power("DiagnosticMode"), ("On", "InTest"));
        assert_eq!(host_power("Off"), ("Off", "Disabled"));
        assert_eq!(host_power("TransitioningToOff"), ("Off", "Disabled"));
    }

    fn power_with(state: &str) -> (Option<String>, Option<String>) {
        let bus = bus_with(|bus| {
            bus.add_object(
                HOST_STATE_SERVICE,
                HOST0,
                HOST_STATE_IFACE,
                [("CurrentHostState", format!("xyz.openbmc_project.State.Host.HostState.{}", state))],
            );
        });
        let mut manager = manager_for(bus);
        manager.build_entity::<HostPower>().unwrap();

        let power = manager.get::<HostPower>().unwrap();
        (
            power.get_string(FIELD_POWER_STATE).unwrap(),
            power.get_string(FIELD_STATUS).unwrap(),
        )
    }

    #[test]
    fn test_running_host() {
        assert_eq!(power_with("Running"), (Some("On".into()), Some("Enabled".into())));
    }

    #[test]
    fn test_unknown_state_is_off() {
        assert_eq!(power_with("Bogus"), (Some("Off".into()), Some("Disabled".into())));
    }

    #[test]
    fn test_raw_state_not_rendered() {
        let bus = bus_with(|bus| {
            bus.add_object(
                HOST_STATE_SERVICE,
                HOST0,
                HOST_STATE_IFACE,
                [("CurrentHostState", "xyz.openbmc_project.State.Host.HostState.Quiesced")],
            );
        });
        let mut manager = manager_for(bus);
        manager.build_entity::<HostPower>().unwrap();

        let power = manager.get::<HostPower>().unwrap();
        let instances = power.instances();
        let json = instances[0].to_json();
        assert_eq!(json["PowerState"], "On");
        assert_eq!(json["Status"], "Quiesced");
        assert_eq!(json.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_missing_host_defaults_off() {
        let mut manager = manager_for(bus_with(|_| {}));
        manager.build_entity::<HostPower>().unwrap();

        let power = manager.get::<HostPower>().unwrap();
        assert!(power.instances().is_empty());
        assert_eq!(power.get_string(FIELD_POWER_STATE).unwrap(), Some("Off".into()));
    }
}
