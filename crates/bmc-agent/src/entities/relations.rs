//! Object relations published by the object mapper

use entity_runtime::query::{IntrospectQuery, PropertyMapping};
use entity_runtime::{EntityBuilder, EntityDefinition, EntityManager, EntityResult, FieldDef, Instance, Refresh};

pub const MAPPER_SERVICE: &str = "xyz.openbmc_project.ObjectMapper";
const ASSOCIATION_IFACE: &str = "xyz.openbmc_project.Association";

fn describe_relation(instance: &mut Instance) {
    if let Some(path) = instance.object_path().map(str::to_string) {
        instance.set("Path", path);
    }
}

/// Association endpoint objects; one instance per relation path
pub struct Relations;

impl EntityDefinition for Relations {
    const NAME: &'static str = "Relations";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let mapping = PropertyMapping::new().map(ASSOCIATION_IFACE, "endpoints", "Endpoints");

        Ok(EntityBuilder::new(Self::NAME)
            .collection()
            .cached(Refresh::once().watched())
            .field(FieldDef::string("Path"))
            .field(FieldDef::list("Endpoints"))
            .query(IntrospectQuery::new(MAPPER_SERVICE, mapping).with_hook(describe_relation)))
    }
}
