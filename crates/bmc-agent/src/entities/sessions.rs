//! Sessions
//!
//! Session objects are read once into a cached provider; the `Sessions`
//! resource is a lazy proxy over it, so every consumer shares one fetch.

use std::time::Duration;

use entity_runtime::format;
use entity_runtime::query::{PropertyMapping, SearchCriteria, SearchQuery};
use entity_runtime::{EntityBuilder, EntityDefinition, EntityManager, EntityResult, FieldDef, Refresh};

const SESSION_SERVICE: &str = "xyz.openbmc_project.SessionManager";
const SESSION_IFACE: &str = "xyz.openbmc_project.Session.Item";

pub struct SessionProvider;

impl EntityDefinition for SessionProvider {
    const NAME: &'static str = "SessionProvider";

    fn declare(_manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let types = format::suffix_dictionary(
            [
                ("HostConsole", "HostConsole"),
                ("IPMI", "IPMI"),
                ("KVMIP", "KVMIP"),
                ("ManagerConsole", "ManagerConsole"),
                ("Redfish", "Redfish"),
                ("VirtualMedia", "VirtualMedia"),
                ("WebUI", "WebUI"),
                ("NBD", "NBD"),
            ],
            "Unknown",
        );
        let mapping = PropertyMapping::new()
            .map(SESSION_IFACE, "SessionID", "Id")
            .map(SESSION_IFACE, "RemoteIPAddr", "RemoteIPAddr")
            .map(SESSION_IFACE, "Username", "Username")
            .map_with(SESSION_IFACE, "SessionType", "SessionType", types);
        let criteria = SearchCriteria::new("/xyz/openbmc_project/session_manager")
            .require(SESSION_IFACE)
            .owned_by(SESSION_SERVICE);

        Ok(EntityBuilder::new(Self::NAME)
            .provider()
            .collection()
            .cached(Refresh::every(Duration::from_secs(10)).watched())
            .field(FieldDef::string("Id"))
            .field(FieldDef::string("RemoteIPAddr"))
            .field(FieldDef::string("Username"))
            .field(FieldDef::enumeration("SessionType").with_default("Unknown"))
            .query(SearchQuery::new(criteria, mapping)))
    }
}

pub struct Sessions;

impl EntityDefinition for Sessions {
    const NAME: &'static str = "Sessions";

    fn declare(manager: &EntityManager) -> EntityResult<EntityBuilder> {
        let provider = manager.resolve::<SessionProvider>()?;
        Ok(EntityBuilder::new(Self::NAME).collection().lazy().proxy(provider))
    }
}
