/// Database discovery: where the backend for a namespace lives
pub mod configured;
pub mod sentinel;

pub use configured::ConfiguredDiscovery;
pub use sentinel::SentinelDiscovery;

use crate::config::{DatabaseConfig, DbType, DispatcherConfig};
use crate::core::{DatabaseInfo, DatabaseType, Engine};
use crate::error::{SdlError, SdlResult};
use crate::redis::{BackendSystems, ContentsBuilder};
use crate::utils::crc32;
use std::rc::Rc;

/// Receives every newly discovered backend
pub type StateChangedCb = Box<dyn FnMut(&DatabaseInfo)>;

/// Source of [`DatabaseInfo`] updates
pub trait DatabaseDiscovery {
    /// Start reporting. The first report never arrives inline.
    fn set_state_changed_cb(&self, cb: StateChangedCb);

    fn clear_state_changed_cb(&self);
}

/// Address a namespace is pinned to when namespaces are spread over servers
pub fn address_index_for_namespace(ns: &str, address_count: usize) -> usize {
    if address_count == 0 {
        return 0;
    }
    (crc32(ns.as_bytes()) as usize) % address_count
}

/// Address index to use for `ns`, if the deployment spreads namespaces
pub fn address_index(database: &DatabaseConfig, ns: &str) -> Option<usize> {
    database
        .db_type
        .is_sdl_cluster()
        .then(|| address_index_for_namespace(ns, database.address_count()))
}

/// Build the discovery matching the configured deployment, over TCP
pub fn create_discovery(
    engine: Rc<dyn Engine>,
    ns: &str,
    database: &DatabaseConfig,
    address_index: Option<usize>,
    dispatcher_config: &DispatcherConfig,
) -> SdlResult<Rc<dyn DatabaseDiscovery>> {
    let systems = BackendSystems::tcp(engine.clone(), dispatcher_config);
    create_discovery_with_systems(engine, ns, database, address_index, dispatcher_config, systems)
}

pub fn create_discovery_with_systems(
    engine: Rc<dyn Engine>,
    ns: &str,
    database: &DatabaseConfig,
    address_index: Option<usize>,
    dispatcher_config: &DispatcherConfig,
    systems: BackendSystems,
) -> SdlResult<Rc<dyn DatabaseDiscovery>> {
    let mut servers = database.server_addresses()?;
    if let Some(index) = address_index {
        if index >= servers.len() {
            return Err(SdlError::invalid_database_info(format!(
                "address index {} out of range, {} servers configured",
                index,
                servers.len()
            )));
        }
        servers = vec![servers.swap_remove(index)];
    }

    match database.db_type {
        DbType::RedisStandalone | DbType::SdlStandaloneCluster => Ok(Rc::new(
            ConfiguredDiscovery::new(engine, Some(ns.to_string()), DatabaseType::Single, servers),
        )),
        DbType::RedisCluster => Ok(Rc::new(ConfiguredDiscovery::new(
            engine,
            Some(ns.to_string()),
            DatabaseType::Cluster,
            servers,
        ))),
        DbType::RedisSentinel | DbType::SdlSentinelCluster => {
            let index = address_index.unwrap_or(0);
            let sentinel = database.sentinel_address(index)?.ok_or_else(|| {
                SdlError::invalid_database_info("no server to derive the sentinel address from")
            })?;
            Ok(Rc::new(SentinelDiscovery::new(
                engine,
                sentinel,
                database.sentinel_master_name(index),
                Rc::new(ContentsBuilder::default()),
                dispatcher_config,
                systems,
            )?))
        }
    }
}
