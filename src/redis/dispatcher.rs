//! Topology-agnostic asynchronous command dispatch
//!
//! Storage code talks to Redis through [`AsyncCommandDispatcher`]. The
//! factory picks the single-instance or the cluster implementation from the
//! discovered [`DatabaseInfo`].

use super::cluster::ClusterCommandDispatcher;
use super::cluster_client::RedisClusterSystem;
use super::connection::TcpRedisSystem;
use super::contents::{Contents, ContentsBuilder};
use super::reply::Reply;
use super::single::RedisCommandDispatcher;
use super::system::{ClusterSystem, RedisSystem};
use crate::config::DispatcherConfig;
use crate::core::{Connector, DatabaseInfo, DatabaseType, Engine};
use crate::error::{DispatcherError, SdlError, SdlResult};
use std::rc::Rc;
use tracing::debug;

/// Command completion. Errors always come with [`Reply::Nil`].
pub type CommandCb = Box<dyn FnMut(Result<(), DispatcherError>, &Reply)>;

pub type ConnectAck = Box<dyn FnOnce()>;

pub type DisconnectCb = Box<dyn FnMut()>;

/// Connection state as seen by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Disconnected,
    /// Transport is up, capability probe outstanding (single instance only)
    Verifying,
    Connected,
}

pub trait AsyncCommandDispatcher {
    /// Run `ack` once connected. Never runs inline: if already connected the
    /// ack is posted to the engine.
    fn wait_connected_async(&self, ack: ConnectAck);

    /// Run `cb` whenever an established connection is lost
    fn register_disconnect_cb(&self, cb: DisconnectCb);

    /// Submit a command. `ns` selects the cluster slot for cluster backends.
    fn dispatch_async(&self, cb: CommandCb, ns: &str, contents: Contents);

    /// Stop every later callback delivery, including already posted ones
    fn disable_command_callbacks(&self);
}

/// Per-dispatcher behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatcherOptions {
    /// Keep command callbacks registered after a reply (subscriptions)
    pub use_permanent_command_callbacks: bool,
    /// Talk to a Sentinel: skip the capability probe
    pub used_for_sentinel: bool,
}

/// Backend adapters a dispatcher connects through
#[derive(Clone)]
pub struct BackendSystems {
    pub redis: Rc<dyn RedisSystem>,
    pub cluster: Rc<dyn ClusterSystem>,
}

impl BackendSystems {
    /// TCP adapters driven by `engine`
    pub fn tcp(engine: Rc<dyn Engine>, config: &DispatcherConfig) -> Self {
        let connector = Connector::new(config.connect_timeout());
        let redis: Rc<dyn RedisSystem> = Rc::new(TcpRedisSystem::new(engine, connector));
        let cluster: Rc<dyn ClusterSystem> =
            Rc::new(RedisClusterSystem::new(redis.clone(), config.max_redirects));
        Self { redis, cluster }
    }
}

/// Build a dispatcher for the given backend over TCP
pub fn create(
    engine: Rc<dyn Engine>,
    database_info: &DatabaseInfo,
    contents_builder: Rc<ContentsBuilder>,
    options: DispatcherOptions,
    config: &DispatcherConfig,
) -> SdlResult<Rc<dyn AsyncCommandDispatcher>> {
    let systems = BackendSystems::tcp(engine.clone(), config);
    create_with_systems(engine, database_info, contents_builder, options, config, systems)
}

pub fn create_with_systems(
    engine: Rc<dyn Engine>,
    database_info: &DatabaseInfo,
    contents_builder: Rc<ContentsBuilder>,
    options: DispatcherOptions,
    config: &DispatcherConfig,
    systems: BackendSystems,
) -> SdlResult<Rc<dyn AsyncCommandDispatcher>> {
    if database_info.hosts.is_empty() {
        return Err(SdlError::invalid_database_info(
            "database info contains no hosts",
        ));
    }
    debug!("Creating dispatcher for {}", database_info);

    match database_info.db_type {
        DatabaseType::Cluster => Ok(Rc::new(ClusterCommandDispatcher::new(
            engine,
            systems.cluster,
            database_info.hosts.clone(),
            database_info.ns.clone().unwrap_or_default(),
            contents_builder,
            options,
            config.cluster_retry(),
        ))),
        DatabaseType::Single | DatabaseType::Redundant => Ok(Rc::new(RedisCommandDispatcher::new(
            engine,
            systems.redis,
            database_info.hosts[0].clone(),
            contents_builder,
            options,
            config.connection_retry(),
            config.verification_retry(),
        ))),
    }
}
