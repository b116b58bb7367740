pub mod config;
pub mod error;
/// shareddatalayer - asynchronous Redis command dispatch for the shared data layer
///
/// Storage code hands commands to an [`AsyncCommandDispatcher`] and gets every
/// reply back through a callback on the same single-threaded event loop.
/// The dispatcher is built from a [`DatabaseInfo`] produced by discovery:
/// 1. Static discovery: addresses straight from configuration
/// 2. Sentinel discovery: the current master, followed across failovers
///
/// Standalone servers and Redis Cluster deployments are both supported.
pub mod core;
pub mod discovery;
pub mod redis;
pub mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub use crate::config::{Config, DbType, DispatcherConfig};
pub use crate::core::{DatabaseInfo, DatabaseType, Discovery, Engine, HostAndPort, TokioEngine};
pub use crate::discovery::{create_discovery, DatabaseDiscovery};
pub use crate::error::{ClientError, DispatcherError, InternalError, SdlError, SdlResult};
pub use crate::redis::{
    AsyncCommandDispatcher, Contents, ContentsBuilder, DispatcherOptions, Reply, ServiceState,
};

/// Key separator between namespace and key
pub const SEPARATOR: char = ',';
