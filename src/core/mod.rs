//! Core building blocks: addresses, topology, event loop and TCP connect

pub mod address;
pub mod connection;
pub mod database;
pub mod engine;
pub mod timer;

pub use address::{AddressError, HostAndPort, DEFAULT_PORT, DEFAULT_SENTINEL_PORT};
pub use connection::{ConnectionResult, Connector};
pub use database::{DatabaseInfo, DatabaseType, Discovery};
pub use engine::{Callback, Engine, TaskId, TimerId, TokioEngine};
pub use timer::Timer;
