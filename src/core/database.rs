//! Discovered backend topology

use super::address::HostAndPort;
use std::fmt;

/// Topology of the backend a dispatcher talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    Single,
    Redundant,
    Cluster,
}

/// How the backend addresses were obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discovery {
    Static,
    Sentinel,
}

/// Backend addresses plus topology, produced by discovery and consumed once
/// when a dispatcher is built.
#[derive(Debug, Clone)]
pub struct DatabaseInfo {
    pub hosts: Vec<HostAndPort>,
    pub db_type: DatabaseType,
    pub ns: Option<String>,
    pub discovery: Discovery,
}

impl DatabaseInfo {
    pub fn new(
        hosts: Vec<HostAndPort>,
        db_type: DatabaseType,
        ns: Option<String>,
        discovery: Discovery,
    ) -> Self {
        Self {
            hosts,
            db_type,
            ns,
            discovery,
        }
    }

    fn sorted_hosts(&self) -> Vec<&HostAndPort> {
        let mut hosts: Vec<&HostAndPort> = self.hosts.iter().collect();
        hosts.sort();
        hosts
    }
}

/// Host order and discovery origin do not affect equality
impl PartialEq for DatabaseInfo {
    fn eq(&self, other: &Self) -> bool {
        self.db_type == other.db_type
            && self.ns == other.ns
            && self.sorted_hosts() == other.sorted_hosts()
    }
}

impl Eq for DatabaseInfo {}

impl fmt::Display for DatabaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<String> = self.hosts.iter().map(|h| h.to_string()).collect();
        write!(f, "{:?} [{}]", self.db_type, hosts.join(","))?;
        if let Some(ns) = &self.ns {
            write!(f, " ns={}", ns)?;
        }
        Ok(())
    }
}
