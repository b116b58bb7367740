/// Redis cluster slot ownership
use crate::core::{HostAndPort, DEFAULT_PORT};
use crate::utils::CLUSTER_SLOTS;
use fnv::FnvHashMap;

/// Redis cluster slot mapping (0-16383)
#[derive(Debug, Clone, Default)]
pub struct SlotMap {
    /// Maps slot number to the owning master
    slot_to_node: FnvHashMap<u16, HostAndPort>,
    /// Maps each master to its slot ranges
    node_to_slots: FnvHashMap<HostAndPort, Vec<SlotRange>>,
}

/// Represents a range of slots assigned to a node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
}

impl SlotRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, slot: u16) -> bool {
        slot >= self.start && slot <= self.end
    }

    pub fn size(&self) -> u16 {
        self.end - self.start + 1
    }

    fn parse(spec: &str) -> Result<Self, SlotParseError> {
        let invalid = || SlotParseError::InvalidRange(spec.to_string());
        let (start, end) = match spec.split_once('-') {
            Some((start, end)) => (
                start.parse::<u16>().map_err(|_| invalid())?,
                end.parse::<u16>().map_err(|_| invalid())?,
            ),
            None => {
                let slot = spec.parse::<u16>().map_err(|_| invalid())?;
                (slot, slot)
            }
        };
        if start > end || end >= CLUSTER_SLOTS {
            return Err(invalid());
        }
        Ok(Self::new(start, end))
    }
}

impl SlotMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a range of slots to a node, taking them from any previous owner
    pub fn assign_slots(&mut self, node: HostAndPort, slot_range: SlotRange) {
        for slot in slot_range.start..=slot_range.end {
            if let Some(old_node) = self.slot_to_node.insert(slot, node.clone()) {
                if let Some(ranges) = self.node_to_slots.get_mut(&old_node) {
                    Self::carve_slot(ranges, slot);
                    if ranges.is_empty() {
                        self.node_to_slots.remove(&old_node);
                    }
                }
            }
        }

        self.node_to_slots.entry(node).or_default().push(slot_range);
    }

    /// Remove one slot from a range list, splitting the range holding it
    fn carve_slot(ranges: &mut Vec<SlotRange>, slot: u16) {
        let Some(index) = ranges.iter().position(|r| r.contains(slot)) else {
            return;
        };
        let range = ranges.remove(index);
        if range.start < slot {
            ranges.push(SlotRange::new(range.start, slot - 1));
        }
        if slot < range.end {
            ranges.push(SlotRange::new(slot + 1, range.end));
        }
    }

    /// Owner of a slot
    pub fn node_for_slot(&self, slot: u16) -> Option<&HostAndPort> {
        self.slot_to_node.get(&slot)
    }

    pub fn slots_for_node(&self, node: &HostAndPort) -> Option<&Vec<SlotRange>> {
        self.node_to_slots.get(node)
    }

    /// Remove all slots assigned to a node
    pub fn remove_node(&mut self, node: &HostAndPort) {
        if let Some(ranges) = self.node_to_slots.remove(node) {
            for range in ranges {
                for slot in range.start..=range.end {
                    self.slot_to_node.remove(&slot);
                }
            }
        }
    }

    /// Check if all slots (0-16383) are assigned
    pub fn is_complete(&self) -> bool {
        self.slot_to_node.len() == CLUSTER_SLOTS as usize
    }

    pub fn is_empty(&self) -> bool {
        self.slot_to_node.is_empty()
    }

    /// Get coverage statistics
    pub fn coverage(&self) -> SlotCoverage {
        let assigned_slots = self.slot_to_node.len() as u16;
        let coverage_percentage = (assigned_slots as f64 / CLUSTER_SLOTS as f64) * 100.0;
        let node_distribution = self
            .node_to_slots
            .iter()
            .map(|(node, ranges)| (node.clone(), ranges.iter().map(|r| r.size()).sum()))
            .collect();

        SlotCoverage {
            assigned_slots,
            total_slots: CLUSTER_SLOTS,
            coverage_percentage,
            node_distribution,
        }
    }

    /// Replace the mapping with the one described by a CLUSTER NODES reply.
    /// The map is left untouched if the reply is malformed.
    pub fn update_from_cluster_nodes(&mut self, cluster_nodes: &str) -> Result<(), SlotParseError> {
        let mut updated = SlotMap::new();

        for line in cluster_nodes.lines() {
            if line.trim().is_empty() {
                continue;
            }

            let parts: Vec<&str> = line.split_whitespace().collect();
            if parts.len() < 8 {
                return Err(SlotParseError::InvalidFormat(line.to_string()));
            }

            let address_port = parts[1];
            let flags = parts[2];

            // Replicas, failed nodes and nodes without an address own no slots
            if flags.contains("slave") || flags.contains("fail") || flags.contains("noaddr") {
                continue;
            }

            let address = address_port
                .split(|c| c == '@' || c == ',')
                .next()
                .unwrap_or(address_port);
            let Ok(node) = HostAndPort::parse(address, DEFAULT_PORT) else {
                continue;
            };

            // Slot specs start at index 8; migration markers are bracketed
            for slot_spec in parts[8..].iter().filter(|s| !s.starts_with('[')) {
                updated.assign_slots(node.clone(), SlotRange::parse(slot_spec)?);
            }
        }

        *self = updated;
        Ok(())
    }

    /// Nodes that have slots assigned
    pub fn active_nodes(&self) -> Vec<HostAndPort> {
        self.node_to_slots.keys().cloned().collect()
    }

    /// Find which slots are not assigned to any node
    pub fn missing_slots(&self) -> Vec<u16> {
        (0..CLUSTER_SLOTS)
            .filter(|slot| !self.slot_to_node.contains_key(slot))
            .collect()
    }
}

/// Statistics about slot coverage
#[derive(Debug, Clone)]
pub struct SlotCoverage {
    pub assigned_slots: u16,
    pub total_slots: u16,
    pub coverage_percentage: f64,
    pub node_distribution: FnvHashMap<HostAndPort, u16>,
}

/// Error type for slot parsing
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SlotParseError {
    #[error("Invalid cluster nodes line: {0}")]
    InvalidFormat(String),
    #[error("Invalid slot range: {0}")]
    InvalidRange(String),
}

#[cfg(test)]
pub(crate) const CLUSTER_NODES_SAMPLE: &str = r#"
07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30004@31004 slave e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 0 1426238317239 4 connected
67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 127.0.0.1:30002@31002 master - 0 1426238316232 2 connected 5461-10922
292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 127.0.0.1:30003@31003 master - 0 1426238318243 3 connected 10923-16383
6ec23923021cf3ffec47632106199cb7f496ce01 127.0.0.1:30005@31005 slave 67ed2db8d677e59ec4a4cefb06858cf2a1a89fa1 0 1426238316232 5 connected
824fe116063bc5fcf9f4ffd395bc17adf3a3a6b2 127.0.0.1:30006@31006 slave 292f8b365bb7edb5e285caf0b7e6ddc7265d2f4f 0 1426238317741 6 connected
e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460
"#;
