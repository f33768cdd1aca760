use bevy::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    rebuild::Domain,
    registry::{RegistryKind, RegistrySnapshot},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ResourceFlags: u32 {
        const RESERVED = 1 << 0;
        const RENEWABLE = 1 << 1;
    }
}

/// A harvestable node in the world (grove, quarry, ore vein).
#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub resource_type: u32,
    pub units: u32,
    pub capacity: u32,
    pub flags: ResourceFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub resource_type: u32,
    pub units: u32,
    pub capacity: u32,
    pub flags: ResourceFlags,
}

impl RegistrySnapshot for ResourceSnapshot {
    type SortKey = u32;

    fn sort_key(&self) -> u32 {
        self.resource_type
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRegistrySummary {
    pub total_nodes: u32,
    pub total_units: u64,
    pub depleted: u32,
    pub reserved: u32,
}

pub struct ResourceRegistry;

impl Domain for ResourceRegistry {
    const KIND: RegistryKind = RegistryKind::Resources;
    const FLAG_MASK: u32 = ResourceFlags::RESERVED.bits();

    type Record = ResourceNode;
    type Snapshot = ResourceSnapshot;
    type Summary = ResourceRegistrySummary;

    fn snapshot(record: &ResourceNode) -> ResourceSnapshot {
        ResourceSnapshot {
            resource_type: record.resource_type,
            units: record.units,
            capacity: record.capacity,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut ResourceRegistrySummary, snapshot: &ResourceSnapshot) {
        summary.total_nodes += 1;
        summary.total_units += snapshot.units as u64;
        if snapshot.units == 0 {
            summary.depleted += 1;
        }
    }

    fn finish(summary: &mut ResourceRegistrySummary, reserved: usize) {
        summary.reserved = reserved as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::test_support::{rebuild, registry_world},
        identity::StableId,
    };

    #[test]
    fn depleted_and_reserved_nodes() {
        let mut world = registry_world();
        world.spawn((
            StableId(1),
            ResourceNode {
                resource_type: 2,
                units: 0,
                capacity: 40,
                flags: ResourceFlags::RENEWABLE,
            },
        ));
        world.spawn((
            StableId(2),
            ResourceNode {
                resource_type: 1,
                units: 30,
                capacity: 40,
                flags: ResourceFlags::RESERVED,
            },
        ));
        let (_, buffer, summary) = rebuild::<ResourceRegistry>(&mut world);
        assert_eq!(buffer.ids(), vec![StableId(2), StableId(1)]);
        assert_eq!(summary.total_units, 30);
        assert_eq!((summary.depleted, summary.reserved), (1, 1));
    }
}
