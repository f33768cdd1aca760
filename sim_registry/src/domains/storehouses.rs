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
    pub struct StorehouseFlags: u32 {
        const LOCKED = 1 << 0;
    }
}

#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorehouseRecord {
    pub capacity: u32,
    pub stored: u32,
    pub reserved: u32,
    pub flags: StorehouseFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorehouseSnapshot {
    pub capacity: u32,
    pub stored: u32,
    pub reserved: u32,
    pub flags: StorehouseFlags,
}

impl StorehouseSnapshot {
    pub fn free_capacity(&self) -> u32 {
        self.capacity
            .saturating_sub(self.stored.saturating_add(self.reserved))
    }
}

/// Storehouses order purely by identity.
impl RegistrySnapshot for StorehouseSnapshot {
    type SortKey = ();

    fn sort_key(&self) {}

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorehouseRegistrySummary {
    pub total: u32,
    pub total_capacity: u64,
    pub total_stored: u64,
    pub total_reserved: u64,
    pub full: u32,
}

pub struct StorehouseRegistry;

impl Domain for StorehouseRegistry {
    const KIND: RegistryKind = RegistryKind::Storehouses;

    type Record = StorehouseRecord;
    type Snapshot = StorehouseSnapshot;
    type Summary = StorehouseRegistrySummary;

    fn snapshot(record: &StorehouseRecord) -> StorehouseSnapshot {
        StorehouseSnapshot {
            capacity: record.capacity,
            stored: record.stored,
            reserved: record.reserved,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut StorehouseRegistrySummary, snapshot: &StorehouseSnapshot) {
        summary.total += 1;
        summary.total_capacity += snapshot.capacity as u64;
        summary.total_stored += snapshot.stored as u64;
        summary.total_reserved += snapshot.reserved as u64;
        if snapshot.free_capacity() == 0 {
            summary.full += 1;
        }
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
    fn reserved_space_counts_toward_full() {
        let mut world = registry_world();
        for (id, stored, reserved) in [(7, 60, 40), (3, 10, 0)] {
            world.spawn((
                StableId(id),
                StorehouseRecord {
                    capacity: 100,
                    stored,
                    reserved,
                    flags: StorehouseFlags::empty(),
                },
            ));
        }
        let (_, buffer, summary) = rebuild::<StorehouseRegistry>(&mut world);
        assert_eq!(buffer.ids(), vec![StableId(3), StableId(7)]);
        assert_eq!(summary.full, 1);
        assert_eq!(summary.total_capacity, 200);
        assert_eq!(summary.total_stored, 70);
        assert_eq!(summary.total_reserved, 40);
    }
}
