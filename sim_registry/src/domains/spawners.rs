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
    pub struct SpawnerFlags: u32 {
        const ACTIVE = 1 << 0;
        const HOSTILE_SPAWNS = 1 << 1;
    }
}

/// Periodically produces creatures until `capacity` is reached.
#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerRecord {
    pub archetype: u32,
    pub cooldown_ticks: u32,
    pub interval_ticks: u32,
    pub spawned: u32,
    pub capacity: u32,
    pub flags: SpawnerFlags,
}

impl SpawnerRecord {
    pub fn is_exhausted(&self) -> bool {
        self.spawned >= self.capacity
    }

    pub fn is_ready(&self) -> bool {
        self.flags.contains(SpawnerFlags::ACTIVE) && self.cooldown_ticks == 0 && !self.is_exhausted()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerSnapshot {
    pub archetype: u32,
    pub cooldown_ticks: u32,
    pub spawned: u32,
    pub capacity: u32,
    pub flags: SpawnerFlags,
}

impl RegistrySnapshot for SpawnerSnapshot {
    type SortKey = u32;

    fn sort_key(&self) -> u32 {
        self.archetype
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnerRegistrySummary {
    pub total: u32,
    pub active: u32,
    pub ready: u32,
    pub exhausted: u32,
    pub total_spawned: u64,
}

pub struct SpawnerRegistry;

impl Domain for SpawnerRegistry {
    const KIND: RegistryKind = RegistryKind::Spawners;
    const FLAG_MASK: u32 = SpawnerFlags::ACTIVE.bits();

    type Record = SpawnerRecord;
    type Snapshot = SpawnerSnapshot;
    type Summary = SpawnerRegistrySummary;

    fn snapshot(record: &SpawnerRecord) -> SpawnerSnapshot {
        SpawnerSnapshot {
            archetype: record.archetype,
            cooldown_ticks: record.cooldown_ticks,
            spawned: record.spawned,
            capacity: record.capacity,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut SpawnerRegistrySummary, snapshot: &SpawnerSnapshot) {
        summary.total += 1;
        summary.total_spawned += snapshot.spawned as u64;
        let exhausted = snapshot.spawned >= snapshot.capacity;
        if exhausted {
            summary.exhausted += 1;
        } else if snapshot.flags.contains(SpawnerFlags::ACTIVE) && snapshot.cooldown_ticks == 0 {
            summary.ready += 1;
        }
    }

    fn finish(summary: &mut SpawnerRegistrySummary, active: usize) {
        summary.active = active as u32;
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
    fn readiness_and_exhaustion() {
        let record = SpawnerRecord {
            archetype: 1,
            cooldown_ticks: 0,
            interval_ticks: 5,
            spawned: 2,
            capacity: 2,
            flags: SpawnerFlags::ACTIVE,
        };
        assert!(record.is_exhausted());
        assert!(!record.is_ready());

        let mut world = registry_world();
        world.spawn((StableId(1), record.clone()));
        world.spawn((
            StableId(2),
            SpawnerRecord {
                spawned: 0,
                ..record.clone()
            },
        ));
        world.spawn((
            StableId(3),
            SpawnerRecord {
                spawned: 0,
                flags: SpawnerFlags::empty(),
                ..record
            },
        ));
        let (_, _, summary) = rebuild::<SpawnerRegistry>(&mut world);
        assert_eq!(
            summary,
            SpawnerRegistrySummary {
                total: 3,
                active: 2,
                ready: 1,
                exhausted: 1,
                total_spawned: 2,
            }
        );
    }
}
