use std::cmp::Reverse;

use bevy::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    rebuild::Domain,
    registry::{RegistryKind, RegistrySnapshot},
    scalar::Scalar,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct CreatureFlags: u32 {
        const HOSTILE = 1 << 0;
        const TAMED = 1 << 1;
        const SPAWNED = 1 << 2;
    }
}

#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatureRecord {
    pub species: u32,
    pub health: Scalar,
    pub threat: u32,
    pub flags: CreatureFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatureSnapshot {
    pub species: u32,
    pub health: Scalar,
    pub threat: u32,
    pub flags: CreatureFlags,
}

impl RegistrySnapshot for CreatureSnapshot {
    type SortKey = Reverse<u32>;

    /// Most threatening first.
    fn sort_key(&self) -> Reverse<u32> {
        Reverse(self.threat)
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatureRegistrySummary {
    pub total: u32,
    pub hostile: u32,
    pub tamed: u32,
    pub total_threat: u64,
}

pub struct CreatureRegistry;

impl Domain for CreatureRegistry {
    const KIND: RegistryKind = RegistryKind::Creatures;
    const FLAG_MASK: u32 = CreatureFlags::HOSTILE.bits();

    type Record = CreatureRecord;
    type Snapshot = CreatureSnapshot;
    type Summary = CreatureRegistrySummary;

    fn snapshot(record: &CreatureRecord) -> CreatureSnapshot {
        CreatureSnapshot {
            species: record.species,
            health: record.health,
            threat: record.threat,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut CreatureRegistrySummary, snapshot: &CreatureSnapshot) {
        summary.total += 1;
        summary.total_threat += snapshot.threat as u64;
        if snapshot.flags.contains(CreatureFlags::TAMED) {
            summary.tamed += 1;
        }
    }

    fn finish(summary: &mut CreatureRegistrySummary, hostile: usize) {
        summary.hostile = hostile as u32;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        domains::test_support::{rebuild, registry_world},
        identity::StableId,
    };

    fn creature(threat: u32, flags: CreatureFlags) -> CreatureRecord {
        CreatureRecord {
            species: 1,
            health: Scalar::from_i64(10),
            threat,
            flags,
        }
    }

    #[test]
    fn equal_threat_keeps_identity_order_across_spawn_orders() {
        let spawn_orders: [&[u64]; 2] = [&[4, 1, 3, 2], &[2, 3, 1, 4]];
        let mut results = Vec::new();
        for order in spawn_orders {
            let mut world = registry_world();
            for id in order {
                let threat = if *id == 3 { 9 } else { 5 };
                world.spawn((StableId(*id), creature(threat, CreatureFlags::HOSTILE)));
            }
            let (_, buffer, summary) = rebuild::<CreatureRegistry>(&mut world);
            assert_eq!(summary.hostile, 4);
            assert_eq!(summary.total_threat, 24);
            results.push(buffer);
        }
        assert_eq!(
            results[0].ids(),
            vec![StableId(3), StableId(1), StableId(2), StableId(4)]
        );
        assert_eq!(results[0], results[1]);
    }

    #[test]
    fn tamed_creatures_are_not_hostile() {
        let mut world = registry_world();
        world.spawn((StableId(1), creature(1, CreatureFlags::TAMED)));
        world.spawn((StableId(2), creature(2, CreatureFlags::HOSTILE)));
        let (metadata, _, summary) = rebuild::<CreatureRegistry>(&mut world);
        assert_eq!((summary.tamed, summary.hostile), (1, 1));
        assert_eq!(metadata.version, 1);
    }
}
