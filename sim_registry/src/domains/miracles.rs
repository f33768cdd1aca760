use bevy::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    identity::StableId,
    rebuild::Domain,
    registry::{RegistryKind, RegistrySnapshot},
    scalar::Scalar,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct MiracleFlags: u32 {
        const TARGETED = 1 << 0;
        const INTERRUPTED = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MiraclePhase {
    Charging,
    Active,
    Sustained,
    Fading,
}

#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiracleRecord {
    pub kind: u32,
    pub caster: StableId,
    pub charge: Scalar,
    pub radius: Scalar,
    pub phase: MiraclePhase,
    pub flags: MiracleFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiracleSnapshot {
    pub kind: u32,
    pub caster: StableId,
    pub charge: Scalar,
    pub radius: Scalar,
    pub phase: MiraclePhase,
    pub flags: MiracleFlags,
}

impl RegistrySnapshot for MiracleSnapshot {
    type SortKey = (MiraclePhase, u32);

    fn sort_key(&self) -> Self::SortKey {
        (self.phase, self.kind)
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiracleRegistrySummary {
    pub total: u32,
    pub charging: u32,
    pub active: u32,
    pub sustained: u32,
    pub total_charge: Scalar,
    /// Miracles whose caster no longer exists.
    pub orphaned: u32,
}

pub struct MiracleRegistry;

impl Domain for MiracleRegistry {
    const KIND: RegistryKind = RegistryKind::Miracles;

    type Record = MiracleRecord;
    type Snapshot = MiracleSnapshot;
    type Summary = MiracleRegistrySummary;

    fn snapshot(record: &MiracleRecord) -> MiracleSnapshot {
        MiracleSnapshot {
            kind: record.kind,
            caster: record.caster,
            charge: record.charge,
            radius: record.radius,
            phase: record.phase,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut MiracleRegistrySummary, snapshot: &MiracleSnapshot) {
        summary.total += 1;
        summary.total_charge += snapshot.charge;
        match snapshot.phase {
            MiraclePhase::Charging => summary.charging += 1,
            MiraclePhase::Active => summary.active += 1,
            MiraclePhase::Sustained => summary.sustained += 1,
            MiraclePhase::Fading => {}
        }
    }

    fn reference(snapshot: &MiracleSnapshot) -> Option<StableId> {
        Some(snapshot.caster)
    }

    fn accumulate_orphan(summary: &mut MiracleRegistrySummary, snapshot: &MiracleSnapshot) {
        summary.orphaned += 1;
        Self::accumulate(summary, snapshot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domains::test_support::{rebuild, registry_world};

    #[test]
    fn miracles_sort_by_phase_then_kind() {
        let mut world = registry_world();
        world.spawn(StableId(100));
        let miracles = [
            (1, 4, MiraclePhase::Active),
            (2, 1, MiraclePhase::Sustained),
            (3, 9, MiraclePhase::Charging),
            (4, 2, MiraclePhase::Active),
        ];
        for (id, kind, phase) in miracles {
            world.spawn((
                StableId(id),
                MiracleRecord {
                    kind,
                    caster: StableId(100),
                    charge: Scalar::from_f32(0.5),
                    radius: Scalar::from_i64(3),
                    phase,
                    flags: MiracleFlags::empty(),
                },
            ));
        }
        let (_, buffer, summary) = rebuild::<MiracleRegistry>(&mut world);
        assert_eq!(
            buffer.ids(),
            vec![StableId(3), StableId(4), StableId(1), StableId(2)]
        );
        assert_eq!(
            (summary.charging, summary.active, summary.sustained),
            (1, 2, 1)
        );
        assert_eq!(summary.total_charge, Scalar::from_i64(2));
        assert_eq!(summary.orphaned, 0);

        let caster = world
            .query_filtered::<Entity, (With<StableId>, Without<MiracleRecord>)>()
            .single(&world);
        world.despawn(caster);
        let (_, _, summary) = rebuild::<MiracleRegistry>(&mut world);
        assert_eq!(summary.orphaned, 4);
        assert_eq!(summary.total, 4);
    }
}
