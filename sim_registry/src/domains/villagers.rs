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
    pub struct VillagerFlags: u32 {
        const FLEEING = 1 << 0;
        const SLEEPING = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VillagerJob {
    Idle,
    Farmer,
    Builder,
    Hauler,
    Worshipper,
}

#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillagerRecord {
    pub job: VillagerJob,
    pub health: Scalar,
    pub band: Option<StableId>,
    pub flags: VillagerFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillagerSnapshot {
    pub job: VillagerJob,
    pub health: Scalar,
    pub band: Option<StableId>,
    pub flags: VillagerFlags,
}

impl RegistrySnapshot for VillagerSnapshot {
    type SortKey = VillagerJob;

    fn sort_key(&self) -> VillagerJob {
        self.job
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VillagerRegistrySummary {
    pub total: u32,
    pub idle: u32,
    pub working: u32,
    pub fleeing: u32,
    pub total_health: Scalar,
    /// Villagers still pointing at a band that no longer exists.
    pub orphaned: u32,
}

pub struct VillagerRegistry;

impl Domain for VillagerRegistry {
    const KIND: RegistryKind = RegistryKind::Villagers;
    const FLAG_MASK: u32 = VillagerFlags::FLEEING.bits();

    type Record = VillagerRecord;
    type Snapshot = VillagerSnapshot;
    type Summary = VillagerRegistrySummary;

    fn snapshot(record: &VillagerRecord) -> VillagerSnapshot {
        VillagerSnapshot {
            job: record.job,
            health: record.health,
            band: record.band,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut VillagerRegistrySummary, snapshot: &VillagerSnapshot) {
        summary.total += 1;
        summary.total_health += snapshot.health;
        // A fleeing villager has dropped whatever job it holds.
        if snapshot.flags.contains(VillagerFlags::FLEEING) {
            return;
        }
        if snapshot.job == VillagerJob::Idle {
            summary.idle += 1;
        } else {
            summary.working += 1;
        }
    }

    fn reference(snapshot: &VillagerSnapshot) -> Option<StableId> {
        snapshot.band
    }

    fn accumulate_orphan(summary: &mut VillagerRegistrySummary, snapshot: &VillagerSnapshot) {
        summary.orphaned += 1;
        Self::accumulate(summary, snapshot);
    }

    fn finish(summary: &mut VillagerRegistrySummary, fleeing: usize) {
        summary.fleeing = fleeing as u32;
    }
}
