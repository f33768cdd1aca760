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
    pub struct ConstructionFlags: u32 {
        const STALLED = 1 << 0;
        const PRIORITY = 1 << 1;
    }
}

/// A building site. Complete once `progress` reaches `required_work`.
#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionRecord {
    pub blueprint: u32,
    pub progress: Scalar,
    pub required_work: Scalar,
    pub flags: ConstructionFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionSnapshot {
    pub blueprint: u32,
    pub progress: Scalar,
    pub required_work: Scalar,
    pub flags: ConstructionFlags,
}

impl ConstructionSnapshot {
    pub fn is_complete(&self) -> bool {
        self.progress >= self.required_work
    }

    pub fn completion(&self) -> Scalar {
        if self.required_work <= Scalar::zero() {
            return Scalar::one();
        }
        (self.progress / self.required_work).clamp(Scalar::zero(), Scalar::one())
    }
}

impl RegistrySnapshot for ConstructionSnapshot {
    type SortKey = u32;

    fn sort_key(&self) -> u32 {
        self.blueprint
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConstructionRegistrySummary {
    pub total: u32,
    pub completed: u32,
    pub in_progress: u32,
    pub stalled: u32,
}

pub struct ConstructionRegistry;

impl Domain for ConstructionRegistry {
    const KIND: RegistryKind = RegistryKind::Constructions;

    type Record = ConstructionRecord;
    type Snapshot = ConstructionSnapshot;
    type Summary = ConstructionRegistrySummary;

    fn snapshot(record: &ConstructionRecord) -> ConstructionSnapshot {
        ConstructionSnapshot {
            blueprint: record.blueprint,
            progress: record.progress,
            required_work: record.required_work,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut ConstructionRegistrySummary, snapshot: &ConstructionSnapshot) {
        summary.total += 1;
        if snapshot.is_complete() {
            summary.completed += 1;
        } else if snapshot.flags.contains(ConstructionFlags::STALLED) {
            summary.stalled += 1;
        } else if snapshot.progress > Scalar::zero() {
            summary.in_progress += 1;
        }
    }
}
