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
    pub struct BandFlags: u32 {
        const ENGAGED = 1 << 0;
        const ROUTED = 1 << 1;
        const MOVING = 1 << 2;
    }
}

/// A group of villagers or warriors acting under one faction banner.
#[derive(Component, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandRecord {
    pub faction: u32,
    pub member_count: u32,
    /// 0..=1
    pub morale: Scalar,
    pub flags: BandFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandSnapshot {
    pub faction: u32,
    pub member_count: u32,
    pub morale: Scalar,
    pub flags: BandFlags,
}

impl RegistrySnapshot for BandSnapshot {
    type SortKey = u32;

    fn sort_key(&self) -> u32 {
        self.faction
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandRegistrySummary {
    pub total_bands: u32,
    pub total_members: u64,
    pub engaged: u32,
    pub routed: u32,
    pub total_morale: Scalar,
}

impl BandRegistrySummary {
    pub fn average_morale(&self) -> Scalar {
        if self.total_bands == 0 {
            return Scalar::zero();
        }
        self.total_morale / Scalar::from_u32(self.total_bands)
    }
}

pub struct BandRegistry;

impl Domain for BandRegistry {
    const KIND: RegistryKind = RegistryKind::Bands;
    const FLAG_MASK: u32 = BandFlags::ROUTED.bits();

    type Record = BandRecord;
    type Snapshot = BandSnapshot;
    type Summary = BandRegistrySummary;

    fn snapshot(record: &BandRecord) -> BandSnapshot {
        BandSnapshot {
            faction: record.faction,
            member_count: record.member_count,
            morale: record.morale,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut BandRegistrySummary, snapshot: &BandSnapshot) {
        summary.total_bands += 1;
        summary.total_members += snapshot.member_count as u64;
        summary.total_morale += snapshot.morale;
        if snapshot.flags.contains(BandFlags::ENGAGED) {
            summary.engaged += 1;
        }
    }

    fn finish(summary: &mut BandRegistrySummary, routed: usize) {
        summary.routed = routed as u32;
    }
}
