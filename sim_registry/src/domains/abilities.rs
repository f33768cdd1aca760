use bevy::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    identity::StableId,
    rebuild::Domain,
    registry::{RegistryKind, RegistrySnapshot},
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct AbilityFlags: u32 {
        const CHANNELING = 1 << 0;
        const PASSIVE = 1 << 1;
        const DISABLED = 1 << 2;
    }
}

/// An ability slot owned by another simulation object.
#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityRecord {
    pub owner: StableId,
    pub ability_id: u32,
    pub cooldown_ticks: u32,
    pub charges: u16,
    pub flags: AbilityFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilitySnapshot {
    pub owner: StableId,
    pub ability_id: u32,
    pub cooldown_ticks: u32,
    pub charges: u16,
    pub flags: AbilityFlags,
}

impl AbilitySnapshot {
    pub fn is_ready(&self) -> bool {
        self.cooldown_ticks == 0 && self.charges > 0 && !self.flags.contains(AbilityFlags::DISABLED)
    }
}

impl RegistrySnapshot for AbilitySnapshot {
    type SortKey = (StableId, u32);

    fn sort_key(&self) -> Self::SortKey {
        (self.owner, self.ability_id)
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityRegistrySummary {
    pub total: u32,
    pub ready: u32,
    pub cooling_down: u32,
    pub channeling: u32,
    /// Abilities whose owner no longer exists. Never counted as ready.
    pub orphaned: u32,
}

pub struct AbilityRegistry;

impl Domain for AbilityRegistry {
    const KIND: RegistryKind = RegistryKind::Abilities;
    const FLAG_MASK: u32 = AbilityFlags::CHANNELING.bits();

    type Record = AbilityRecord;
    type Snapshot = AbilitySnapshot;
    type Summary = AbilityRegistrySummary;

    fn snapshot(record: &AbilityRecord) -> AbilitySnapshot {
        AbilitySnapshot {
            owner: record.owner,
            ability_id: record.ability_id,
            cooldown_ticks: record.cooldown_ticks,
            charges: record.charges,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut AbilityRegistrySummary, snapshot: &AbilitySnapshot) {
        summary.total += 1;
        if snapshot.is_ready() {
            summary.ready += 1;
        }
        if snapshot.cooldown_ticks > 0 {
            summary.cooling_down += 1;
        }
    }

    fn reference(snapshot: &AbilitySnapshot) -> Option<StableId> {
        Some(snapshot.owner)
    }

    fn accumulate_orphan(summary: &mut AbilityRegistrySummary, snapshot: &AbilitySnapshot) {
        summary.total += 1;
        summary.orphaned += 1;
        if snapshot.cooldown_ticks > 0 {
            summary.cooling_down += 1;
        }
    }

    fn finish(summary: &mut AbilityRegistrySummary, channeling: usize) {
        summary.channeling = channeling as u32;
    }
}
