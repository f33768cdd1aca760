use std::cmp::Reverse;

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
    pub struct LogisticsFlags: u32 {
        const URGENT = 1 << 0;
        const BLOCKED = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogisticsPriority {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(Component, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsRequest {
    pub resource: u32,
    pub requested_units: u32,
    pub assigned_units: u32,
    pub fulfilled_units: u32,
    pub priority: LogisticsPriority,
    pub flags: LogisticsFlags,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsSnapshot {
    pub resource: u32,
    pub requested_units: u32,
    pub assigned_units: u32,
    pub fulfilled_units: u32,
    pub priority: LogisticsPriority,
    pub flags: LogisticsFlags,
}

impl LogisticsSnapshot {
    pub fn remaining_units(&self) -> u32 {
        self.requested_units.saturating_sub(self.fulfilled_units)
    }

    pub fn is_urgent(&self) -> bool {
        self.flags.contains(LogisticsFlags::URGENT)
    }

    pub fn is_pending(&self) -> bool {
        self.assigned_units == 0 && self.remaining_units() > 0
    }

    pub fn is_in_progress(&self) -> bool {
        self.assigned_units > 0 && self.remaining_units() > 0
    }

    pub fn is_critical(&self) -> bool {
        self.priority == LogisticsPriority::Critical || self.is_urgent()
    }
}

impl RegistrySnapshot for LogisticsSnapshot {
    type SortKey = (Reverse<LogisticsPriority>, Reverse<bool>);

    /// Highest priority first, urgent before non-urgent within a priority.
    fn sort_key(&self) -> Self::SortKey {
        (Reverse(self.priority), Reverse(self.is_urgent()))
    }

    fn flags(&self) -> u32 {
        self.flags.bits()
    }
}

#[derive(Component, Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogisticsRegistrySummary {
    pub total_requests: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub fulfilled: u32,
    pub critical: u32,
    pub blocked: u32,
    pub requested_units: u64,
    pub assigned_units: u64,
    pub remaining_units: u64,
}

pub struct LogisticsRegistry;

impl Domain for LogisticsRegistry {
    const KIND: RegistryKind = RegistryKind::LogisticsRequests;
    const FLAG_MASK: u32 = LogisticsFlags::BLOCKED.bits();

    type Record = LogisticsRequest;
    type Snapshot = LogisticsSnapshot;
    type Summary = LogisticsRegistrySummary;

    fn snapshot(record: &LogisticsRequest) -> LogisticsSnapshot {
        LogisticsSnapshot {
            resource: record.resource,
            requested_units: record.requested_units,
            assigned_units: record.assigned_units,
            fulfilled_units: record.fulfilled_units,
            priority: record.priority,
            flags: record.flags,
        }
    }

    fn accumulate(summary: &mut LogisticsRegistrySummary, snapshot: &LogisticsSnapshot) {
        summary.total_requests += 1;
        summary.requested_units += snapshot.requested_units as u64;
        summary.assigned_units += snapshot.assigned_units as u64;
        summary.remaining_units += snapshot.remaining_units() as u64;
        if snapshot.is_pending() {
            summary.pending += 1;
        } else if snapshot.is_in_progress() {
            summary.in_progress += 1;
        } else if snapshot.remaining_units() == 0 {
            summary.fulfilled += 1;
        }
        if snapshot.is_critical() {
            summary.critical += 1;
        }
    }

    fn finish(summary: &mut LogisticsRegistrySummary, blocked: usize) {
        summary.blocked = blocked as u32;
    }
}
