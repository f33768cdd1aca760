use thiserror::Error;

use crate::{
    identity::StableId,
    registry::{
        RegistryBuffer, RegistryContinuity, RegistryEntry, RegistryKind, RegistryMetadata,
        RegistrySnapshot,
    },
    spatial::SpatialResolution,
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryBuildError {
    #[error("{kind} rebuild saw stable identity {id} more than once")]
    DuplicateIdentity { kind: RegistryKind, id: StableId },
}

/// Collects entries for one rebuild and applies them all at once.
#[derive(Debug)]
pub struct RegistryBuilder<S> {
    entries: Vec<RegistryEntry<S>>,
}

impl<S: RegistrySnapshot> Default for RegistryBuilder<S> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}

impl<S: RegistrySnapshot> RegistryBuilder<S> {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    pub fn add(&mut self, entry: RegistryEntry<S>) {
        self.entries.push(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sort by `(sort_key, id)` and replace `target`. On success the metadata
    /// version is bumped even when no entries were added. On error neither
    /// `target` nor `metadata` is modified.
    pub fn apply_to(
        self,
        target: &mut RegistryBuffer<S>,
        metadata: &mut RegistryMetadata,
        tick: u64,
    ) -> Result<usize, RegistryBuildError> {
        let mut entries = self.entries;

        let mut ids: Vec<StableId> = entries.iter().map(|entry| entry.id).collect();
        ids.sort_unstable();
        if let Some(pair) = ids.windows(2).find(|pair| pair[0] == pair[1]) {
            return Err(RegistryBuildError::DuplicateIdentity {
                kind: metadata.kind,
                id: pair[0],
            });
        }

        entries.sort_by_cached_key(|entry| (entry.snapshot.sort_key(), entry.id));
        let count = entries.len();
        target.replace(entries);
        metadata.entry_count = count;
        metadata.last_update_tick = tick;
        metadata.version += 1;
        Ok(count)
    }
}

/// Counts entries whose flags intersect a mask.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegistryFlagAccumulator {
    mask: u32,
    count: usize,
}

impl RegistryFlagAccumulator {
    pub fn new(mask: u32) -> Self {
        Self { mask, count: 0 }
    }

    pub fn record(&mut self, flags: u32) {
        if flags & self.mask != 0 {
            self.count += 1;
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

/// Resolution outcome counts for one rebuild pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpatialTally {
    pub resolved: u32,
    pub fallback: u32,
    pub unmapped: u32,
}

impl SpatialTally {
    pub fn record(&mut self, resolution: SpatialResolution) {
        match resolution {
            SpatialResolution::Resolved => self.resolved += 1,
            SpatialResolution::Fallback => self.fallback += 1,
            SpatialResolution::Unmapped => self.unmapped += 1,
        }
    }

    pub fn write_continuity(&self, continuity: &mut RegistryContinuity, spatial_version: u32) {
        *continuity = RegistryContinuity {
            has_spatial_data: self.resolved + self.fallback > 0,
            requires_spatial_sync: self.fallback > 0,
            spatial_version,
            spatial_resolved_count: self.resolved,
            spatial_fallback_count: self.fallback,
            spatial_unmapped_count: self.unmapped,
        };
    }
}
