use std::fmt;

use bevy::ecs::component::{Component, TableStorage};
use serde::{Deserialize, Serialize};
use sim_proto::ContinuityState;

use crate::{
    identity::StableId,
    spatial::{CellId, SpatialResolution},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum RegistryKind {
    Abilities = 1,
    Bands = 2,
    Creatures = 3,
    Constructions = 4,
    Spawners = 5,
    Miracles = 6,
    LogisticsRequests = 7,
    Villagers = 8,
    Resources = 9,
    Storehouses = 10,
}

impl RegistryKind {
    pub const ALL: [RegistryKind; 10] = [
        RegistryKind::Abilities,
        RegistryKind::Bands,
        RegistryKind::Creatures,
        RegistryKind::Constructions,
        RegistryKind::Spawners,
        RegistryKind::Miracles,
        RegistryKind::LogisticsRequests,
        RegistryKind::Villagers,
        RegistryKind::Resources,
        RegistryKind::Storehouses,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_u8() == value)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RegistryKind::Abilities => "abilities",
            RegistryKind::Bands => "bands",
            RegistryKind::Creatures => "creatures",
            RegistryKind::Constructions => "constructions",
            RegistryKind::Spawners => "spawners",
            RegistryKind::Miracles => "miracles",
            RegistryKind::LogisticsRequests => "logistics_requests",
            RegistryKind::Villagers => "villagers",
            RegistryKind::Resources => "resources",
            RegistryKind::Storehouses => "storehouses",
        }
    }
}

impl fmt::Display for RegistryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a registry related to the spatial index when it was last rebuilt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryContinuity {
    /// At least one entry carried a position.
    pub has_spatial_data: bool,
    /// Some positioned entries were not found in the committed grid.
    pub requires_spatial_sync: bool,
    /// Spatial index version observed by the rebuild.
    pub spatial_version: u32,
    pub spatial_resolved_count: u32,
    pub spatial_fallback_count: u32,
    pub spatial_unmapped_count: u32,
}

impl RegistryContinuity {
    pub fn to_state(&self) -> ContinuityState {
        ContinuityState {
            has_spatial_data: self.has_spatial_data,
            requires_spatial_sync: self.requires_spatial_sync,
            spatial_version: self.spatial_version,
            resolved: self.spatial_resolved_count,
            fallback: self.spatial_fallback_count,
            unmapped: self.spatial_unmapped_count,
        }
    }

    pub fn from_state(state: &ContinuityState) -> Self {
        Self {
            has_spatial_data: state.has_spatial_data,
            requires_spatial_sync: state.requires_spatial_sync,
            spatial_version: state.spatial_version,
            spatial_resolved_count: state.resolved,
            spatial_fallback_count: state.fallback,
            spatial_unmapped_count: state.unmapped,
        }
    }
}

#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct RegistryMetadata {
    pub kind: RegistryKind,
    pub label: String,
    pub entry_count: usize,
    /// Strictly increases with every applied rebuild; zero means never built.
    pub version: u64,
    pub last_update_tick: u64,
    pub continuity: RegistryContinuity,
}

impl RegistryMetadata {
    pub fn new(kind: RegistryKind, label: impl Into<String>) -> Self {
        Self {
            kind,
            label: label.into(),
            entry_count: 0,
            version: 0,
            last_update_tick: 0,
            continuity: RegistryContinuity::default(),
        }
    }
}

/// Ordering and flag capability every registry snapshot provides.
pub trait RegistrySnapshot: Clone + Send + Sync + 'static {
    type SortKey: Ord;

    /// Total ordering key; ties are broken by stable identity.
    fn sort_key(&self) -> Self::SortKey;

    fn flags(&self) -> u32 {
        0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry<S> {
    pub id: StableId,
    pub snapshot: S,
    pub cell_id: CellId,
    pub resolution: SpatialResolution,
    /// Spatial version the cell was read from, for resolved entries.
    pub spatial_version: Option<u32>,
}

/// Sorted entries of one registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryBuffer<S> {
    entries: Vec<RegistryEntry<S>>,
}

impl<S: Send + Sync + 'static> Component for RegistryBuffer<S> {
    type Storage = TableStorage;
}

impl<S> Default for RegistryBuffer<S> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<S> RegistryBuffer<S> {
    pub fn entries(&self) -> &[RegistryEntry<S>] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegistryEntry<S>> {
        self.entries.iter()
    }

    pub fn get(&self, id: StableId) -> Option<&RegistryEntry<S>> {
        self.entries.iter().find(|entry| entry.id == id)
    }

    pub fn ids(&self) -> Vec<StableId> {
        self.entries.iter().map(|entry| entry.id).collect()
    }

    pub(crate) fn replace(&mut self, entries: Vec<RegistryEntry<S>>) {
        self.entries = entries;
    }
}
