//! Double-buffered uniform grid over object positions.
//!
//! Positions are staged during gameplay and become visible to registries only
//! once [`SpatialIndex::commit`] swaps the freshly built back buffer in. The
//! index version increments exactly once per commit that changed anything.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use bevy::prelude::*;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sim_proto::{PositionState, SpatialState};

use crate::{
    components::Position,
    config::{SimulationConfigHandle, SpatialConfig, UnindexedPositionPolicy},
    identity::StableId,
    scalar::Scalar,
};

pub type CellId = i32;

/// Cell id written for anything that did not resolve against the grid.
pub const UNRESOLVED_CELL: CellId = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpatialResolution {
    /// Found in the committed grid.
    Resolved,
    /// Has a position, but the committed grid does not index it.
    Fallback,
    /// No usable position.
    Unmapped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialClassification {
    pub resolution: SpatialResolution,
    pub cell_id: CellId,
}

impl SpatialClassification {
    const UNMAPPED: Self = Self {
        resolution: SpatialResolution::Unmapped,
        cell_id: UNRESOLVED_CELL,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SpatialEntry {
    pub cell: CellId,
    pub id: StableId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub cell_size: Scalar,
    pub origin_x: Scalar,
    pub origin_y: Scalar,
    pub width: u32,
    pub height: u32,
}

impl GridLayout {
    pub fn from_config(config: &SpatialConfig) -> Self {
        let (origin_x, origin_y) = config.origin();
        Self {
            cell_size: config.cell_size(),
            origin_x,
            origin_y,
            width: config.width.max(1),
            height: config.height.max(1),
        }
    }

    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Cell containing `position`, or `None` outside the grid bounds.
    pub fn cell_for(&self, position: &Position) -> Option<CellId> {
        let x = (position.x - self.origin_x).floor_div(self.cell_size);
        let y = (position.y - self.origin_y).floor_div(self.cell_size);
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return None;
        }
        CellId::try_from(y * self.width as i64 + x).ok()
    }
}

impl Default for GridLayout {
    fn default() -> Self {
        Self::from_config(&SpatialConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
struct GridBuffer {
    /// `cell_ranges[c]..cell_ranges[c + 1]` spans the entries of cell `c`.
    cell_ranges: Vec<u32>,
    entries: Vec<SpatialEntry>,
    cells_by_id: HashMap<StableId, CellId>,
}

impl GridBuffer {
    fn rebuild(&mut self, cell_count: usize, entries: Vec<SpatialEntry>) {
        self.cell_ranges.clear();
        self.cell_ranges.resize(cell_count + 1, 0);
        for entry in &entries {
            self.cell_ranges[entry.cell as usize + 1] += 1;
        }
        for cell in 0..cell_count {
            self.cell_ranges[cell + 1] += self.cell_ranges[cell];
        }
        self.cells_by_id.clear();
        self.cells_by_id
            .extend(entries.iter().map(|entry| (entry.id, entry.cell)));
        self.entries = entries;
    }

    fn cell(&self, cell: CellId) -> &[SpatialEntry] {
        let Ok(index) = usize::try_from(cell) else {
            return &[];
        };
        match (self.cell_ranges.get(index), self.cell_ranges.get(index + 1)) {
            (Some(&start), Some(&end)) => &self.entries[start as usize..end as usize],
            _ => &[],
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct SpatialIndex {
    layout: GridLayout,
    staging: BTreeMap<StableId, Position>,
    dirty: bool,
    buffers: [GridBuffer; 2],
    front: usize,
    version: u32,
}

impl Default for SpatialIndex {
    fn default() -> Self {
        Self::new(GridLayout::default())
    }
}

impl SpatialIndex {
    pub fn new(layout: GridLayout) -> Self {
        Self {
            layout,
            staging: BTreeMap::new(),
            dirty: false,
            buffers: [GridBuffer::default(), GridBuffer::default()],
            front: 0,
            version: 0,
        }
    }

    pub fn from_config(config: &SpatialConfig) -> Self {
        Self::new(GridLayout::from_config(config))
    }

    pub fn layout(&self) -> &GridLayout {
        &self.layout
    }

    /// Number of successful commits. Zero means nothing was ever committed.
    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn stage(&mut self, id: StableId, position: Position) {
        if self.staging.insert(id, position) != Some(position) {
            self.dirty = true;
        }
    }

    pub fn unstage(&mut self, id: StableId) -> bool {
        let removed = self.staging.remove(&id).is_some();
        self.dirty |= removed;
        removed
    }

    pub fn retain_staged(&mut self, mut keep: impl FnMut(StableId) -> bool) {
        let before = self.staging.len();
        self.staging.retain(|id, _| keep(*id));
        self.dirty |= self.staging.len() != before;
    }

    /// Build the back buffer from staging and swap it in. Returns `false`
    /// without touching the version when nothing was staged since the last
    /// commit.
    pub fn commit(&mut self) -> bool {
        if !self.dirty {
            return false;
        }
        let layout = self.layout;
        let mut entries: Vec<SpatialEntry> = self
            .staging
            .par_iter()
            .filter_map(|(id, position)| {
                layout
                    .cell_for(position)
                    .map(|cell| SpatialEntry { cell, id: *id })
            })
            .collect();
        entries.par_sort_by_key(|entry| (entry.cell, entry.id));

        let back = 1 - self.front;
        self.buffers[back].rebuild(layout.cell_count(), entries);
        self.front = back;
        self.version = self.version.wrapping_add(1);
        self.dirty = false;
        true
    }

    /// Objects in `cell` as of the last commit, sorted by stable id.
    pub fn query(&self, cell: CellId) -> &[SpatialEntry] {
        self.buffers[self.front].cell(cell)
    }

    pub fn entries(&self) -> &[SpatialEntry] {
        &self.buffers[self.front].entries
    }

    /// Committed cell of `id`, if indexed.
    pub fn resolve(&self, id: StableId) -> Option<CellId> {
        self.buffers[self.front].cells_by_id.get(&id).copied()
    }

    pub fn classify(
        &self,
        id: StableId,
        position: Option<&Position>,
        policy: UnindexedPositionPolicy,
    ) -> SpatialClassification {
        if position.is_none() {
            return SpatialClassification::UNMAPPED;
        }
        match self.resolve(id) {
            Some(cell_id) => SpatialClassification {
                resolution: SpatialResolution::Resolved,
                cell_id,
            },
            None => match policy {
                UnindexedPositionPolicy::Fallback => SpatialClassification {
                    resolution: SpatialResolution::Fallback,
                    cell_id: UNRESOLVED_CELL,
                },
                UnindexedPositionPolicy::Unmapped => SpatialClassification::UNMAPPED,
            },
        }
    }

    pub fn capture_state(&self) -> SpatialState {
        SpatialState {
            version: self.version,
            positions: self
                .staging
                .iter()
                .map(|(id, position)| PositionState {
                    id: id.raw(),
                    x: position.x.raw(),
                    y: position.y.raw(),
                })
                .collect(),
        }
    }

    /// Replace staging and the committed grid with a captured state. The
    /// version is set to the captured one, not bumped.
    pub fn restore_state(&mut self, state: &SpatialState) {
        self.staging = state
            .positions
            .iter()
            .map(|position| {
                (
                    StableId(position.id),
                    Position::new(Scalar::from_raw(position.x), Scalar::from_raw(position.y)),
                )
            })
            .collect();
        self.dirty = true;
        if state.version > 0 {
            self.commit();
        } else {
            for buffer in &mut self.buffers {
                buffer.rebuild(0, Vec::new());
            }
            self.dirty = !self.staging.is_empty();
        }
        self.version = state.version;
    }
}

pub fn install_spatial_index(world: &mut World) {
    let config = world.resource::<SimulationConfigHandle>().get();
    world.insert_resource(SpatialIndex::from_config(&config.spatial));
}

/// Mirror current object positions into staging.
pub fn stage_positions(mut index: ResMut<SpatialIndex>, objects: Query<(&StableId, &Position)>) {
    let mut live = BTreeSet::new();
    for (id, position) in objects.iter() {
        index.stage(*id, *position);
        live.insert(*id);
    }
    index.retain_staged(|id| live.contains(&id));
}

pub fn commit_spatial_index(mut index: ResMut<SpatialIndex>) {
    if index.commit() {
        log::debug!(
            "spatial.commit version={} entries={}",
            index.version(),
            index.entries().len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bevy_ecs::system::RunSystemOnce;

    fn layout() -> GridLayout {
        GridLayout {
            cell_size: Scalar::from_i64(10),
            origin_x: Scalar::zero(),
            origin_y: Scalar::zero(),
            width: 4,
            height: 4,
        }
    }

    #[test]
    fn commit_without_changes_keeps_version() {
        let mut index = SpatialIndex::new(layout());
        index.stage(StableId(1), Position::from_f32(5.0, 5.0));
        assert!(index.commit());
        assert_eq!(index.version(), 1);
        assert!(!index.commit());
        assert_eq!(index.version(), 1);

        // Restaging the same value is not a change either.
        index.stage(StableId(1), Position::from_f32(5.0, 5.0));
        assert!(!index.commit());
        assert_eq!(index.version(), 1);
    }

    #[test]
    fn query_before_first_commit_is_empty() {
        let mut index = SpatialIndex::new(layout());
        index.stage(StableId(1), Position::from_f32(1.0, 1.0));
        assert!(index.query(0).is_empty());
        assert_eq!(index.resolve(StableId(1)), None);
        assert!(index.query(UNRESOLVED_CELL).is_empty());
    }

    #[test]
    fn entries_are_grouped_by_cell_then_identity() {
        let mut index = SpatialIndex::new(layout());
        index.stage(StableId(9), Position::from_f32(12.0, 3.0));
        index.stage(StableId(2), Position::from_f32(15.0, 8.0));
        index.stage(StableId(4), Position::from_f32(1.0, 1.0));
        index.stage(StableId(7), Position::from_f32(35.0, 35.0));
        index.commit();

        let cell_one: Vec<_> = index.query(1).iter().map(|entry| entry.id).collect();
        assert_eq!(cell_one, vec![StableId(2), StableId(9)]);
        assert_eq!(index.query(0)[0].id, StableId(4));
        assert_eq!(index.resolve(StableId(7)), Some(15));
        assert!(index.query(2).is_empty());
    }

    #[test]
    fn classification_follows_policy_for_unindexed_positions() {
        let mut index = SpatialIndex::new(layout());
        index.stage(StableId(1), Position::from_f32(5.0, 5.0));
        // Outside the 4x4 grid.
        index.stage(StableId(2), Position::from_f32(-3.0, 50.0));
        index.commit();

        let inside = Position::from_f32(5.0, 5.0);
        let outside = Position::from_f32(-3.0, 50.0);
        assert_eq!(
            index.classify(StableId(1), Some(&inside), UnindexedPositionPolicy::Fallback),
            SpatialClassification {
                resolution: SpatialResolution::Resolved,
                cell_id: 0,
            }
        );
        assert_eq!(
            index
                .classify(StableId(2), Some(&outside), UnindexedPositionPolicy::Fallback)
                .resolution,
            SpatialResolution::Fallback
        );
        assert_eq!(
            index
                .classify(StableId(2), Some(&outside), UnindexedPositionPolicy::Unmapped)
                .resolution,
            SpatialResolution::Unmapped
        );
        assert_eq!(
            index.classify(StableId(3), None, UnindexedPositionPolicy::Fallback),
            SpatialClassification::UNMAPPED
        );
    }

    #[test]
    fn staged_changes_stay_invisible_until_commit() {
        let mut index = SpatialIndex::new(layout());
        index.stage(StableId(1), Position::from_f32(5.0, 5.0));
        index.commit();
        index.stage(StableId(1), Position::from_f32(25.0, 5.0));
        assert_eq!(index.resolve(StableId(1)), Some(0));
        index.commit();
        assert_eq!(index.resolve(StableId(1)), Some(2));
        assert_eq!(index.version(), 2);
    }

    #[test]
    fn restore_sets_version_without_bumping() {
        let mut index = SpatialIndex::new(layout());
        index.stage(StableId(3), Position::from_f32(15.0, 15.0));
        index.commit();
        index.commit();
        let captured = index.capture_state();

        index.unstage(StableId(3));
        index.commit();
        assert_eq!(index.version(), 2);

        index.restore_state(&captured);
        assert_eq!(index.version(), 1);
        assert_eq!(index.resolve(StableId(3)), Some(5));
        assert!(!index.is_dirty());
    }

    #[test]
    fn staging_system_drops_despawned_objects() {
        let mut world = World::default();
        world.insert_resource(SpatialIndex::new(layout()));
        let gone = world
            .spawn((StableId(1), Position::from_f32(1.0, 1.0)))
            .id();
        world.spawn((StableId(2), Position::from_f32(11.0, 1.0)));
        world.run_system_once(stage_positions);
        world.run_system_once(commit_spatial_index);
        assert_eq!(world.resource::<SpatialIndex>().entries().len(), 2);

        world.despawn(gone);
        world.run_system_once(stage_positions);
        world.run_system_once(commit_spatial_index);
        let index = world.resource::<SpatialIndex>();
        assert_eq!(index.version(), 2);
        assert_eq!(index.resolve(StableId(1)), None);
        assert_eq!(index.resolve(StableId(2)), Some(1));
    }
}
