//! Registry health sampling.
//!
//! Each pass walks the directory and grades every registry against the
//! current tick and spatial version. Levels are advisory; nothing here stops
//! the simulation.

use std::collections::{BTreeMap, VecDeque};

use bevy::prelude::*;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    clock::TickClock,
    config::{InstrumentationConfig, SimulationConfigHandle},
    directory::RegistryDirectory,
    registry::{RegistryKind, RegistryMetadata},
    spatial::SpatialIndex,
};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct RegistryHealthFlags: u32 {
        /// Spatial index moved on more than the warning delta since the rebuild.
        const UPDATE_FREQUENCY_WARNING = 1 << 0;
        const SPATIAL_DRIFT_CRITICAL = 1 << 1;
        const STALE_ENTRIES = 1 << 2;
        const STALE_ENTRIES_CRITICAL = 1 << 3;
        const MISSED_UPDATES = 1 << 4;
        const UPDATE_OVERDUE = 1 << 5;
        const NEVER_BUILT = 1 << 6;
        /// Directory handle no longer points at a registry.
        const REGISTRY_MISSING = 1 << 7;
    }
}

impl RegistryHealthFlags {
    const CRITICAL: Self = Self::SPATIAL_DRIFT_CRITICAL
        .union(Self::STALE_ENTRIES_CRITICAL)
        .union(Self::UPDATE_OVERDUE);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryHealthLevel {
    Healthy,
    Warning,
    Critical,
    Failure,
}

impl RegistryHealthLevel {
    pub fn from_flags(flags: RegistryHealthFlags) -> Self {
        if flags.contains(RegistryHealthFlags::REGISTRY_MISSING) {
            RegistryHealthLevel::Failure
        } else if flags.intersects(RegistryHealthFlags::CRITICAL) {
            RegistryHealthLevel::Critical
        } else if !flags.is_empty() {
            RegistryHealthLevel::Warning
        } else {
            RegistryHealthLevel::Healthy
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryHealth {
    pub level: RegistryHealthLevel,
    pub stale_entry_count: u32,
    pub stale_entry_ratio: f32,
    pub spatial_version_delta: u32,
    pub ticks_since_last_update: u64,
    pub flags: RegistryHealthFlags,
}

impl RegistryHealth {
    pub fn missing() -> Self {
        Self {
            level: RegistryHealthLevel::Failure,
            stale_entry_count: 0,
            stale_entry_ratio: 0.0,
            spatial_version_delta: 0,
            ticks_since_last_update: 0,
            flags: RegistryHealthFlags::REGISTRY_MISSING,
        }
    }
}

/// Grade one registry against the observed tick and spatial version.
pub fn evaluate_health(
    metadata: &RegistryMetadata,
    spatial_version: u32,
    current_tick: u64,
    thresholds: &InstrumentationConfig,
) -> RegistryHealth {
    let continuity = &metadata.continuity;
    let mut flags = RegistryHealthFlags::empty();

    // Registries that never saw a position have nothing to drift from.
    let spatial_version_delta = if continuity.has_spatial_data || continuity.requires_spatial_sync {
        spatial_version.saturating_sub(continuity.spatial_version)
    } else {
        0
    };
    if spatial_version_delta >= thresholds.spatial_delta_critical {
        flags |= RegistryHealthFlags::SPATIAL_DRIFT_CRITICAL;
    }
    if spatial_version_delta > thresholds.spatial_delta_warning {
        flags |= RegistryHealthFlags::UPDATE_FREQUENCY_WARNING;
    }

    let mut stale_entry_count = 0u32;
    if continuity.spatial_version != spatial_version {
        stale_entry_count += continuity.spatial_resolved_count;
    }
    if continuity.requires_spatial_sync {
        stale_entry_count += continuity.spatial_fallback_count;
    }
    let stale_entry_ratio = if metadata.entry_count == 0 {
        0.0
    } else {
        stale_entry_count as f32 / metadata.entry_count as f32
    };
    if stale_entry_count > 0 {
        if stale_entry_ratio >= thresholds.stale_ratio_critical {
            flags |= RegistryHealthFlags::STALE_ENTRIES_CRITICAL;
        } else if stale_entry_ratio >= thresholds.stale_ratio_warning {
            flags |= RegistryHealthFlags::STALE_ENTRIES;
        }
    }

    let ticks_since_last_update = current_tick.saturating_sub(metadata.last_update_tick);
    if metadata.version == 0 {
        flags |= RegistryHealthFlags::NEVER_BUILT;
    } else if ticks_since_last_update >= thresholds.stale_ticks_critical {
        flags |= RegistryHealthFlags::UPDATE_OVERDUE;
    } else if ticks_since_last_update >= thresholds.stale_ticks_warning {
        flags |= RegistryHealthFlags::MISSED_UPDATES;
    }

    RegistryHealth {
        level: RegistryHealthLevel::from_flags(flags),
        stale_entry_count,
        stale_entry_ratio,
        spatial_version_delta,
        ticks_since_last_update,
        flags,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentationSample {
    pub tick: u64,
    pub label: String,
    pub kind: RegistryKind,
    pub health_level: RegistryHealthLevel,
    pub health_flags: RegistryHealthFlags,
    pub entry_count: usize,
    pub version: u64,
    pub last_update_tick: u64,
    pub spatial_version: u32,
    pub spatial_version_delta: u32,
}

/// Registries per level in the most recent pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCounters {
    pub healthy: u32,
    pub warning: u32,
    pub critical: u32,
    pub failure: u32,
}

impl HealthCounters {
    fn record(&mut self, level: RegistryHealthLevel) {
        match level {
            RegistryHealthLevel::Healthy => self.healthy += 1,
            RegistryHealthLevel::Warning => self.warning += 1,
            RegistryHealthLevel::Critical => self.critical += 1,
            RegistryHealthLevel::Failure => self.failure += 1,
        }
    }
}

#[derive(Serialize)]
struct InstrumentationExport<'a> {
    last_pass_tick: Option<u64>,
    counters: HealthCounters,
    samples: Vec<&'a InstrumentationSample>,
}

#[derive(Resource, Debug, Clone)]
pub struct RegistryInstrumentation {
    sample_cap: usize,
    samples: VecDeque<InstrumentationSample>,
    counters: HealthCounters,
    last_pass_tick: Option<u64>,
    current: BTreeMap<RegistryKind, RegistryHealth>,
}

impl Default for RegistryInstrumentation {
    fn default() -> Self {
        Self::new(InstrumentationConfig::default().sample_cap)
    }
}

impl RegistryInstrumentation {
    pub fn new(sample_cap: usize) -> Self {
        Self {
            sample_cap: sample_cap.max(1),
            samples: VecDeque::new(),
            counters: HealthCounters::default(),
            last_pass_tick: None,
            current: BTreeMap::new(),
        }
    }

    pub fn samples(&self) -> impl Iterator<Item = &InstrumentationSample> {
        self.samples.iter()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn counters(&self) -> HealthCounters {
        self.counters
    }

    pub fn last_pass_tick(&self) -> Option<u64> {
        self.last_pass_tick
    }

    pub fn health(&self, kind: RegistryKind) -> Option<&RegistryHealth> {
        self.current.get(&kind)
    }

    fn begin_pass(&mut self, tick: u64) {
        self.counters = HealthCounters::default();
        self.last_pass_tick = Some(tick);
    }

    fn push(&mut self, sample: InstrumentationSample, health: RegistryHealth) {
        self.counters.record(health.level);
        let previous = self.current.insert(sample.kind, health);
        let previous_level = previous.map_or(RegistryHealthLevel::Healthy, |health| health.level);
        if previous_level == RegistryHealthLevel::Healthy
            && sample.health_level != RegistryHealthLevel::Healthy
        {
            tracing::warn!(
                target: "sim_registry::instrumentation",
                kind = %sample.kind,
                level = ?sample.health_level,
                flags = ?sample.health_flags,
                tick = sample.tick,
                "registry_health.degraded"
            );
        }
        if self.samples.len() >= self.sample_cap {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Recent samples and the current counters as JSON.
    pub fn export_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&InstrumentationExport {
            last_pass_tick: self.last_pass_tick,
            counters: self.counters,
            samples: self.samples.iter().collect(),
        })
    }
}

pub fn install_instrumentation(world: &mut World) {
    let config = world.resource::<SimulationConfigHandle>().get();
    world.insert_resource(RegistryInstrumentation::new(
        config.instrumentation.sample_cap,
    ));
}

pub fn sample_registry_health(
    clock: Res<TickClock>,
    spatial: Res<SpatialIndex>,
    config: Res<SimulationConfigHandle>,
    directory: Res<RegistryDirectory>,
    registries: Query<&RegistryMetadata>,
    mut instrumentation: ResMut<RegistryInstrumentation>,
) {
    let tick = clock.observed_tick();
    let spatial_version = spatial.version();
    let thresholds = &config.config().instrumentation;

    instrumentation.begin_pass(tick);
    for entry in directory.entries() {
        let (sample, health) = match registries.get(entry.handle) {
            Ok(metadata) => {
                let health = evaluate_health(metadata, spatial_version, tick, thresholds);
                let sample = InstrumentationSample {
                    tick,
                    label: metadata.label.clone(),
                    kind: metadata.kind,
                    health_level: health.level,
                    health_flags: health.flags,
                    entry_count: metadata.entry_count,
                    version: metadata.version,
                    last_update_tick: metadata.last_update_tick,
                    spatial_version: metadata.continuity.spatial_version,
                    spatial_version_delta: health.spatial_version_delta,
                };
                (sample, health)
            }
            Err(_) => {
                let health = RegistryHealth::missing();
                let sample = InstrumentationSample {
                    tick,
                    label: entry.label.clone(),
                    kind: entry.kind,
                    health_level: health.level,
                    health_flags: health.flags,
                    entry_count: 0,
                    version: 0,
                    last_update_tick: 0,
                    spatial_version: 0,
                    spatial_version_delta: 0,
                };
                (sample, health)
            }
        };
        instrumentation.push(sample, health);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{directory::refresh_registry_directory, registry::RegistryContinuity};
    use bevy_ecs::system::RunSystemOnce;
    use sim_proto::SpatialState;

    fn spatial_at_version(version: u32) -> SpatialIndex {
        let mut index = SpatialIndex::default();
        index.restore_state(&SpatialState {
            version,
            positions: Vec::new(),
        });
        index
    }

    fn lagging_bands() -> RegistryMetadata {
        RegistryMetadata {
            entry_count: 10,
            version: 1,
            last_update_tick: 0,
            continuity: RegistryContinuity {
                has_spatial_data: true,
                requires_spatial_sync: false,
                spatial_version: 3,
                spatial_resolved_count: 2,
                spatial_fallback_count: 0,
                spatial_unmapped_count: 8,
            },
            ..RegistryMetadata::new(RegistryKind::Bands, "bands")
        }
    }

    #[test]
    fn spatial_lag_of_two_is_a_warning() {
        let mut world = World::default();
        world.insert_resource(SimulationConfigHandle::default());
        world.insert_resource(TickClock::default());
        world.insert_resource(spatial_at_version(5));
        world.insert_resource(RegistryDirectory::default());
        world.insert_resource(RegistryInstrumentation::new(16));
        world.spawn(lagging_bands());

        world.run_system_once(refresh_registry_directory);
        world.run_system_once(sample_registry_health);

        let instrumentation = world.resource::<RegistryInstrumentation>();
        assert_eq!(instrumentation.sample_count(), 1);
        let sample = instrumentation.samples().next().expect("one sample");
        assert_eq!(sample.health_level, RegistryHealthLevel::Warning);
        assert!(sample
            .health_flags
            .contains(RegistryHealthFlags::UPDATE_FREQUENCY_WARNING));
        assert_eq!(sample.spatial_version_delta, 2);
        assert_eq!(instrumentation.counters().warning, 1);
        assert_eq!(instrumentation.counters().healthy, 0);

        insta::assert_debug_snapshot!(instrumentation.health(RegistryKind::Bands), @r###"
        Some(
            RegistryHealth {
                level: Warning,
                stale_entry_count: 2,
                stale_entry_ratio: 0.2,
                spatial_version_delta: 2,
                ticks_since_last_update: 0,
                flags: RegistryHealthFlags(
                    UPDATE_FREQUENCY_WARNING,
                ),
            },
        )
        "###);
    }

    #[test]
    fn counters_reflect_only_the_latest_pass() {
        let mut world = World::default();
        world.insert_resource(SimulationConfigHandle::default());
        world.insert_resource(TickClock::default());
        world.insert_resource(spatial_at_version(5));
        world.insert_resource(RegistryDirectory::default());
        world.insert_resource(RegistryInstrumentation::new(3));
        let bands = world.spawn(lagging_bands()).id();

        world.run_system_once(refresh_registry_directory);
        world.run_system_once(sample_registry_health);
        world.run_system_once(sample_registry_health);
        {
            let instrumentation = world.resource::<RegistryInstrumentation>();
            assert_eq!(instrumentation.sample_count(), 2);
            assert_eq!(instrumentation.counters().warning, 1);
        }

        // Directory still points at the despawned entity until refreshed.
        world.despawn(bands);
        world.run_system_once(sample_registry_health);
        world.run_system_once(sample_registry_health);
        let instrumentation = world.resource::<RegistryInstrumentation>();
        assert_eq!(instrumentation.sample_count(), 3);
        assert_eq!(
            instrumentation.counters(),
            HealthCounters {
                failure: 1,
                ..HealthCounters::default()
            }
        );
        let json = instrumentation.export_json().expect("export");
        assert!(json.contains("\"health_level\": \"failure\""));
    }

    #[test]
    fn grading_thresholds() {
        let thresholds = InstrumentationConfig::default();
        let mut metadata = RegistryMetadata::new(RegistryKind::Creatures, "creatures");
        let health = evaluate_health(&metadata, 0, 0, &thresholds);
        assert_eq!(health.flags, RegistryHealthFlags::NEVER_BUILT);
        assert_eq!(health.level, RegistryHealthLevel::Warning);

        metadata.version = 4;
        metadata.last_update_tick = 10;
        metadata.entry_count = 4;
        metadata.continuity = RegistryContinuity {
            has_spatial_data: true,
            requires_spatial_sync: true,
            spatial_version: 2,
            spatial_resolved_count: 1,
            spatial_fallback_count: 3,
            spatial_unmapped_count: 0,
        };
        let health = evaluate_health(&metadata, 12, 30, &thresholds);
        assert_eq!(health.stale_entry_count, 4);
        assert!(health.flags.contains(
            RegistryHealthFlags::SPATIAL_DRIFT_CRITICAL
                | RegistryHealthFlags::STALE_ENTRIES_CRITICAL
                | RegistryHealthFlags::UPDATE_OVERDUE
        ));
        assert_eq!(health.level, RegistryHealthLevel::Critical);

        // Non-spatial registries never report drift.
        metadata.continuity = RegistryContinuity {
            spatial_unmapped_count: 4,
            ..RegistryContinuity::default()
        };
        metadata.last_update_tick = 30;
        let health = evaluate_health(&metadata, 12, 30, &thresholds);
        assert_eq!(health.spatial_version_delta, 0);
        assert_eq!(health.level, RegistryHealthLevel::Healthy);
    }
}
