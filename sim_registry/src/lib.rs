//! Deterministic tick clock, spatial index and per-domain registries.
//!
//! Every recorded tick runs the phases of [`TickPhase`] in order: the clock
//! advances, gameplay mutates objects, the spatial index commits, registries
//! rebuild, the directory refreshes, instrumentation samples and the world is
//! captured into history. In playback the clock restores a capture instead.

pub mod clock;
pub mod components;
pub mod config;
pub mod directory;
pub mod domains;
pub mod hashing;
pub mod history;
pub mod identity;
pub mod instrumentation;
pub mod rebuild;
pub mod registry;
pub mod registry_builder;
pub mod scalar;
pub mod scenario;
pub mod snapshot;
pub mod spatial;

use std::{sync::Arc, time::Duration};

use bevy::prelude::*;

pub use clock::{
    ClockError, ClockRequest, ClockStep, FixedStepAccumulator, PendingClockRequest, RewindMode,
    RewindState, ScrubDirection, TickClock,
};
pub use components::Position;
pub use config::{
    load_simulation_config_from_env, SimulationConfig, SimulationConfigHandle,
    SimulationConfigMetadata, UnindexedPositionPolicy,
};
pub use directory::{DirectoryError, RegistryDirectory, RegistryDirectoryEntry};
pub use history::{HistoryCapture, HistoryError, HistoryStore};
pub use identity::{IdentityAllocator, IdentityIndex, StableId};
pub use instrumentation::{
    HealthCounters, InstrumentationSample, RegistryHealth, RegistryHealthFlags,
    RegistryHealthLevel, RegistryInstrumentation,
};
pub use rebuild::{install_registry, read_registry, Domain};
pub use registry::{
    RegistryBuffer, RegistryContinuity, RegistryEntry, RegistryKind, RegistryMetadata,
    RegistrySnapshot,
};
pub use registry_builder::{RegistryBuildError, RegistryBuilder};
pub use scalar::{scalar_from_f32, Scalar};
pub use scenario::ScenarioSettings;
pub use snapshot::{capture_world, restore_from_history, DomainCatalog, RestoreError};
pub use spatial::{CellId, SpatialIndex, SpatialResolution, UNRESOLVED_CELL};

/// Ordered phases of one update.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickPhase {
    Clock,
    Gameplay,
    SpatialCommit,
    RegistryRebuild,
    DirectoryRefresh,
    Instrumentation,
    HistoryCapture,
}

/// Construct a headless [`App`] with the full tick pipeline, configured from
/// `SIM_REGISTRY_CONFIG_PATH` or the builtin defaults.
pub fn build_headless_app() -> App {
    let (config, metadata) = load_simulation_config_from_env();
    build_headless_app_with_config(config, metadata)
}

pub fn build_headless_app_with_config(
    config: Arc<SimulationConfig>,
    metadata: SimulationConfigMetadata,
) -> App {
    let mut app = App::new();

    let history = HistoryStore::new(config.clock.max_history_ticks);
    app.insert_resource(SimulationConfigHandle::new(config))
        .insert_resource(metadata)
        .insert_resource(history)
        .insert_resource(IdentityAllocator::default())
        .insert_resource(IdentityIndex::default())
        .insert_resource(RegistryDirectory::default())
        .insert_resource(DomainCatalog::default())
        .add_plugins(MinimalPlugins);
    clock::install_clock(&mut app.world);
    spatial::install_spatial_index(&mut app.world);
    instrumentation::install_instrumentation(&mut app.world);

    app.configure_sets(
        Update,
        (
            TickPhase::Clock,
            TickPhase::Gameplay,
            TickPhase::SpatialCommit,
            TickPhase::RegistryRebuild,
            TickPhase::DirectoryRefresh,
            TickPhase::Instrumentation,
            TickPhase::HistoryCapture,
        )
            .chain(),
    )
    .configure_sets(Update, TickPhase::Gameplay.run_if(clock::clock_advanced))
    .configure_sets(Update, TickPhase::SpatialCommit.run_if(clock::clock_advanced))
    .configure_sets(Update, TickPhase::RegistryRebuild.run_if(clock::clock_advanced))
    .configure_sets(Update, TickPhase::HistoryCapture.run_if(clock::clock_advanced))
    .add_systems(
        Update,
        (
            clock::apply_pending_clock_requests,
            clock::step_clock,
            snapshot::apply_playback,
        )
            .chain()
            .in_set(TickPhase::Clock),
    )
    .add_systems(Update, scenario::drive_scenario.in_set(TickPhase::Gameplay))
    .add_systems(
        Update,
        (
            identity::refresh_identity_index,
            spatial::stage_positions,
            spatial::commit_spatial_index,
        )
            .chain()
            .in_set(TickPhase::SpatialCommit),
    )
    .add_systems(
        Update,
        directory::refresh_registry_directory.in_set(TickPhase::DirectoryRefresh),
    )
    .add_systems(
        Update,
        instrumentation::sample_registry_health.in_set(TickPhase::Instrumentation),
    )
    .add_systems(
        Update,
        snapshot::capture_history.in_set(TickPhase::HistoryCapture),
    );

    domains::add_domain_registries(&mut app);

    app
}

/// Execute a single update of the tick pipeline.
pub fn run_tick(app: &mut App) {
    app.update();
}

pub fn run_ticks(app: &mut App, count: u64) {
    for _ in 0..count {
        run_tick(app);
    }
}

/// Run as many ticks as a frame of `elapsed` wall time owes.
pub fn run_frame(app: &mut App, accumulator: &mut FixedStepAccumulator, elapsed: Duration) -> u32 {
    let steps = accumulator.push_frame(elapsed);
    for _ in 0..steps {
        run_tick(app);
    }
    steps
}

/// Queue a clock transition for the next update. Returns the request it
/// superseded, if any.
pub fn request_clock(app: &mut App, request: ClockRequest) -> Option<ClockRequest> {
    app.world
        .resource_mut::<PendingClockRequest>()
        .submit(request)
}

/// Enter playback at `tick` and restore it immediately. On failure the clock
/// is left as it was.
pub fn rewind_to(app: &mut App, tick: u64) -> Result<(), RestoreError> {
    let before = app.world.resource::<TickClock>().clone();
    app.world
        .resource_scope(|world, mut clock: Mut<TickClock>| {
            clock.begin_playback(tick, world.resource::<HistoryStore>())
        })?;
    if let Err(err) = snapshot::restore_from_history(&mut app.world, tick) {
        app.world.insert_resource(before);
        return Err(err);
    }
    Ok(())
}

/// Leave playback and keep recording from the restored tick. Captures after
/// it are dropped.
pub fn resume_recording(app: &mut App) -> Result<u64, ClockError> {
    let tick = app.world.resource_mut::<TickClock>().resume_recording()?;
    app.world.resource_mut::<HistoryStore>().truncate_after(tick);
    Ok(tick)
}

/// Seed the demo scenario and let it drive gameplay on every recorded tick.
pub fn seed_scenario(app: &mut App, settings: ScenarioSettings) {
    app.insert_resource(settings);
    scenario::seed_scenario(&mut app.world, settings);
}
