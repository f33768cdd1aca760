use std::fmt::Debug;

use bevy::prelude::*;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    clock::TickClock,
    components::Position,
    config::SimulationConfigHandle,
    identity::{IdentityIndex, StableId},
    registry::{RegistryBuffer, RegistryEntry, RegistryKind, RegistryMetadata, RegistrySnapshot},
    registry_builder::{RegistryBuilder, RegistryFlagAccumulator, SpatialTally},
    spatial::{SpatialIndex, SpatialResolution},
};

/// A registry domain: which source component it reads, what it keeps per
/// entry and what it aggregates.
pub trait Domain: Send + Sync + 'static {
    const KIND: RegistryKind;

    /// Entries whose snapshot flags intersect this mask are counted and
    /// handed to [`Domain::finish`].
    const FLAG_MASK: u32 = 0;

    type Record: Component + Clone + Serialize + DeserializeOwned;
    type Snapshot: RegistrySnapshot + Serialize + DeserializeOwned + PartialEq + Debug;
    type Summary: Component + Clone + Default + Serialize + DeserializeOwned + PartialEq + Debug;

    fn snapshot(record: &Self::Record) -> Self::Snapshot;

    fn accumulate(summary: &mut Self::Summary, snapshot: &Self::Snapshot);

    /// Another object this snapshot points at, if any.
    fn reference(_snapshot: &Self::Snapshot) -> Option<StableId> {
        None
    }

    /// Folds an entry whose [`Domain::reference`] is no longer alive.
    fn accumulate_orphan(summary: &mut Self::Summary, snapshot: &Self::Snapshot) {
        Self::accumulate(summary, snapshot);
    }

    fn finish(_summary: &mut Self::Summary, _flagged: usize) {}

    fn label() -> &'static str {
        Self::KIND.as_str()
    }
}

/// Rebuild the registry of `D` from the live source records.
pub fn rebuild_registry<D: Domain>(
    clock: Res<TickClock>,
    spatial: Res<SpatialIndex>,
    identities: Res<IdentityIndex>,
    config: Res<SimulationConfigHandle>,
    sources: Query<(&StableId, &D::Record, Option<&Position>)>,
    mut registries: Query<(
        &mut RegistryMetadata,
        &mut RegistryBuffer<D::Snapshot>,
        &mut D::Summary,
    )>,
) {
    let policy = config.config().spatial.unindexed_position;
    let tick = clock.current_tick();
    let spatial_version = spatial.version();

    for (mut metadata, mut buffer, mut summary) in registries.iter_mut() {
        let mut builder = RegistryBuilder::with_capacity(sources.iter().len());
        let mut tally = SpatialTally::default();
        let mut flagged = RegistryFlagAccumulator::new(D::FLAG_MASK);
        let mut next_summary = D::Summary::default();

        for (id, record, position) in sources.iter() {
            let classification = spatial.classify(*id, position, policy);
            let snapshot = D::snapshot(record);
            tally.record(classification.resolution);
            flagged.record(snapshot.flags());
            match D::reference(&snapshot) {
                Some(target) if !identities.is_alive(target) => {
                    D::accumulate_orphan(&mut next_summary, &snapshot)
                }
                _ => D::accumulate(&mut next_summary, &snapshot),
            }
            builder.add(RegistryEntry {
                id: *id,
                snapshot,
                cell_id: classification.cell_id,
                resolution: classification.resolution,
                spatial_version: (classification.resolution == SpatialResolution::Resolved)
                    .then_some(spatial_version),
            });
        }
        D::finish(&mut next_summary, flagged.count());

        match builder.apply_to(&mut buffer, &mut metadata, tick) {
            Ok(count) => {
                tally.write_continuity(&mut metadata.continuity, spatial_version);
                *summary = next_summary;
                log::trace!(
                    "registry.rebuilt kind={} entries={count} version={}",
                    D::KIND,
                    metadata.version
                );
            }
            Err(err) => tracing::error!(
                target: "sim_registry::registry",
                kind = %D::KIND,
                tick,
                error = %err,
                "registry.rebuild.rejected"
            ),
        }
    }
}

/// Spawn the registry entity of `D`, replacing one that already exists.
pub fn install_registry<D: Domain>(world: &mut World, label: Option<&str>) -> Entity {
    let existing: Vec<Entity> = world
        .query_filtered::<Entity, With<RegistryBuffer<D::Snapshot>>>()
        .iter(world)
        .collect();
    for entity in existing {
        world.despawn(entity);
        tracing::debug!(
            target: "sim_registry::registry",
            kind = %D::KIND,
            ?entity,
            "registry.install.replaced"
        );
    }
    world
        .spawn((
            RegistryMetadata::new(D::KIND, label.unwrap_or(D::label())),
            RegistryBuffer::<D::Snapshot>::default(),
            D::Summary::default(),
        ))
        .id()
}

/// Read-only view of one registry, for tests and tooling.
pub fn read_registry<D: Domain>(
    world: &mut World,
) -> Option<(RegistryMetadata, RegistryBuffer<D::Snapshot>, D::Summary)> {
    let mut query = world.query::<(
        &RegistryMetadata,
        &RegistryBuffer<D::Snapshot>,
        &D::Summary,
    )>();
    query
        .iter(world)
        .next()
        .map(|(metadata, buffer, summary)| (metadata.clone(), buffer.clone(), summary.clone()))
}
