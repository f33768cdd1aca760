//! World capture and restore for the history store.
//!
//! A capture holds everything a resimulation depends on: every object's
//! domain records and position, the identity allocator, the spatial index and
//! each registry's buffer, metadata and summary. Restoring one replaces all of
//! that wholesale.

use std::collections::{BTreeMap, BTreeSet};

use bevy::prelude::*;
use sim_proto::{
    decode_capture, decode_payload, encode_capture, encode_payload, CaptureError, CaptureHeader,
    DomainRecordsState, RegistryState, WorldCapture,
};
use thiserror::Error;

use crate::{
    clock::{ClockError, TickClock},
    components::Position,
    history::{HistoryError, HistoryStore},
    identity::{IdentityAllocator, IdentityIndex, StableId},
    rebuild::{install_registry, Domain},
    registry::{RegistryBuffer, RegistryContinuity, RegistryKind, RegistryMetadata},
    scalar::Scalar,
    spatial::SpatialIndex,
};

#[derive(Debug, Error)]
pub enum RestoreError {
    #[error(transparent)]
    Clock(#[from] ClockError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("capture references unknown registry kind tag {0}")]
    UnknownKind(u8),
}

type RecordRow<R> = (u64, Option<Position>, R);

/// Decoded domain records waiting to be spawned.
type PendingRecords = Box<dyn FnOnce(&mut World, &mut BTreeMap<StableId, Entity>)>;
/// Decoded registry state waiting to be installed.
type PendingRegistry = Box<dyn FnOnce(&mut World)>;

/// Capture and restore hooks of one domain.
#[derive(Clone, Copy)]
struct DomainHooks {
    kind: RegistryKind,
    capture_records: fn(&mut World) -> Result<DomainRecordsState, CaptureError>,
    decode_records: fn(&DomainRecordsState) -> Result<PendingRecords, CaptureError>,
    capture_registry: fn(&mut World) -> Result<Option<RegistryState>, CaptureError>,
    decode_registry: fn(&RegistryState) -> Result<PendingRegistry, CaptureError>,
}

/// Domains whose records and registries take part in captures.
#[derive(Resource, Default, Clone)]
pub struct DomainCatalog {
    hooks: Vec<DomainHooks>,
}

impl DomainCatalog {
    pub fn register<D: Domain>(&mut self) {
        self.hooks.retain(|hooks| hooks.kind != D::KIND);
        self.hooks.push(DomainHooks {
            kind: D::KIND,
            capture_records: capture_records::<D>,
            decode_records: decode_records::<D>,
            capture_registry: capture_registry::<D>,
            decode_registry: decode_registry::<D>,
        });
        self.hooks.sort_by_key(|hooks| hooks.kind);
    }

    pub fn kinds(&self) -> Vec<RegistryKind> {
        self.hooks.iter().map(|hooks| hooks.kind).collect()
    }

    fn get(&self, kind: RegistryKind) -> Option<DomainHooks> {
        self.hooks.iter().copied().find(|hooks| hooks.kind == kind)
    }
}

fn capture_records<D: Domain>(world: &mut World) -> Result<DomainRecordsState, CaptureError> {
    let mut query = world.query::<(&StableId, &D::Record, Option<&Position>)>();
    let mut rows: Vec<RecordRow<D::Record>> = query
        .iter(world)
        .map(|(id, record, position)| (id.raw(), position.copied(), record.clone()))
        .collect();
    rows.sort_unstable_by_key(|row| row.0);
    Ok(DomainRecordsState {
        kind: D::KIND.as_u8(),
        count: rows.len() as u32,
        records: encode_payload(&rows)?,
    })
}

fn decode_records<D: Domain>(state: &DomainRecordsState) -> Result<PendingRecords, CaptureError> {
    let rows: Vec<RecordRow<D::Record>> = decode_payload(&state.records)?;
    Ok(Box::new(move |world: &mut World, spawned: &mut BTreeMap<StableId, Entity>| {
        for (raw, position, record) in rows {
            let id = StableId(raw);
            let entity = *spawned
                .entry(id)
                .or_insert_with(|| world.spawn(id).id());
            let mut object = world.entity_mut(entity);
            object.insert(record);
            if let Some(position) = position {
                object.insert(position);
            }
        }
    }))
}

fn capture_registry<D: Domain>(world: &mut World) -> Result<Option<RegistryState>, CaptureError> {
    let mut query = world.query::<(
        &RegistryMetadata,
        &RegistryBuffer<D::Snapshot>,
        &D::Summary,
    )>();
    let Some((metadata, buffer, summary)) = query.iter(world).next() else {
        return Ok(None);
    };
    Ok(Some(RegistryState {
        kind: metadata.kind.as_u8(),
        label: metadata.label.clone(),
        version: metadata.version,
        last_update_tick: metadata.last_update_tick,
        entry_count: metadata.entry_count as u32,
        continuity: metadata.continuity.to_state(),
        entries: encode_payload(buffer)?,
        summary: encode_payload(summary)?,
    }))
}

fn decode_registry<D: Domain>(state: &RegistryState) -> Result<PendingRegistry, CaptureError> {
    let buffer: RegistryBuffer<D::Snapshot> = decode_payload(&state.entries)?;
    let summary: D::Summary = decode_payload(&state.summary)?;
    let metadata = RegistryMetadata {
        kind: D::KIND,
        label: state.label.clone(),
        entry_count: state.entry_count as usize,
        version: state.version,
        last_update_tick: state.last_update_tick,
        continuity: RegistryContinuity::from_state(&state.continuity),
    };
    Ok(Box::new(move |world: &mut World| {
        let existing = world
            .query_filtered::<Entity, With<RegistryBuffer<D::Snapshot>>>()
            .iter(world)
            .next();
        let entity = match existing {
            Some(entity) => entity,
            None => install_registry::<D>(world, Some(&metadata.label)),
        };
        world.entity_mut(entity).insert((metadata, buffer, summary));
    }))
}

/// Build an unencoded capture of the current world.
pub fn capture_world(world: &mut World) -> Result<WorldCapture, CaptureError> {
    let catalog = world.resource::<DomainCatalog>().clone();
    let mut domains = Vec::with_capacity(catalog.hooks.len());
    let mut registries = Vec::with_capacity(catalog.hooks.len());
    for hooks in &catalog.hooks {
        domains.push((hooks.capture_records)(world)?);
        if let Some(registry) = (hooks.capture_registry)(world)? {
            registries.push(registry);
        }
    }

    let object_count = world.query::<&StableId>().iter(world).count();
    let clock = world.resource::<TickClock>();
    let spatial = world.resource::<SpatialIndex>().capture_state();
    let header = CaptureHeader::new(
        clock.observed_tick(),
        object_count,
        registries.len(),
        spatial.version,
    );
    WorldCapture {
        header,
        next_identity: world.resource::<IdentityAllocator>().peek_next(),
        sim_time: clock.sim_time().raw(),
        spatial,
        domains,
        registries,
    }
    .finalize()
}

/// Replace the world with `bytes`, then put the clock in playback at the
/// captured tick.
pub fn restore_world(world: &mut World, bytes: &[u8], start_tick: u64) -> Result<u64, RestoreError> {
    let capture = decode_capture(bytes)?;
    let catalog = world.resource::<DomainCatalog>().clone();

    // Everything is decoded before the world is touched.
    let mut pending_records = Vec::with_capacity(capture.domains.len());
    for state in &capture.domains {
        let kind = RegistryKind::from_u8(state.kind).ok_or(RestoreError::UnknownKind(state.kind))?;
        match catalog.get(kind) {
            Some(hooks) => pending_records.push((hooks.decode_records)(state)?),
            None => tracing::warn!(
                target: "sim_registry::history",
                %kind,
                "history.restore.domain_not_installed"
            ),
        }
    }
    let mut pending_registries = Vec::with_capacity(capture.registries.len());
    for state in &capture.registries {
        let kind = RegistryKind::from_u8(state.kind).ok_or(RestoreError::UnknownKind(state.kind))?;
        if let Some(hooks) = catalog.get(kind) {
            pending_registries.push((hooks.decode_registry)(state)?);
        }
    }

    let objects: Vec<Entity> = world
        .query_filtered::<Entity, With<StableId>>()
        .iter(world)
        .collect();
    for entity in objects {
        world.despawn(entity);
    }

    let mut spawned = BTreeMap::new();
    for apply in pending_records {
        apply(world, &mut spawned);
    }
    // Positioned objects that carry no domain record.
    let recorded: BTreeSet<StableId> = spawned.keys().copied().collect();
    for position in &capture.spatial.positions {
        let id = StableId(position.id);
        if !recorded.contains(&id) {
            let entity = world
                .spawn((
                    id,
                    Position::new(Scalar::from_raw(position.x), Scalar::from_raw(position.y)),
                ))
                .id();
            spawned.insert(id, entity);
        }
    }

    world
        .resource_mut::<IdentityAllocator>()
        .restore(capture.next_identity);
    {
        let mut index = world.resource_mut::<IdentityIndex>();
        index.clear();
        for (id, entity) in &spawned {
            index.insert(*id, *entity);
        }
    }
    world
        .resource_mut::<SpatialIndex>()
        .restore_state(&capture.spatial);

    for apply in pending_registries {
        apply(world);
    }

    let tick = capture.header.tick;
    world.resource_mut::<TickClock>().realign_playback(
        tick,
        Scalar::from_raw(capture.sim_time),
        start_tick,
    );
    tracing::info!(
        target: "sim_registry::history",
        tick,
        objects = spawned.len(),
        registries = capture.registries.len(),
        "history.restore.completed"
    );
    Ok(tick)
}

/// Restore the capture recorded at `tick` from the history store.
pub fn restore_from_history(world: &mut World, tick: u64) -> Result<u64, RestoreError> {
    let (capture, start_tick) = {
        let history = world.resource::<HistoryStore>();
        let capture = history.try_restore(tick)?;
        (capture, history.oldest_tick().unwrap_or(tick))
    };
    restore_world(world, &capture.blob, start_tick)
}

/// Capture the world at the end of a recorded tick.
pub fn capture_history(world: &mut World) {
    let capture = match capture_world(world) {
        Ok(capture) => capture,
        Err(err) => {
            tracing::error!(
                target: "sim_registry::history",
                error = %err,
                "history.capture.failed"
            );
            return;
        }
    };
    let tick = capture.header.tick;
    let hash = capture.header.hash;
    match encode_capture(&capture) {
        Ok(bytes) => {
            let evicted = world
                .resource_mut::<HistoryStore>()
                .capture(tick, bytes, hash);
            log::debug!("history.capture tick={tick} hash={hash:#x} evicted={evicted:?}");
        }
        Err(err) => tracing::error!(
            target: "sim_registry::history",
            tick,
            error = %err,
            "history.capture.encode_failed"
        ),
    }
}

/// Restore the playback tick the clock points at, if it changed.
pub fn apply_playback(world: &mut World) {
    let Some(tick) = world.resource::<TickClock>().pending_restore() else {
        return;
    };
    if let Err(err) = restore_from_history(world, tick) {
        tracing::warn!(
            target: "sim_registry::history",
            tick,
            error = %err,
            "history.restore.failed"
        );
        world.resource_mut::<TickClock>().mark_playback_applied(tick);
    }
}
