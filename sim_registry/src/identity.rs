//! Stable object identities.
//!
//! ECS entity handles are recycled slots and change when history is restored,
//! so nothing ordered or captured uses them. Every simulation object instead
//! carries a [`StableId`] allocated monotonically by [`IdentityAllocator`];
//! whether an id still refers to a live object is answered by
//! [`IdentityIndex::is_alive`].

use std::collections::BTreeMap;
use std::fmt;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Component, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct StableId(pub u64);

impl StableId {
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Hands out identities. Ids are never reused, even after despawn.
#[derive(Resource, Debug, Clone, PartialEq, Eq)]
pub struct IdentityAllocator {
    next: u64,
}

impl Default for IdentityAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl IdentityAllocator {
    pub fn allocate(&mut self) -> StableId {
        let id = StableId(self.next);
        self.next = self.next.wrapping_add(1);
        id
    }

    pub fn peek_next(&self) -> u64 {
        self.next
    }

    pub(crate) fn restore(&mut self, next: u64) {
        self.next = next;
    }
}

/// Live lookup from stable identity to the entity currently holding it.
#[derive(Resource, Debug, Default, Clone)]
pub struct IdentityIndex {
    live: BTreeMap<StableId, Entity>,
}

impl IdentityIndex {
    pub fn is_alive(&self, id: StableId) -> bool {
        self.live.contains_key(&id)
    }

    pub fn entity(&self, id: StableId) -> Option<Entity> {
        self.live.get(&id).copied()
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = StableId> + '_ {
        self.live.keys().copied()
    }

    pub(crate) fn insert(&mut self, id: StableId, entity: Entity) {
        self.live.insert(id, entity);
    }

    pub(crate) fn remove(&mut self, id: StableId) -> Option<Entity> {
        self.live.remove(&id)
    }

    pub(crate) fn clear(&mut self) {
        self.live.clear();
    }
}

/// Rebuild the index from the objects that exist after gameplay ran.
pub fn refresh_identity_index(objects: Query<(Entity, &StableId)>, mut index: ResMut<IdentityIndex>) {
    index.live.clear();
    for (entity, id) in objects.iter() {
        if let Some(previous) = index.live.insert(*id, entity) {
            tracing::error!(
                target: "sim_registry::identity",
                id = %id,
                ?previous,
                ?entity,
                "identity.duplicate_live_id"
            );
        }
    }
}

/// Despawn the object holding `id`. Returns `false` when it is no longer alive.
pub fn despawn_object(world: &mut World, id: StableId) -> bool {
    let entity = world.resource_mut::<IdentityIndex>().remove(id);
    match entity {
        Some(entity) => world.despawn(entity),
        None => false,
    }
}
