use bevy::prelude::*;
use serde::Serialize;
use thiserror::Error;

use crate::registry::{RegistryKind, RegistryMetadata};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no registry of kind {0} is registered")]
    UnknownRegistryKind(RegistryKind),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegistryDirectoryEntry {
    pub kind: RegistryKind,
    #[serde(skip)]
    pub handle: Entity,
    pub label: String,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct RegistryDirectory {
    entries: Vec<RegistryDirectoryEntry>,
    version: u64,
}

impl RegistryDirectory {
    /// Register `handle` for `kind`, replacing any previous registration of
    /// the same kind. Registering an identical entry is a no-op.
    pub fn register(&mut self, kind: RegistryKind, handle: Entity, label: impl Into<String>) {
        let entry = RegistryDirectoryEntry {
            kind,
            handle,
            label: label.into(),
        };
        match self.entries.binary_search_by_key(&kind, |existing| existing.kind) {
            Ok(index) if self.entries[index] == entry => {}
            Ok(index) => {
                self.entries[index] = entry;
                self.version += 1;
            }
            Err(index) => {
                self.entries.insert(index, entry);
                self.version += 1;
            }
        }
    }

    pub fn unregister(&mut self, kind: RegistryKind) -> Option<RegistryDirectoryEntry> {
        let index = self
            .entries
            .binary_search_by_key(&kind, |existing| existing.kind)
            .ok()?;
        self.version += 1;
        Some(self.entries.remove(index))
    }

    pub fn lookup(&self, kind: RegistryKind) -> Result<&RegistryDirectoryEntry, DirectoryError> {
        self.entries
            .binary_search_by_key(&kind, |existing| existing.kind)
            .map(|index| &self.entries[index])
            .map_err(|_| DirectoryError::UnknownRegistryKind(kind))
    }

    pub fn entries(&self) -> &[RegistryDirectoryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bumped only when membership changes.
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// Sync directory membership with the registry entities that exist.
pub fn refresh_registry_directory(
    mut directory: ResMut<RegistryDirectory>,
    registries: Query<(Entity, &RegistryMetadata)>,
) {
    let before = directory.version();
    let mut present = Vec::with_capacity(directory.len());
    for (entity, metadata) in registries.iter() {
        directory.register(metadata.kind, entity, metadata.label.as_str());
        present.push(metadata.kind);
    }
    let stale: Vec<RegistryKind> = directory
        .entries()
        .iter()
        .map(|entry| entry.kind)
        .filter(|kind| !present.contains(kind))
        .collect();
    for kind in stale {
        directory.unregister(kind);
    }
    if directory.version() != before {
        tracing::info!(
            target: "sim_registry::directory",
            version = directory.version(),
            registries = directory.len(),
            "registry_directory.membership_changed"
        );
    }
}
