//! Wire format for history captures.
//!
//! A [`WorldCapture`] is the opaque state blob stored per tick by the history
//! store. Domain records and registry buffers are nested as bincode payloads so
//! this crate stays independent of the simulation types that produce them.

use ahash::RandomState;
use serde::{Deserialize, Serialize};
use std::hash::{BuildHasher, Hasher};
use thiserror::Error;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CaptureHeader {
    pub tick: u64,
    pub object_count: u32,
    pub registry_count: u32,
    pub spatial_version: u32,
    pub hash: u64,
}

impl CaptureHeader {
    pub fn new(
        tick: u64,
        object_count: usize,
        registry_count: usize,
        spatial_version: u32,
    ) -> Self {
        Self {
            tick,
            object_count: object_count as u32,
            registry_count: registry_count as u32,
            spatial_version,
            hash: 0,
        }
    }
}

/// A staged position held by the spatial index, in fixed-point raw units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct PositionState {
    pub id: u64,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpatialState {
    pub version: u32,
    pub positions: Vec<PositionState>,
}

/// Source records of one domain, encoded by the owning simulation crate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainRecordsState {
    pub kind: u8,
    pub count: u32,
    pub records: Vec<u8>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ContinuityState {
    pub has_spatial_data: bool,
    pub requires_spatial_sync: bool,
    pub spatial_version: u32,
    pub resolved: u32,
    pub fallback: u32,
    pub unmapped: u32,
}

/// Registry buffer, metadata and aggregates of one registry kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryState {
    pub kind: u8,
    pub label: String,
    pub version: u64,
    pub last_update_tick: u64,
    pub entry_count: u32,
    pub continuity: ContinuityState,
    pub entries: Vec<u8>,
    pub summary: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorldCapture {
    pub header: CaptureHeader,
    pub next_identity: u64,
    pub sim_time: i64,
    pub spatial: SpatialState,
    pub domains: Vec<DomainRecordsState>,
    pub registries: Vec<RegistryState>,
}

impl WorldCapture {
    pub fn finalize(mut self) -> Result<Self, CaptureError> {
        self.header.hash = hash_capture(&self)?;
        Ok(self)
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("capture encoding failed: {0}")]
    Encode(#[source] bincode::Error),
    #[error("capture decoding failed: {0}")]
    Decode(#[source] bincode::Error),
    #[error("capture hash mismatch at tick {tick}: stored {stored:#x}, computed {computed:#x}")]
    HashMismatch { tick: u64, stored: u64, computed: u64 },
}

/// Hash of the bincode encoding with the header hash zeroed.
pub fn hash_capture(capture: &WorldCapture) -> Result<u64, CaptureError> {
    let mut clone = capture.clone();
    clone.header.hash = 0;
    let encoded = bincode::serialize(&clone).map_err(CaptureError::Encode)?;
    Ok(hash_bytes(&encoded))
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = RandomState::with_seeds(0, 0, 0, 0).build_hasher();
    hasher.write(bytes);
    hasher.finish()
}

pub fn encode_capture(capture: &WorldCapture) -> Result<Vec<u8>, CaptureError> {
    bincode::serialize(capture).map_err(CaptureError::Encode)
}

/// Decode a capture and verify its header hash.
pub fn decode_capture(bytes: &[u8]) -> Result<WorldCapture, CaptureError> {
    let capture: WorldCapture = bincode::deserialize(bytes).map_err(CaptureError::Decode)?;
    let computed = hash_capture(&capture)?;
    if computed != capture.header.hash {
        return Err(CaptureError::HashMismatch {
            tick: capture.header.tick,
            stored: capture.header.hash,
            computed,
        });
    }
    Ok(capture)
}

pub fn encode_payload<T: Serialize>(value: &T) -> Result<Vec<u8>, CaptureError> {
    bincode::serialize(value).map_err(CaptureError::Encode)
}

pub fn decode_payload<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, CaptureError> {
    bincode::deserialize(bytes).map_err(CaptureError::Decode)
}
