use std::{
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

use crate::scalar::{scalar_from_f32, Scalar};

pub const BUILTIN_SIMULATION_CONFIG: &str = include_str!("data/simulation_config.json");
pub const SIMULATION_CONFIG_ENV: &str = "SIM_REGISTRY_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub clock: ClockConfig,
    pub spatial: SpatialConfig,
    pub instrumentation: InstrumentationConfig,
}

impl SimulationConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_SIMULATION_CONFIG)
                .expect("builtin simulation config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, SimulationConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| SimulationConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = SimulationConfig::from_json_str(&contents)?;
        Ok(config)
    }
}

#[derive(Debug, Error)]
pub enum SimulationConfigError {
    #[error("failed to parse simulation config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read simulation config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Mode the clock starts in. Playback needs history and cannot be initial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialMode {
    #[default]
    Record,
    Paused,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    pub fixed_delta_time: f32,
    pub ticks_per_second: u32,
    pub max_history_ticks: usize,
    pub max_steps_per_frame: u32,
    pub initial_mode: InitialMode,
}

impl ClockConfig {
    pub fn fixed_delta(&self) -> Scalar {
        scalar_from_f32(self.fixed_delta_time)
    }
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            fixed_delta_time: 1.0 / 30.0,
            ticks_per_second: 30,
            max_history_ticks: 256,
            max_steps_per_frame: 8,
            initial_mode: InitialMode::Record,
        }
    }
}

/// How an object that has a position but is absent from the committed grid is
/// classified. Objects without any position are always unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnindexedPositionPolicy {
    #[default]
    Fallback,
    Unmapped,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialConfig {
    pub cell_size: f32,
    pub origin_x: f32,
    pub origin_y: f32,
    pub width: u32,
    pub height: u32,
    pub unindexed_position: UnindexedPositionPolicy,
}

impl SpatialConfig {
    pub fn cell_size(&self) -> Scalar {
        let size = scalar_from_f32(self.cell_size);
        if size.raw() <= 0 {
            Scalar::one()
        } else {
            size
        }
    }

    pub fn origin(&self) -> (Scalar, Scalar) {
        (scalar_from_f32(self.origin_x), scalar_from_f32(self.origin_y))
    }
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            cell_size: 8.0,
            origin_x: 0.0,
            origin_y: 0.0,
            width: 64,
            height: 64,
            unindexed_position: UnindexedPositionPolicy::Fallback,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstrumentationConfig {
    pub sample_cap: usize,
    pub spatial_delta_warning: u32,
    pub spatial_delta_critical: u32,
    pub stale_ticks_warning: u64,
    pub stale_ticks_critical: u64,
    pub stale_ratio_warning: f32,
    pub stale_ratio_critical: f32,
}

impl Default for InstrumentationConfig {
    fn default() -> Self {
        Self {
            sample_cap: 512,
            spatial_delta_warning: 1,
            spatial_delta_critical: 8,
            stale_ticks_warning: 2,
            stale_ticks_critical: 10,
            stale_ratio_warning: 0.25,
            stale_ratio_critical: 0.75,
        }
    }
}

#[derive(Resource, Debug, Clone)]
pub struct SimulationConfigHandle(pub Arc<SimulationConfig>);

impl SimulationConfigHandle {
    pub fn new(config: Arc<SimulationConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<SimulationConfig> {
        Arc::clone(&self.0)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.0
    }
}

impl Default for SimulationConfigHandle {
    fn default() -> Self {
        Self::new(SimulationConfig::builtin())
    }
}

#[derive(Resource, Debug, Clone, Default)]
pub struct SimulationConfigMetadata {
    path: Option<PathBuf>,
}

impl SimulationConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

pub fn load_simulation_config_from_env() -> (Arc<SimulationConfig>, SimulationConfigMetadata) {
    if let Some(path) = env::var(SIMULATION_CONFIG_ENV).ok().map(PathBuf::from) {
        match SimulationConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "sim_registry::config",
                    path = %path.display(),
                    "simulation_config.loaded=file"
                );
                return (Arc::new(config), SimulationConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "sim_registry::config",
                    path = %path.display(),
                    error = %err,
                    "simulation_config.load_failed"
                );
            }
        }
    }

    let config = SimulationConfig::builtin();
    tracing::info!(
        target: "sim_registry::config",
        "simulation_config.loaded=builtin"
    );
    (config, SimulationConfigMetadata::new(None))
}
