#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Once;

use bevy::prelude::App;
use sim_registry::{build_headless_app, seed_scenario, HistoryStore, ScenarioSettings};

static INIT: Once = Once::new();

pub fn ensure_test_config() {
    INIT.call_once(|| {
        let config_path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("tests")
            .join("fixtures")
            .join("test_simulation_config.json");

        debug_assert!(
            config_path.exists(),
            "missing test simulation config at {}",
            config_path.display()
        );

        std::env::set_var("SIM_REGISTRY_CONFIG_PATH", &config_path);
    });
}

/// Headless app seeded with the default scenario.
pub fn scenario_app() -> App {
    ensure_test_config();
    let mut app = build_headless_app();
    seed_scenario(&mut app, ScenarioSettings::default());
    app
}

/// Encoded capture of every recorded tick, keyed by tick.
pub fn history_blobs(app: &App) -> BTreeMap<u64, Vec<u8>> {
    app.world
        .resource::<HistoryStore>()
        .iter()
        .map(|capture| (capture.tick, capture.blob.to_vec()))
        .collect()
}

pub fn history_hashes(app: &App) -> BTreeMap<u64, u64> {
    app.world
        .resource::<HistoryStore>()
        .iter()
        .map(|capture| (capture.tick, capture.hash))
        .collect()
}
