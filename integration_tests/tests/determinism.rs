mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::Result;
use bevy::prelude::*;
use sim_registry::domains::{VillagerFlags, VillagerJob, VillagerRecord, VillagerRegistry};
use sim_registry::{
    build_headless_app, capture_world, read_registry, run_frame, run_ticks,
    FixedStepAccumulator, Position, Scalar, SimulationConfigHandle, StableId,
};

#[test]
fn identical_runs_capture_identical_history() {
    let mut app_a = common::scenario_app();
    let mut app_b = common::scenario_app();
    run_ticks(&mut app_a, 90);
    run_ticks(&mut app_b, 90);

    let blobs_a = common::history_blobs(&app_a);
    let blobs_b = common::history_blobs(&app_b);
    assert_eq!(blobs_a.len(), 90);
    assert_eq!(blobs_a, blobs_b);

    let (meta_a, buffer_a, _) =
        read_registry::<VillagerRegistry>(&mut app_a.world).expect("villagers");
    let (meta_b, buffer_b, _) =
        read_registry::<VillagerRegistry>(&mut app_b.world).expect("villagers");
    assert_eq!(meta_a, meta_b);
    assert_eq!(buffer_a, buffer_b);
    assert!(!buffer_a.is_empty());
}

fn run_at_fps(fps: u64, frames: u64) -> BTreeMap<u64, u64> {
    let mut app = common::scenario_app();
    let config = app.world.resource::<SimulationConfigHandle>().get();
    let mut accumulator = FixedStepAccumulator::from_config(&config.clock);
    let frame = Duration::from_nanos(1_000_000_000 / fps);
    for _ in 0..frames {
        run_frame(&mut app, &mut accumulator, frame);
    }
    common::history_hashes(&app)
}

#[test]
fn frame_rate_does_not_change_recorded_ticks() {
    let at_30 = run_at_fps(30, 120);
    let at_60 = run_at_fps(60, 240);
    let at_120 = run_at_fps(120, 480);

    let mut compared = 0;
    for (tick, hash) in &at_30 {
        if let (Some(hash_60), Some(hash_120)) = (at_60.get(tick), at_120.get(tick)) {
            assert_eq!(hash, hash_60, "tick {tick} differs at 60 fps");
            assert_eq!(hash, hash_120, "tick {tick} differs at 120 fps");
            compared += 1;
        }
    }
    assert!(compared >= 100, "only {compared} ticks overlapped");
}

fn spawn_villagers(world: &mut World, ids: impl Iterator<Item = u64>) {
    for raw in ids {
        let job = match raw % 3 {
            0 => VillagerJob::Farmer,
            1 => VillagerJob::Builder,
            _ => VillagerJob::Idle,
        };
        world.spawn((
            StableId(raw),
            VillagerRecord {
                job,
                health: Scalar::one(),
                band: None,
                flags: VillagerFlags::empty(),
            },
            Position::new(Scalar::from_u32(raw as u32), Scalar::from_u32(2)),
        ));
    }
}

#[test]
fn spawn_order_does_not_change_registries() -> Result<()> {
    common::ensure_test_config();
    let mut forward = build_headless_app();
    let mut reverse = build_headless_app();
    spawn_villagers(&mut forward.world, 1..=12);
    spawn_villagers(&mut reverse.world, (1..=12).rev());
    run_ticks(&mut forward, 3);
    run_ticks(&mut reverse, 3);

    let (_, forward_buffer, _) =
        read_registry::<VillagerRegistry>(&mut forward.world).expect("villagers");
    let (_, reverse_buffer, _) =
        read_registry::<VillagerRegistry>(&mut reverse.world).expect("villagers");
    assert_eq!(forward_buffer, reverse_buffer);
    assert_eq!(forward_buffer.len(), 12);

    let forward_capture = capture_world(&mut forward.world)?;
    let reverse_capture = capture_world(&mut reverse.world)?;
    assert_eq!(forward_capture.header.hash, reverse_capture.header.hash);
    Ok(())
}
