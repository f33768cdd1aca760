mod common;

use anyhow::Result;
use sim_registry::domains::{BandRegistry, LogisticsRegistry};
use sim_registry::{
    capture_world, read_registry, resume_recording, rewind_to, run_ticks, ClockError,
    HistoryStore, RestoreError, RewindMode, SpatialIndex, TickClock,
};

#[test]
fn rewind_restores_the_captured_world() -> Result<()> {
    let mut app = common::scenario_app();
    run_ticks(&mut app, 40);
    let recorded = common::history_hashes(&app);

    rewind_to(&mut app, 20)?;

    let clock = app.world.resource::<TickClock>();
    assert_eq!(clock.mode(), RewindMode::Playback);
    assert_eq!(clock.current_tick(), 40);
    assert_eq!(clock.observed_tick(), 20);

    let restored = capture_world(&mut app.world)?;
    assert_eq!(restored.header.tick, 20);
    assert_eq!(restored.header.hash, recorded[&20]);

    let (metadata, _, _) = read_registry::<BandRegistry>(&mut app.world).expect("bands");
    assert_eq!(metadata.last_update_tick, 20);
    assert_eq!(metadata.version, 20);
    assert_eq!(
        app.world.resource::<SpatialIndex>().version(),
        restored.spatial.version
    );
    Ok(())
}

#[test]
fn resimulation_after_rewind_is_byte_identical() -> Result<()> {
    let mut app = common::scenario_app();
    run_ticks(&mut app, 40);
    let recorded = common::history_blobs(&app);

    rewind_to(&mut app, 20)?;
    assert_eq!(resume_recording(&mut app)?, 20);

    run_ticks(&mut app, 20);
    let resimulated = common::history_blobs(&app);
    assert_eq!(resimulated.len(), recorded.len());
    for tick in 20..=40 {
        assert_eq!(
            resimulated.get(&tick),
            recorded.get(&tick),
            "capture at tick {tick} diverged"
        );
    }

    let (metadata, _, summary) =
        read_registry::<LogisticsRegistry>(&mut app.world).expect("logistics");
    assert_eq!(metadata.last_update_tick, 40);
    assert_eq!(summary.total_requests as usize, metadata.entry_count);
    Ok(())
}

#[test]
fn rewinding_past_history_is_rejected() {
    let mut app = common::scenario_app();
    run_ticks(&mut app, 5);

    assert!(matches!(
        rewind_to(&mut app, 500),
        Err(RestoreError::Clock(ClockError::BeyondRecordedHead { target: 500, head: 5 }))
    ));
    assert!(matches!(
        rewind_to(&mut app, 0),
        Err(RestoreError::Clock(ClockError::NoHistoryAtTick(0)))
    ));

    let clock = app.world.resource::<TickClock>();
    assert_eq!(clock.mode(), RewindMode::Record);
    assert_eq!(clock.current_tick(), 5);
}

#[test]
fn recording_from_an_earlier_tick_drops_the_abandoned_future() -> Result<()> {
    let mut app = common::scenario_app();
    run_ticks(&mut app, 12);

    rewind_to(&mut app, 6)?;
    resume_recording(&mut app)?;
    run_ticks(&mut app, 2);

    let history = app.world.resource::<HistoryStore>();
    assert_eq!(history.captured_ticks(), (1..=8).collect::<Vec<_>>());
    assert_eq!(app.world.resource::<TickClock>().current_tick(), 8);
    Ok(())
}

#[test]
fn resuming_recording_discards_captures_past_the_new_head() -> Result<()> {
    let mut app = common::scenario_app();
    run_ticks(&mut app, 40);

    rewind_to(&mut app, 20)?;
    resume_recording(&mut app)?;

    let history = app.world.resource::<HistoryStore>();
    assert_eq!(history.newest_tick(), Some(20));
    assert_eq!(history.try_clone_latest()?.tick, 20);

    assert!(matches!(
        rewind_to(&mut app, 35),
        Err(RestoreError::Clock(ClockError::BeyondRecordedHead { target: 35, head: 20 }))
    ));
    let clock = app.world.resource::<TickClock>();
    assert_eq!(clock.mode(), RewindMode::Record);
    assert_eq!(clock.current_tick(), 20);
    Ok(())
}

#[test]
fn failed_restore_is_reported_and_keeps_recording() {
    let mut app = common::scenario_app();
    run_ticks(&mut app, 6);
    app.world
        .resource_mut::<HistoryStore>()
        .capture(6, vec![0xde, 0xad], 0);

    assert!(matches!(
        rewind_to(&mut app, 6),
        Err(RestoreError::Capture(_))
    ));
    let clock = app.world.resource::<TickClock>();
    assert_eq!(clock.mode(), RewindMode::Record);
    assert_eq!(clock.current_tick(), 6);

    run_ticks(&mut app, 1);
    assert_eq!(app.world.resource::<TickClock>().current_tick(), 7);
}
