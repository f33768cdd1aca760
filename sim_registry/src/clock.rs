use std::fmt;
use std::time::Duration;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    config::{ClockConfig, InitialMode, SimulationConfigHandle},
    history::HistoryStore,
    scalar::Scalar,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewindMode {
    #[default]
    Record,
    Playback,
    Paused,
}

impl RewindMode {
    pub fn as_str(self) -> &'static str {
        match self {
            RewindMode::Record => "record",
            RewindMode::Playback => "playback",
            RewindMode::Paused => "paused",
        }
    }
}

impl fmt::Display for RewindMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrubDirection {
    #[default]
    Hold,
    Forward,
    Backward,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewindState {
    pub mode: RewindMode,
    pub start_tick: u64,
    pub target_tick: u64,
    pub playback_tick: u64,
    /// Ticks auto-stepped per update while in playback.
    pub playback_rate: Scalar,
    pub scrub_direction: ScrubDirection,
    pub scrub_speed_multiplier: Scalar,
    pub max_history_ticks: usize,
}

impl RewindState {
    fn new(mode: RewindMode, max_history_ticks: usize) -> Self {
        Self {
            mode,
            start_tick: 0,
            target_tick: 0,
            playback_tick: 0,
            playback_rate: Scalar::zero(),
            scrub_direction: ScrubDirection::Hold,
            scrub_speed_multiplier: Scalar::one(),
            max_history_ticks,
        }
    }
}

/// What the clock did during the current update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockStep {
    #[default]
    Idle,
    Advanced(u64),
    PlaybackMoved(u64),
    Held,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClockError {
    #[error("no history captured at tick {0}")]
    NoHistoryAtTick(u64),
    #[error("tick {target} is ahead of the recorded head {head}")]
    BeyondRecordedHead { target: u64, head: u64 },
    #[error("clock can only advance while recording (mode is {0})")]
    NotRecording(RewindMode),
    #[error("invalid clock transition from {from}: {request}")]
    InvalidTransition {
        from: RewindMode,
        request: &'static str,
    },
}

/// Authoritative simulation clock.
#[derive(Resource, Debug, Clone)]
pub struct TickClock {
    tick: u64,
    sim_time: Scalar,
    fixed_delta_time: Scalar,
    speed_multiplier: Scalar,
    rewind: RewindState,
    paused_from: Option<RewindMode>,
    playback_accumulator: Scalar,
    applied_playback_tick: Option<u64>,
    last_step: ClockStep,
}

impl Default for TickClock {
    fn default() -> Self {
        Self::from_config(&ClockConfig::default())
    }
}

impl TickClock {
    pub fn from_config(config: &ClockConfig) -> Self {
        let (mode, paused_from) = match config.initial_mode {
            InitialMode::Record => (RewindMode::Record, None),
            InitialMode::Paused => (RewindMode::Paused, Some(RewindMode::Record)),
        };
        Self {
            tick: 0,
            sim_time: Scalar::zero(),
            fixed_delta_time: config.fixed_delta(),
            speed_multiplier: Scalar::one(),
            rewind: RewindState::new(mode, config.max_history_ticks),
            paused_from,
            playback_accumulator: Scalar::zero(),
            applied_playback_tick: None,
            last_step: ClockStep::Idle,
        }
    }

    /// Head of the recorded timeline.
    pub fn current_tick(&self) -> u64 {
        self.tick
    }

    /// Tick whose state is currently visible: the playback tick while
    /// reviewing history, the recorded head otherwise.
    pub fn observed_tick(&self) -> u64 {
        if self.in_playback() {
            self.rewind.playback_tick
        } else {
            self.tick
        }
    }

    pub fn sim_time(&self) -> Scalar {
        self.sim_time
    }

    pub fn fixed_delta_time(&self) -> Scalar {
        self.fixed_delta_time
    }

    pub fn speed_multiplier(&self) -> Scalar {
        self.speed_multiplier
    }

    pub fn mode(&self) -> RewindMode {
        self.rewind.mode
    }

    pub fn rewind(&self) -> &RewindState {
        &self.rewind
    }

    pub fn last_step(&self) -> ClockStep {
        self.last_step
    }

    pub fn advanced_this_update(&self) -> bool {
        matches!(self.last_step, ClockStep::Advanced(_))
    }

    fn in_playback(&self) -> bool {
        self.rewind.mode == RewindMode::Playback
            || (self.rewind.mode == RewindMode::Paused
                && self.paused_from == Some(RewindMode::Playback))
    }

    pub fn set_speed_multiplier(&mut self, multiplier: Scalar) {
        self.speed_multiplier = multiplier.clamp(Scalar::zero(), Scalar::from_i64(64));
    }

    pub fn set_playback_rate(&mut self, rate: Scalar) {
        self.rewind.playback_rate = rate.clamp(Scalar::zero(), Scalar::from_i64(64));
        self.playback_accumulator = Scalar::zero();
    }

    /// Step the recorded timeline by exactly one tick.
    pub fn advance(&mut self) -> Result<u64, ClockError> {
        if self.rewind.mode != RewindMode::Record {
            return Err(ClockError::NotRecording(self.rewind.mode));
        }
        self.tick += 1;
        self.sim_time += self.fixed_delta_time * self.speed_multiplier;
        self.last_step = ClockStep::Advanced(self.tick);
        Ok(self.tick)
    }

    /// Enter playback at `target`. Leaves the clock untouched on failure.
    pub fn begin_playback(&mut self, target: u64, history: &HistoryStore) -> Result<(), ClockError> {
        if target > self.tick {
            return Err(ClockError::BeyondRecordedHead {
                target,
                head: self.tick,
            });
        }
        if !history.contains(target) {
            return Err(ClockError::NoHistoryAtTick(target));
        }
        self.rewind.mode = RewindMode::Playback;
        self.rewind.start_tick = history.oldest_tick().unwrap_or(target);
        self.rewind.target_tick = target;
        self.rewind.playback_tick = target;
        self.rewind.scrub_direction = ScrubDirection::Hold;
        self.paused_from = None;
        self.playback_accumulator = Scalar::zero();
        Ok(())
    }

    /// Move the playback cursor, clamped to `[start_tick, current_tick]`.
    pub fn scrub(
        &mut self,
        direction: ScrubDirection,
        speed_multiplier: Scalar,
    ) -> Result<u64, ClockError> {
        if self.rewind.mode != RewindMode::Playback {
            return Err(ClockError::InvalidTransition {
                from: self.rewind.mode,
                request: "scrub",
            });
        }
        let speed = speed_multiplier.clamp(Scalar::zero(), Scalar::from_i64(64));
        // Zero speed holds; any positive speed moves at least one tick.
        let step = if speed == Scalar::zero() {
            0
        } else {
            speed.to_u32().max(1) as u64
        };
        let current = self.rewind.playback_tick;
        let next = match direction {
            ScrubDirection::Hold => current,
            ScrubDirection::Forward => current.saturating_add(step),
            ScrubDirection::Backward => current.saturating_sub(step),
        };
        self.rewind.playback_tick = next.clamp(self.rewind.start_tick, self.tick);
        self.rewind.scrub_direction = direction;
        self.rewind.scrub_speed_multiplier = speed;
        Ok(self.rewind.playback_tick)
    }

    pub fn pause(&mut self) -> Result<(), ClockError> {
        match self.rewind.mode {
            RewindMode::Record | RewindMode::Playback => {
                self.paused_from = Some(self.rewind.mode);
                self.rewind.mode = RewindMode::Paused;
                Ok(())
            }
            RewindMode::Paused => Err(ClockError::InvalidTransition {
                from: RewindMode::Paused,
                request: "pause",
            }),
        }
    }

    pub fn resume(&mut self) -> Result<RewindMode, ClockError> {
        match (self.rewind.mode, self.paused_from) {
            (RewindMode::Paused, Some(previous)) => {
                self.rewind.mode = previous;
                self.paused_from = None;
                Ok(previous)
            }
            (from, _) => Err(ClockError::InvalidTransition {
                from,
                request: "resume",
            }),
        }
    }

    /// Leave playback and continue recording from the playback tick. The next
    /// advance resimulates the tick after it.
    pub fn resume_recording(&mut self) -> Result<u64, ClockError> {
        if self.rewind.mode != RewindMode::Playback {
            return Err(ClockError::InvalidTransition {
                from: self.rewind.mode,
                request: "resume_recording",
            });
        }
        self.tick = self.rewind.playback_tick;
        self.rewind.mode = RewindMode::Record;
        self.rewind.scrub_direction = ScrubDirection::Hold;
        self.applied_playback_tick = None;
        Ok(self.tick)
    }

    /// Put the clock in playback at `tick` after its state has been restored.
    pub fn realign_playback(&mut self, tick: u64, sim_time: Scalar, start_tick: u64) {
        if self.rewind.mode != RewindMode::Playback {
            self.paused_from = None;
            self.rewind.mode = RewindMode::Playback;
        }
        if tick > self.tick {
            self.tick = tick;
        }
        self.rewind.start_tick = start_tick.min(tick);
        self.rewind.target_tick = tick;
        self.rewind.playback_tick = tick;
        self.sim_time = sim_time;
        self.applied_playback_tick = Some(tick);
    }

    /// Playback tick that still has to be restored, if any.
    pub fn pending_restore(&self) -> Option<u64> {
        if self.rewind.mode != RewindMode::Playback {
            return None;
        }
        match self.applied_playback_tick {
            Some(applied) if applied == self.rewind.playback_tick => None,
            _ => Some(self.rewind.playback_tick),
        }
    }

    /// Stop retrying a playback tick whose restore failed.
    pub fn mark_playback_applied(&mut self, tick: u64) {
        self.applied_playback_tick = Some(tick);
    }

    fn step(&mut self) {
        self.last_step = match self.rewind.mode {
            RewindMode::Record => match self.advance() {
                Ok(tick) => ClockStep::Advanced(tick),
                Err(_) => ClockStep::Held,
            },
            RewindMode::Playback => self.step_playback(),
            RewindMode::Paused => ClockStep::Held,
        };
    }

    fn step_playback(&mut self) -> ClockStep {
        if self.rewind.playback_rate == Scalar::zero() {
            return ClockStep::Held;
        }
        self.playback_accumulator += self.rewind.playback_rate;
        let whole = self.playback_accumulator.floor_div(Scalar::one()).max(0) as u64;
        if whole == 0 {
            return ClockStep::Held;
        }
        self.playback_accumulator -= Scalar::from_i64(whole as i64);
        let next = self
            .rewind
            .playback_tick
            .saturating_add(whole)
            .min(self.tick);
        if next == self.rewind.playback_tick {
            return ClockStep::Held;
        }
        self.rewind.playback_tick = next;
        ClockStep::PlaybackMoved(next)
    }
}

/// Mode transition requested by an outside collaborator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockRequest {
    BeginPlayback(u64),
    Scrub {
        direction: ScrubDirection,
        speed: Scalar,
    },
    Pause,
    Resume,
    ResumeRecording,
    SetSpeed(Scalar),
    SetPlaybackRate(Scalar),
}

/// Single-slot request mailbox. Only the last request submitted before the
/// next update is applied.
#[derive(Resource, Debug, Default)]
pub struct PendingClockRequest {
    request: Option<ClockRequest>,
}

impl PendingClockRequest {
    /// Queue `request`, returning the unapplied request it supersedes.
    pub fn submit(&mut self, request: ClockRequest) -> Option<ClockRequest> {
        let superseded = self.request.replace(request);
        if let Some(previous) = superseded {
            log::debug!("clock request {previous:?} superseded by {request:?}");
        }
        superseded
    }

    pub fn take(&mut self) -> Option<ClockRequest> {
        self.request.take()
    }
}

pub fn apply_clock_request(
    clock: &mut TickClock,
    request: ClockRequest,
    history: &mut HistoryStore,
) -> Result<(), ClockError> {
    match request {
        ClockRequest::BeginPlayback(target) => clock.begin_playback(target, history),
        ClockRequest::Scrub { direction, speed } => clock.scrub(direction, speed).map(|_| ()),
        ClockRequest::Pause => clock.pause(),
        ClockRequest::Resume => clock.resume().map(|_| ()),
        ClockRequest::ResumeRecording => {
            let tick = clock.resume_recording()?;
            history.truncate_after(tick);
            Ok(())
        }
        ClockRequest::SetSpeed(multiplier) => {
            clock.set_speed_multiplier(multiplier);
            Ok(())
        }
        ClockRequest::SetPlaybackRate(rate) => {
            clock.set_playback_rate(rate);
            Ok(())
        }
    }
}

pub fn apply_pending_clock_requests(
    mut pending: ResMut<PendingClockRequest>,
    mut clock: ResMut<TickClock>,
    mut history: ResMut<HistoryStore>,
) {
    let Some(request) = pending.take() else {
        return;
    };
    let from = clock.mode();
    match apply_clock_request(&mut clock, request, &mut history) {
        Ok(()) => tracing::info!(
            target: "sim_registry::clock",
            ?request,
            %from,
            to = %clock.mode(),
            tick = clock.current_tick(),
            "clock.request.applied"
        ),
        Err(err) => tracing::warn!(
            target: "sim_registry::clock",
            ?request,
            %from,
            error = %err,
            "clock.request.rejected"
        ),
    }
}

pub fn step_clock(mut clock: ResMut<TickClock>) {
    clock.step();
}

/// Run condition for every phase that only runs on a recorded tick.
pub fn clock_advanced(clock: Res<TickClock>) -> bool {
    clock.advanced_this_update()
}

pub fn install_clock(world: &mut World) {
    let config = world.resource::<SimulationConfigHandle>().get();
    world.insert_resource(TickClock::from_config(&config.clock));
    world.insert_resource(PendingClockRequest::default());
}

/// Converts frame durations into a whole number of fixed ticks.
#[derive(Debug, Clone)]
pub struct FixedStepAccumulator {
    ticks_per_second: u32,
    max_steps_per_frame: u32,
    carry: u128,
}

impl FixedStepAccumulator {
    const NANOS_PER_SECOND: u128 = 1_000_000_000;

    pub fn new(ticks_per_second: u32, max_steps_per_frame: u32) -> Self {
        Self {
            ticks_per_second: ticks_per_second.max(1),
            max_steps_per_frame: max_steps_per_frame.max(1),
            carry: 0,
        }
    }

    pub fn from_config(config: &ClockConfig) -> Self {
        Self::new(config.ticks_per_second, config.max_steps_per_frame)
    }

    /// Number of ticks owed after a frame of `elapsed` wall time.
    pub fn push_frame(&mut self, elapsed: Duration) -> u32 {
        self.carry += elapsed.as_nanos() * self.ticks_per_second as u128;
        let owed = self.carry / Self::NANOS_PER_SECOND;
        self.carry -= owed * Self::NANOS_PER_SECOND;
        if owed > self.max_steps_per_frame as u128 {
            log::debug!(
                "dropping {} ticks beyond the per-frame cap of {}",
                owed - self.max_steps_per_frame as u128,
                self.max_steps_per_frame
            );
            return self.max_steps_per_frame;
        }
        owed as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryStore;

    fn history_with(ticks: &[u64]) -> HistoryStore {
        let mut history = HistoryStore::new(16);
        for tick in ticks {
            history.capture(*tick, vec![*tick as u8], *tick);
        }
        history
    }

    #[test]
    fn advance_only_in_record_mode() {
        let mut clock = TickClock::default();
        assert_eq!(clock.advance(), Ok(1));
        assert_eq!(clock.advance(), Ok(2));
        clock.pause().expect("pause from record");
        assert_eq!(
            clock.advance(),
            Err(ClockError::NotRecording(RewindMode::Paused))
        );
        assert_eq!(clock.current_tick(), 2);
        assert_eq!(clock.resume(), Ok(RewindMode::Record));
        assert_eq!(clock.advance(), Ok(3));
    }

    #[test]
    fn sim_time_scales_with_speed_multiplier() {
        let mut clock = TickClock::default();
        let delta = clock.fixed_delta_time();
        clock.advance().expect("advance");
        clock.set_speed_multiplier(Scalar::from_i64(2));
        clock.advance().expect("advance");
        assert_eq!(clock.sim_time(), delta + delta * Scalar::from_i64(2));
        assert_eq!(clock.current_tick(), 2);
    }

    #[test]
    fn begin_playback_without_capture_leaves_clock_unchanged() {
        let mut clock = TickClock::default();
        for _ in 0..5 {
            clock.advance().expect("advance");
        }
        let history = history_with(&[1, 2, 3]);
        let before = clock.rewind().clone();
        assert_eq!(
            clock.begin_playback(4, &history),
            Err(ClockError::NoHistoryAtTick(4))
        );
        assert_eq!(clock.rewind(), &before);
        assert_eq!(clock.mode(), RewindMode::Record);
    }

    #[test]
    fn begin_playback_past_the_head_is_rejected() {
        let mut clock = TickClock::default();
        for _ in 0..3 {
            clock.advance().expect("advance");
        }
        // Captures left over from a timeline that was rewound away.
        let history = history_with(&[1, 2, 3, 4, 5]);
        assert_eq!(
            clock.begin_playback(5, &history),
            Err(ClockError::BeyondRecordedHead { target: 5, head: 3 })
        );
        assert_eq!(clock.mode(), RewindMode::Record);
        assert_eq!(clock.current_tick(), 3);
    }

    #[test]
    fn scrub_clamps_to_recorded_range() {
        let mut clock = TickClock::default();
        for _ in 0..6 {
            clock.advance().expect("advance");
        }
        let history = history_with(&[2, 3, 4, 5, 6]);
        clock.begin_playback(4, &history).expect("playback");
        assert_eq!(clock.rewind().start_tick, 2);
        assert_eq!(clock.observed_tick(), 4);

        assert_eq!(
            clock.scrub(ScrubDirection::Backward, Scalar::from_i64(10)),
            Ok(2)
        );
        assert_eq!(
            clock.scrub(ScrubDirection::Forward, Scalar::from_f32(0.2)),
            Ok(3)
        );
        assert_eq!(
            clock.scrub(ScrubDirection::Forward, Scalar::from_i64(9)),
            Ok(6)
        );
        assert_eq!(clock.current_tick(), 6);
    }

    #[test]
    fn zero_speed_scrub_holds_the_cursor() {
        let mut clock = TickClock::default();
        for _ in 0..5 {
            clock.advance().expect("advance");
        }
        let history = history_with(&[1, 2, 3, 4, 5]);
        clock.begin_playback(3, &history).expect("playback");
        assert_eq!(clock.scrub(ScrubDirection::Forward, Scalar::zero()), Ok(3));
        assert_eq!(clock.scrub(ScrubDirection::Backward, Scalar::zero()), Ok(3));
        assert_eq!(clock.pending_restore(), Some(3));
    }

    #[test]
    fn scrub_outside_playback_is_rejected() {
        let mut clock = TickClock::default();
        assert_eq!(
            clock.scrub(ScrubDirection::Forward, Scalar::one()),
            Err(ClockError::InvalidTransition {
                from: RewindMode::Record,
                request: "scrub",
            })
        );
    }

    #[test]
    fn pause_resume_round_trips_through_playback() {
        let mut clock = TickClock::default();
        for _ in 0..3 {
            clock.advance().expect("advance");
        }
        let history = history_with(&[1, 2, 3]);
        clock.begin_playback(2, &history).expect("playback");
        clock.pause().expect("pause");
        assert_eq!(clock.observed_tick(), 2);
        assert!(clock.pause().is_err());
        assert_eq!(clock.resume(), Ok(RewindMode::Playback));
        assert!(clock.resume().is_err());
    }

    #[test]
    fn resume_recording_rewinds_the_head() {
        let mut clock = TickClock::default();
        for _ in 0..8 {
            clock.advance().expect("advance");
        }
        let history = history_with(&[5, 6, 7, 8]);
        clock.begin_playback(6, &history).expect("playback");
        assert_eq!(clock.resume_recording(), Ok(6));
        assert_eq!(clock.mode(), RewindMode::Record);
        assert_eq!(clock.advance(), Ok(7));
    }

    #[test]
    fn resume_recording_request_drops_the_abandoned_future() {
        let mut clock = TickClock::default();
        for _ in 0..8 {
            clock.advance().expect("advance");
        }
        let mut history = history_with(&[5, 6, 7, 8]);
        apply_clock_request(&mut clock, ClockRequest::BeginPlayback(6), &mut history)
            .expect("playback");
        apply_clock_request(&mut clock, ClockRequest::ResumeRecording, &mut history)
            .expect("resume recording");
        assert_eq!(history.captured_ticks(), vec![5, 6]);
        assert_eq!(history.try_clone_latest().expect("latest").tick, 6);
    }

    #[test]
    fn playback_rate_steps_whole_ticks() {
        let mut clock = TickClock::default();
        for _ in 0..10 {
            clock.advance().expect("advance");
        }
        let history = history_with(&[1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        clock.begin_playback(3, &history).expect("playback");
        clock.set_playback_rate(Scalar::from_f32(0.5));
        clock.step();
        assert_eq!(clock.last_step(), ClockStep::Held);
        clock.step();
        assert_eq!(clock.last_step(), ClockStep::PlaybackMoved(4));
        assert_eq!(clock.pending_restore(), Some(4));
    }

    #[test]
    fn later_request_supersedes_pending_one() {
        let mut pending = PendingClockRequest::default();
        assert!(pending.submit(ClockRequest::BeginPlayback(3)).is_none());
        let superseded = pending.submit(ClockRequest::BeginPlayback(5));
        assert_eq!(superseded, Some(ClockRequest::BeginPlayback(3)));
        assert_eq!(pending.take(), Some(ClockRequest::BeginPlayback(5)));
        assert_eq!(pending.take(), None);
    }

    #[test]
    fn accumulator_counts_whole_ticks_per_frame() {
        let mut accumulator = FixedStepAccumulator::new(30, 8);
        let frame = Duration::from_nanos(1_000_000_000 / 60);
        let steps: u32 = (0..60).map(|_| accumulator.push_frame(frame)).sum();
        assert!((29..=30).contains(&steps));
        assert_eq!(accumulator.push_frame(Duration::from_secs(5)), 8);
    }
}
