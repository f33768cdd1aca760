use std::collections::VecDeque;
use std::sync::Arc;

use bevy::prelude::*;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("history is empty")]
    EmptyHistory,
    #[error("no capture recorded at tick {0}")]
    NoHistoryAtTick(u64),
}

/// Immutable capture of the full world state at the end of a tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryCapture {
    pub tick: u64,
    pub hash: u64,
    pub blob: Arc<[u8]>,
}

#[derive(Resource, Debug, Clone)]
pub struct HistoryStore {
    max_history_ticks: usize,
    captures: VecDeque<HistoryCapture>,
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new(256)
    }
}

impl HistoryStore {
    pub fn new(max_history_ticks: usize) -> Self {
        let max_history_ticks = max_history_ticks.max(1);
        Self {
            max_history_ticks,
            captures: VecDeque::with_capacity(max_history_ticks),
        }
    }

    pub fn max_history_ticks(&self) -> usize {
        self.max_history_ticks
    }

    pub fn len(&self) -> usize {
        self.captures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.captures.is_empty()
    }

    /// Record `blob` for `tick`. Captures at or after `tick` belong to an
    /// abandoned timeline and are discarded first. Returns the evicted tick
    /// when the store was full.
    pub fn capture(&mut self, tick: u64, blob: Vec<u8>, hash: u64) -> Option<u64> {
        let mut discarded = 0usize;
        while self
            .captures
            .back()
            .is_some_and(|latest| latest.tick >= tick)
        {
            self.captures.pop_back();
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(
                target: "sim_registry::history",
                tick,
                discarded,
                "history.capture.truncated_future"
            );
        }

        let evicted = if self.captures.len() >= self.max_history_ticks {
            self.captures.pop_front().map(|oldest| oldest.tick)
        } else {
            None
        };
        if let Some(evicted) = evicted {
            log::trace!("history.capture.evicted tick={evicted}");
        }

        self.captures.push_back(HistoryCapture {
            tick,
            hash,
            blob: Arc::from(blob),
        });
        evicted
    }

    /// Drop every capture newer than `tick`. Returns how many were dropped.
    pub fn truncate_after(&mut self, tick: u64) -> usize {
        let keep = self.captures.partition_point(|capture| capture.tick <= tick);
        let dropped = self.captures.len() - keep;
        self.captures.truncate(keep);
        if dropped > 0 {
            tracing::debug!(
                target: "sim_registry::history",
                tick,
                dropped,
                "history.truncated_after"
            );
        }
        dropped
    }

    pub fn contains(&self, tick: u64) -> bool {
        self.find(tick).is_some()
    }

    pub fn try_clone_latest(&self) -> Result<HistoryCapture, HistoryError> {
        self.captures
            .back()
            .cloned()
            .ok_or(HistoryError::EmptyHistory)
    }

    /// Exact-match lookup of the capture recorded at `tick`.
    pub fn try_restore(&self, tick: u64) -> Result<HistoryCapture, HistoryError> {
        self.find(tick)
            .cloned()
            .ok_or(HistoryError::NoHistoryAtTick(tick))
    }

    pub fn oldest_tick(&self) -> Option<u64> {
        self.captures.front().map(|capture| capture.tick)
    }

    pub fn newest_tick(&self) -> Option<u64> {
        self.captures.back().map(|capture| capture.tick)
    }

    pub fn captured_ticks(&self) -> Vec<u64> {
        self.captures.iter().map(|capture| capture.tick).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistoryCapture> {
        self.captures.iter()
    }

    fn find(&self, tick: u64) -> Option<&HistoryCapture> {
        // Ticks are strictly increasing front to back.
        self.captures
            .binary_search_by_key(&tick, |capture| capture.tick)
            .ok()
            .and_then(|index| self.captures.get(index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_store_reports_empty_history() {
        let store = HistoryStore::new(4);
        assert_eq!(store.try_clone_latest(), Err(HistoryError::EmptyHistory));
        assert_eq!(store.try_restore(1), Err(HistoryError::NoHistoryAtTick(1)));
    }

    #[test]
    fn oldest_capture_is_evicted_at_capacity() {
        let mut store = HistoryStore::new(3);
        for tick in 1..=3 {
            assert_eq!(store.capture(tick, vec![tick as u8], tick), None);
        }
        assert_eq!(store.capture(4, vec![4], 4), Some(1));
        assert_eq!(store.captured_ticks(), vec![2, 3, 4]);
        assert_eq!(store.try_restore(1), Err(HistoryError::NoHistoryAtTick(1)));
        assert_eq!(&*store.try_restore(3).expect("tick 3").blob, &[3]);
        assert_eq!(store.try_clone_latest().expect("latest").tick, 4);
    }

    #[test]
    fn recapturing_an_earlier_tick_drops_the_abandoned_future() {
        let mut store = HistoryStore::new(8);
        for tick in 1..=5 {
            store.capture(tick, vec![tick as u8], tick);
        }
        store.capture(3, vec![30], 30);
        assert_eq!(store.captured_ticks(), vec![1, 2, 3]);
        assert_eq!(store.try_restore(3).expect("tick 3").hash, 30);
        assert!(!store.contains(4));
    }

    #[test]
    fn truncate_after_keeps_the_tick_itself() {
        let mut store = HistoryStore::new(8);
        for tick in 1..=5 {
            store.capture(tick, vec![tick as u8], tick);
        }
        assert_eq!(store.truncate_after(3), 2);
        assert_eq!(store.captured_ticks(), vec![1, 2, 3]);
        assert_eq!(store.truncate_after(9), 0);
        assert_eq!(store.newest_tick(), Some(3));
    }
}
