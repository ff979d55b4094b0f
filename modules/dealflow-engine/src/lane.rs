//! Per-entity lane sequencing.
//!
//! Within one lane, events must be processed in strictly increasing,
//! gap-free seq order. Out-of-order arrivals are buffered and re-ordered up
//! to a horizon; past it the lane degrades and rejects input until a manual
//! resync. Duplicates are dropped silently (idempotent ingress).

use std::collections::BTreeMap;

use dealflow_common::events::Event;
use tracing::warn;

/// What to do with an offered event.
#[derive(Debug)]
pub enum LaneAccept {
    /// In-order: process these now (the offered event plus any buffered
    /// successors it released).
    Ready(Vec<Event>),
    /// Ahead of the expected seq: buffered until the gap fills.
    Buffered,
    /// Seq already processed or buffered. Drop.
    Duplicate,
    /// The reorder buffer overflowed — the lane is now degraded.
    Gap { expected: u64, got: u64 },
    /// Lane previously degraded; input rejected until resync.
    Degraded,
}

/// Sequencing state for one entity lane.
pub struct LaneSequencer {
    expected: u64,
    buffer: BTreeMap<u64, Event>,
    horizon: usize,
    degraded: bool,
}

impl LaneSequencer {
    pub fn new(next_expected: u64, horizon: usize) -> Self {
        Self {
            expected: next_expected,
            buffer: BTreeMap::new(),
            horizon,
            degraded: false,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn next_expected(&self) -> u64 {
        self.expected
    }

    /// Offer an arriving event to the lane.
    pub fn offer(&mut self, event: Event) -> LaneAccept {
        if self.degraded {
            return LaneAccept::Degraded;
        }

        if event.seq < self.expected || self.buffer.contains_key(&event.seq) {
            return LaneAccept::Duplicate;
        }

        if event.seq == self.expected {
            let mut ready = vec![event];
            self.expected += 1;
            // Release any buffered successors that are now contiguous.
            while let Some(next) = self.buffer.remove(&self.expected) {
                ready.push(next);
                self.expected += 1;
            }
            return LaneAccept::Ready(ready);
        }

        // Ahead of expected: buffer, unless that would exceed the horizon.
        if self.buffer.len() >= self.horizon {
            let expected = self.expected;
            let got = event.seq;
            self.degraded = true;
            self.buffer.clear();
            warn!(
                entity_id = %event.entity_id,
                expected,
                got,
                "Reorder horizon exceeded; lane degraded"
            );
            return LaneAccept::Gap { expected, got };
        }

        self.buffer.insert(event.seq, event);
        LaneAccept::Buffered
    }

    /// Manual operator resync: clears the degraded flag and the buffer and
    /// resumes from the given seq.
    pub fn resync(&mut self, next_expected: u64) {
        self.expected = next_expected;
        self.buffer.clear();
        self.degraded = false;
    }
}
