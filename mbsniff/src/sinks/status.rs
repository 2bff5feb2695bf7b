//! Latest-value status board
//!
//! Readers get an immutable [`StatusSnapshot`] behind an `Arc`; the dispatch
//! loop replaces the whole snapshot on every update. Nothing ever hands out
//! a reference into decoder state.

use std::collections::BTreeMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use mbsniff_common::ResponseFrame;

use super::ReadingEvent;

/// Latest value decoded for one register.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusEntry {
    pub register: u16,
    pub value: f64,
    pub raw: Vec<u16>,
    pub updated: DateTime<Utc>,
}

/// Most recently parsed response, accepted or not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub frame: ResponseFrame,
    pub received: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct StatusSnapshot {
    /// Keyed by `Quantity::key()`, i.e. `0x9c72`.
    pub results: BTreeMap<String, StatusEntry>,
    pub raw: Option<Arc<RawFrame>>,
    pub updated: Option<DateTime<Utc>>,
}

/// Shared, lock-free holder of the current snapshot.
#[derive(Debug, Default)]
pub struct StatusBoard {
    current: ArcSwap<StatusSnapshot>,
}

impl StatusBoard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.current.load_full()
    }

    /// Fold a batch of readings into a fresh snapshot.
    pub fn record(&self, events: &[ReadingEvent]) {
        if events.is_empty() {
            return;
        }
        self.current.rcu(|current| {
            let mut next = StatusSnapshot::clone(current);
            for event in events {
                let updated = DateTime::<Utc>::from(event.timestamp);
                next.results.insert(
                    event.reading.quantity.key(),
                    StatusEntry {
                        register: event.reading.quantity.register,
                        value: event.reading.value,
                        raw: event.reading.raw.clone(),
                        updated,
                    },
                );
                next.updated = Some(updated);
            }
            next
        });
    }

    /// Replace the latest raw response.
    pub fn set_raw(&self, frame: ResponseFrame, received: DateTime<Utc>) {
        let raw = Arc::new(RawFrame { frame, received });
        self.current.rcu(|current| StatusSnapshot { raw: Some(Arc::clone(&raw)), ..StatusSnapshot::clone(current) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{LinkId, Pid};
    use mbsniff_common::{Quantity, QuantitySize, Reading};
    use std::time::SystemTime;

    fn event(register: u16, value: f64) -> ReadingEvent {
        ReadingEvent {
            link: LinkId(0),
            pid: Pid(1),
            fd: 3,
            timestamp: SystemTime::now(),
            reading: Reading {
                quantity: Quantity::new(register, QuantitySize::One, 1.0, 0.0),
                value,
                raw: vec![1],
            },
        }
    }

    #[test]
    fn test_snapshot_is_isolated_from_updates() {
        let board = StatusBoard::new();
        board.record(&[event(0x10, 1.0)]);
        let before = board.snapshot();

        board.record(&[event(0x10, 2.0), event(0x11, 3.0)]);
        assert_eq!(before.results["0x10"].value, 1.0);
        assert_eq!(before.results.len(), 1);

        let after = board.snapshot();
        assert_eq!(after.results["0x10"].value, 2.0);
        assert_eq!(after.results["0x11"].value, 3.0);
        assert!(after.updated.is_some());
    }

    #[test]
    fn test_raw_frame_kept_alongside_results() {
        let board = StatusBoard::new();
        assert!(board.snapshot().raw.is_none());

        board.record(&[event(0x10, 1.0)]);
        let frame = ResponseFrame { unit: 1, function_code: 3, byte_count: 2, registers: vec![7], checksum: 0xabcd };
        board.set_raw(frame.clone(), Utc::now());

        let snap = board.snapshot();
        assert_eq!(snap.raw.as_ref().unwrap().frame, frame);
        assert_eq!(snap.results.len(), 1);
    }
}
