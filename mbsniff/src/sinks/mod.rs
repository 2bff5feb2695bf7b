//! Result sinks
//!
//! The dispatch loop hands every decoded reading to each configured sink in
//! turn. Sinks must not block: anything slow sits behind its own channel.

pub mod http;
pub mod mqtt;
pub mod publish;
pub mod status;

use std::time::SystemTime;

use mbsniff_common::Reading;

use crate::domain::{LinkId, Pid};

pub use mqtt::{MqttPublisher, MqttSettings};
pub use publish::{LinePublisher, Publish, PublisherSink, Topics};
pub use status::{RawFrame, StatusBoard, StatusEntry, StatusSnapshot};

/// A reading together with where and when it was captured.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadingEvent {
    pub link: LinkId,
    pub pid: Pid,
    pub fd: i32,
    pub timestamp: SystemTime,
    pub reading: Reading,
}

/// Consumer of decoded readings.
pub trait ResultSink: Send {
    fn publish(&mut self, event: &ReadingEvent);
}
