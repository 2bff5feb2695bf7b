//! Home-Assistant-style state publishing
//!
//! Every reading becomes a `<prefix>/<component>/<node_id>/<object_id>/state`
//! update; with discovery enabled each sensor is announced once on the
//! matching `/config` topic. Updates travel through a bounded channel to a
//! dedicated publisher thread so a slow transport never stalls decoding.

use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender, TrySendError};
use log::{debug, warn};
use serde_json::Value;

use super::{ReadingEvent, ResultSink};
use crate::config::{Device, Sensor};

/// Transport for `(topic, payload)` pairs.
pub trait Publish: Send {
    /// # Errors
    /// Returns an error if the transport rejects the update.
    fn publish(&mut self, topic: &str, payload: &str) -> io::Result<()>;
}

/// Writes `topic payload` lines, one per update.
pub struct LinePublisher<W: Write + Send> {
    out: W,
}

impl LinePublisher<io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write + Send> LinePublisher<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write + Send> Publish for LinePublisher<W> {
    fn publish(&mut self, topic: &str, payload: &str) -> io::Result<()> {
        writeln!(self.out, "{topic} {payload}")?;
        self.out.flush()
    }
}

/// Topic layout shared by state and discovery messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    pub prefix: String,
    pub node_id: String,
}

impl Topics {
    #[must_use]
    pub fn base(&self, sensor: &Sensor) -> String {
        format!("{}/{}/{}/{}", self.prefix, sensor.component, self.node_id, sensor.object_id)
    }

    #[must_use]
    pub fn state(&self, sensor: &Sensor) -> String {
        format!("{}/state", self.base(sensor))
    }

    #[must_use]
    pub fn config(&self, sensor: &Sensor) -> String {
        format!("{}/config", self.base(sensor))
    }
}

/// Discovery payload: the sensor's public metadata, its device, and the
/// topic its state is published on.
///
/// # Errors
/// Returns an error if the sensor cannot be serialized.
pub fn discovery_payload(
    topics: &Topics,
    sensor: &Sensor,
    device: Option<&Device>,
) -> serde_json::Result<String> {
    let mut value = serde_json::to_value(sensor)?;
    if let Value::Object(map) = &mut value {
        map.insert("state_topic".to_string(), Value::String(topics.state(sensor)));
        if let Some(device) = device {
            map.insert("device".to_string(), serde_json::to_value(device)?);
        }
    }
    serde_json::to_string(&value)
}

/// Sensor state payload.
#[must_use]
pub fn format_value(value: f64) -> String {
    format!("{value:.6}")
}

type Update = (String, String);

/// [`ResultSink`] that forwards updates to a publisher thread.
pub struct PublisherSink {
    tx: Option<Sender<Update>>,
    handle: Option<JoinHandle<()>>,
    topics: Topics,
    sensors: Arc<BTreeMap<u16, Sensor>>,
}

impl PublisherSink {
    /// Start the publisher thread with room for `capacity` queued updates.
    ///
    /// # Errors
    /// Returns an error if the thread cannot be spawned.
    pub fn spawn<P: Publish + 'static>(
        mut publisher: P,
        topics: Topics,
        sensors: Arc<BTreeMap<u16, Sensor>>,
        capacity: usize,
    ) -> io::Result<Self> {
        let (tx, rx) = bounded::<Update>(capacity);
        let handle = thread::Builder::new().name("publisher".to_string()).spawn(move || {
            for (topic, payload) in rx {
                if let Err(e) = publisher.publish(&topic, &payload) {
                    warn!("Failed to publish to {topic}: {e}");
                }
            }
        })?;

        Ok(Self { tx: Some(tx), handle: Some(handle), topics, sensors })
    }

    /// Queue a discovery message for every sensor.
    pub fn announce(&self, device: Option<&Device>) {
        for sensor in self.sensors.values() {
            match discovery_payload(&self.topics, sensor, device) {
                Ok(payload) => self.enqueue(self.topics.config(sensor), payload),
                Err(e) => warn!("Failed to build discovery payload for {}: {e}", sensor.object_id),
            }
        }
    }

    fn enqueue(&self, topic: String, payload: String) {
        let Some(tx) = &self.tx else { return };
        match tx.try_send((topic, payload)) {
            Ok(()) => {}
            Err(TrySendError::Full((topic, _))) => warn!("Publisher queue full, dropping update for {topic}"),
            Err(TrySendError::Disconnected((topic, _))) => {
                debug!("Publisher gone, dropping update for {topic}");
            }
        }
    }

    /// Close the queue and wait until everything queued has been published.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                warn!("Publisher thread panicked");
            }
        }
    }
}

impl ResultSink for PublisherSink {
    fn publish(&mut self, event: &ReadingEvent) {
        let Some(sensor) = self.sensors.get(&event.reading.quantity.register) else {
            debug!("No sensor for register {}", event.reading.quantity.key());
            return;
        };
        self.enqueue(self.topics.state(sensor), format_value(event.reading.value));
    }
}

impl Drop for PublisherSink {
    fn drop(&mut self) {
        self.shutdown();
    }
}
