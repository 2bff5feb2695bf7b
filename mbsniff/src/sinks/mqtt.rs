//! MQTT broker backend for the publisher sink
//!
//! Wraps the synchronous `rumqttc` client. The event loop runs on its own
//! `mqtt` thread and reconnects on its own after the first successful
//! connection; a failure before that is reported to the caller.

use std::io;
use std::thread;
use std::time::Duration;

use crossbeam_channel::bounded;
use log::{debug, info, warn};
use rumqttc::{Client, ConnectReturnCode, ConnectionError, Event, MqttOptions, Packet, QoS};

use super::publish::Publish;
use crate::domain::MqttError;

const DEFAULT_PORT: u16 = 1883;
const KEEP_ALIVE: Duration = Duration::from_secs(30);
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CAPACITY: usize = 64;

/// Broker address and credentials.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub client_id: String,
    pub username: String,
    pub password: String,
}

/// Split `tcp://host:port`, `mqtt://host:port` or `host:port` into its parts.
///
/// The port defaults to 1883.
///
/// # Errors
/// Returns [`MqttError::InvalidBroker`] for another scheme, an empty host or a bad port.
pub fn parse_broker(url: &str) -> Result<(String, u16), MqttError> {
    let invalid = || MqttError::InvalidBroker(url.to_string());
    let rest = match url.split_once("://") {
        Some(("tcp" | "mqtt", rest)) => rest,
        Some(_) => return Err(invalid()),
        None => url,
    };
    let rest = rest.trim_end_matches('/');
    let (host, port) = match rest.rsplit_once(':') {
        Some((host, port)) => (host, port.parse::<u16>().map_err(|_| invalid())?),
        None => (rest, DEFAULT_PORT),
    };
    if host.is_empty() || host.contains('/') {
        return Err(invalid());
    }
    Ok((host.to_string(), port))
}

/// Publishes at QoS 2 (exactly once), not retained.
pub struct MqttPublisher {
    client: Client,
}

impl MqttPublisher {
    /// Connect and block until the broker acknowledges, or `timeout` passes.
    ///
    /// # Errors
    /// Returns an error if the url is invalid, the broker refuses or cannot be
    /// reached, or no CONNACK arrives in time.
    pub fn connect(settings: &MqttSettings, timeout: Duration) -> Result<Self, MqttError> {
        let (host, port) = parse_broker(&settings.broker)?;
        let mut options = MqttOptions::new(settings.client_id.clone(), host, port);
        options
            .set_credentials(settings.username.clone(), settings.password.clone())
            .set_keep_alive(KEEP_ALIVE);

        let (ready_tx, ready_rx) = bounded::<Result<Client, String>>(1);
        let broker = settings.broker.clone();
        info!("Connecting to MQTT broker {broker}");

        thread::Builder::new()
            .name("mqtt".to_string())
            .spawn(move || {
                let (client, mut connection) = Client::new(options, REQUEST_CAPACITY);
                let mut pending = Some((ready_tx, client));
                for event in connection.iter() {
                    match event {
                        Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                            if ack.code != ConnectReturnCode::Success {
                                let reason = format!("broker refused connection: {:?}", ack.code);
                                if let Some((tx, _)) = pending.take() {
                                    let _ = tx.send(Err(reason));
                                    return;
                                }
                                warn!("MQTT {reason}");
                                thread::sleep(RECONNECT_DELAY);
                                continue;
                            }
                            info!("Connected to MQTT broker {broker}");
                            if let Some((tx, client)) = pending.take() {
                                let _ = tx.send(Ok(client));
                            }
                        }
                        Ok(_) => {}
                        Err(ConnectionError::RequestsDone) => break,
                        Err(e) => {
                            if let Some((tx, _)) = pending.take() {
                                let _ = tx.send(Err(e.to_string()));
                                return;
                            }
                            warn!("Connection to MQTT broker {broker} lost: {e}");
                            thread::sleep(RECONNECT_DELAY);
                        }
                    }
                }
                debug!("MQTT event loop finished");
            })
            .map_err(MqttError::Spawn)?;

        match ready_rx.recv_timeout(timeout) {
            Ok(Ok(client)) => Ok(Self { client }),
            Ok(Err(reason)) => Err(MqttError::Connect { broker: settings.broker.clone(), reason }),
            Err(_) => Err(MqttError::Timeout { broker: settings.broker.clone(), timeout }),
        }
    }
}

impl Publish for MqttPublisher {
    fn publish(&mut self, topic: &str, payload: &str) -> io::Result<()> {
        self.client
            .publish(topic, QoS::ExactlyOnce, false, payload.as_bytes().to_vec())
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Err(e) = self.client.disconnect() {
            debug!("MQTT disconnect: {e}");
        }
    }
}
