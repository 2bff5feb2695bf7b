//! CLI argument definitions

use clap::{Parser, ValueEnum};
use mbsniff_common::{PcsFilter, ResponseFilter};

use crate::sinks::MqttSettings;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Response filter applied on every link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum FilterKind {
    /// Accept every response
    #[default]
    None,
    /// LG ESS PCS status block sanity check
    Pcs,
}

impl FilterKind {
    /// A fresh filter instance; every link gets its own.
    #[must_use]
    pub fn build(self) -> ResponseFilter {
        match self {
            FilterKind::None => ResponseFilter::None,
            FilterKind::Pcs => ResponseFilter::Pcs(PcsFilter::new()),
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "mbsniff",
    version,
    about = "Passively decode Modbus RTU traffic of running processes",
    after_help = "\
EXAMPLES:
    sudo mbsniff LGEssSystem                    Trace by process name
    sudo mbsniff 1234 --to capture.log          Trace a PID and record the traffic
    mbsniff --from capture.log --http 0.0.0.0:8080
                                                Replay a recording and serve the status API"
)]
pub struct Args {
    /// Processes to trace, by PID or exact process name
    ///
    /// With --from, targets are optional PIDs that select per-process links.
    #[arg(value_name = "TARGET", required_unless_present = "from")]
    pub targets: Vec<String>,

    /// Replay a recorded capture instead of tracing
    #[arg(long, value_name = "FILE")]
    pub from: Option<PathBuf>,

    /// Record every captured message to FILE
    #[arg(long, value_name = "FILE")]
    pub to: Option<PathBuf>,

    /// Sensor definitions
    #[arg(long, value_name = "FILE", default_value = "sensors.yaml")]
    pub sensors: PathBuf,

    /// Device description attached to discovery messages
    #[arg(long, value_name = "FILE")]
    pub device: Option<PathBuf>,

    /// Response filter
    #[arg(long, value_enum, default_value_t = FilterKind::None)]
    pub filter: FilterKind,

    /// Decode each traced process as its own serial link
    #[arg(long)]
    pub link_per_process: bool,

    /// Serve the status API on ADDR
    #[arg(long, value_name = "ADDR")]
    pub http: Option<SocketAddr>,

    /// Publish readings as `topic payload` lines on stdout
    #[arg(long)]
    pub publish: bool,

    /// Publish readings to the MQTT broker at URL (tcp://host:port)
    #[arg(
        long,
        value_name = "URL",
        conflicts_with = "publish",
        requires_all = ["mqtt_username", "mqtt_password"]
    )]
    pub mqtt_broker: Option<String>,

    /// MQTT client id
    #[arg(long, default_value = "modbus-sniffer")]
    pub mqtt_client_id: String,

    /// MQTT username, required with --mqtt-broker
    #[arg(long)]
    pub mqtt_username: Option<String>,

    /// MQTT password, required with --mqtt-broker
    #[arg(long)]
    pub mqtt_password: Option<String>,

    /// Announce sensors before publishing
    #[arg(long, overrides_with = "no_discovery")]
    pub discovery: bool,

    /// Do not announce sensors
    #[arg(long, overrides_with = "discovery")]
    pub no_discovery: bool,

    /// Discovery topic prefix
    #[arg(long, default_value = "homeassistant")]
    pub discovery_prefix: String,

    /// Node id used in topics
    #[arg(long, default_value = "modbus-sniffer")]
    pub node_id: String,

    /// Capacity of the message and publisher queues
    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u16).range(1..))]
    pub channel_capacity: u16,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

impl Args {
    /// Whether discovery messages should be sent.
    #[must_use]
    pub fn discovery_enabled(&self) -> bool {
        !self.no_discovery
    }

    /// Broker settings, when publishing to MQTT.
    #[must_use]
    pub fn mqtt_settings(&self) -> Option<MqttSettings> {
        let broker = self.mqtt_broker.clone()?;
        Some(MqttSettings {
            broker,
            client_id: self.mqtt_client_id.clone(),
            username: self.mqtt_username.clone().unwrap_or_default(),
            password: self.mqtt_password.clone().unwrap_or_default(),
        })
    }
}
