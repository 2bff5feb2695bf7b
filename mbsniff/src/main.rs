//! # mbsniff - Main Entry Point
//!
//! Two sources feed the same pipeline:
//! - **Live** (`mbsniff <PID|NAME>...`): trace the given processes
//! - **Replay** (`--from capture.log`): feed a recorded capture
//!
//! Ctrl+C ends the program immediately; queued messages are not drained.

use std::fs::File;
use std::io::Write;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;
use log::{error, info, warn};
use mbsniff_common::Message;

use mbsniff::cli::Args;
use mbsniff::config::{load_device, load_sensors, quantity_map, sensors_by_register};
use mbsniff::dispatch::{DispatchStats, Dispatcher, Routing};
use mbsniff::domain::{Pid, RecordError, TraceError};
use mbsniff::preflight::run_preflight_checks;
use mbsniff::process_lookup::resolve_target;
use mbsniff::record::{spawn_replay, MessageReader};
use mbsniff::sinks::http::{self, AppState};
use mbsniff::sinks::{LinePublisher, MqttPublisher, PublisherSink, StatusBoard, Topics};
use mbsniff::tracer::{self, TracerHandle};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

const MQTT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}").to_lowercase();
    if msg.contains("permission denied") || msg.contains("operation not permitted") {
        EXIT_NOPERM
    } else if msg.contains("invalid argument") {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

/// Where messages come from.
enum Source {
    Tracers(Vec<TracerHandle>),
    Replay(JoinHandle<Result<usize, RecordError>>),
}

impl Source {
    /// Wait for every producer and report how they ended.
    fn finish(self) -> Result<()> {
        match self {
            Source::Tracers(workers) => {
                let total = workers.len();
                let mut failures = Vec::new();
                for worker in workers {
                    let pid = worker.pid();
                    if let Err(e) = worker.join() {
                        // Already logged by the worker itself unless it panicked
                        if matches!(e, TraceError::Panicked(_)) {
                            error!("{e}");
                        }
                        warn!("Tracer for {pid} did not finish cleanly");
                        failures.push(e);
                    }
                }
                match failures.pop() {
                    Some(last) if failures.len() + 1 == total => {
                        Err(anyhow::Error::new(last).context(format!("All {total} tracers failed")))
                    }
                    _ => Ok(()),
                }
            }
            Source::Replay(handle) => match handle.join() {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(_)) => bail!("Replay stopped early"),
                Err(_) => bail!("Replay thread panicked"),
            },
        }
    }
}

/// Targets given alongside `--from` only select per-process links.
fn replay_pids(targets: &[String]) -> Result<Vec<Pid>> {
    targets
        .iter()
        .map(|t| {
            t.parse::<i32>()
                .map(Pid)
                .with_context(|| format!("Invalid argument: replay targets must be PIDs, got '{t}'"))
        })
        .collect()
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();
    let quiet = args.quiet;

    // ── Configuration: every failure here is fatal ─────────────────────
    let sensors = load_sensors(&args.sensors)?;
    let device = args.device.as_deref().map(load_device).transpose()?;
    let quantities = quantity_map(&sensors)?;
    let sensor_index = Arc::new(sensors_by_register(&sensors));
    let capacity = usize::from(args.channel_capacity);

    let replay = args
        .from
        .as_ref()
        .map(|path| {
            MessageReader::open(path)
                .with_context(|| format!("Failed to open recording {}", path.display()))
        })
        .transpose()?;

    let pids = if replay.is_some() {
        replay_pids(&args.targets)?
    } else {
        let pids = args.targets.iter().map(String::as_str).map(resolve_target).collect::<Result<Vec<_>>>()?;
        run_preflight_checks(&pids)?;
        pids
    };

    let recorder = args
        .to
        .as_ref()
        .map(|path| {
            File::create(path).with_context(|| format!("Failed to create recording {}", path.display()))
        })
        .transpose()?;

    let routing = if args.link_per_process {
        if pids.is_empty() {
            bail!("Invalid argument: --link-per-process needs at least one PID");
        }
        Routing::PerProcess(pids.clone())
    } else {
        Routing::Shared
    };

    if !quiet {
        eprintln!("mbsniff v{}", env!("CARGO_PKG_VERSION"));
        match &args.from {
            Some(path) => eprintln!("replay: {}", path.display()),
            None => {
                let list: Vec<String> = pids.iter().map(|p| p.0.to_string()).collect();
                eprintln!("pids: {}", list.join(", "));
            }
        }
        eprintln!("sensors: {}", sensors.len());
        if let Some(path) = &args.to {
            eprintln!("recording: {}", path.display());
        }
        if let Some(broker) = &args.mqtt_broker {
            eprintln!("mqtt: {broker}");
        }
    }

    // ── Sinks ──────────────────────────────────────────────────────────
    let board = Arc::new(StatusBoard::new());
    let mut dispatcher = Dispatcher::new(&routing, &quantities, || args.filter.build())
        .with_status(Arc::clone(&board));

    let topics = Topics { prefix: args.discovery_prefix.clone(), node_id: args.node_id.clone() };
    let publisher = if let Some(settings) = args.mqtt_settings() {
        let mqtt = tokio::task::spawn_blocking(move || MqttPublisher::connect(&settings, MQTT_CONNECT_TIMEOUT))
            .await
            .context("MQTT connect task panicked")??;
        Some(PublisherSink::spawn(mqtt, topics, Arc::clone(&sensor_index), capacity))
    } else if args.publish {
        Some(PublisherSink::spawn(LinePublisher::stdout(), topics, Arc::clone(&sensor_index), capacity))
    } else {
        None
    };
    if let Some(publisher) = publisher {
        let publisher = publisher.context("Failed to start publisher")?;
        if args.discovery_enabled() {
            publisher.announce(device.as_ref());
        }
        dispatcher = dispatcher.with_sink(Box::new(publisher));
    }

    if let Some(file) = recorder {
        dispatcher = dispatcher.with_recorder(Box::new(file) as Box<dyn Write + Send>);
    }

    let server = args.http.map(|addr| {
        let state = AppState { board: Arc::clone(&board), sensors: Arc::clone(&sensor_index) };
        tokio::spawn(async move {
            if let Err(e) = http::serve(addr, state).await {
                error!("Status API on {addr} stopped: {e}");
            }
        })
    });

    // ── Producers ──────────────────────────────────────────────────────
    let (tx, rx) = bounded::<Message>(capacity);

    let source = match replay {
        Some(reader) => Source::Replay(spawn_replay(reader, tx).context("Failed to start replay")?),
        None => {
            let mut workers = Vec::with_capacity(pids.len());
            for &pid in &pids {
                match tracer::spawn(pid, tx.clone()) {
                    Ok(worker) => workers.push(worker),
                    Err(e @ TraceError::Unsupported(_)) => return Err(e.into()),
                    Err(e) => error!("{e}"),
                }
            }
            drop(tx);
            if workers.is_empty() {
                bail!("No tracer could be started");
            }
            Source::Tracers(workers)
        }
    };

    // ── Dispatch on its own thread, until producers finish or Ctrl+C ───
    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<DispatchStats>();
    std::thread::Builder::new()
        .name("dispatch".to_string())
        .spawn(move || {
            let stats = dispatcher.run(&rx);
            let _ = done_tx.send(stats);
        })
        .context("Failed to start dispatch thread")?;

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    tokio::select! {
        stats = done_rx => {
            let stats = stats.context("Dispatch thread panicked")?;
            source.finish()?;
            if !quiet {
                eprintln!(
                    "finished: {} messages, {} readings, {} unrouted",
                    stats.messages, stats.readings, stats.unrouted
                );
            }
        }
        _ = &mut ctrl_c => {
            info!("Interrupted");
            return Ok(());
        }
    }

    // Keep answering status requests after the capture ends
    if let Some(server) = server {
        if !server.is_finished() {
            info!("Capture finished, status API still running; press Ctrl+C to exit");
            ctrl_c.await.context("Failed to wait for Ctrl+C")?;
        }
    }

    Ok(())
}
