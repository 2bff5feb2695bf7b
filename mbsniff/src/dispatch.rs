//! Dispatch loop
//!
//! Single consumer of the message channel. Each message is routed to a link
//! before any of its bytes reach a reassembly buffer, decoded by that link's
//! [`Decoder`], and the resulting readings are fanned out to every sink.
//!
//! ```text
//! tracer-1 ─┐
//! tracer-2 ─┼─▶ bounded channel ─▶ route ─▶ Decoder[link] ─▶ status board
//! replay   ─┘                                            ├─▶ sinks
//!                                                        └─▶ recorder
//! ```

use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use log::{error, info, warn};
use mbsniff_common::{Decoder, Message, Quantity, ResponseFilter};

use crate::domain::{LinkId, Pid};
use crate::record::MessageWriter;
use crate::sinks::{ReadingEvent, ResultSink, StatusBoard};

/// How captured messages are grouped into logical serial links.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Routing {
    /// Every message feeds one decoder.
    #[default]
    Shared,
    /// One decoder per traced pid; other pids are dropped.
    PerProcess(Vec<Pid>),
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub messages: u64,
    pub readings: u64,
    pub unrouted: u64,
}

type Recorder = MessageWriter<Box<dyn Write + Send>>;

pub struct Dispatcher {
    links: BTreeMap<LinkId, Decoder>,
    pid_links: Option<HashMap<Pid, LinkId>>,
    status: Option<Arc<StatusBoard>>,
    sinks: Vec<Box<dyn ResultSink>>,
    recorder: Option<Recorder>,
    stats: DispatchStats,
}

impl Dispatcher {
    /// Create every link up front; each gets its own filter from `filter`.
    pub fn new<F>(routing: &Routing, quantities: &BTreeMap<u16, Quantity>, filter: F) -> Self
    where
        F: Fn() -> ResponseFilter,
    {
        let decoder = || Decoder::new(quantities.clone(), filter());

        let (links, pid_links) = match routing {
            Routing::Shared => (BTreeMap::from([(LinkId(0), decoder())]), None),
            Routing::PerProcess(pids) => {
                let mut links = BTreeMap::new();
                let mut pid_links = HashMap::new();
                for &pid in pids {
                    let next = LinkId(u32::try_from(links.len()).unwrap_or(u32::MAX));
                    let link = *pid_links.entry(pid).or_insert(next);
                    links.entry(link).or_insert_with(decoder);
                }
                (links, Some(pid_links))
            }
        };

        Self { links, pid_links, status: None, sinks: Vec::new(), recorder: None, stats: DispatchStats::default() }
    }

    #[must_use]
    pub fn with_status(mut self, board: Arc<StatusBoard>) -> Self {
        self.status = Some(board);
        self
    }

    #[must_use]
    pub fn with_sink(mut self, sink: Box<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Append every dispatched message to `out`.
    #[must_use]
    pub fn with_recorder(mut self, out: Box<dyn Write + Send>) -> Self {
        self.recorder = Some(MessageWriter::new(out));
        self
    }

    /// Link a message from `pid` belongs to, if any.
    #[must_use]
    pub fn route(&self, pid: Pid) -> Option<LinkId> {
        match &self.pid_links {
            None => Some(LinkId(0)),
            Some(map) => map.get(&pid).copied(),
        }
    }

    #[must_use]
    pub fn decoder(&self, link: LinkId) -> Option<&Decoder> {
        self.links.get(&link)
    }

    #[must_use]
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Decode one message and fan its readings out. Returns the readings.
    pub fn dispatch(&mut self, message: &Message) -> Vec<ReadingEvent> {
        self.stats.messages += 1;
        let pid = Pid(message.pid);

        let routed = self.route(pid).and_then(|link| self.links.get_mut(&link).map(|decoder| (link, decoder)));
        let events = match routed {
            None => {
                self.stats.unrouted += 1;
                warn!("Dropping message from untraced {pid}");
                Vec::new()
            }
            Some((link, decoder)) => {
                let parsed_before = decoder.responses_parsed();
                let readings = decoder.decode(message);

                if decoder.responses_parsed() != parsed_before {
                    if let (Some(board), Some(frame)) = (&self.status, decoder.last_response()) {
                        board.set_raw(frame.clone(), DateTime::<Utc>::from(message.timestamp));
                    }
                }

                readings
                    .into_iter()
                    .map(|reading| ReadingEvent { link, pid, fd: message.fd, timestamp: message.timestamp, reading })
                    .collect::<Vec<_>>()
            }
        };

        for event in &events {
            info!(
                "new value: pid={} fd={} register={} value={}",
                event.pid.0,
                event.fd,
                event.reading.quantity.key(),
                event.reading.value
            );
            for sink in &mut self.sinks {
                sink.publish(event);
            }
        }
        if let Some(board) = &self.status {
            board.record(&events);
        }
        self.stats.readings += events.len() as u64;

        self.record(message);
        events
    }

    fn record(&mut self, message: &Message) {
        let Some(recorder) = &mut self.recorder else { return };
        if let Err(e) = recorder.write(message) {
            error!("Recording stopped: {e}");
            self.recorder = None;
        }
    }

    /// Consume messages until every sender is gone.
    pub fn run(mut self, rx: &Receiver<Message>) -> DispatchStats {
        for message in rx {
            self.dispatch(&message);
        }
        info!(
            "Dispatch finished: {} messages, {} readings, {} unrouted",
            self.stats.messages, self.stats.readings, self.stats.unrouted
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mbsniff_common::crc::append_crc;
    use mbsniff_common::{Direction, PcsFilter, QuantitySize};
    use std::sync::Mutex;

    fn quantities() -> BTreeMap<u16, Quantity> {
        BTreeMap::from([(0x10, Quantity::new(0x10, QuantitySize::One, 1.0, 0.0))])
    }

    fn request(pid: i32) -> Message {
        let mut b = vec![1, 3, 0x00, 0x10, 0x00, 0x01];
        append_crc(&mut b);
        Message::new(pid, 3, Direction::Write, b)
    }

    fn response(value: u16) -> Vec<u8> {
        let mut b = vec![1, 3, 2];
        b.extend_from_slice(&value.to_be_bytes());
        append_crc(&mut b);
        b
    }

    fn read(pid: i32, bytes: &[u8]) -> Message {
        Message::new(pid, 3, Direction::Read, bytes.to_vec())
    }

    #[derive(Clone, Default)]
    struct Collect(Arc<Mutex<Vec<ReadingEvent>>>);

    impl ResultSink for Collect {
        fn publish(&mut self, event: &ReadingEvent) {
            self.0.lock().unwrap().push(event.clone());
        }
    }

    #[test]
    fn test_shared_routing_merges_pids() {
        let mut dispatcher = Dispatcher::new(&Routing::Shared, &quantities(), || ResponseFilter::None);
        assert_eq!(dispatcher.route(Pid(1)), Some(LinkId(0)));
        assert_eq!(dispatcher.route(Pid(2)), Some(LinkId(0)));

        dispatcher.dispatch(&request(1));
        let events = dispatcher.dispatch(&read(2, &response(42)));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].reading.value, 42.0);
        assert_eq!(events[0].pid, Pid(2));
    }

    #[test]
    fn test_per_process_links_are_isolated() {
        let routing = Routing::PerProcess(vec![Pid(1), Pid(2)]);
        let mut dispatcher = Dispatcher::new(&routing, &quantities(), || ResponseFilter::None);
        assert_eq!(dispatcher.route(Pid(1)), Some(LinkId(0)));
        assert_eq!(dispatcher.route(Pid(2)), Some(LinkId(1)));
        assert_eq!(dispatcher.route(Pid(3)), None);

        // Request on pid 1, response on pid 2: no correlation across links
        dispatcher.dispatch(&request(1));
        assert!(dispatcher.dispatch(&read(2, &response(7))).is_empty());

        // Interleaved partial responses do not corrupt each other
        dispatcher.dispatch(&request(2));
        let a = response(5);
        let b = response(6);
        dispatcher.dispatch(&read(1, &a[..3]));
        assert_eq!(dispatcher.dispatch(&read(2, &b)).len(), 1);
        let events = dispatcher.dispatch(&read(1, &a[3..]));
        assert_eq!(events[0].reading.value, 5.0);
        assert_eq!(events[0].link, LinkId(0));
    }

    #[test]
    fn test_unknown_pid_dropped() {
        let routing = Routing::PerProcess(vec![Pid(1)]);
        let mut dispatcher = Dispatcher::new(&routing, &quantities(), || ResponseFilter::None);
        assert!(dispatcher.dispatch(&request(9)).is_empty());
        assert_eq!(dispatcher.stats().unrouted, 1);
        assert!(dispatcher.decoder(LinkId(0)).unwrap().last_request().is_none());
    }

    #[test]
    fn test_each_link_gets_own_filter() {
        let quantities = BTreeMap::from([(0x9c72, Quantity::new(0x9c72, QuantitySize::One, 1.0, 0.0))]);
        let routing = Routing::PerProcess(vec![Pid(1), Pid(2)]);
        let mut dispatcher = Dispatcher::new(&routing, &quantities, || ResponseFilter::Pcs(PcsFilter::new()));

        let mut req = vec![1, 3, 0x9c, 0x72, 0x00, 0x5c];
        append_crc(&mut req);
        let mut resp = vec![1, 3, 184];
        let mut registers = [0u16; 92];
        registers[0] = 17;
        registers[51] = 1;
        for r in registers {
            resp.extend_from_slice(&r.to_be_bytes());
        }
        append_crc(&mut resp);

        let mut exchange = |pid| {
            dispatcher.dispatch(&Message::new(pid, 3, Direction::Write, req.clone()));
            dispatcher.dispatch(&read(pid, &resp)).len()
        };

        // Bootstrap rejection happens once per link, not once globally
        assert_eq!(exchange(1), 0);
        assert_eq!(exchange(1), 1);
        assert_eq!(exchange(2), 0);
        assert_eq!(exchange(2), 1);
    }

    #[test]
    fn test_fan_out_status_and_recording() {
        let board = Arc::new(StatusBoard::new());
        let sink = Collect::default();
        let recorded = Arc::new(Mutex::new(Vec::new()));

        #[derive(Clone)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut dispatcher = Dispatcher::new(&Routing::Shared, &quantities(), || ResponseFilter::None)
            .with_status(Arc::clone(&board))
            .with_sink(Box::new(sink.clone()))
            .with_recorder(Box::new(Shared(Arc::clone(&recorded))));

        dispatcher.dispatch(&request(1));
        dispatcher.dispatch(&read(1, &response(99)));

        assert_eq!(sink.0.lock().unwrap().len(), 1);
        let snapshot = board.snapshot();
        assert_eq!(snapshot.results["0x10"].value, 99.0);
        assert_eq!(snapshot.raw.as_ref().unwrap().frame.registers, vec![99]);

        let text = String::from_utf8(recorded.lock().unwrap().clone()).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.lines().next().unwrap().contains(",1,3,write,8,"));
    }

    #[test]
    fn test_raw_frame_set_even_without_request() {
        let board = Arc::new(StatusBoard::new());
        let mut dispatcher = Dispatcher::new(&Routing::Shared, &quantities(), || ResponseFilter::None)
            .with_status(Arc::clone(&board));

        assert!(dispatcher.dispatch(&read(1, &response(3))).is_empty());
        assert!(board.snapshot().raw.is_some());
        assert!(board.snapshot().results.is_empty());
    }

    #[test]
    fn test_run_ends_when_senders_drop() {
        let (tx, rx) = crossbeam_channel::bounded(4);
        let dispatcher = Dispatcher::new(&Routing::Shared, &quantities(), || ResponseFilter::None);
        let producer = std::thread::spawn(move || {
            tx.send(request(1)).unwrap();
            tx.send(read(1, &response(1))).unwrap();
        });
        let stats = dispatcher.run(&rx);
        producer.join().unwrap();
        assert_eq!(stats, DispatchStats { messages: 2, readings: 1, unrouted: 0 });
    }
}
