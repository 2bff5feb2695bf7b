//! Recording and replay of captured messages
//!
//! One message per line:
//!
//! ```text
//! timestamp_millis,pid,fd,read|write,length,hexpayload
//! 1718009876123,4242,7,write,8,01039c72005c8a5b
//! ```
//!
//! A recorded file fed back through [`spawn_replay`] drives the dispatch
//! loop exactly like live tracers do.

use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::Path;
use std::thread::{self, JoinHandle};
use std::time::{Duration, UNIX_EPOCH};

use crossbeam_channel::Sender;
use log::{error, info};
use mbsniff_common::{Direction, Message};

use crate::domain::RecordError;

const FIELDS: usize = 6;

/// Render one message as a record line, without the trailing newline.
#[must_use]
pub fn encode_record(message: &Message) -> String {
    let millis = message.timestamp.duration_since(UNIX_EPOCH).map_or(0, |d| d.as_millis());
    format!(
        "{millis},{},{},{},{},{}",
        message.pid,
        message.fd,
        message.direction,
        message.payload.len(),
        hex::encode(&message.payload)
    )
}

/// Parse one record line. `line_no` is 1-based and only used in errors.
///
/// # Errors
/// Returns [`RecordError::Malformed`] on a wrong field count, a bad integer,
/// an unknown direction, invalid hex, or a length that disagrees with the
/// payload.
pub fn decode_record(line: &str, line_no: usize) -> Result<Message, RecordError> {
    let malformed = |reason: String| RecordError::Malformed { line: line_no, reason };

    let fields: Vec<&str> = line.trim_end().split(',').collect();
    if fields.len() != FIELDS {
        return Err(malformed(format!("expected {FIELDS} fields, found {}", fields.len())));
    }

    let millis: u64 = fields[0].parse().map_err(|e| malformed(format!("timestamp: {e}")))?;
    let pid: i32 = fields[1].parse().map_err(|e| malformed(format!("pid: {e}")))?;
    let fd: i32 = fields[2].parse().map_err(|e| malformed(format!("fd: {e}")))?;
    let direction: Direction = fields[3].parse().map_err(|e| malformed(format!("{e}")))?;
    let length: usize = fields[4].parse().map_err(|e| malformed(format!("length: {e}")))?;
    let payload = hex::decode(fields[5]).map_err(|e| malformed(format!("payload: {e}")))?;

    if payload.len() != length {
        return Err(malformed(format!("length {length} but payload has {} bytes", payload.len())));
    }

    Ok(Message {
        timestamp: UNIX_EPOCH + Duration::from_millis(millis),
        pid,
        fd,
        direction,
        payload,
    })
}

/// Appends record lines to a writer, flushing after each one.
pub struct MessageWriter<W: Write> {
    out: W,
}

impl<W: Write> MessageWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write one record.
    ///
    /// # Errors
    /// Returns an error if writing or flushing fails.
    pub fn write(&mut self, message: &Message) -> Result<(), RecordError> {
        writeln!(self.out, "{}", encode_record(message))?;
        self.out.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Iterates over the records of a recorded file. Blank lines are skipped.
pub struct MessageReader<R: BufRead> {
    lines: io::Lines<R>,
    line_no: usize,
}

impl MessageReader<BufReader<File>> {
    /// Open a recorded file for replay.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened.
    pub fn open(path: &Path) -> io::Result<Self> {
        Ok(Self::new(BufReader::new(File::open(path)?)))
    }
}

impl<R: BufRead> MessageReader<R> {
    pub fn new(reader: R) -> Self {
        Self { lines: reader.lines(), line_no: 0 }
    }
}

impl<R: BufRead> Iterator for MessageReader<R> {
    type Item = Result<Message, RecordError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.line_no += 1;
            match self.lines.next()? {
                Err(e) => return Some(Err(e.into())),
                Ok(line) if line.trim().is_empty() => {}
                Ok(line) => return Some(decode_record(&line, self.line_no)),
            }
        }
    }
}

/// Feed every record of `reader` into `tx` from a dedicated thread.
///
/// The thread stops at the first malformed record, logging it once, or when
/// the receiving side is gone. Returns the number of messages sent.
///
/// # Errors
/// Returns an error if the thread cannot be spawned.
pub fn spawn_replay<R>(
    reader: MessageReader<R>,
    tx: Sender<Message>,
) -> io::Result<JoinHandle<Result<usize, RecordError>>>
where
    R: BufRead + Send + 'static,
{
    thread::Builder::new().name("replay".to_string()).spawn(move || {
        let mut sent = 0;
        for record in reader {
            let message = match record {
                Ok(message) => message,
                Err(e) => {
                    error!("Replay stopped: {e}");
                    return Err(e);
                }
            };
            if tx.send(message).is_err() {
                break;
            }
            sent += 1;
        }
        info!("Replay finished after {sent} messages");
        Ok(sent)
    })
}
