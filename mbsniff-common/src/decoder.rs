//! Per-link reassembly and correlation
//!
//! A [`Decoder`] turns one ordered stream of [`Message`]s from a single
//! serial link into decoded [`Reading`]s.
//!
//! ## State Machine
//!
//! - **Write**: parse a request; on success it becomes the outstanding
//!   request and the response buffer is reset. A write that does not parse
//!   is logged and otherwise ignored, so unrelated output of the traced
//!   process does not disturb an exchange in flight.
//! - **Read**: append to the response buffer and try to parse a response.
//!   `Incomplete` keeps buffering, `Invalid` drops the buffer, `Parsed`
//!   keeps the remainder and, if a request is outstanding and the filter
//!   accepts, decodes every quantity whose window lies inside the response.
//!
//! Invalid bytes are discarded without scanning for the next plausible frame
//! start, so a corrupted stream stays out of sync until the next write.

use std::collections::BTreeMap;

use log::{debug, warn};

use crate::filter::ResponseFilter;
use crate::frame::{parse_request, parse_response, ParseOutcome, RequestFrame, ResponseFrame};
use crate::message::{Direction, Message};
use crate::quantity::{Quantity, Reading};

/// Reassembly state for one logical serial link.
#[derive(Debug)]
pub struct Decoder {
    response_buffer: Vec<u8>,
    last_request: Option<RequestFrame>,
    last_response: Option<ResponseFrame>,
    responses_parsed: u64,
    quantities: BTreeMap<u16, Quantity>,
    filter: ResponseFilter,
}

impl Decoder {
    #[must_use]
    pub fn new(quantities: BTreeMap<u16, Quantity>, filter: ResponseFilter) -> Self {
        Self {
            response_buffer: Vec::new(),
            last_request: None,
            last_response: None,
            responses_parsed: 0,
            quantities,
            filter,
        }
    }

    /// Feed one message and return every reading it completes.
    ///
    /// Messages must arrive in capture order and all belong to this link.
    pub fn decode(&mut self, message: &Message) -> Vec<Reading> {
        match message.direction {
            Direction::Write => {
                self.handle_write(&message.payload);
                Vec::new()
            }
            Direction::Read => self.handle_read(&message.payload),
        }
    }

    /// The request that incoming responses are currently correlated with.
    #[must_use]
    pub fn last_request(&self) -> Option<&RequestFrame> {
        self.last_request.as_ref()
    }

    /// The most recently parsed response, whether or not it was accepted.
    #[must_use]
    pub fn last_response(&self) -> Option<&ResponseFrame> {
        self.last_response.as_ref()
    }

    /// Number of responses parsed so far, accepted or not.
    #[must_use]
    pub fn responses_parsed(&self) -> u64 {
        self.responses_parsed
    }

    /// Bytes buffered while waiting for a complete response.
    #[must_use]
    pub fn pending_response(&self) -> &[u8] {
        &self.response_buffer
    }

    fn handle_write(&mut self, payload: &[u8]) {
        match parse_request(payload) {
            ParseOutcome::Parsed { frame, remainder } => {
                debug!(
                    "request: unit={} addr={:#06x} count={}",
                    frame.unit, frame.address, frame.register_count
                );
                if !remainder.is_empty() {
                    debug!("ignoring {} bytes after request", remainder.len());
                }
                self.response_buffer.clear();
                self.last_request = Some(frame);
            }
            ParseOutcome::Incomplete => {
                debug!("short request write ({} bytes), dropped", payload.len());
            }
            ParseOutcome::Invalid(e) => {
                warn!("failed to parse read holding registers request: {e}");
            }
        }
    }

    fn handle_read(&mut self, payload: &[u8]) -> Vec<Reading> {
        self.response_buffer.extend_from_slice(payload);

        let (response, remainder) = match parse_response(&self.response_buffer) {
            ParseOutcome::Parsed { frame, remainder } => (frame, remainder.to_vec()),
            ParseOutcome::Incomplete => {
                debug!("response incomplete ({} bytes buffered)", self.response_buffer.len());
                return Vec::new();
            }
            ParseOutcome::Invalid(e) => {
                warn!(
                    "failed to parse holding registers response, dropping {} bytes: {e}",
                    self.response_buffer.len()
                );
                self.response_buffer.clear();
                return Vec::new();
            }
        };
        self.response_buffer = remainder;

        debug!(
            "response: unit={} count={} registers={:?}",
            response.unit, response.byte_count, response.registers
        );

        let readings = match self.last_request {
            None => {
                debug!("response without outstanding request, skipped");
                Vec::new()
            }
            Some(request) if !self.filter.accept(&request, &response) => {
                debug!("response rejected by filter");
                Vec::new()
            }
            Some(request) => decode_window(&self.quantities, &request, &response),
        };

        self.last_response = Some(response);
        self.responses_parsed += 1;
        readings
    }
}

/// Decode every quantity whose `[register, register + size)` window lies
/// inside the response relative to the request's start address.
fn decode_window(
    quantities: &BTreeMap<u16, Quantity>,
    request: &RequestFrame,
    response: &ResponseFrame,
) -> Vec<Reading> {
    let mut readings = Vec::new();

    // Quantities below the request address can never fall inside the window.
    for quantity in quantities.range(request.address..).map(|(_, q)| q) {
        let offset = usize::from(quantity.register - request.address);
        let end = offset + quantity.size.registers();
        let Some(window) = response.registers.get(offset..end) else {
            continue;
        };

        match quantity.decode(window) {
            Ok(reading) => readings.push(reading),
            Err(e) => warn!("failed to decode quantity: {e}"),
        }
    }

    readings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crc::append_crc;
    use crate::filter::PcsFilter;
    use crate::quantity::QuantitySize;

    fn request(address: u16, count: u16) -> Message {
        let mut b = vec![1, 3];
        b.extend_from_slice(&address.to_be_bytes());
        b.extend_from_slice(&count.to_be_bytes());
        append_crc(&mut b);
        Message::new(100, 3, Direction::Write, b)
    }

    fn response_bytes(registers: &[u16]) -> Vec<u8> {
        let mut b = vec![1, 3, u8::try_from(registers.len() * 2).unwrap()];
        for r in registers {
            b.extend_from_slice(&r.to_be_bytes());
        }
        append_crc(&mut b);
        b
    }

    fn read(bytes: &[u8]) -> Message {
        Message::new(100, 3, Direction::Read, bytes.to_vec())
    }

    fn quantities(list: &[Quantity]) -> BTreeMap<u16, Quantity> {
        list.iter().map(|q| (q.register, *q)).collect()
    }

    fn decoder(list: &[Quantity]) -> Decoder {
        Decoder::new(quantities(list), ResponseFilter::None)
    }

    #[test]
    fn test_request_then_response() {
        let mut dec = decoder(&[Quantity::new(0x0010, QuantitySize::Two, 1.0, 0.0)]);

        assert!(dec.decode(&request(0x0010, 2)).is_empty());
        assert_eq!(dec.last_request().unwrap().address, 0x0010);

        let readings = dec.decode(&read(&response_bytes(&[1, 2])));
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 65538.0);
        assert_eq!(readings[0].raw, vec![1, 2]);
        assert!(dec.pending_response().is_empty());
    }

    #[test]
    fn test_response_split_across_reads() {
        let mut dec = decoder(&[Quantity::new(0x0010, QuantitySize::Two, 1.0, 0.0)]);
        dec.decode(&request(0x0010, 2));

        let bytes = response_bytes(&[1, 2]);
        assert!(dec.decode(&read(&bytes[..2])).is_empty());
        assert_eq!(dec.pending_response(), &bytes[..2]);
        assert!(dec.last_response().is_none());

        let readings = dec.decode(&read(&bytes[2..]));
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 65538.0);
    }

    #[test]
    fn test_every_split_matches_single_read() {
        let q = [
            Quantity::new(0x0100, QuantitySize::One, 0.5, 0.0),
            Quantity::new(0x0102, QuantitySize::Four, 1.0, -3.0),
        ];
        let bytes = response_bytes(&[10, 0, 0, 0, 0, 7]);

        let mut whole = decoder(&q);
        whole.decode(&request(0x0100, 6));
        let expected = whole.decode(&read(&bytes));
        assert_eq!(expected.len(), 2);

        for split in 1..bytes.len() {
            let mut dec = decoder(&q);
            dec.decode(&request(0x0100, 6));
            assert!(dec.decode(&read(&bytes[..split])).is_empty(), "split at {split}");
            assert_eq!(dec.decode(&read(&bytes[split..])), expected, "split at {split}");
        }
    }

    #[test]
    fn test_corrupted_response_clears_buffer() {
        let mut dec = decoder(&[Quantity::new(0x0010, QuantitySize::Two, 1.0, 0.0)]);
        dec.decode(&request(0x0010, 2));

        let mut bytes = response_bytes(&[1, 2]);
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(dec.decode(&read(&bytes)).is_empty());
        assert!(dec.pending_response().is_empty());
        assert!(dec.last_response().is_none());
    }

    #[test]
    fn test_response_without_request() {
        let mut dec = decoder(&[Quantity::new(0, QuantitySize::One, 1.0, 0.0)]);
        assert!(dec.decode(&read(&response_bytes(&[5]))).is_empty());
        // Still available for introspection.
        assert_eq!(dec.last_response().unwrap().registers, vec![5]);
        assert_eq!(dec.responses_parsed(), 1);
    }

    #[test]
    fn test_unparsable_write_keeps_exchange() {
        let mut dec = decoder(&[Quantity::new(0x0010, QuantitySize::One, 1.0, 0.0)]);
        dec.decode(&request(0x0010, 1));

        let bytes = response_bytes(&[5]);
        dec.decode(&read(&bytes[..3]));

        // Unrelated writes (log lines, short writes) between request and reply
        dec.decode(&Message::new(100, 1, Direction::Write, b"log line\n".to_vec()));
        dec.decode(&Message::new(100, 3, Direction::Write, vec![1, 3, 0]));
        assert_eq!(dec.last_request().unwrap().address, 0x0010);
        assert_eq!(dec.pending_response(), &bytes[..3]);

        let readings = dec.decode(&read(&bytes[3..]));
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 5.0);
    }

    #[test]
    fn test_write_resets_partial_response() {
        let mut dec = decoder(&[Quantity::new(0x0010, QuantitySize::One, 1.0, 0.0)]);
        dec.decode(&request(0x0010, 1));
        dec.decode(&read(&[1, 3]));
        dec.decode(&request(0x0010, 1));
        assert!(dec.pending_response().is_empty());

        let readings = dec.decode(&read(&response_bytes(&[42])));
        assert_eq!(readings[0].value, 42.0);
    }

    #[test]
    fn test_window_containment() {
        let mut dec = decoder(&[
            Quantity::new(0x000F, QuantitySize::One, 1.0, 0.0), // before the window
            Quantity::new(0x0010, QuantitySize::One, 1.0, 0.0),
            Quantity::new(0x0012, QuantitySize::Two, 1.0, 0.0), // crosses the end
            Quantity::new(0x0013, QuantitySize::One, 1.0, 0.0), // past the end
        ]);
        dec.decode(&request(0x0010, 3));
        let readings = dec.decode(&read(&response_bytes(&[1, 2, 3])));
        let registers: Vec<u16> = readings.iter().map(|r| r.quantity.register).collect();
        assert_eq!(registers, vec![0x0010]);

        let mut dec = decoder(&[Quantity::new(0x0012, QuantitySize::One, 1.0, 0.0)]);
        dec.decode(&request(0x0010, 3));
        let readings = dec.decode(&read(&response_bytes(&[1, 2, 3])));
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 3.0);
    }

    #[test]
    fn test_remainder_is_kept_for_next_read() {
        let mut dec = decoder(&[Quantity::new(0, QuantitySize::One, 1.0, 0.0)]);
        dec.decode(&request(0, 1));
        let mut bytes = response_bytes(&[1]);
        bytes.extend_from_slice(&[0x01, 0x03]);
        assert_eq!(dec.decode(&read(&bytes)).len(), 1);
        assert_eq!(dec.pending_response(), &[0x01, 0x03]);
    }

    #[test]
    fn test_pcs_filter_scenario() {
        let q = Quantity::new(0x9c72, QuantitySize::Two, 1.0, 0.0);
        let mut dec = Decoder::new(quantities(&[q]), ResponseFilter::Pcs(PcsFilter::new()));

        let mut registers = vec![0u16; 92];
        registers[1] = 9;
        registers[50] = 0xFFFF;
        registers[51] = 0xFFFF;

        // Bootstrap: first response is always rejected.
        dec.decode(&request(0x9c72, 92));
        assert!(dec.decode(&read(&response_bytes(&registers))).is_empty());

        // Non-positive check value.
        dec.decode(&request(0x9c72, 92));
        assert!(dec.decode(&read(&response_bytes(&registers))).is_empty());

        registers[50] = 0;
        registers[51] = 1;
        dec.decode(&request(0x9c72, 92));
        let readings = dec.decode(&read(&response_bytes(&registers)));
        assert_eq!(readings.len(), 1);
        assert_eq!(readings[0].value, 9.0);
    }
}
