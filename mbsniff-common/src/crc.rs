//! CRC-16/MODBUS (reflected polynomial 0xA001, seed 0xFFFF, no final xor).

/// Compute the Modbus RTU checksum of `data`.
///
/// The result is transmitted little-endian after the covered bytes.
#[must_use]
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= u16::from(byte);
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Append the little-endian checksum of `frame` to it.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_request_vector() {
        // Read 10 holding registers from unit 1 starting at 0
        let crc = crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]);
        assert_eq!(crc, 0xCDC5);
        assert_eq!(crc.to_le_bytes(), [0xC5, 0xCD]);
    }

    #[test]
    fn test_empty_input_is_seed() {
        assert_eq!(crc16(&[]), 0xFFFF);
    }

    #[test]
    fn test_append_crc() {
        let mut frame = vec![0x01, 0x03, 0x00, 0x10, 0x00, 0x02];
        append_crc(&mut frame);
        assert_eq!(&frame[6..], &[0xC5, 0xCE]);
    }
}
