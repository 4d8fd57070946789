//! Network time protocol packets
//!
//! Only the client request and the transmit timestamp of the reply are used.
//! Multi-byte fields here are big-endian, unlike the frame wire protocol.

use crate::error::ClockError;

use super::timestamp::Timestamp;

pub const NTP_PACKET_LENGTH: usize = 48;
pub const NTP_PORT: u16 = 123;

/// Leap indicator 0, version 3, mode 3 (client): `llvvvmmm`
pub const NTP_REQUEST_FLAGS: u8 = 0b0001_1011;

/// Seconds between 1900-01-01 and 1970-01-01
pub const NTP_UNIX_EPOCH_OFFSET: u64 = (70 * 365 + 17) * 86_400;

const TRANSMIT_SECONDS_OFFSET: usize = 40;
const TRANSMIT_FRACTION_OFFSET: usize = 44;

/// Build a client time request
pub fn build_request() -> [u8; NTP_PACKET_LENGTH] {
    let mut packet = [0u8; NTP_PACKET_LENGTH];
    packet[0] = NTP_REQUEST_FLAGS;
    packet
}

/// Extract the server's transmit time from a reply
///
/// A fraction that rounds to zero microseconds marks a bogus reply; some
/// servers send those with a far-future seconds field.
pub fn parse_reply(reply: &[u8]) -> Result<Timestamp, ClockError> {
    if reply.len() < NTP_PACKET_LENGTH {
        return Err(ClockError::ShortReply(reply.len()));
    }

    let seconds = read_be_u32(reply, TRANSMIT_SECONDS_OFFSET) as u64;
    let fraction = read_be_u32(reply, TRANSMIT_FRACTION_OFFSET) as u64;
    let micros = (fraction * 1_000_000) >> 32;

    if micros == 0 {
        return Err(ClockError::BogusReply);
    }

    let unix_seconds = seconds
        .checked_sub(NTP_UNIX_EPOCH_OFFSET)
        .ok_or(ClockError::BogusReply)?;

    Ok(Timestamp::from_parts(unix_seconds, micros))
}

/// Encode a transmit timestamp into a reply-shaped packet
pub fn build_reply(time: Timestamp) -> [u8; NTP_PACKET_LENGTH] {
    let mut packet = [0u8; NTP_PACKET_LENGTH];
    packet[0] = 0b0001_1100; // version 3, mode 4 (server)

    let seconds = (time.seconds() + NTP_UNIX_EPOCH_OFFSET) as u32;
    // Round up so the fraction decodes back to the same microsecond
    let fraction = ((time.subsec_micros() << 32) + 999_999) / 1_000_000;

    packet[TRANSMIT_SECONDS_OFFSET..TRANSMIT_SECONDS_OFFSET + 4]
        .copy_from_slice(&seconds.to_be_bytes());
    packet[TRANSMIT_FRACTION_OFFSET..TRANSMIT_FRACTION_OFFSET + 4]
        .copy_from_slice(&(fraction as u32).to_be_bytes());
    packet
}

fn read_be_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        let request = build_request();
        assert_eq!(request.len(), 48);
        assert_eq!(request[0], 0x1B);
        assert!(request[1..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_parse_reply() {
        let mut reply = [0u8; NTP_PACKET_LENGTH];
        // 2023-11-14 22:13:20 UTC
        let ntp_seconds = (1_700_000_000u64 + NTP_UNIX_EPOCH_OFFSET) as u32;
        reply[40..44].copy_from_slice(&ntp_seconds.to_be_bytes());
        reply[44..48].copy_from_slice(&0x8000_0000u32.to_be_bytes());

        let ts = parse_reply(&reply).unwrap();
        assert_eq!(ts.seconds(), 1_700_000_000);
        assert_eq!(ts.subsec_micros(), 500_000);
    }

    #[test]
    fn test_zero_fraction_is_bogus() {
        let mut reply = [0u8; NTP_PACKET_LENGTH];
        let ntp_seconds = (1_700_000_000u64 + NTP_UNIX_EPOCH_OFFSET) as u32;
        reply[40..44].copy_from_slice(&ntp_seconds.to_be_bytes());

        assert!(matches!(parse_reply(&reply), Err(ClockError::BogusReply)));
    }

    #[test]
    fn test_tiny_fraction_is_bogus() {
        // Fraction too small to reach one microsecond
        let mut reply = [0u8; NTP_PACKET_LENGTH];
        let ntp_seconds = (1_700_000_000u64 + NTP_UNIX_EPOCH_OFFSET) as u32;
        reply[40..44].copy_from_slice(&ntp_seconds.to_be_bytes());
        reply[44..48].copy_from_slice(&100u32.to_be_bytes());

        assert!(matches!(parse_reply(&reply), Err(ClockError::BogusReply)));
    }

    #[test]
    fn test_short_reply() {
        assert!(matches!(parse_reply(&[0u8; 20]), Err(ClockError::ShortReply(20))));
    }

    #[test]
    fn test_reply_roundtrip() {
        let time = Timestamp::from_parts(1_700_000_123, 654_321);
        assert_eq!(parse_reply(&build_reply(time)).unwrap(), time);
    }
}
