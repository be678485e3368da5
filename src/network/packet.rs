//! Voice datagram format
//!
//! ```text
//! ┌──────────┬────┬───────────┬─────┬──────────┬─────────┬──────┐
//! │ cid (4)  │ tx │ freq (4)  │ len │ callsign │ payload │ 0x0A │
//! │ i32 LE   │ u8 │ i32 LE    │ u8  │ UTF-8    │ opus    │      │
//! └──────────┴────┴───────────┴─────┴──────────┴─────────┴──────┘
//! ```
//!
//! The payload may be empty; empty datagrams act as keep-alives and
//! transmitter registrations.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::MAX_FREQUENCY;
use crate::error::PacketError;

/// Fixed bytes around the callsign and payload
pub const HEADER_SIZE: usize = 10;

/// Datagram terminator
pub const TERMINATOR: u8 = 0x0A;

/// One received voice datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePacket {
    pub sender_id: i32,
    pub transmitter_id: u8,
    pub frequency: u32,
    pub callsign: String,
    pub payload: Bytes,
}

impl VoicePacket {
    pub fn new(
        sender_id: i32,
        transmitter_id: u8,
        frequency: u32,
        callsign: impl Into<String>,
        payload: Bytes,
    ) -> Self {
        Self {
            sender_id,
            transmitter_id,
            frequency,
            callsign: callsign.into(),
            payload,
        }
    }

    /// Serialize, rejecting values the format cannot carry
    pub fn encode(&self) -> Result<Bytes, PacketError> {
        build(
            self.sender_id,
            self.transmitter_id,
            self.frequency,
            &self.callsign,
            &self.payload,
        )
    }

    /// Parse a received datagram
    pub fn parse(datagram: &[u8]) -> Result<Self, PacketError> {
        if datagram.len() < HEADER_SIZE {
            return Err(PacketError::Malformed("datagram too short"));
        }
        if datagram[datagram.len() - 1] != TERMINATOR {
            return Err(PacketError::Malformed("missing terminator"));
        }

        let mut header = &datagram[..HEADER_SIZE];
        let sender_id = header.get_i32_le();
        let transmitter_id = header.get_u8();
        let frequency = u32::try_from(header.get_i32_le())
            .map_err(|_| PacketError::Malformed("negative frequency"))?;
        let callsign_len = header.get_u8() as usize;

        if HEADER_SIZE + callsign_len > datagram.len() {
            return Err(PacketError::Malformed("callsign length exceeds datagram"));
        }

        let callsign_end = HEADER_SIZE + callsign_len;
        let callsign = std::str::from_utf8(&datagram[HEADER_SIZE..callsign_end])
            .map_err(|_| PacketError::Malformed("callsign is not UTF-8"))?
            .to_string();

        // The terminator may sit inside the callsign when the payload is empty
        let payload_end = (datagram.len() - 1).max(callsign_end);
        let payload = Bytes::copy_from_slice(&datagram[callsign_end..payload_end]);

        Ok(Self {
            sender_id,
            transmitter_id,
            frequency,
            callsign,
            payload,
        })
    }
}

/// Build one datagram
pub fn build(
    sender_id: i32,
    transmitter_id: u8,
    frequency: u32,
    callsign: &str,
    payload: &[u8],
) -> Result<Bytes, PacketError> {
    let callsign = callsign.as_bytes();
    if callsign.len() >= u8::MAX as usize {
        return Err(PacketError::CallsignTooLong(callsign.len()));
    }
    if frequency >= MAX_FREQUENCY {
        return Err(PacketError::FrequencyOutOfRange(frequency));
    }
    if transmitter_id == u8::MAX {
        return Err(PacketError::TransmitterOutOfRange(transmitter_id));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + callsign.len() + payload.len() + 1);
    buf.put_i32_le(sender_id);
    buf.put_u8(transmitter_id);
    buf.put_i32_le(frequency as i32);
    buf.put_u8(callsign.len() as u8);
    buf.put_slice(callsign);
    buf.put_slice(payload);
    buf.put_u8(TERMINATOR);
    Ok(buf.freeze())
}

/// Zero-payload datagram used as keep-alive or transmitter registration
pub fn keepalive(
    sender_id: i32,
    transmitter_id: u8,
    frequency: u32,
    callsign: &str,
) -> Result<Bytes, PacketError> {
    build(sender_id, transmitter_id, frequency, callsign, &[])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_layout() {
        let bytes = build(1234, 2, 122800, "UAL123", &[0xAA, 0xBB]).unwrap();
        assert_eq!(&bytes[0..4], &1234i32.to_le_bytes());
        assert_eq!(bytes[4], 2);
        assert_eq!(&bytes[5..9], &122800i32.to_le_bytes());
        assert_eq!(bytes[9], 6);
        assert_eq!(&bytes[10..16], b"UAL123");
        assert_eq!(&bytes[16..18], &[0xAA, 0xBB]);
        assert_eq!(bytes[18], TERMINATOR);
    }

    #[test]
    fn test_keepalive_parses_with_empty_payload() {
        let bytes = keepalive(7, 0, 0, "").unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 1);

        let packet = VoicePacket::parse(&bytes).unwrap();
        assert_eq!(packet.sender_id, 7);
        assert!(packet.callsign.is_empty());
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_construction_limits() {
        let long = "A".repeat(255);
        assert_eq!(
            build(1, 0, 122800, &long, &[]),
            Err(PacketError::CallsignTooLong(255))
        );
        assert_eq!(
            build(1, 0, 200_000, "X", &[]),
            Err(PacketError::FrequencyOutOfRange(200_000))
        );
        assert_eq!(
            build(1, 255, 122800, "X", &[]),
            Err(PacketError::TransmitterOutOfRange(255))
        );
        assert!(build(1, 254, 199_999, &"A".repeat(254), &[]).is_ok());
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(VoicePacket::parse(&[0x0A; 9]).is_err());

        let mut bytes = build(1, 0, 122800, "UAL123", &[1, 2]).unwrap().to_vec();
        *bytes.last_mut().unwrap() = 0;
        assert!(VoicePacket::parse(&bytes).is_err());

        let mut bytes = build(1, 0, 122800, "UAL", &[]).unwrap().to_vec();
        bytes[9] = 40;
        assert!(VoicePacket::parse(&bytes).is_err());
    }

    proptest! {
        #[test]
        fn prop_round_trip(
            sender_id in any::<i32>(),
            transmitter_id in 0u8..255,
            frequency in 0u32..MAX_FREQUENCY,
            callsign in "[A-Z0-9_]{0,254}",
            payload in prop::collection::vec(any::<u8>(), 0..2048),
        ) {
            let packet = VoicePacket::new(sender_id, transmitter_id, frequency, callsign, Bytes::from(payload));
            let parsed = VoicePacket::parse(&packet.encode().unwrap()).unwrap();
            prop_assert_eq!(parsed, packet);
        }

        #[test]
        fn prop_out_of_range_produces_no_bytes(
            frequency in MAX_FREQUENCY..u32::MAX,
            extra in 0usize..16,
        ) {
            prop_assert!(build(1, 0, frequency, "X", &[]).is_err());
            let callsign = "C".repeat(255 + extra);
            prop_assert!(build(1, 0, 1000, &callsign, &[]).is_err());
        }

        #[test]
        fn prop_short_or_unterminated_rejected(data in prop::collection::vec(any::<u8>(), 0..64)) {
            let short = data.len() < HEADER_SIZE;
            let unterminated = data.last() != Some(&TERMINATOR);
            if short || unterminated {
                prop_assert!(VoicePacket::parse(&data).is_err());
            }
        }

        #[test]
        fn prop_inconsistent_length_rejected(
            callsign in "[A-Z]{0,20}",
            declared in 0u8..255,
        ) {
            let mut bytes = build(1, 0, 122800, &callsign, &[]).unwrap().to_vec();
            bytes[9] = declared;
            let result = VoicePacket::parse(&bytes);
            if HEADER_SIZE + declared as usize > bytes.len() {
                prop_assert!(result.is_err());
            }
        }
    }
}
