//! Control messages and newline framing
//!
//! Control messages are JSON objects, one per line. The first line a client
//! sends is its bearer token, unframed.

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::constants::CONTROL_BUFFER_CAP;

/// Control message kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Transmitter frequency and receive-flag update
    #[serde(rename = "channel")]
    Switch,
    Ping,
    Pong,
    Error,
    TextReceive,
    VoiceReceive,
    Message,
    Disconnect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlMessage {
    #[serde(rename = "type")]
    pub kind: MessageType,
    #[serde(default, alias = "sender_id")]
    pub cid: i32,
    #[serde(default)]
    pub callsign: String,
    #[serde(default, alias = "transmitter_id")]
    pub transmitter: u8,
    #[serde(default)]
    pub data: String,
}

impl ControlMessage {
    pub fn new(kind: MessageType, cid: i32, callsign: impl Into<String>) -> Self {
        Self {
            kind,
            cid,
            callsign: callsign.into(),
            transmitter: 0,
            data: String::new(),
        }
    }

    pub fn with_transmitter(mut self, transmitter: u8) -> Self {
        self.transmitter = transmitter;
        self
    }

    pub fn with_data(mut self, data: impl Into<String>) -> Self {
        self.data = data.into();
        self
    }

    /// Heartbeat carrying the current unix time
    pub fn ping(cid: i32, callsign: &str) -> Self {
        Self::new(MessageType::Ping, cid, callsign).with_data(chrono::Utc::now().timestamp().to_string())
    }

    pub fn switch(cid: i32, callsign: &str, transmitter: u8, data: String) -> Self {
        Self::new(MessageType::Switch, cid, callsign)
            .with_transmitter(transmitter)
            .with_data(data)
    }

    pub fn text(cid: i32, callsign: &str, target: &str, text: &str) -> Self {
        Self::new(MessageType::Message, cid, callsign).with_data(format!("{}:{}", target, text))
    }

    pub fn disconnect(cid: i32) -> Self {
        Self::new(MessageType::Disconnect, cid, "")
    }

    /// Serialize as one newline-terminated line
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn parse(line: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(line)
    }
}

/// Accumulates stream bytes and splits complete lines
///
/// A buffer that grows past its cap without a newline is corrupt and dropped.
#[derive(Debug)]
pub struct LineBuffer {
    buf: BytesMut,
    cap: usize,
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(CONTROL_BUFFER_CAP)
    }
}

impl LineBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(cap),
            cap,
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Next complete line without its terminator
    pub fn next_line(&mut self) -> Option<Bytes> {
        if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            if line.last() == Some(&b'\r') {
                line.truncate(pos - 1);
            }
            return Some(line.freeze());
        }

        if self.buf.len() > self.cap {
            tracing::error!("Control buffer overflow ({} bytes without newline), discarding", self.buf.len());
            self.buf.clear();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_switch_wire_format() {
        let message = ControlMessage::switch(1001, "ZSSS_APP", 2, "122800:1".into());
        let line = message.to_line().unwrap();
        assert!(line.ends_with('\n'));

        let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
        assert_eq!(value["type"], "channel");
        assert_eq!(value["cid"], 1001);
        assert_eq!(value["transmitter"], 2);
        assert_eq!(value["data"], "122800:1");
    }

    #[test]
    fn test_parse_with_defaults_and_aliases() {
        let message = ControlMessage::parse(br#"{"type":"pong"}"#).unwrap();
        assert_eq!(message.kind, MessageType::Pong);
        assert_eq!(message.cid, 0);
        assert!(message.data.is_empty());

        let message =
            ControlMessage::parse(br#"{"type":"error","sender_id":5,"transmitter_id":3,"data":"x"}"#)
                .unwrap();
        assert_eq!(message.kind, MessageType::Error);
        assert_eq!(message.cid, 5);
        assert_eq!(message.transmitter, 3);
    }

    #[test]
    fn test_unknown_type_is_error() {
        assert!(ControlMessage::parse(br#"{"type":"bogus"}"#).is_err());
        assert!(ControlMessage::parse(b"not json").is_err());
    }

    #[test]
    fn test_text_message_data() {
        let message = ControlMessage::text(1, "CES123", "ZSSS_TWR", "request taxi");
        assert_eq!(message.kind, MessageType::Message);
        assert_eq!(message.data, "ZSSS_TWR:request taxi");
    }

    #[test]
    fn test_ping_carries_timestamp() {
        let message = ControlMessage::ping(1, "CES123");
        assert!(message.data.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_line_buffer_splits_lines() {
        let mut buffer = LineBuffer::default();
        buffer.extend(b"{\"type\":\"ping\"}\n{\"type\":");
        assert_eq!(buffer.next_line().unwrap().as_ref(), b"{\"type\":\"ping\"}");
        assert!(buffer.next_line().is_none());

        buffer.extend(b"\"pong\"}\r\n");
        assert_eq!(buffer.next_line().unwrap().as_ref(), b"{\"type\":\"pong\"}");
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_line_buffer_discards_oversized() {
        let mut buffer = LineBuffer::new(16);
        buffer.extend(&[b'x'; 17]);
        assert!(buffer.next_line().is_none());
        assert!(buffer.is_empty());

        buffer.extend(b"ok\n");
        assert_eq!(buffer.next_line().unwrap().as_ref(), b"ok");
    }
}
