//! Network subsystem: TCP control transport and UDP voice transport

pub mod channel;
pub mod control;
pub mod packet;
pub mod tcp;
pub mod udp;

pub use channel::{ConnectionState, Endpoint, NetworkEvent, VoiceChannel, VoicePacketHandler, VoiceSender};
pub use control::{ControlMessage, LineBuffer, MessageType};
pub use packet::VoicePacket;
pub use udp::create_voice_socket;
