//! Presence notifications for external observers

pub mod message;
pub mod server;

pub use message::BroadcastMessage;
pub use server::BroadcastNotifier;

/// Best-effort sink for presence events; must never block the caller
pub trait PresenceSink: Send + Sync {
    fn publish(&self, message: BroadcastMessage);
}
