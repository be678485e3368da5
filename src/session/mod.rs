//! Voice session: identity, routing, conflict detection and the controller

pub mod activity;
pub mod conflict;
pub mod controller;
pub mod events;
pub mod identity;
pub mod outbound;
pub mod router;

pub use activity::ActivityTracker;
pub use conflict::ConflictDetector;
pub use controller::VoiceSession;
pub(crate) use events::emit;
pub use events::SessionEvent;
pub use identity::{parse_welcome, ClientIdentity, Welcome};
pub use outbound::{Outbound, Route};
pub use router::VoiceRouter;
