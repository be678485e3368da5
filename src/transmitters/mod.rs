//! Transmitter management module

pub mod registry;
pub mod transmitter;

pub use registry::TransmitterRegistry;
pub use transmitter::{OutputTarget, Transmitter};
