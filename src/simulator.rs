//! Simulator COM-radio link
//!
//! The radio itself lives behind [`ComRadio`]. The poller reads it on a fixed
//! cadence from its own thread and gives up after repeated failures.

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::config::SimulatorConfig;
use crate::error::SimulatorError;
use crate::session::{emit, SessionEvent};

/// COM1/COM2 tuning as reported by the simulator, in kHz
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ComFrequencies {
    pub com1_active: u32,
    pub com1_standby: u32,
    pub com2_active: u32,
    pub com2_standby: u32,
    /// Audio selector bitmask
    pub receive_flag: u8,
}

impl ComFrequencies {
    pub fn com1_rx(&self) -> bool {
        self.receive_flag & 0xA0 != 0x80
    }

    pub fn com2_rx(&self) -> bool {
        self.receive_flag & 0x60 != 0x40
    }
}

/// Which frequency `set_frequency` writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComSlot {
    Com1Active,
    Com1Standby,
    Com2Active,
    Com2Standby,
}

pub trait ComRadio: Send {
    fn get_frequency(&mut self) -> Result<ComFrequencies, SimulatorError>;
    fn set_frequency(&mut self, slot: ComSlot, frequency: u32) -> Result<(), SimulatorError>;
}

type SharedRadio = Arc<Mutex<Box<dyn ComRadio>>>;

pub struct SimulatorPoller {
    radio: SharedRadio,
    interval: Duration,
    max_failures: u32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SimulatorPoller {
    pub fn new(radio: Box<dyn ComRadio>, config: &SimulatorConfig) -> Self {
        Self {
            radio: Arc::new(Mutex::new(radio)),
            interval: Duration::from_millis(config.poll_interval_ms.max(1)),
            max_failures: config.max_failures.max(1),
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start polling; frequency changes and link loss go to `events`
    pub fn start(&mut self, events: Sender<SessionEvent>) -> Result<(), SimulatorError> {
        if self.is_running() {
            return Ok(());
        }
        self.join();
        self.running.store(true, Ordering::SeqCst);

        let radio = self.radio.clone();
        let running = self.running.clone();
        let interval = self.interval;
        let max_failures = self.max_failures;

        let handle = thread::Builder::new()
            .name("simulator-poll".into())
            .spawn(move || poll_loop(radio, running, interval, max_failures, events))
            .map_err(|e| {
                self.running.store(false, Ordering::SeqCst);
                SimulatorError::Request(e.to_string())
            })?;
        self.thread_handle = Some(handle);
        tracing::info!("Simulator polling started ({:?})", interval);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = &self.thread_handle {
            handle.thread().unpark();
        }
        self.join();
    }

    fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }

    pub fn set_frequency(&self, slot: ComSlot, frequency: u32) -> Result<(), SimulatorError> {
        self.radio.lock().set_frequency(slot, frequency)
    }
}

impl Drop for SimulatorPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

fn poll_loop(
    radio: SharedRadio,
    running: Arc<AtomicBool>,
    interval: Duration,
    max_failures: u32,
    events: Sender<SessionEvent>,
) {
    let mut failures = 0u32;
    let mut last: Option<ComFrequencies> = None;

    while running.load(Ordering::SeqCst) {
        let result = radio.lock().get_frequency();
        match result {
            Ok(frequencies) => {
                failures = 0;
                if last != Some(frequencies) {
                    tracing::debug!("Simulator radios: {:?}", frequencies);
                    emit(&events, SessionEvent::SimulatorFrequencies(frequencies));
                    last = Some(frequencies);
                }
            }
            Err(e) => {
                failures += 1;
                tracing::warn!("Simulator poll failed ({}/{}): {}", failures, max_failures, e);
                if failures >= max_failures {
                    tracing::error!("Simulator link lost");
                    emit(&events, SessionEvent::SimulatorLinkLost);
                    running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        }
        thread::park_timeout(interval);
    }
    tracing::debug!("Simulator polling stopped");
}
