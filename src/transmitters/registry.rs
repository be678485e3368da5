//! Transmitter registry and frequency index
//!
//! Mutated from the controller, read from the voice receive task. The index is
//! rebuilt on every change so routing is a single map lookup.

use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

use super::transmitter::Transmitter;

#[derive(Debug)]
struct Entry {
    transmitter: Transmitter,
    /// Write order, used to resolve duplicate frequencies
    revision: u64,
}

#[derive(Debug, Default)]
struct Inner {
    transmitters: BTreeMap<u8, Entry>,
    frequency_index: HashMap<u32, u8>,
    next_revision: u64,
}

impl Inner {
    fn touch(&mut self) -> u64 {
        self.next_revision += 1;
        self.next_revision
    }

    /// Keep at most one sender: the transmitter just written
    fn enforce_single_sender(&mut self, sender: u8) {
        for (&id, entry) in self.transmitters.iter_mut() {
            if id != sender && entry.transmitter.send_flag {
                entry.transmitter.send_flag = false;
                tracing::debug!("Transmitter {} no longer sending", id);
            }
        }
    }

    fn rebuild_index(&mut self) {
        let mut ordered: Vec<&Entry> = self
            .transmitters
            .values()
            .filter(|e| e.transmitter.is_tuned())
            .collect();
        ordered.sort_by_key(|e| e.revision);

        let mut index = HashMap::with_capacity(ordered.len());
        for entry in ordered {
            let tx = &entry.transmitter;
            if let Some(previous) = index.insert(tx.frequency, tx.id) {
                tracing::warn!(
                    "Frequency {} shared by transmitters {} and {}, routing to {}",
                    tx.frequency,
                    previous,
                    tx.id,
                    tx.id
                );
            }
        }
        self.frequency_index = index;
    }
}

/// Local transmitters keyed by id, with a derived frequency index
#[derive(Debug, Default)]
pub struct TransmitterRegistry {
    inner: RwLock<Inner>,
}

impl TransmitterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a transmitter, replacing any with the same id
    pub fn insert(&self, transmitter: Transmitter) -> Option<Transmitter> {
        let mut inner = self.inner.write();
        let revision = inner.touch();
        let id = transmitter.id;
        let sending = transmitter.send_flag;

        let previous = inner
            .transmitters
            .insert(id, Entry { transmitter, revision })
            .map(|e| e.transmitter);
        if sending {
            inner.enforce_single_sender(id);
        }
        inner.rebuild_index();
        previous
    }

    /// Replace a known transmitter; returns the previous value, or `None` if unknown
    pub fn update(&self, transmitter: Transmitter) -> Option<Transmitter> {
        let mut inner = self.inner.write();
        if !inner.transmitters.contains_key(&transmitter.id) {
            return None;
        }
        let revision = inner.touch();
        let id = transmitter.id;
        let sending = transmitter.send_flag;

        let previous = inner
            .transmitters
            .insert(id, Entry { transmitter, revision })
            .map(|e| e.transmitter);
        if sending {
            inner.enforce_single_sender(id);
        }
        inner.rebuild_index();
        previous
    }

    pub fn remove(&self, id: u8) -> Option<Transmitter> {
        let mut inner = self.inner.write();
        let removed = inner.transmitters.remove(&id).map(|e| e.transmitter);
        if removed.is_some() {
            inner.rebuild_index();
        }
        removed
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write();
        inner.transmitters.clear();
        inner.frequency_index.clear();
    }

    pub fn get(&self, id: u8) -> Option<Transmitter> {
        self.inner.read().transmitters.get(&id).map(|e| e.transmitter.clone())
    }

    /// Route lookup: the transmitter tuned to `frequency`
    pub fn by_frequency(&self, frequency: u32) -> Option<Transmitter> {
        let inner = self.inner.read();
        let id = inner.frequency_index.get(&frequency)?;
        inner.transmitters.get(id).map(|e| e.transmitter.clone())
    }

    /// The transmitter currently sending, if any
    pub fn sender(&self) -> Option<Transmitter> {
        self.inner
            .read()
            .transmitters
            .values()
            .find(|e| e.transmitter.send_flag)
            .map(|e| e.transmitter.clone())
    }

    pub fn all(&self) -> Vec<Transmitter> {
        self.inner
            .read()
            .transmitters
            .values()
            .map(|e| e.transmitter.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().transmitters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().transmitters.is_empty()
    }
}
