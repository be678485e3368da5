//! Lock-free bounded queues for audio frames
//!
//! Single-producer single-consumer queues between the network side and the
//! device callback. A full queue drops the newest item; an empty queue yields
//! nothing and the callback renders silence.

use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicUsize, Ordering};

/// One frame of interleaved float samples
pub type Frame = Vec<f32>;

/// Bounded queue that never blocks either side
pub struct RingBuffer<T = Frame> {
    queue: ArrayQueue<T>,
    dropped: AtomicUsize,
}

impl<T> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: ArrayQueue::new(capacity),
            dropped: AtomicUsize::new(0),
        }
    }

    /// Queue an item; returns false and discards it when full
    pub fn push(&self, item: T) -> bool {
        if self.queue.push(item).is_ok() {
            return true;
        }
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::debug!("Queue full, dropped newest frame ({} total)", dropped);
        false
    }

    pub fn try_pop(&self) -> Option<T> {
        self.queue.pop()
    }

    /// Drop everything queued
    pub fn clear(&self) {
        while self.queue.pop().is_some() {}
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Copy `frame` into `out`, zero-padding or truncating to `out.len()`
///
/// Returns false when the lengths differed.
pub fn fit_frame(frame: &[f32], out: &mut [f32]) -> bool {
    let n = frame.len().min(out.len());
    out[..n].copy_from_slice(&frame[..n]);
    out[n..].fill(0.0);
    frame.len() == out.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_order() {
        let queue = RingBuffer::new(4);
        assert!(queue.push(vec![0.0; 4]));
        assert!(queue.push(vec![1.0; 4]));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_pop().unwrap()[0], 0.0);
        assert_eq!(queue.try_pop().unwrap()[0], 1.0);
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn test_full_queue_drops_newest() {
        let queue = RingBuffer::new(2);
        assert!(queue.push(1));
        assert!(queue.push(2));
        assert!(!queue.push(3));
        assert!(!queue.push(4));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.try_pop(), Some(1));
        assert_eq!(queue.try_pop(), Some(2));
    }

    #[test]
    fn test_clear_empties() {
        let queue = RingBuffer::new(4);
        queue.push(1);
        queue.push(2);
        queue.clear();
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fit_frame() {
        let mut out = [9.0f32; 4];
        assert!(!fit_frame(&[1.0, 2.0], &mut out));
        assert_eq!(out, [1.0, 2.0, 0.0, 0.0]);

        assert!(!fit_frame(&[1.0, 2.0, 3.0, 4.0, 5.0], &mut out));
        assert_eq!(out, [1.0, 2.0, 3.0, 4.0]);

        assert!(fit_frame(&[0.5; 4], &mut out));
    }
}
