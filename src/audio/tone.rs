//! Precomputed sine tone generator for cue and conflict beeps

use std::f32::consts::PI;

/// Emits a periodic sine wave by copying from one precomputed cycle
#[derive(Debug, Clone)]
pub struct ToneGenerator {
    sample_rate: u32,
    frequency: f32,
    amplitude: f32,
    cycle: Vec<f32>,
    phase: usize,
}

impl ToneGenerator {
    pub fn new(sample_rate: u32, frequency: f32, amplitude: f32) -> Self {
        let mut generator = Self {
            sample_rate,
            frequency,
            amplitude,
            cycle: Vec::new(),
            phase: 0,
        };
        generator.precompute();
        generator
    }

    fn precompute(&mut self) {
        let increment = 2.0 * PI * self.frequency / self.sample_rate as f32;
        let samples_per_cycle = if self.frequency > 0.0 {
            ((self.sample_rate as f32 / self.frequency) as usize).max(1)
        } else {
            1
        };

        self.cycle = (0..samples_per_cycle)
            .map(|n| self.amplitude * (n as f32 * increment).sin())
            .collect();
        self.phase = 0;
    }

    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if self.sample_rate != sample_rate {
            self.sample_rate = sample_rate;
            self.precompute();
        }
    }

    pub fn set_frequency(&mut self, frequency: f32) {
        self.frequency = frequency;
        self.precompute();
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Next `n` samples of the tone
    pub fn generate_frame(&mut self, n: usize) -> Vec<f32> {
        let mut frame = Vec::with_capacity(n);
        let mut remaining = n;

        while remaining > 0 {
            let available = self.cycle.len() - self.phase;
            let take = available.min(remaining);
            frame.extend_from_slice(&self.cycle[self.phase..self.phase + take]);
            self.phase = (self.phase + take) % self.cycle.len();
            remaining -= take;
        }

        frame
    }

    /// `samples` interleaved samples with the same tone on every channel
    pub fn generate_interleaved(&mut self, samples: usize, channels: u16) -> Vec<f32> {
        let channels = channels.max(1) as usize;
        let mono = self.generate_frame(samples.div_ceil(channels));
        let mut frame: Vec<f32> = mono
            .iter()
            .flat_map(|&s| std::iter::repeat(s).take(channels))
            .collect();
        frame.truncate(samples);
        frame
    }
}
