use crate::game::row::ChartInstant;
use crate::game::snap::{self, Snap};
use std::f32::consts::TAU;

/// Picks the assist sound, if any, that plays on a row.
pub trait ClapMapper: Send + Sync {
    /// Interleaved 16-bit burst for `channels` channels at `sample_rate`.
    fn clap(&self, row: &dyn ChartInstant, sample_rate: u32, channels: usize) -> Option<Vec<i16>>;
}

/// Short exponentially decaying sine, pitched up on downbeat-aligned rows.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthClap {
    pub frequency: f32,
    pub accent_frequency: f32,
    pub length_seconds: f32,
    /// Peak level in `0.0..=1.0`.
    pub amplitude: f32,
}

impl Default for SynthClap {
    fn default() -> Self {
        Self {
            frequency: 1_200.0,
            accent_frequency: 1_800.0,
            length_seconds: 0.04,
            amplitude: 0.5,
        }
    }
}

impl SynthClap {
    pub fn render(&self, frequency: f32, sample_rate: u32, channels: usize) -> Vec<i16> {
        let rate = sample_rate.max(1) as f32;
        let frames = (self.length_seconds * rate).round() as usize;
        let decay = 5.0 / frames.max(1) as f32;
        let peak = self.amplitude.clamp(0.0, 1.0) * f32::from(i16::MAX);
        let mut out = Vec::with_capacity(frames * channels);
        for n in 0..frames {
            let t = n as f32 / rate;
            let v = (TAU * frequency * t).sin() * (-decay * n as f32).exp() * peak;
            let s = v.round() as i16;
            out.extend(std::iter::repeat_n(s, channels));
        }
        out
    }
}

impl ClapMapper for SynthClap {
    fn clap(&self, row: &dyn ChartInstant, sample_rate: u32, channels: usize) -> Option<Vec<i16>> {
        if !row.bare().activates_snap() {
            return None;
        }
        let frequency = match snap::classify(row.position()) {
            Snap::Q4th => self.accent_frequency,
            _ => self.frequency,
        };
        Some(self.render(frequency, sample_rate, channels))
    }
}
