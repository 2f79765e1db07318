//! Spectrum bars for the agent's voice.
//!
//! | step | value |
//! |------|-------|
//! | window | Blackman, `fft_size` samples |
//! | FFT size | 256 (128 bins) |
//! | smoothing | 0.8 between frames |
//! | byte range | -100 dB → 0, -30 dB → 255 |
//!
//! [`Visualizer::render`] lays the bytes out as vertically centred bars in a
//! `width × height` box; the host decides how to draw them.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::playback::tap::AnalysisTap;

pub const DEFAULT_FFT_SIZE: usize = 256;
const SMOOTHING: f32 = 0.8;
const MIN_DB: f32 = -100.0;
const MAX_DB: f32 = -30.0;

/// Byte-scaled magnitude spectrum of the most recent output samples.
pub struct SpectrumAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    samples: Vec<f32>,
    spectrum: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
}

impl SpectrumAnalyzer {
    pub fn new(fft_size: usize) -> Self {
        let fft_size = fft_size.max(2);
        let bins = fft_size / 2;
        Self {
            fft: FftPlanner::<f32>::new().plan_fft_forward(fft_size),
            window: build_blackman_window(fft_size),
            samples: vec![0.0; fft_size],
            spectrum: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; bins],
            bytes: vec![0; bins],
        }
    }

    pub fn bin_count(&self) -> usize {
        self.bytes.len()
    }

    /// Analyse the newest samples in `tap` and return one byte per bin.
    pub fn byte_frequency_data(&mut self, tap: &AnalysisTap) -> &[u8] {
        tap.snapshot_into(&mut self.samples);
        self.analyze();
        &self.bytes
    }

    /// Forget the smoothing history.
    pub fn reset(&mut self) {
        self.smoothed.fill(0.0);
        self.bytes.fill(0);
    }

    fn analyze(&mut self) {
        let n = self.samples.len() as f32;
        for ((slot, &s), &w) in self.spectrum.iter_mut().zip(&self.samples).zip(&self.window) {
            *slot = Complex::new(s * w, 0.0);
        }
        self.fft.process(&mut self.spectrum);

        for (k, (avg, byte)) in self.smoothed.iter_mut().zip(self.bytes.iter_mut()).enumerate() {
            let magnitude = self.spectrum[k].norm() / n;
            *avg = SMOOTHING * *avg + (1.0 - SMOOTHING) * magnitude;
            *byte = db_to_byte(20.0 * avg.log10());
        }
    }
}

fn db_to_byte(db: f32) -> u8 {
    if !db.is_finite() {
        return 0;
    }
    let scaled = 255.0 * (db - MIN_DB) / (MAX_DB - MIN_DB);
    scaled.clamp(0.0, 255.0) as u8
}

fn build_blackman_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    const ALPHA: f32 = 0.16;
    let (a0, a1, a2) = ((1.0 - ALPHA) / 2.0, 0.5, ALPHA / 2.0);
    (0..n)
        .map(|i| {
            let x = i as f32 / n as f32;
            a0 - a1 * (2.0 * PI * x).cos() + a2 * (4.0 * PI * x).cos()
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb(pub u8, pub u8, pub u8);

#[derive(Debug, Clone, PartialEq)]
pub struct Bar {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub color: Rgb,
}

/// What to draw this frame.
#[derive(Debug, Clone, PartialEq)]
pub enum VisualFrame {
    /// Not connected: a flat line across the middle.
    Idle { y: f32, width: f32 },
    Bars(Vec<Bar>),
}

pub struct Visualizer {
    analyzer: SpectrumAnalyzer,
    width: f32,
    height: f32,
}

impl Visualizer {
    pub fn new(fft_size: usize, width: f32, height: f32) -> Self {
        Self {
            analyzer: SpectrumAnalyzer::new(fft_size),
            width,
            height,
        }
    }

    /// One animation frame. `active` is whether a session is connected.
    pub fn render(&mut self, tap: &AnalysisTap, active: bool) -> VisualFrame {
        if !active {
            self.analyzer.reset();
            return VisualFrame::Idle {
                y: self.height / 2.0,
                width: self.width,
            };
        }

        let (width, height) = (self.width, self.height);
        let data = self.analyzer.byte_frequency_data(tap);
        let len = data.len() as f32;
        let bar_width = width / len * 2.5;

        let mut bars = Vec::with_capacity(data.len());
        let mut x = 0.0;
        for (i, &value) in data.iter().enumerate() {
            if x >= width {
                break;
            }
            let bar_height = f32::from(value) / 2.0;
            let pos = i as f32 / len;
            bars.push(Bar {
                x,
                y: (height - bar_height) / 2.0,
                width: bar_width,
                height: bar_height,
                color: Rgb(
                    (bar_height + 25.0 * pos).min(255.0) as u8,
                    (250.0 * pos) as u8,
                    50,
                ),
            });
            x += bar_width + 1.0;
        }
        VisualFrame::Bars(bars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_tap(freq_bin: usize, fft_size: usize) -> AnalysisTap {
        let tap = AnalysisTap::new(fft_size);
        let samples: Vec<f32> = (0..fft_size)
            .map(|i| {
                (2.0 * std::f32::consts::PI * freq_bin as f32 * i as f32 / fft_size as f32).sin()
                    * 0.05
            })
            .collect();
        tap.push(&samples);
        tap
    }

    #[test]
    fn silence_maps_to_zero_bytes() {
        let tap = AnalysisTap::new(256);
        let mut analyzer = SpectrumAnalyzer::new(256);
        assert_eq!(analyzer.bin_count(), 128);
        assert!(analyzer.byte_frequency_data(&tap).iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let tap = tone_tap(20, 256);
        let mut analyzer = SpectrumAnalyzer::new(256);
        let mut bytes = Vec::new();
        // Let the smoothing settle.
        for _ in 0..30 {
            bytes = analyzer.byte_frequency_data(&tap).to_vec();
        }
        let peak = bytes
            .iter()
            .enumerate()
            .max_by_key(|&(_, &b)| b)
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 20);
        assert!(bytes[20] > 200);
        assert!(bytes[100] < bytes[20]);
    }

    #[test]
    fn inactive_renders_centre_line() {
        let tap = tone_tap(10, 256);
        let mut viz = Visualizer::new(256, 300.0, 80.0);
        assert_eq!(
            viz.render(&tap, false),
            VisualFrame::Idle {
                y: 40.0,
                width: 300.0
            }
        );
    }

    #[test]
    fn bars_are_centred_and_clipped_to_width() {
        let tap = tone_tap(5, 256);
        let mut viz = Visualizer::new(256, 128.0, 200.0);
        let VisualFrame::Bars(bars) = viz.render(&tap, true) else {
            panic!("expected bars");
        };
        assert!(!bars.is_empty());
        assert!(bars.len() < 128);
        for bar in &bars {
            assert!(bar.x < 128.0);
            assert_eq!(bar.width, 2.5);
            assert!((bar.y * 2.0 + bar.height - 200.0).abs() < 1e-4);
            assert_eq!(bar.color.2, 50);
        }
    }
}
