//! Shared test infrastructure: deterministic RNG and signal generators.

#![allow(dead_code)]

/// Marsaglia Multiply-With-Carry RNG. Deterministic across platforms, so
/// every test signal is reproducible without an RNG crate.
pub struct TestRng {
    rz: u32,
    rw: u32,
}

impl TestRng {
    pub fn new(seed: u32) -> Self {
        Self {
            rz: seed,
            rw: seed ^ 0x9e3779b9,
        }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.rz = 36969u32
            .wrapping_mul(self.rz & 65535)
            .wrapping_add(self.rz >> 16);
        self.rw = 18000u32
            .wrapping_mul(self.rw & 65535)
            .wrapping_add(self.rw >> 16);
        (self.rz << 16).wrapping_add(self.rw)
    }

    /// Uniform sample in `[-scale, scale)`.
    pub fn next_f32(&mut self, scale: f32) -> f32 {
        (self.next_u32() as f32 / u32::MAX as f32 - 0.5) * 2.0 * scale
    }
}

/// Sine at `freq` cycles per sample with the given phase offset.
pub fn sine(len: usize, freq: f32, phase: f32, amplitude: f32) -> Vec<f32> {
    use std::f32::consts::TAU;
    (0..len)
        .map(|t| (TAU * freq * t as f32 + phase).sin() * amplitude)
        .collect()
}

/// A couple of sines plus low-level noise, loosely speech-shaped.
pub fn speechlike(len: usize, seed: u32) -> Vec<f32> {
    let mut rng = TestRng::new(seed);
    let a = sine(len, 0.031, 0.3, 0.6);
    let b = sine(len, 0.117, 1.1, 0.25);
    a.iter()
        .zip(&b)
        .map(|(x, y)| x + y + rng.next_f32(0.05))
        .collect()
}

/// Pure noise signal.
pub fn noise(len: usize, seed: u32, scale: f32) -> Vec<f32> {
    let mut rng = TestRng::new(seed);
    (0..len).map(|_| rng.next_f32(scale)).collect()
}
