//! Windowed-sinc resampler over a precomputed table.
//!
//! Same kernel family as the reference backend, but the windowed sinc is
//! sampled into a table at construction and linearly interpolated at run
//! time. Cuts the per-sample cost to one multiply-add per tap, at the
//! price of table quantization noise well below the profile's stopband.

use crate::resampler::sinc::MAX_SCALING_DELTA;
use crate::resampler::{Resampler, ResamplerProfile};
use crate::sample::Sample;

/// Table entries per unit input sample distance.
const TABLE_DENSITY: usize = 128;

pub struct TableSincResampler {
    num_channels: usize,
    base_ratio: f64,
    scaling: f64,
    phase: f64,
    buffer: Vec<Sample>,
    half_taps: usize,

    /// Windowed sinc sampled on [0, half_taps] at TABLE_DENSITY points
    /// per sample; the negative side is mirrored.
    table: Vec<f32>,
}

impl TableSincResampler {
    pub fn new(
        profile: ResamplerProfile,
        in_rate: u32,
        out_rate: u32,
        num_channels: usize,
    ) -> Self {
        let half_taps = profile.half_taps();

        let entries = half_taps * TABLE_DENSITY + 2;
        let mut table = Vec::with_capacity(entries);
        for i in 0..entries {
            let x = i as f64 / TABLE_DENSITY as f64;
            table.push((sinc(x) * blackman(x, half_taps as f64)) as f32);
        }

        Self {
            num_channels,
            base_ratio: in_rate as f64 / out_rate as f64,
            scaling: 1.0,
            phase: half_taps as f64,
            buffer: Vec::new(),
            half_taps,
            table,
        }
    }

    fn step(&self) -> f64 {
        self.base_ratio * self.scaling
    }

    fn buffered_frames(&self) -> usize {
        self.buffer.len() / self.num_channels
    }

    /// Kernel value at distance `x`, by linear table interpolation.
    fn kernel(&self, x: f64) -> f64 {
        let ax = x.abs();
        if ax >= self.half_taps as f64 {
            return 0.0;
        }
        let pos = ax * TABLE_DENSITY as f64;
        let index = pos as usize;
        let frac = pos - index as f64;
        self.table[index] as f64 * (1.0 - frac) + self.table[index + 1] as f64 * frac
    }

    fn eval(&self, out: &mut [Sample]) {
        let step = self.step();
        let cutoff = if step > 1.0 { 1.0 / step } else { 1.0 };

        let center = self.phase;
        let first = (center - self.half_taps as f64).ceil() as isize;
        let last = (center + self.half_taps as f64).floor() as isize;

        out.fill(0.0);
        let mut kernel_sum = 0.0f64;

        for index in first..=last {
            if index < 0 || index as usize >= self.buffered_frames() {
                continue;
            }
            let x = index as f64 - center;
            let weight = cutoff * self.kernel(cutoff * x);
            kernel_sum += weight;

            let frame = &self.buffer
                [index as usize * self.num_channels..(index as usize + 1) * self.num_channels];
            for (acc, &sample) in out.iter_mut().zip(frame) {
                *acc += (weight * sample as f64) as Sample;
            }
        }

        if kernel_sum != 0.0 {
            for sample in out.iter_mut() {
                *sample = (*sample as f64 / kernel_sum) as Sample;
            }
        }
    }

    fn compact(&mut self) {
        let keep_from = (self.phase - self.half_taps as f64).floor() as isize - 1;
        if keep_from > 0 {
            let drop_frames = (keep_from as usize).min(self.buffered_frames());
            self.buffer.drain(..drop_frames * self.num_channels);
            self.phase -= drop_frames as f64;
        }
    }
}

impl Resampler for TableSincResampler {
    fn set_scaling(&mut self, scaling: f64) -> bool {
        if !((1.0 - MAX_SCALING_DELTA)..=(1.0 + MAX_SCALING_DELTA)).contains(&scaling) {
            return false;
        }
        self.scaling = scaling;
        true
    }

    fn write(&mut self, input: &[Sample]) {
        debug_assert_eq!(input.len() % self.num_channels, 0);
        self.buffer.extend_from_slice(input);
    }

    fn read(&mut self, output: &mut [Sample]) -> usize {
        let n_channels = self.num_channels;
        let mut produced = 0;

        while produced + n_channels <= output.len() {
            if self.phase + self.half_taps as f64 + 1.0 > self.buffered_frames() as f64 {
                break;
            }

            self.eval(&mut output[produced..produced + n_channels]);

            self.phase += self.step();
            produced += n_channels;
        }

        self.compact();
        produced
    }

    fn input_needed(&self, n_out: usize) -> usize {
        let needed =
            self.phase + (n_out - 1) as f64 * self.step() + self.half_taps as f64 + 1.0;
        let have = self.buffered_frames() as f64;
        if needed > have {
            (needed - have).ceil() as usize
        } else {
            0
        }
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-9 {
        1.0
    } else {
        (std::f64::consts::PI * x).sin() / (std::f64::consts::PI * x)
    }
}

fn blackman(x: f64, half: f64) -> f64 {
    if x.abs() > half {
        return 0.0;
    }
    let t = (x / half + 1.0) * 0.5;
    0.42 - 0.5 * (2.0 * std::f64::consts::PI * t).cos()
        + 0.08 * (4.0 * std::f64::consts::PI * t).cos()
}
