//! Mixer: sums session frames into one output frame.

use audiolink_packet_core::units::Nanos;

use crate::frame::Frame;
use crate::sample::{Sample, SAMPLE_MAX, SAMPLE_MIN};

/// Accumulates any number of input frames into an output frame.
///
/// Addition saturates at the sample range so overlapping loud sessions
/// clip instead of wrapping. Flags are OR-ed together; the capture
/// timestamp is the average over the inputs, with inputs that have no
/// timestamp counting toward the denominator.
pub struct Mixer {
    num_inputs: usize,

    /// First non-zero input timestamp of the round. The others are
    /// accumulated as offsets from it: the inputs are synchronous and
    /// their timestamps close, so the offsets stay small and the sum
    /// loses no precision in the double.
    cts_base: Nanos,
    cts_sum: f64,
    cts_count: usize,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            num_inputs: 0,
            cts_base: 0,
            cts_sum: 0.0,
            cts_count: 0,
        }
    }

    /// Reset the output frame to silence before a mixing round.
    pub fn begin(&mut self, out: &mut Frame, n_samples: usize) {
        out.prepare(n_samples);
        self.num_inputs = 0;
        self.cts_base = 0;
        self.cts_sum = 0.0;
        self.cts_count = 0;
    }

    /// Add one session's frame into the output.
    pub fn add(&mut self, out: &mut Frame, input: &Frame) {
        debug_assert_eq!(out.num_samples(), input.num_samples());

        for (acc, &sample) in out.samples_mut().iter_mut().zip(input.samples()) {
            *acc = saturating_add(*acc, sample);
        }

        out.add_flags(input.flags());

        let cts = input.capture_timestamp();
        if cts != 0 {
            if self.cts_base == 0 {
                self.cts_base = cts;
            }
            self.cts_sum += (cts - self.cts_base) as f64;
            self.cts_count += 1;
        }

        self.num_inputs += 1;

        if self.cts_count != 0 {
            // Average timestamp, compensating the base subtracted above.
            let n = self.num_inputs as f64;
            let avg = self.cts_base as f64 * (self.cts_count as f64 / n) + self.cts_sum / n;
            out.set_capture_timestamp(avg as Nanos);
        }
    }

    /// Inputs mixed since the last `begin`.
    pub fn num_inputs(&self) -> usize {
        self.num_inputs
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

#[inline]
fn saturating_add(a: Sample, b: Sample) -> Sample {
    (a + b).clamp(SAMPLE_MIN, SAMPLE_MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{FLAG_HAS_DROPS, FLAG_HAS_GAPS};

    fn frame_with(samples: &[Sample]) -> Frame {
        let mut frame = Frame::new();
        frame.prepare(samples.len());
        frame.samples_mut().copy_from_slice(samples);
        frame
    }

    #[test]
    fn test_sums_two_inputs() {
        let mut mixer = Mixer::new();
        let mut out = Frame::new();

        mixer.begin(&mut out, 3);
        mixer.add(&mut out, &frame_with(&[0.25, 0.25, 0.25]));
        mixer.add(&mut out, &frame_with(&[0.5, 0.5, 0.5]));

        assert_eq!(out.samples(), &[0.75, 0.75, 0.75]);
        assert_eq!(mixer.num_inputs(), 2);
    }

    #[test]
    fn test_saturates_instead_of_wrapping() {
        let mut mixer = Mixer::new();
        let mut out = Frame::new();

        mixer.begin(&mut out, 2);
        mixer.add(&mut out, &frame_with(&[0.9, -0.9]));
        mixer.add(&mut out, &frame_with(&[0.9, -0.9]));

        assert_eq!(out.samples(), &[1.0, -1.0]);
    }

    #[test]
    fn test_zero_inputs_is_silence() {
        let mut mixer = Mixer::new();
        let mut out = Frame::new();

        mixer.begin(&mut out, 4);
        assert!(out.samples().iter().all(|&s| s == 0.0));
        assert_eq!(mixer.num_inputs(), 0);
    }

    #[test]
    fn test_flags_and_cts_combine() {
        let mut mixer = Mixer::new();
        let mut out = Frame::new();

        let mut a = frame_with(&[0.1]);
        a.add_flags(FLAG_HAS_GAPS);
        a.set_capture_timestamp(2_000);

        let mut b = frame_with(&[0.1]);
        b.add_flags(FLAG_HAS_DROPS);
        b.set_capture_timestamp(1_000);

        mixer.begin(&mut out, 1);
        mixer.add(&mut out, &a);
        mixer.add(&mut out, &b);

        assert!(out.has_flags(FLAG_HAS_GAPS | FLAG_HAS_DROPS));
        // Capture timestamp is the average of the inputs.
        assert_eq!(out.capture_timestamp(), 1_500);
    }

    #[test]
    fn test_cts_average_of_close_timestamps() {
        let mut mixer = Mixer::new();
        let mut out = Frame::new();

        let base: Nanos = 1_000_000_000_000_000;
        let mut inputs = Vec::new();
        for offset in [0, 300, 600] {
            let mut frame = frame_with(&[0.0]);
            frame.set_capture_timestamp(base + offset);
            inputs.push(frame);
        }

        mixer.begin(&mut out, 1);
        for input in &inputs {
            mixer.add(&mut out, input);
        }

        // Base subtraction keeps the accumulated offsets small, so the
        // average comes out exact.
        assert_eq!(out.capture_timestamp(), base + 300);
    }

    #[test]
    fn test_input_without_cts_dilutes_average() {
        let mut mixer = Mixer::new();
        let mut out = Frame::new();

        let mut a = frame_with(&[0.0]);
        a.set_capture_timestamp(2_000);
        let b = frame_with(&[0.0]);

        mixer.begin(&mut out, 1);
        mixer.add(&mut out, &a);
        mixer.add(&mut out, &b);

        // An input with no timestamp still counts toward the
        // denominator.
        assert_eq!(out.capture_timestamp(), 1_000);
    }
}
