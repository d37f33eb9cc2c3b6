//! Fractional-rate resampling.
//!
//! Two backends are provided behind one trait: the windowed-sinc
//! reference implementation (always available, direct kernel
//! evaluation), and a table-interpolated variant trading a little
//! accuracy for much less per-sample math. Backends are chosen through
//! an injected registry so tests can substitute fakes.

pub mod interp;
pub mod sinc;

use crate::control::ScalingHandle;
use crate::error::{AudioError, AudioResult};
use crate::frame::{Frame, FrameReader};
use crate::sample::{Sample, SampleSpec};

/// Resampler backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerBackend {
    /// Windowed-sinc, direct kernel evaluation.
    #[default]
    Builtin,
    /// Windowed-sinc with a precomputed interpolated table.
    Interp,
}

/// Quality/cost trade-off preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResamplerProfile {
    Low,
    #[default]
    Medium,
    High,
}

impl ResamplerProfile {
    /// Kernel half-length in input samples for this profile.
    pub(crate) fn half_taps(&self) -> usize {
        match self {
            ResamplerProfile::Low => 8,
            ResamplerProfile::Medium => 16,
            ResamplerProfile::High => 32,
        }
    }
}

/// Streaming fractional-rate converter.
///
/// The conversion ratio is `in_rate / out_rate`, additionally multiplied
/// by a runtime scaling factor with sub-sample precision. Scaling may
/// change every frame; phase is continuous across changes.
pub trait Resampler: Send {
    /// Set the runtime scaling factor. Returns false (and leaves the
    /// previous factor) when it is outside the supported range.
    fn set_scaling(&mut self, scaling: f64) -> bool;

    /// Append interleaved input samples.
    fn write(&mut self, input: &[Sample]);

    /// Produce as many interleaved output samples as the buffered input
    /// allows, up to `output.len()`. Returns the number produced.
    fn read(&mut self, output: &mut [Sample]) -> usize;

    /// Per-channel input samples that must still be written before
    /// `n_out` more per-channel output samples can be produced.
    fn input_needed(&self, n_out: usize) -> usize;
}

/// Factory for resampler backends.
///
/// Injected into the receiver at construction; the default registry
/// builds the two bundled backends.
pub trait ResamplerRegistry: Send + Sync {
    fn new_resampler(
        &self,
        backend: ResamplerBackend,
        profile: ResamplerProfile,
        in_spec: &SampleSpec,
        out_spec: &SampleSpec,
    ) -> AudioResult<Box<dyn Resampler>>;
}

/// Registry building the bundled backends.
#[derive(Debug, Default, Clone)]
pub struct BuiltinResamplerRegistry;

impl ResamplerRegistry for BuiltinResamplerRegistry {
    fn new_resampler(
        &self,
        backend: ResamplerBackend,
        profile: ResamplerProfile,
        in_spec: &SampleSpec,
        out_spec: &SampleSpec,
    ) -> AudioResult<Box<dyn Resampler>> {
        if !in_spec.is_valid() || !out_spec.is_valid() {
            return Err(AudioError::InvalidConfig(
                "resampler requires valid sample specs".into(),
            ));
        }
        if in_spec.num_channels() != out_spec.num_channels() {
            return Err(AudioError::FormatMismatch(
                "resampler does not change channel counts".into(),
            ));
        }

        Ok(match backend {
            ResamplerBackend::Builtin => Box::new(sinc::SincResampler::new(
                profile,
                in_spec.sample_rate(),
                out_spec.sample_rate(),
                in_spec.num_channels(),
            )),
            ResamplerBackend::Interp => Box::new(interp::TableSincResampler::new(
                profile,
                in_spec.sample_rate(),
                out_spec.sample_rate(),
                in_spec.num_channels(),
            )),
        })
    }
}

/// How many per-channel samples the reader pulls from upstream at once
/// when the resampler runs dry.
const PULL_CHUNK: usize = 256;

/// Frame reader stage driving a resampler.
///
/// The scaling handle is polled once per read, so a factor written by
/// the latency monitor takes effect at the next frame boundary.
pub struct ResamplerReader {
    reader: Box<dyn FrameReader>,
    resampler: Box<dyn Resampler>,
    scaling: ScalingHandle,
    last_scaling: f64,
    num_channels: usize,
    scratch: Frame,
}

impl ResamplerReader {
    pub fn new(
        reader: Box<dyn FrameReader>,
        resampler: Box<dyn Resampler>,
        num_channels: usize,
        scaling: ScalingHandle,
    ) -> Self {
        Self {
            reader,
            resampler,
            scaling,
            last_scaling: 1.0,
            num_channels,
            scratch: Frame::new(),
        }
    }
}

impl FrameReader for ResamplerReader {
    fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
        let scaling = self.scaling.get();
        if scaling != self.last_scaling {
            if self.resampler.set_scaling(scaling) {
                self.last_scaling = scaling;
            }
        }

        frame.prepare(duration * self.num_channels);

        let mut filled = 0;
        while filled < frame.num_samples() {
            let produced = {
                let out = &mut frame.samples_mut()[filled..];
                self.resampler.read(out)
            };
            filled += produced;

            if filled >= frame.num_samples() {
                break;
            }

            // Resampler ran dry: pull more input from upstream.
            let out_left = (frame.num_samples() - filled) / self.num_channels;
            let need = self.resampler.input_needed(out_left.max(1)).max(1);
            let chunk = need.max(PULL_CHUNK);

            self.reader.read(&mut self.scratch, chunk)?;
            self.resampler.write(self.scratch.samples());

            frame.add_flags(self.scratch.flags());
            if frame.capture_timestamp() == 0 && self.scratch.capture_timestamp() != 0 {
                frame.set_capture_timestamp(self.scratch.capture_timestamp());
            }
        }

        frame.detect_signal();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ChannelSet;
    use crate::error::AudioResult;

    /// Upstream producing a ramp so sample continuity is checkable.
    struct RampReader {
        next: f32,
    }

    impl FrameReader for RampReader {
        fn read(&mut self, frame: &mut Frame, duration: usize) -> AudioResult<()> {
            frame.prepare(duration);
            for s in frame.samples_mut() {
                *s = self.next;
                self.next += 0.0001;
            }
            Ok(())
        }
    }

    #[test]
    fn test_reader_produces_exact_duration() {
        let spec = SampleSpec::new(44_100, ChannelSet::mono());
        let registry = BuiltinResamplerRegistry;
        let resampler = registry
            .new_resampler(
                ResamplerBackend::Builtin,
                ResamplerProfile::Low,
                &spec,
                &spec,
            )
            .unwrap();

        let mut reader = ResamplerReader::new(
            Box::new(RampReader { next: 0.0 }),
            resampler,
            1,
            ScalingHandle::new(),
        );

        let mut frame = Frame::new();
        for _ in 0..10 {
            reader.read(&mut frame, 160).unwrap();
            assert_eq!(frame.num_samples(), 160);
        }
    }

    #[test]
    fn test_registry_rejects_channel_change() {
        let in_spec = SampleSpec::new(44_100, ChannelSet::stereo());
        let out_spec = SampleSpec::new(44_100, ChannelSet::mono());
        assert!(BuiltinResamplerRegistry
            .new_resampler(
                ResamplerBackend::Builtin,
                ResamplerProfile::Medium,
                &in_spec,
                &out_spec,
            )
            .is_err());
    }
}
