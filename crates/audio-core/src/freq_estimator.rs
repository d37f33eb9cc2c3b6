//! Frequency estimator.
//!
//! Estimates the ratio of the sender's clock to the receiver's clock
//! from the stream of latency observations. The latency signal is
//! smoothed by two cascaded FIR decimators, then fed to a PI controller
//! whose output becomes the resampler scaling factor. While the error is
//! large the proportional term dominates; once the estimator has been
//! inside the stability band long enough it switches to the integral
//! term alone, which holds the rate without jittering the resampler.

use tracing::{debug, trace};

use audiolink_packet_core::units::{stream_timestamp_diff, stream_timestamp_ge, Nanos, StreamTimestamp};

use crate::error::{AudioError, AudioResult};
use crate::freq_estimator_decim::{DECIM_FACTOR_MAX, DECIM_FIR, DECIM_GAIN, DECIM_LEN, DECIM_LEN_MASK};
use crate::sample::SampleSpec;

/// Latency tuning preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatencyTunerProfile {
    /// No tuning; the resampler only converts between nominal rates.
    Intact,
    /// Fast settling. Good with low network latency and jitter.
    Responsive,
    /// Slow and smooth. Good with high network latency and jitter.
    #[default]
    Gradual,
}

/// Frequency estimator tunables. Zero fields are deduced from the
/// profile.
#[derive(Debug, Clone)]
pub struct FreqEstimatorConfig {
    /// Proportional gain of the PI controller.
    pub p: f64,

    /// Integral gain of the PI controller.
    pub i: f64,

    /// Input downsampling factor of the first decimator stage.
    /// Must be in `[1, DECIM_FACTOR_MAX]`.
    pub decimation_factor1: usize,

    /// Downsampling factor of the second stage, `[0, DECIM_FACTOR_MAX]`.
    /// Zero disables the stage; the controller then consumes stage-one
    /// output directly.
    pub decimation_factor2: usize,

    /// Relative error band considered stable: `|error| / target`.
    pub stable_criteria: f64,

    /// How long the error must stay inside the band before the
    /// estimator reports stable.
    pub stability_duration_criteria: Nanos,

    /// Saturation cap on the control action.
    pub control_action_saturation_cap: f64,
}

impl Default for FreqEstimatorConfig {
    fn default() -> Self {
        Self {
            p: 0.0,
            i: 0.0,
            decimation_factor1: 0,
            decimation_factor2: 0,
            stable_criteria: 0.0,
            stability_duration_criteria: 10 * 1_000_000_000,
            control_action_saturation_cap: 1e-2,
        }
    }
}

impl FreqEstimatorConfig {
    /// Fill zero fields from the profile preset table.
    pub fn deduce_defaults(&mut self, profile: LatencyTunerProfile) {
        match profile {
            LatencyTunerProfile::Gradual => {
                if self.p == 0.0 && self.i == 0.0 {
                    self.p = 1e-6;
                    self.i = 5e-9;
                }
                if self.decimation_factor1 == 0 && self.decimation_factor2 == 0 {
                    self.decimation_factor1 = DECIM_FACTOR_MAX;
                    self.decimation_factor2 = DECIM_FACTOR_MAX;
                }
                if self.stable_criteria == 0.0 {
                    self.stable_criteria = 0.05;
                }
            }
            LatencyTunerProfile::Responsive => {
                if self.p == 0.0 && self.i == 0.0 {
                    self.p = 1e-6;
                    self.i = 1e-10;
                }
                if self.decimation_factor1 == 0 && self.decimation_factor2 == 0 {
                    self.decimation_factor1 = DECIM_FACTOR_MAX;
                    self.decimation_factor2 = 0;
                }
                if self.stable_criteria == 0.0 {
                    self.stable_criteria = 0.1;
                }
            }
            LatencyTunerProfile::Intact => {}
        }
    }
}

/// PI controller over decimated latency observations.
pub struct FreqEstimator {
    config: FreqEstimatorConfig,

    dec1_buf: [f64; DECIM_LEN],
    dec1_ind: usize,
    dec2_buf: [f64; DECIM_LEN],
    dec2_ind: usize,
    samples_counter: usize,

    /// Integrator accumulator.
    accum: f64,

    /// Target latency in sample ticks.
    target: f64,

    /// Current frequency coefficient.
    coeff: f64,

    stable: bool,
    last_unstable_pos: StreamTimestamp,
    stability_duration: i32,
    current_stream_pos: StreamTimestamp,
}

impl FreqEstimator {
    pub fn new(
        config: FreqEstimatorConfig,
        target_latency: StreamTimestamp,
        sample_spec: &SampleSpec,
    ) -> AudioResult<Self> {
        if config.decimation_factor1 < 1 || config.decimation_factor1 > DECIM_FACTOR_MAX {
            return Err(AudioError::InvalidConfig(format!(
                "decimation factor 1 out of range: {}",
                config.decimation_factor1
            )));
        }
        if config.decimation_factor2 > DECIM_FACTOR_MAX {
            return Err(AudioError::InvalidConfig(format!(
                "decimation factor 2 out of range: {}",
                config.decimation_factor2
            )));
        }

        debug!(
            p = config.p,
            i = config.i,
            dc1 = config.decimation_factor1,
            dc2 = config.decimation_factor2,
            "freq estimator: initializing"
        );

        let stability_duration = sample_spec
            .ns_to_stream_timestamp(config.stability_duration_criteria)
            as i32;

        // Prime the filters with the target so the controller starts
        // from zero error instead of a huge startup transient.
        let target = target_latency as f64;

        Ok(Self {
            config,
            dec1_buf: [target; DECIM_LEN],
            dec1_ind: 0,
            dec2_buf: [target; DECIM_LEN],
            dec2_ind: 0,
            samples_counter: 0,
            accum: 0.0,
            target,
            coeff: 1.0,
            stable: false,
            last_unstable_pos: 0,
            stability_duration,
            current_stream_pos: 0,
        })
    }

    /// Current frequency coefficient.
    pub fn freq_coeff(&self) -> f32 {
        self.coeff as f32
    }

    /// Whether the estimator is in the stable state.
    pub fn is_stable(&self) -> bool {
        self.stable
    }

    /// Feed one latency observation, in sample ticks.
    pub fn update_current_latency(&mut self, current_latency: StreamTimestamp) {
        let mut filtered = 0.0;
        if self.run_decimators(current_latency, &mut filtered) {
            self.coeff = self.run_controller(filtered);
        }
    }

    /// Change the target latency without resetting filter state.
    pub fn update_target_latency(&mut self, target_latency: StreamTimestamp) {
        self.target = target_latency as f64;
    }

    /// Advance the estimator's notion of stream position, used for the
    /// stability timer. Must be monotonic.
    pub fn update_stream_position(&mut self, position: StreamTimestamp) {
        debug_assert!(
            stream_timestamp_ge(position, self.current_stream_pos),
            "freq estimator: expected monotonic stream position"
        );
        self.current_stream_pos = position;
    }

    fn run_decimators(&mut self, current: StreamTimestamp, filtered: &mut f64) -> bool {
        self.samples_counter += 1;

        self.dec1_buf[self.dec1_ind] = current as f64;

        if self.samples_counter % self.config.decimation_factor1 == 0 {
            self.dec2_buf[self.dec2_ind] =
                dot_prod(&DECIM_FIR, &self.dec1_buf, self.dec1_ind) / DECIM_GAIN;

            if self.config.decimation_factor2 == 0 {
                // Second stage disabled: stage one output drives the
                // controller (and the stability tracking) directly.
                *filtered = self.dec2_buf[self.dec2_ind];
                return true;
            } else if self.samples_counter
                % (self.config.decimation_factor1 * self.config.decimation_factor2)
                == 0
            {
                self.samples_counter = 0;

                *filtered = dot_prod(&DECIM_FIR, &self.dec2_buf, self.dec2_ind) / DECIM_GAIN;
                return true;
            }

            self.dec2_ind = (self.dec2_ind + 1) & DECIM_LEN_MASK;
        }

        self.dec1_ind = (self.dec1_ind + 1) & DECIM_LEN_MASK;

        false
    }

    fn run_controller(&mut self, current: f64) -> f64 {
        let error = current - self.target;

        trace!(error, "freq estimator: current latency error");

        if error.abs() > self.target * self.config.stable_criteria && self.stable {
            self.stable = false;
            self.accum = 0.0;
            self.last_unstable_pos = self.current_stream_pos;
            debug!(error, target = self.target, "freq estimator: unstable");
        } else if error.abs() < self.target * self.config.stable_criteria
            && !self.stable
            && stream_timestamp_diff(self.current_stream_pos, self.last_unstable_pos)
                > self.stability_duration
        {
            self.stable = true;
            debug!("freq estimator: stabilized");
        }

        // In the stable state the proportional term is dropped to avoid
        // constant variation of the resampler control input.
        let mut action = if self.stable {
            self.accum += error;
            self.config.i * self.accum
        } else {
            self.config.p * error
        };

        if action.abs() > self.config.control_action_saturation_cap {
            action = action.signum() * self.config.control_action_saturation_cap;
        }

        action + 1.0
    }
}

/// Dot product of the FIR with a ring buffer, walking backwards from
/// `start`.
fn dot_prod(coeff: &[f64; DECIM_LEN], samples: &[f64; DECIM_LEN], start: usize) -> f64 {
    let mut accum = 0.0;
    let mut index = start;
    for &c in coeff.iter() {
        accum += c * samples[index];
        index = index.wrapping_sub(1) & DECIM_LEN_MASK;
    }
    accum
}
