//! Closed-loop latency tuning tests.
//!
//! Simulates the receiver-side control loop: a sender whose clock runs
//! slightly fast fills the queue faster than the receiver drains it,
//! and the frequency estimator must pull the resampler scaling until
//! the observed latency locks onto the target.

use audiolink_audio_core::{
    ChannelSet, FreqEstimator, FreqEstimatorConfig, LatencyTunerProfile, SampleSpec,
};

const SAMPLE_RATE: f64 = 44_100.0;
const TARGET_LATENCY: f64 = 8_000.0;

/// Per-step stream advance in samples (one estimator update).
const STEP: f64 = 100.0;

/// Closed-loop plant: latency integrates the difference between the
/// sender's clock skew and the correction applied by the resampler.
struct DriftPlant {
    latency: f64,
    drift: f64,
}

impl DriftPlant {
    fn advance(&mut self, scaling: f64) {
        self.latency += STEP * (self.drift - (scaling - 1.0));
    }
}

fn run_drift_loop(sender_rate: f64, steps: u32) -> (FreqEstimator, Vec<f64>) {
    let spec = SampleSpec::new(SAMPLE_RATE as u32, ChannelSet::stereo());

    let mut config = FreqEstimatorConfig::default();
    // Two seconds of in-band readings before the estimator may declare
    // itself stable, giving the proportional phase time to shrink the
    // initial offset first.
    config.stability_duration_criteria = 2_000_000_000;
    config.deduce_defaults(LatencyTunerProfile::Responsive);

    let mut fe = FreqEstimator::new(config, TARGET_LATENCY as u32, &spec).unwrap();

    let mut plant = DriftPlant {
        // Start off target so the controller has work to do.
        latency: TARGET_LATENCY + 200.0,
        drift: (sender_rate - SAMPLE_RATE) / SAMPLE_RATE,
    };

    let mut history = Vec::with_capacity(steps as usize);
    for step in 0..steps {
        fe.update_stream_position(step.wrapping_mul(STEP as u32));
        fe.update_current_latency(plant.latency.max(0.0).round() as u32);
        plant.advance(fe.freq_coeff() as f64);
        history.push(plant.latency);
    }

    (fe, history)
}

#[test]
fn resampler_drift_converges_to_target() {
    // Sender clock 44100.05 Hz against a 44100.00 Hz receiver.
    let (fe, history) = run_drift_loop(44_100.05, 60_000);

    // After warmup (far more than 10x the stability duration), the
    // latency must sit within 5% of the target and the estimator must
    // report stable.
    assert!(fe.is_stable(), "estimator must have stabilized");

    let tolerance = 0.05 * TARGET_LATENCY;
    for (step, &latency) in history.iter().enumerate().skip(history.len() - 10_000) {
        assert!(
            (latency - TARGET_LATENCY).abs() <= tolerance,
            "step {step}: latency {latency} strayed from target"
        );
    }
}

#[test]
fn drift_in_both_directions_is_compensated() {
    // A slow sender drains the queue; the controller must slow down
    // consumption the same way it speeds it up for a fast sender.
    let (_, fast) = run_drift_loop(44_100.05, 60_000);
    let (_, slow) = run_drift_loop(44_099.95, 60_000);

    let tail_mean = |h: &[f64]| h[h.len() - 5_000..].iter().sum::<f64>() / 5_000.0;

    assert!((tail_mean(&fast) - TARGET_LATENCY).abs() < 0.05 * TARGET_LATENCY);
    assert!((tail_mean(&slow) - TARGET_LATENCY).abs() < 0.05 * TARGET_LATENCY);
}

#[test]
fn scaling_never_exceeds_saturation_cap() {
    // A huge latency error saturates the control action instead of
    // producing an unbounded scaling factor.
    let spec = SampleSpec::new(SAMPLE_RATE as u32, ChannelSet::stereo());
    let mut config = FreqEstimatorConfig::default();
    config.deduce_defaults(LatencyTunerProfile::Gradual);
    let cap = config.control_action_saturation_cap;

    let mut fe = FreqEstimator::new(config, TARGET_LATENCY as u32, &spec).unwrap();

    for step in 0..200_000u32 {
        fe.update_stream_position(step * 100);
        fe.update_current_latency(1_000_000);
    }

    let coeff = fe.freq_coeff() as f64;
    assert!(coeff > 1.0);
    assert!(coeff <= 1.0 + cap + 1e-9);
}
