//! Real-time IIR filtering with state carried across block boundaries.
//!
//! Two independent stages, both keyed by `(stream, channel)`:
//!
//! - a second-order notch built on the `biquad` crate's `DirectForm1`, with
//!   coefficients constructed from the mains-rejection design
//!   `d = e^{-π·BW/Fs}`, `a1 = −(1+d²)·cos(2π·f0/Fs)`, `a2 = d²`,
//!   `b0 = b2 = (1+d²)/2`, `b1 = a1`;
//! - a single-pole highpass realized as a running lowpass accumulator
//!   (`state ← a·state + (1−a)·x`, `a = e^{-2π·fc/Fs}`, output `x − state`).
//!
//! `DirectForm1` keeps the two prior input/output samples internally, so
//! filtering N sequential blocks equals filtering their concatenation. State
//! is reset only when the sample rate changes.

use biquad::{Biquad, Coefficients, DirectForm1};
use std::f64::consts::PI;

use crate::core::AMP_CHANNELS_PER_STREAM;

/// Notch stage settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NotchSettings {
    /// Center frequency in Hz (typically 50 or 60).
    pub frequency_hz: f64,
    /// Bandwidth in Hz.
    pub bandwidth_hz: f64,
}

/// Full filter chain settings for one sample rate.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FilterParams {
    /// Per-channel amplifier sample rate in Hz.
    pub sample_rate: f64,
    /// Notch stage; `None` passes everything through unfiltered.
    pub notch: Option<NotchSettings>,
    /// Highpass cutoff in Hz; `None` disables the stage.
    pub highpass_cutoff_hz: Option<f64>,
}

/// Notch biquad coefficients for the given design parameters.
fn notch_coefficients(f0: f64, bandwidth: f64, fs: f64) -> Coefficients<f64> {
    let d = (-PI * bandwidth / fs).exp();
    let b = (1.0 + d * d) * (2.0 * PI * f0 / fs).cos();
    Coefficients {
        a1: -b,
        a2: d * d,
        b0: (1.0 + d * d) / 2.0,
        b1: -b,
        b2: (1.0 + d * d) / 2.0,
    }
}

/// Per-channel filter state for every amplifier channel of every stream.
pub struct FilterBank {
    params: FilterParams,
    /// `[stream][channel]`; present only while a notch is configured.
    notch: Vec<Vec<DirectForm1<f64>>>,
    /// Highpass running accumulators, `[stream][channel]`.
    highpass_state: Vec<Vec<f64>>,
    highpass_a: f64,
}

impl FilterBank {
    /// Fresh (zero-state) filter bank for `num_streams` streams.
    pub fn new(num_streams: usize, params: FilterParams) -> Self {
        let notch = match params.notch {
            Some(settings) => {
                let coeffs = notch_coefficients(
                    settings.frequency_hz,
                    settings.bandwidth_hz,
                    params.sample_rate,
                );
                (0..num_streams)
                    .map(|_| vec![DirectForm1::<f64>::new(coeffs); AMP_CHANNELS_PER_STREAM])
                    .collect()
            }
            None => Vec::new(),
        };
        let highpass_a = params
            .highpass_cutoff_hz
            .map(|fc| (-2.0 * PI * fc / params.sample_rate).exp())
            .unwrap_or(0.0);
        Self {
            params,
            notch,
            highpass_state: vec![vec![0.0; AMP_CHANNELS_PER_STREAM]; num_streams],
            highpass_a,
        }
    }

    /// Current settings.
    pub fn params(&self) -> &FilterParams {
        &self.params
    }

    /// Replace the settings, discarding all carried state.
    ///
    /// Carried history is only meaningful at one sample rate, so any
    /// reconfiguration starts the chain cold.
    pub fn reconfigure(&mut self, num_streams: usize, params: FilterParams) {
        *self = Self::new(num_streams, params);
    }

    /// Whether any filtering stage is active.
    pub fn is_active(&self) -> bool {
        self.params.notch.is_some() || self.params.highpass_cutoff_hz.is_some()
    }

    /// Filter one channel's samples in place, carrying state into the next
    /// call.
    pub fn run(&mut self, stream: usize, channel: usize, samples: &mut [f64]) {
        if let Some(filters) = self.notch.get_mut(stream) {
            let filter = &mut filters[channel];
            for x in samples.iter_mut() {
                *x = filter.run(*x);
            }
        }
        if self.params.highpass_cutoff_hz.is_some() {
            let state = &mut self.highpass_state[stream][channel];
            let a = self.highpass_a;
            for x in samples.iter_mut() {
                *state = a * *state + (1.0 - a) * *x;
                *x -= *state;
            }
        }
    }
}
