//! Conversion of raw sample blocks to physical units, trigger scanning,
//! filtering dispatch, and frequency-domain amplitude measurement.
//!
//! `SignalProcessor` owns the working buffers for one block burst. Buffers
//! are pre-sized for the maximum burst (`MAX_BURST_BLOCKS`) when streams are
//! allocated, so the per-cycle hot path never reallocates. Raw codes are kept
//! alongside the scaled values: the display and filter paths consume volts,
//! the on-disk formats persist the original codes.

use num_complex::Complex64;
use std::collections::VecDeque;
use tracing::trace;

use crate::channel::{TriggerPolarity, TriggerSource};
use crate::core::{
    DisplayFrame, SampleBlock, AMP_CHANNELS_PER_STREAM, AUX_CHANNELS_PER_STREAM,
    AUX_SAMPLES_PER_BLOCK, BOARD_ADC_CHANNELS, MAX_BURST_BLOCKS, SAMPLES_PER_BLOCK,
};
use crate::data::filter::{FilterBank, FilterParams};

/// Amplifier scale: volts per code step around the 32768 midpoint.
pub const AMP_SCALE_VOLTS: f64 = 0.195e-6;
/// Auxiliary input scale: volts per code.
pub const AUX_SCALE_VOLTS: f64 = 0.0000374;
/// Supply voltage scale: volts per code.
pub const SUPPLY_SCALE_VOLTS: f64 = 0.0000748;
/// Board ADC scale: volts per code.
pub const ADC_SCALE_VOLTS: f64 = 0.000050354;
/// Fixed analog trigger boundary (mid-scale of the 0-3.3 V input range).
pub const ANALOG_TRIGGER_VOLTS: f64 = 1.65;
/// Temperature readings retained for the running average.
const TEMP_HISTORY_CAP: usize = 16;

/// Convert a raw amplifier code to volts.
#[inline]
pub fn scale_amplifier(code: u16) -> f64 {
    AMP_SCALE_VOLTS * (f64::from(code) - 32768.0)
}

/// Convert a raw auxiliary input code to volts.
#[inline]
pub fn scale_aux(code: u16) -> f64 {
    AUX_SCALE_VOLTS * f64::from(code)
}

/// Convert a raw supply voltage code to volts.
#[inline]
pub fn scale_supply(code: u16) -> f64 {
    SUPPLY_SCALE_VOLTS * f64::from(code)
}

/// Convert a raw board ADC code to volts.
#[inline]
pub fn scale_adc(code: u16) -> f64 {
    ADC_SCALE_VOLTS * f64::from(code)
}

/// Convert the two temperature sensor codes to degrees Celsius.
#[inline]
pub fn scale_temperature(code_a: u16, code_b: u16) -> f64 {
    (f64::from(code_a) - f64::from(code_b)) / 98.9 - 273.15
}

/// Borrowed view of one loaded burst, handed to the session writers.
#[derive(Debug)]
pub struct LoadedBatch<'a> {
    /// Blocks currently loaded.
    pub num_blocks: usize,
    /// Amplifier-rate samples loaded (`num_blocks * 60`).
    pub num_samples: usize,
    /// Absolute sample indices.
    pub timestamps: &'a [u32],
    /// Raw amplifier codes, `[stream][channel][sample]`.
    pub amp_codes: &'a [Vec<Vec<u16>>],
    /// Raw auxiliary codes, `[stream][channel][sample]` at 1/4 rate.
    pub aux_codes: &'a [Vec<Vec<u16>>],
    /// Raw supply codes, `[stream][block]`.
    pub supply_codes: &'a [Vec<u16>],
    /// Running-average chip temperature, `[stream][block]`, in °C.
    pub temperature_c: &'a [Vec<f64>],
    /// Raw board ADC codes, `[channel][sample]`.
    pub adc_codes: &'a [Vec<u16>],
    /// Digital input port words, one per sample.
    pub digital_in: &'a [u16],
    /// Digital output port words, one per sample.
    pub digital_out: &'a [u16],
}

/// Scales raw codes to physical units, scans for triggers, and runs the
/// filter chain over the loaded burst.
pub struct SignalProcessor {
    num_streams: usize,
    num_blocks: usize,
    num_samples: usize,

    timestamps: Vec<u32>,
    // Scaled values for display/filtering.
    amplifier_v: Vec<Vec<Vec<f64>>>,
    aux_v: Vec<Vec<Vec<f64>>>,
    supply_v: Vec<Vec<f64>>,
    adc_v: Vec<Vec<f64>>,
    // Raw codes for persistence.
    amp_codes: Vec<Vec<Vec<u16>>>,
    aux_codes: Vec<Vec<Vec<u16>>>,
    supply_codes: Vec<Vec<u16>>,
    adc_codes: Vec<Vec<u16>>,
    digital_in: Vec<u16>,
    digital_out: Vec<u16>,

    temperature_c: Vec<Vec<f64>>,
    temp_history: Vec<VecDeque<f64>>,

    filters: FilterBank,

    // Last sample of the previous burst, for edge detection across batches.
    prev_digital_in: Option<u16>,
    prev_adc_v: Option<[f64; BOARD_ADC_CHANNELS]>,
}

impl SignalProcessor {
    /// Processor for `num_streams` streams with the given filter settings.
    pub fn new(num_streams: usize, filter_params: FilterParams) -> Self {
        let mut processor = Self {
            num_streams: 0,
            num_blocks: 0,
            num_samples: 0,
            timestamps: Vec::new(),
            amplifier_v: Vec::new(),
            aux_v: Vec::new(),
            supply_v: Vec::new(),
            adc_v: Vec::new(),
            amp_codes: Vec::new(),
            aux_codes: Vec::new(),
            supply_codes: Vec::new(),
            adc_codes: Vec::new(),
            digital_in: Vec::new(),
            digital_out: Vec::new(),
            temperature_c: Vec::new(),
            temp_history: Vec::new(),
            filters: FilterBank::new(num_streams, filter_params),
            prev_digital_in: None,
            prev_adc_v: None,
        };
        processor.allocate_memory(num_streams);
        processor
    }

    /// Pre-size every per-stream-per-channel buffer for the maximum burst so
    /// `scale_and_load` never reallocates.
    pub fn allocate_memory(&mut self, num_streams: usize) {
        let max_samples = MAX_BURST_BLOCKS * SAMPLES_PER_BLOCK;
        let max_aux = MAX_BURST_BLOCKS * AUX_SAMPLES_PER_BLOCK;

        self.num_streams = num_streams;
        self.timestamps = Vec::with_capacity(max_samples);
        self.amplifier_v = (0..num_streams)
            .map(|_| vec![Vec::with_capacity(max_samples); AMP_CHANNELS_PER_STREAM])
            .collect();
        self.aux_v = (0..num_streams)
            .map(|_| vec![Vec::with_capacity(max_aux); AUX_CHANNELS_PER_STREAM])
            .collect();
        self.supply_v = vec![Vec::with_capacity(MAX_BURST_BLOCKS); num_streams];
        self.adc_v = vec![Vec::with_capacity(max_samples); BOARD_ADC_CHANNELS];
        self.amp_codes = (0..num_streams)
            .map(|_| vec![Vec::with_capacity(max_samples); AMP_CHANNELS_PER_STREAM])
            .collect();
        self.aux_codes = (0..num_streams)
            .map(|_| vec![Vec::with_capacity(max_aux); AUX_CHANNELS_PER_STREAM])
            .collect();
        self.supply_codes = vec![Vec::with_capacity(MAX_BURST_BLOCKS); num_streams];
        self.adc_codes = vec![Vec::with_capacity(max_samples); BOARD_ADC_CHANNELS];
        self.digital_in = Vec::with_capacity(max_samples);
        self.digital_out = Vec::with_capacity(max_samples);
        self.temperature_c = vec![Vec::with_capacity(MAX_BURST_BLOCKS); num_streams];
        self.temp_history = vec![VecDeque::with_capacity(TEMP_HISTORY_CAP); num_streams];
        self.num_blocks = 0;
        self.num_samples = 0;
        self.prev_digital_in = None;
        self.prev_adc_v = None;

        let params = *self.filters.params();
        self.filters.reconfigure(num_streams, params);
    }

    /// Number of streams the buffers are sized for.
    pub fn num_streams(&self) -> usize {
        self.num_streams
    }

    /// Replace the filter settings, discarding carried filter state.
    pub fn reconfigure_filters(&mut self, params: FilterParams) {
        self.filters.reconfigure(self.num_streams, params);
    }

    /// Forget the previous-sample memory used for cross-batch edge
    /// detection. Called when the controller arms a trigger so a channel
    /// that is already high never fires a rising trigger.
    pub fn reset_trigger_memory(&mut self) {
        self.prev_digital_in = None;
        self.prev_adc_v = None;
    }

    /// Convert a burst of raw blocks into the working buffers, optionally
    /// scanning for a trigger edge.
    ///
    /// Returns the absolute sample index of the first trigger edge, or `None`
    /// when not scanning or no edge was found. Edge detection carries the
    /// last sample of the previous burst, so an edge on a batch boundary is
    /// still seen and a constant channel never triggers.
    pub fn scale_and_load(
        &mut self,
        blocks: &[SampleBlock],
        look_for_trigger: Option<(TriggerSource, TriggerPolarity)>,
    ) -> Option<u32> {
        debug_assert!(blocks.len() <= MAX_BURST_BLOCKS, "burst exceeds allocation");

        self.num_blocks = blocks.len();
        self.num_samples = blocks.len() * SAMPLES_PER_BLOCK;

        self.timestamps.clear();
        self.digital_in.clear();
        self.digital_out.clear();
        for stream in 0..self.num_streams {
            for ch in 0..AMP_CHANNELS_PER_STREAM {
                self.amplifier_v[stream][ch].clear();
                self.amp_codes[stream][ch].clear();
            }
            for ch in 0..AUX_CHANNELS_PER_STREAM {
                self.aux_v[stream][ch].clear();
                self.aux_codes[stream][ch].clear();
            }
            self.supply_v[stream].clear();
            self.supply_codes[stream].clear();
            self.temperature_c[stream].clear();
        }
        for ch in 0..BOARD_ADC_CHANNELS {
            self.adc_v[ch].clear();
            self.adc_codes[ch].clear();
        }

        for block in blocks {
            self.timestamps.extend_from_slice(&block.timestamps);
            self.digital_in.extend_from_slice(&block.digital_in);
            self.digital_out.extend_from_slice(&block.digital_out);

            for (stream, samples) in block.streams.iter().enumerate().take(self.num_streams) {
                for ch in 0..AMP_CHANNELS_PER_STREAM {
                    for &code in &samples.amplifier[ch] {
                        self.amp_codes[stream][ch].push(code);
                        self.amplifier_v[stream][ch].push(scale_amplifier(code));
                    }
                }
                for ch in 0..AUX_CHANNELS_PER_STREAM {
                    for &code in &samples.aux[ch] {
                        self.aux_codes[stream][ch].push(code);
                        self.aux_v[stream][ch].push(scale_aux(code));
                    }
                }
                self.supply_codes[stream].push(samples.supply);
                self.supply_v[stream].push(scale_supply(samples.supply));

                let temp = scale_temperature(samples.temp_a, samples.temp_b);
                let avg = self.update_temperature(stream, temp);
                self.temperature_c[stream].push(avg);
            }

            for ch in 0..BOARD_ADC_CHANNELS {
                for &code in &block.board_adc[ch] {
                    self.adc_codes[ch].push(code);
                    self.adc_v[ch].push(scale_adc(code));
                }
            }
        }

        let trigger_index = look_for_trigger
            .and_then(|(source, polarity)| self.scan_for_trigger(source, polarity));

        // Remember the final sample for the next burst's edge detection.
        if self.num_samples > 0 {
            self.prev_digital_in = self.digital_in.last().copied();
            let mut last = [0.0; BOARD_ADC_CHANNELS];
            for ch in 0..BOARD_ADC_CHANNELS {
                last[ch] = self.adc_v[ch][self.num_samples - 1];
            }
            self.prev_adc_v = Some(last);
        }

        trace!(
            num_blocks = self.num_blocks,
            trigger = ?trigger_index,
            "burst loaded"
        );
        trigger_index
    }

    /// Push one temperature reading and return the running average.
    ///
    /// The history is capped, and the average covers the most recent window
    /// whose length is rounded down to a multiple of four (all entries until
    /// four have accumulated), smoothing the sensor's four-phase readout.
    fn update_temperature(&mut self, stream: usize, temp_c: f64) -> f64 {
        let history = &mut self.temp_history[stream];
        if history.len() == TEMP_HISTORY_CAP {
            history.pop_front();
        }
        history.push_back(temp_c);

        let window = if history.len() >= 4 {
            history.len() - history.len() % 4
        } else {
            history.len()
        };
        let sum: f64 = history.iter().rev().take(window).sum();
        sum / window as f64
    }

    /// Snapshot of the per-stream temperature history. Taken before
    /// re-loading blocks that already passed through `scale_and_load` once,
    /// so the flush does not push their readings a second time.
    pub fn temperature_history(&self) -> Vec<VecDeque<f64>> {
        self.temp_history.clone()
    }

    /// Restore a snapshot taken by `temperature_history`, dropping any
    /// readings pushed since.
    pub fn restore_temperature_history(&mut self, snapshot: Vec<VecDeque<f64>>) {
        self.temp_history = snapshot;
    }

    /// Latest running-average temperature for a stream, in °C.
    pub fn temperature_average(&self, stream: usize) -> f64 {
        self.temperature_c[stream].last().copied().unwrap_or(0.0)
    }

    fn scan_for_trigger(
        &self,
        source: TriggerSource,
        polarity: TriggerPolarity,
    ) -> Option<u32> {
        match source {
            TriggerSource::DigitalIn(line) => {
                let mut prev = self.prev_digital_in.map(|w| (w >> line) & 1);
                for (i, &word) in self.digital_in.iter().enumerate() {
                    let cur = (word >> line) & 1;
                    let fired = match (polarity, prev) {
                        (TriggerPolarity::Rising, Some(p)) => p == 0 && cur == 1,
                        (TriggerPolarity::Falling, Some(p)) => p == 1 && cur == 0,
                        (_, None) => false,
                    };
                    if fired {
                        return Some(self.timestamps[i]);
                    }
                    prev = Some(cur);
                }
                None
            }
            TriggerSource::BoardAdc(ch) => {
                let mut prev = self.prev_adc_v.map(|v| v[ch]);
                for (i, &volts) in self.adc_v[ch].iter().enumerate() {
                    let fired = match (polarity, prev) {
                        (TriggerPolarity::Rising, Some(p)) => {
                            p < ANALOG_TRIGGER_VOLTS && volts >= ANALOG_TRIGGER_VOLTS
                        }
                        (TriggerPolarity::Falling, Some(p)) => {
                            p >= ANALOG_TRIGGER_VOLTS && volts < ANALOG_TRIGGER_VOLTS
                        }
                        (_, None) => false,
                    };
                    if fired {
                        return Some(self.timestamps[i]);
                    }
                    prev = Some(volts);
                }
                None
            }
        }
    }

    /// Whether any loaded sample currently holds the trigger level.
    ///
    /// Used in triggered recording to decide if the trigger condition is
    /// still asserted: high/above the boundary for rising polarity, low/below
    /// for falling.
    pub fn trigger_level_asserted(
        &self,
        source: TriggerSource,
        polarity: TriggerPolarity,
    ) -> bool {
        match source {
            TriggerSource::DigitalIn(line) => self.digital_in.iter().any(|&word| {
                let high = (word >> line) & 1 == 1;
                match polarity {
                    TriggerPolarity::Rising => high,
                    TriggerPolarity::Falling => !high,
                }
            }),
            TriggerSource::BoardAdc(ch) => {
                self.adc_v[ch][..self.num_samples].iter().any(|&v| match polarity {
                    TriggerPolarity::Rising => v >= ANALOG_TRIGGER_VOLTS,
                    TriggerPolarity::Falling => v < ANALOG_TRIGGER_VOLTS,
                })
            }
        }
    }

    /// Run the notch/highpass chain over the visible amplifier channels.
    ///
    /// `visible` is indexed `[stream][chip_channel]`. Invisible channels, or
    /// every channel when no stage is enabled, pass through unfiltered (their
    /// carried state is left untouched).
    pub fn filter_data(&mut self, visible: &[Vec<bool>]) {
        if !self.filters.is_active() {
            return;
        }
        for stream in 0..self.num_streams {
            for ch in 0..AMP_CHANNELS_PER_STREAM {
                let shown = visible
                    .get(stream)
                    .and_then(|s| s.get(ch))
                    .copied()
                    .unwrap_or(false);
                if shown {
                    self.filters.run(stream, ch, &mut self.amplifier_v[stream][ch]);
                }
            }
        }
    }

    /// Correlate a tail window of `pre_filter_samples` against reference
    /// sine/cosine at `target_frequency` and return the complex amplitude
    /// (magnitude and phase). The window covers an integer number of periods
    /// taken from the end of the capture, past the startup transient. Used
    /// only for impedance estimation.
    pub fn measure_complex_amplitude(
        &self,
        pre_filter_samples: &[f64],
        sample_rate: f64,
        target_frequency: f64,
        num_periods: usize,
    ) -> Complex64 {
        if pre_filter_samples.is_empty() {
            return Complex64::new(0.0, 0.0);
        }
        let period = sample_rate / target_frequency;
        let window = ((period * num_periods as f64).round() as usize)
            .max(1)
            .min(pre_filter_samples.len());
        let start = pre_filter_samples.len() - window;

        let mut acc = Complex64::new(0.0, 0.0);
        for (k, &x) in pre_filter_samples[start..].iter().enumerate() {
            let angle = 2.0 * std::f64::consts::PI * target_frequency
                * ((start + k) as f64)
                / sample_rate;
            acc += x * Complex64::new(angle.cos(), -angle.sin());
        }
        2.0 * acc / window as f64
    }

    /// Scaled amplifier samples for one channel of the loaded burst.
    pub fn amplifier_volts(&self, stream: usize, channel: usize) -> &[f64] {
        &self.amplifier_v[stream][channel]
    }

    /// Scaled board ADC samples for one channel of the loaded burst.
    pub fn adc_volts(&self, channel: usize) -> &[f64] {
        &self.adc_v[channel]
    }

    /// Amplifier-rate samples currently loaded.
    pub fn num_samples(&self) -> usize {
        self.num_samples
    }

    /// Display frame over the loaded, filtered burst.
    pub fn display_frame(&self) -> DisplayFrame<'_> {
        DisplayFrame {
            amplifier: &self.amplifier_v,
            board_adc: &self.adc_v,
            digital_in: &self.digital_in,
            num_samples: self.num_samples,
        }
    }

    /// Borrowed view of the loaded burst for the session writers.
    pub fn loaded(&self) -> LoadedBatch<'_> {
        LoadedBatch {
            num_blocks: self.num_blocks,
            num_samples: self.num_samples,
            timestamps: &self.timestamps,
            amp_codes: &self.amp_codes,
            aux_codes: &self.aux_codes,
            supply_codes: &self.supply_codes,
            temperature_c: &self.temperature_c,
            adc_codes: &self.adc_codes,
            digital_in: &self.digital_in,
            digital_out: &self.digital_out,
        }
    }
}
