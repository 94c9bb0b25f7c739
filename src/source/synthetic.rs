//! A synthetic block source that generates deterministic multi-channel data.
//!
//! Amplifier channels carry a per-channel sine plus a little seeded noise;
//! board and supply channels sit at plausible resting levels. Tests script
//! digital and analog pulses at exact sample indices to exercise trigger
//! detection, and can script FIFO fill readings and fetch timeouts to
//! exercise the backpressure guard. The generator is the only place in the
//! crate that uses randomness.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::VecDeque;
use std::f64::consts::PI;

use crate::core::{
    BlockSource, SampleBlock, AMP_CHANNELS_PER_STREAM, AUX_CHANNELS_PER_STREAM,
    AUX_SAMPLES_PER_BLOCK, BOARD_ADC_CHANNELS, SAMPLES_PER_BLOCK,
};
use crate::data::processor::{
    ADC_SCALE_VOLTS, AMP_SCALE_VOLTS, AUX_SCALE_VOLTS, SUPPLY_SCALE_VOLTS,
};
use crate::error::AppResult;

/// Amplifier test-signal amplitude.
const AMP_SINE_VOLTS: f64 = 100e-6;
/// Resting level on the board ADC inputs.
const ADC_IDLE_VOLTS: f64 = 1.0;
/// Level driven during a scripted analog pulse (above the 1.65 V boundary).
const ADC_PULSE_VOLTS: f64 = 3.0;

/// A scripted pulse on a digital line or ADC channel, in absolute samples.
#[derive(Clone, Copy, Debug)]
struct Pulse {
    channel: usize,
    start: u64,
    end: u64,
}

/// Deterministic synthetic `BlockSource`.
pub struct SyntheticSource {
    sample_rate: f64,
    num_streams: usize,
    next_timestamp: u64,
    rng: StdRng,
    digital_pulses: Vec<Pulse>,
    adc_pulses: Vec<Pulse>,
    fifo_script: VecDeque<f64>,
    idle_fifo_percent: f64,
    timeouts_pending: u32,
}

impl SyntheticSource {
    /// Generator for `num_streams` streams at `sample_rate` Hz.
    pub fn new(sample_rate: f64, num_streams: usize) -> Self {
        Self {
            sample_rate,
            num_streams,
            next_timestamp: 0,
            rng: StdRng::seed_from_u64(0xE1EC),
            digital_pulses: Vec::new(),
            adc_pulses: Vec::new(),
            fifo_script: VecDeque::new(),
            idle_fifo_percent: 1.5,
            timeouts_pending: 0,
        }
    }

    /// Drive digital line `line` high for absolute samples `start..end`.
    pub fn with_digital_pulse(mut self, line: usize, start: u64, end: u64) -> Self {
        self.digital_pulses.push(Pulse {
            channel: line,
            start,
            end,
        });
        self
    }

    /// Drive ADC channel `channel` above the trigger boundary for absolute
    /// samples `start..end`.
    pub fn with_adc_pulse(mut self, channel: usize, start: u64, end: u64) -> Self {
        self.adc_pulses.push(Pulse {
            channel,
            start,
            end,
        });
        self
    }

    /// Script the next FIFO fill readings; once exhausted, the idle level is
    /// reported again.
    pub fn with_fifo_readings(mut self, readings: &[f64]) -> Self {
        self.fifo_script.extend(readings);
        self
    }

    /// Make the next `cycles` fetches time out (return an empty batch).
    pub fn inject_timeouts(&mut self, cycles: u32) {
        self.timeouts_pending = cycles;
    }

    /// Absolute sample index the next block will start at.
    pub fn next_sample_index(&self) -> u64 {
        self.next_timestamp
    }

    fn digital_word(&self, sample: u64) -> u16 {
        let mut word = 0u16;
        for pulse in &self.digital_pulses {
            if sample >= pulse.start && sample < pulse.end {
                word |= 1 << pulse.channel;
            }
        }
        word
    }

    fn adc_volts(&self, channel: usize, sample: u64) -> f64 {
        for pulse in &self.adc_pulses {
            if pulse.channel == channel && sample >= pulse.start && sample < pulse.end {
                return ADC_PULSE_VOLTS;
            }
        }
        ADC_IDLE_VOLTS
    }

    fn generate_block(&mut self) -> SampleBlock {
        let first = self.next_timestamp;
        let mut block = SampleBlock::zeroed(self.num_streams, first as u32);

        for stream in 0..self.num_streams {
            let samples = &mut block.streams[stream];
            for ch in 0..AMP_CHANNELS_PER_STREAM {
                // Each channel gets its own tone so displays are tellable apart.
                let freq = 10.0 + ch as f64;
                for s in 0..SAMPLES_PER_BLOCK {
                    let t = (first + s as u64) as f64 / self.sample_rate;
                    let noise = self.rng.gen_range(-2.0e-6..2.0e-6);
                    let volts = AMP_SINE_VOLTS * (2.0 * PI * freq * t).sin() + noise;
                    samples.amplifier[ch][s] = (volts / AMP_SCALE_VOLTS + 32768.0) as u16;
                }
            }
            for ch in 0..AUX_CHANNELS_PER_STREAM {
                for s in 0..AUX_SAMPLES_PER_BLOCK {
                    samples.aux[ch][s] = (1.5 / AUX_SCALE_VOLTS) as u16;
                }
            }
            samples.supply = (3.3 / SUPPLY_SCALE_VOLTS) as u16;
            // Codes for a steady 25 °C reading.
            samples.temp_a = 32768 + ((25.0 + 273.15) * 98.9) as u16;
            samples.temp_b = 32768;
        }

        for ch in 0..BOARD_ADC_CHANNELS {
            for s in 0..SAMPLES_PER_BLOCK {
                let volts = self.adc_volts(ch, first + s as u64);
                block.board_adc[ch][s] = (volts / ADC_SCALE_VOLTS) as u16;
            }
        }
        for s in 0..SAMPLES_PER_BLOCK {
            block.digital_in[s] = self.digital_word(first + s as u64);
        }

        self.next_timestamp = first + SAMPLES_PER_BLOCK as u64;
        block
    }
}

impl BlockSource for SyntheticSource {
    fn fetch_next_blocks(&mut self, count: usize) -> AppResult<Vec<SampleBlock>> {
        if self.timeouts_pending > 0 {
            self.timeouts_pending -= 1;
            return Ok(Vec::new());
        }
        Ok((0..count).map(|_| self.generate_block()).collect())
    }

    fn fifo_fill_percent(&mut self) -> f64 {
        self.fifo_script
            .pop_front()
            .unwrap_or(self.idle_fifo_percent)
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_have_contiguous_timestamps() {
        let mut source = SyntheticSource::new(20000.0, 1);
        let batch = source.fetch_next_blocks(3).expect("fetch");
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].timestamps[0], 0);
        assert_eq!(batch[1].timestamps[0], 60);
        assert_eq!(batch[2].timestamps[59], 179);
    }

    #[test]
    fn scripted_pulse_lands_on_exact_samples() {
        let mut source = SyntheticSource::new(20000.0, 1).with_digital_pulse(3, 70, 80);
        let batch = source.fetch_next_blocks(2).expect("fetch");
        assert_eq!(batch[1].digital_in[9], 0);
        assert_eq!(batch[1].digital_in[10], 1 << 3);
        assert_eq!(batch[1].digital_in[19], 1 << 3);
        assert_eq!(batch[1].digital_in[20], 0);
    }

    #[test]
    fn timeouts_yield_empty_batches_then_resume() {
        let mut source = SyntheticSource::new(20000.0, 1);
        source.inject_timeouts(2);
        assert!(source.fetch_next_blocks(4).expect("fetch").is_empty());
        assert!(source.fetch_next_blocks(4).expect("fetch").is_empty());
        let batch = source.fetch_next_blocks(4).expect("fetch");
        assert_eq!(batch.len(), 4);
        // No samples were consumed by the timeouts.
        assert_eq!(batch[0].timestamps[0], 0);
    }

    #[test]
    fn fifo_script_then_idle() {
        let mut source = SyntheticSource::new(20000.0, 1).with_fifo_readings(&[99.0, 50.0]);
        assert_eq!(source.fifo_fill_percent(), 99.0);
        assert_eq!(source.fifo_fill_percent(), 50.0);
        assert!(source.fifo_fill_percent() < 5.0);
    }
}
