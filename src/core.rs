//! Core data types and the seam traits of the acquisition pipeline.
//!
//! This module defines the fundamental contract between the three pipeline
//! components: the `SampleBlock` unit of data, the `BlockSource` trait the
//! controller polls, the `AcquisitionSink` trait it pushes frames and status
//! through, and the optional `ClockSync` collaborator. Hardware and display
//! live behind these seams so the whole pipeline runs against a synthetic
//! source and a no-op sink in tests.

use crate::error::AppResult;

/// Samples per hardware block. Every block carries exactly this many
/// amplifier/ADC/digital samples per channel.
pub const SAMPLES_PER_BLOCK: usize = 60;

/// Auxiliary inputs are sampled at 1/4 the amplifier rate.
pub const AUX_SAMPLES_PER_BLOCK: usize = SAMPLES_PER_BLOCK / 4;

/// Amplifier channels carried by each headstage stream.
pub const AMP_CHANNELS_PER_STREAM: usize = 32;

/// Auxiliary input channels per stream.
pub const AUX_CHANNELS_PER_STREAM: usize = 3;

/// Analog inputs on the interface board.
pub const BOARD_ADC_CHANNELS: usize = 8;

/// Digital lines per direction on the interface board.
pub const BOARD_DIGITAL_LINES: usize = 16;

/// Largest block burst the processor ever sees in one call; buffers are
/// pre-sized to this so the hot path never reallocates.
pub const MAX_BURST_BLOCKS: usize = 120;

/// Per-stream slice of one sample block.
///
/// Supply voltage and the two temperature sensor codes are sampled once per
/// block (1/60 rate).
#[derive(Clone, Debug)]
pub struct StreamSamples {
    /// Raw amplifier codes, `[channel][sample]`, unsigned with 32768 midpoint.
    pub amplifier: [[u16; SAMPLES_PER_BLOCK]; AMP_CHANNELS_PER_STREAM],
    /// Raw auxiliary input codes, `[channel][sample]`.
    pub aux: [[u16; AUX_SAMPLES_PER_BLOCK]; AUX_CHANNELS_PER_STREAM],
    /// Supply voltage code.
    pub supply: u16,
    /// Temperature sensor code A.
    pub temp_a: u16,
    /// Temperature sensor code B.
    pub temp_b: u16,
}

impl Default for StreamSamples {
    fn default() -> Self {
        Self {
            amplifier: [[0; SAMPLES_PER_BLOCK]; AMP_CHANNELS_PER_STREAM],
            aux: [[0; AUX_SAMPLES_PER_BLOCK]; AUX_CHANNELS_PER_STREAM],
            supply: 0,
            temp_a: 0,
            temp_b: 0,
        }
    }
}

/// One fixed-size unit of multi-channel samples, as delivered by the
/// instrument per polling cycle. Immutable once produced; owned transiently
/// by the controller until consumed.
#[derive(Clone, Debug)]
pub struct SampleBlock {
    /// Monotonically increasing absolute sample index per sample.
    pub timestamps: [u32; SAMPLES_PER_BLOCK],
    /// One entry per attached headstage stream.
    pub streams: Vec<StreamSamples>,
    /// Board analog input codes, `[channel][sample]`.
    pub board_adc: [[u16; SAMPLES_PER_BLOCK]; BOARD_ADC_CHANNELS],
    /// Board digital input port, one 16-bit word per sample.
    pub digital_in: [u16; SAMPLES_PER_BLOCK],
    /// Board digital output port, one 16-bit word per sample.
    pub digital_out: [u16; SAMPLES_PER_BLOCK],
}

impl SampleBlock {
    /// An all-zero block starting at the given absolute sample index.
    pub fn zeroed(num_streams: usize, first_timestamp: u32) -> Self {
        let mut timestamps = [0u32; SAMPLES_PER_BLOCK];
        for (i, t) in timestamps.iter_mut().enumerate() {
            *t = first_timestamp.wrapping_add(i as u32);
        }
        Self {
            timestamps,
            streams: vec![StreamSamples::default(); num_streams],
            board_adc: [[0; SAMPLES_PER_BLOCK]; BOARD_ADC_CHANNELS],
            digital_in: [0; SAMPLES_PER_BLOCK],
            digital_out: [0; SAMPLES_PER_BLOCK],
        }
    }
}

/// A display frame of scaled samples for the visible channels, pushed to the
/// sink once per polling cycle. Borrows the processor's working buffers, so
/// a sink that wants to keep the data must copy it.
#[derive(Debug)]
pub struct DisplayFrame<'a> {
    /// Scaled amplifier data in volts, `[stream][channel][sample]`.
    pub amplifier: &'a [Vec<Vec<f64>>],
    /// Scaled board ADC data in volts, `[channel][sample]`.
    pub board_adc: &'a [Vec<f64>],
    /// Digital input port words, one per sample.
    pub digital_in: &'a [u16],
    /// Number of valid samples in this frame.
    pub num_samples: usize,
}

/// Producer of fixed-cardinality sample blocks: real hardware or the
/// synthetic generator.
pub trait BlockSource {
    /// Fetch up to `count` blocks, blocking at most one polling quantum.
    ///
    /// A timeout yields an empty vector, never an error; the controller
    /// retries on the next cycle.
    fn fetch_next_blocks(&mut self, count: usize) -> AppResult<Vec<SampleBlock>>;

    /// Current fill level of the hardware's intermediate FIFO, in percent.
    fn fifo_fill_percent(&mut self) -> f64;

    /// Per-channel amplifier sample rate of the board, in Hz.
    fn sample_rate(&self) -> f64;
}

/// Consumer of everything the pipeline pushes outward: display frames,
/// saved-byte counters, and status/error messages.
pub trait AcquisitionSink {
    /// A new frame of scaled, filtered samples is ready for display.
    fn push_display_frame(&mut self, frame: DisplayFrame<'_>);

    /// `bytes` more bytes were persisted to the active session.
    fn push_saved_byte_count(&mut self, bytes: u64);

    /// Non-fatal status message (FIFO nearing capacity, rollover, ...).
    fn raise_status(&mut self, message: &str);

    /// Fatal error; acquisition has stopped and files are closed.
    fn raise_fatal_error(&mut self, message: &str);
}

/// Discards everything. Used when no display is attached and in tests.
#[derive(Debug, Default)]
pub struct NullSink;

impl AcquisitionSink for NullSink {
    fn push_display_frame(&mut self, _frame: DisplayFrame<'_>) {}
    fn push_saved_byte_count(&mut self, _bytes: u64) {}
    fn raise_status(&mut self, _message: &str) {}
    fn raise_fatal_error(&mut self, _message: &str) {}
}

/// Optional external clock synchronizer. Consulted once per block batch; the
/// returned offset is added to the timestamps written to disk. This is the
/// only autonomous collaborator, and it communicates solely through this
/// value.
pub trait ClockSync {
    /// Timestamp correction offset, in samples, valid at the block boundary
    /// where it is queried.
    fn offset_at_block_boundary(&mut self) -> i64;
}
