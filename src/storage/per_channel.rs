//! Per-channel layout: one data file per enabled channel, a shared timestamp
//! file, and a header file, all in one session directory.
//!
//! Channel files are named after the channel's native name
//! (e.g. `A-000.edat`). Encodings differ from the other layouts where a
//! uniform per-sample stream makes single-channel files easier to consume:
//! amplifier samples are stored as signed offsets (`code − 32768`),
//! aux/supply values are upsampled by sample-and-hold repetition to the
//! per-block sample count, and digital lines become one 0/1 word per sample.

use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::channel::{Channel, SaveList, SignalType};
use crate::core::{AUX_SAMPLES_PER_BLOCK, SAMPLES_PER_BLOCK};
use crate::data::processor::LoadedBatch;
use crate::error::{AppResult, DaqError};
use crate::storage::{disk_timestamp, FormatWriter, SessionHeader};

/// Writer for the one-file-per-channel layout.
pub struct PerChannelWriter {
    time: BufWriter<File>,
    channels: Vec<(Channel, BufWriter<File>)>,
}

fn create_file(dir: &Path, name: &str) -> AppResult<BufWriter<File>> {
    let path = dir.join(name);
    let file = File::create(&path)
        .map_err(|e| DaqError::Configuration(format!("cannot create {}: {e}", path.display())))?;
    Ok(BufWriter::new(file))
}

impl PerChannelWriter {
    /// Create the session directory, header and timestamp files, and one
    /// data file for every channel in the save lists.
    pub(crate) fn create(
        dir: &Path,
        header: &SessionHeader,
        save_list: &SaveList,
    ) -> AppResult<Self> {
        std::fs::create_dir_all(dir).map_err(|e| {
            DaqError::Configuration(format!("cannot create {}: {e}", dir.display()))
        })?;
        let mut header_file = create_file(dir, "header.edh")?;
        header_file
            .write_all(&header.encode())
            .and_then(|_| header_file.flush())
            .map_err(|e| DaqError::Storage(format!("header write failed: {e}")))?;

        let ordered = save_list
            .amplifier
            .iter()
            .chain(&save_list.aux_input)
            .chain(&save_list.supply_voltage)
            .chain(&save_list.board_adc)
            .chain(&save_list.board_digital_in)
            .chain(&save_list.board_digital_out);
        let mut channels = Vec::new();
        for ch in ordered {
            let file = create_file(dir, &format!("{}.edat", ch.native_name))?;
            channels.push((ch.clone(), file));
        }

        Ok(Self {
            time: create_file(dir, "time.edat")?,
            channels,
        })
    }

    fn encode_channel(buf: &mut BytesMut, ch: &Channel, batch: &LoadedBatch<'_>) {
        match ch.signal_type {
            SignalType::Amplifier => {
                for &code in &batch.amp_codes[ch.stream][ch.chip_channel][..batch.num_samples] {
                    buf.put_i16_le((i32::from(code) - 32768) as i16);
                }
            }
            SignalType::AuxInput => {
                // Sample-and-hold to the amplifier rate: each 1/4-rate value
                // repeats four times.
                let codes = &batch.aux_codes[ch.stream][ch.chip_channel];
                for b in 0..batch.num_blocks {
                    for &code in &codes[b * AUX_SAMPLES_PER_BLOCK..(b + 1) * AUX_SAMPLES_PER_BLOCK]
                    {
                        for _ in 0..4 {
                            buf.put_u16_le(code);
                        }
                    }
                }
            }
            SignalType::SupplyVoltage => {
                for b in 0..batch.num_blocks {
                    let code = batch.supply_codes[ch.stream][b];
                    for _ in 0..SAMPLES_PER_BLOCK {
                        buf.put_u16_le(code);
                    }
                }
            }
            SignalType::BoardAdc => {
                for &code in &batch.adc_codes[ch.chip_channel][..batch.num_samples] {
                    buf.put_u16_le(code);
                }
            }
            SignalType::BoardDigitalIn => {
                for &word in &batch.digital_in[..batch.num_samples] {
                    buf.put_u16_le((word >> ch.native_index) & 1);
                }
            }
            SignalType::BoardDigitalOut => {
                for &word in &batch.digital_out[..batch.num_samples] {
                    buf.put_u16_le((word >> ch.native_index) & 1);
                }
            }
        }
    }
}

impl FormatWriter for PerChannelWriter {
    fn write_batch(
        &mut self,
        batch: &LoadedBatch<'_>,
        _save_list: &SaveList,
        timestamp_offset: i64,
    ) -> AppResult<u64> {
        let mut total = 0u64;
        let mut buf = BytesMut::new();

        for &t in &batch.timestamps[..batch.num_samples] {
            buf.put_i16_le(disk_timestamp(t, timestamp_offset));
        }
        self.time
            .write_all(&buf)
            .map_err(|e| DaqError::Storage(format!("block record write failed: {e}")))?;
        total += buf.len() as u64;

        for (ch, file) in &mut self.channels {
            buf.clear();
            Self::encode_channel(&mut buf, ch, batch);
            file.write_all(&buf).map_err(|e| {
                DaqError::Storage(format!("write to {} failed: {e}", ch.native_name))
            })?;
            total += buf.len() as u64;
        }

        Ok(total)
    }

    fn finish(&mut self) -> AppResult<()> {
        self.time
            .flush()
            .map_err(|e| DaqError::Storage(format!("flush failed: {e}")))?;
        for (ch, file) in &mut self.channels {
            file.flush().map_err(|e| {
                DaqError::Storage(format!("flush of {} failed: {e}", ch.native_name))
            })?;
        }
        Ok(())
    }
}
