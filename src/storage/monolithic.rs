//! Monolithic layout: one file with header plus repeating per-block records.
//!
//! Per-block record, in order (little-endian):
//! 60×i16 timestamps, then 60×u16 per enabled amplifier channel, 15×u16 per
//! enabled aux channel, 1×u16 per enabled supply channel, 1×i16
//! `round(100·°C)` per temperature-sensor proxy, 60×u16 per enabled ADC
//! channel, 60×u16 digital-in port words if any digital-in is enabled, and
//! 60×u16 digital-out port words if digital-out saving was requested.

use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::channel::SaveList;
use crate::core::{AUX_SAMPLES_PER_BLOCK, SAMPLES_PER_BLOCK};
use crate::data::processor::LoadedBatch;
use crate::error::{AppResult, DaqError};
use crate::storage::{disk_timestamp, FormatWriter, SessionHeader};

/// Writer for the monolithic single-file layout.
pub struct MonolithicWriter {
    file: BufWriter<File>,
}

impl MonolithicWriter {
    /// Create the file and write the session header.
    pub(crate) fn create(path: &Path, header: &SessionHeader) -> AppResult<Self> {
        let file = File::create(path).map_err(|e| {
            DaqError::Configuration(format!("cannot create {}: {e}", path.display()))
        })?;
        let mut file = BufWriter::new(file);
        file.write_all(&header.encode())
            .map_err(|e| DaqError::Storage(format!("header write failed: {e}")))?;
        Ok(Self { file })
    }
}

/// Encode one burst of per-block records into `buf`.
pub(crate) fn encode_batch(
    buf: &mut BytesMut,
    batch: &LoadedBatch<'_>,
    save_list: &SaveList,
    timestamp_offset: i64,
) {
    for b in 0..batch.num_blocks {
        let s0 = b * SAMPLES_PER_BLOCK;
        let a0 = b * AUX_SAMPLES_PER_BLOCK;

        for &t in &batch.timestamps[s0..s0 + SAMPLES_PER_BLOCK] {
            buf.put_i16_le(disk_timestamp(t, timestamp_offset));
        }
        for ch in &save_list.amplifier {
            for &code in &batch.amp_codes[ch.stream][ch.chip_channel][s0..s0 + SAMPLES_PER_BLOCK]
            {
                buf.put_u16_le(code);
            }
        }
        for ch in &save_list.aux_input {
            for &code in
                &batch.aux_codes[ch.stream][ch.chip_channel][a0..a0 + AUX_SAMPLES_PER_BLOCK]
            {
                buf.put_u16_le(code);
            }
        }
        for ch in &save_list.supply_voltage {
            buf.put_u16_le(batch.supply_codes[ch.stream][b]);
        }
        for &stream in &save_list.temp_sensor_streams {
            buf.put_i16_le((batch.temperature_c[stream][b] * 100.0).round() as i16);
        }
        for ch in &save_list.board_adc {
            for &code in &batch.adc_codes[ch.chip_channel][s0..s0 + SAMPLES_PER_BLOCK] {
                buf.put_u16_le(code);
            }
        }
        if !save_list.board_digital_in.is_empty() {
            for &word in &batch.digital_in[s0..s0 + SAMPLES_PER_BLOCK] {
                buf.put_u16_le(word);
            }
        }
        if save_list.save_digital_out {
            for &word in &batch.digital_out[s0..s0 + SAMPLES_PER_BLOCK] {
                buf.put_u16_le(word);
            }
        }
    }
}

impl FormatWriter for MonolithicWriter {
    fn write_batch(
        &mut self,
        batch: &LoadedBatch<'_>,
        save_list: &SaveList,
        timestamp_offset: i64,
    ) -> AppResult<u64> {
        let mut buf = BytesMut::new();
        encode_batch(&mut buf, batch, save_list, timestamp_offset);
        self.file
            .write_all(&buf)
            .map_err(|e| DaqError::Storage(format!("block record write failed: {e}")))?;
        Ok(buf.len() as u64)
    }

    fn finish(&mut self) -> AppResult<()> {
        self.file
            .flush()
            .map_err(|e| DaqError::Storage(format!("flush failed: {e}")))
    }
}
