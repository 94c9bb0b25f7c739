//! Per-signal-type layout: one data file per signal type in a session
//! directory, sharing one header file.
//!
//! Field encodings are identical to the monolithic layout; they are simply
//! demultiplexed into `time.edat`, `amplifier.edat`, `auxiliary.edat`,
//! `supply.edat` (supply values followed by the temperature proxies),
//! `analogin.edat`, `digitalin.edat`, and `digitalout.edat`, next to
//! `header.edh`. Files for signal types with nothing to save are not
//! created.

use bytes::{BufMut, BytesMut};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::channel::SaveList;
use crate::core::{AUX_SAMPLES_PER_BLOCK, SAMPLES_PER_BLOCK};
use crate::data::processor::LoadedBatch;
use crate::error::{AppResult, DaqError};
use crate::storage::{disk_timestamp, FormatWriter, SessionHeader};

/// Writer for the one-file-per-signal-type layout.
pub struct PerSignalWriter {
    time: BufWriter<File>,
    amplifier: Option<BufWriter<File>>,
    auxiliary: Option<BufWriter<File>>,
    supply: Option<BufWriter<File>>,
    analog_in: Option<BufWriter<File>>,
    digital_in: Option<BufWriter<File>>,
    digital_out: Option<BufWriter<File>>,
}

fn create_file(dir: &Path, name: &str) -> AppResult<BufWriter<File>> {
    let path = dir.join(name);
    let file = File::create(&path)
        .map_err(|e| DaqError::Configuration(format!("cannot create {}: {e}", path.display())))?;
    Ok(BufWriter::new(file))
}

fn write_all(file: &mut BufWriter<File>, buf: &BytesMut) -> AppResult<u64> {
    file.write_all(buf)
        .map_err(|e| DaqError::Storage(format!("block record write failed: {e}")))?;
    Ok(buf.len() as u64)
}

impl PerSignalWriter {
    /// Create the session directory, header file, and the data files needed
    /// by `save_list`.
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

        let has_supply =
            !save_list.supply_voltage.is_empty() || !save_list.temp_sensor_streams.is_empty();
        Ok(Self {
            time: create_file(dir, "time.edat")?,
            amplifier: (!save_list.amplifier.is_empty())
                .then(|| create_file(dir, "amplifier.edat"))
                .transpose()?,
            auxiliary: (!save_list.aux_input.is_empty())
                .then(|| create_file(dir, "auxiliary.edat"))
                .transpose()?,
            supply: has_supply
                .then(|| create_file(dir, "supply.edat"))
                .transpose()?,
            analog_in: (!save_list.board_adc.is_empty())
                .then(|| create_file(dir, "analogin.edat"))
                .transpose()?,
            digital_in: (!save_list.board_digital_in.is_empty())
                .then(|| create_file(dir, "digitalin.edat"))
                .transpose()?,
            digital_out: save_list
                .save_digital_out
                .then(|| create_file(dir, "digitalout.edat"))
                .transpose()?,
        })
    }
}

impl FormatWriter for PerSignalWriter {
    fn write_batch(
        &mut self,
        batch: &LoadedBatch<'_>,
        save_list: &SaveList,
        timestamp_offset: i64,
    ) -> AppResult<u64> {
        let mut total = 0u64;
        let mut buf = BytesMut::new();

        for &t in &batch.timestamps[..batch.num_samples] {
            buf.put_i16_le(disk_timestamp(t, timestamp_offset));
        }
        total += write_all(&mut self.time, &buf)?;

        if let Some(file) = self.amplifier.as_mut() {
            buf.clear();
            for b in 0..batch.num_blocks {
                let s0 = b * SAMPLES_PER_BLOCK;
                for ch in &save_list.amplifier {
                    for &code in
                        &batch.amp_codes[ch.stream][ch.chip_channel][s0..s0 + SAMPLES_PER_BLOCK]
                    {
                        buf.put_u16_le(code);
                    }
                }
            }
            total += write_all(file, &buf)?;
        }

        if let Some(file) = self.auxiliary.as_mut() {
            buf.clear();
            for b in 0..batch.num_blocks {
                let a0 = b * AUX_SAMPLES_PER_BLOCK;
                for ch in &save_list.aux_input {
                    for &code in
                        &batch.aux_codes[ch.stream][ch.chip_channel][a0..a0 + AUX_SAMPLES_PER_BLOCK]
                    {
                        buf.put_u16_le(code);
                    }
                }
            }
            total += write_all(file, &buf)?;
        }

        if let Some(file) = self.supply.as_mut() {
            buf.clear();
            for b in 0..batch.num_blocks {
                for ch in &save_list.supply_voltage {
                    buf.put_u16_le(batch.supply_codes[ch.stream][b]);
                }
                for &stream in &save_list.temp_sensor_streams {
                    buf.put_i16_le((batch.temperature_c[stream][b] * 100.0).round() as i16);
                }
            }
            total += write_all(file, &buf)?;
        }

        if let Some(file) = self.analog_in.as_mut() {
            buf.clear();
            for b in 0..batch.num_blocks {
                let s0 = b * SAMPLES_PER_BLOCK;
                for ch in &save_list.board_adc {
                    for &code in &batch.adc_codes[ch.chip_channel][s0..s0 + SAMPLES_PER_BLOCK] {
                        buf.put_u16_le(code);
                    }
                }
            }
            total += write_all(file, &buf)?;
        }

        if let Some(file) = self.digital_in.as_mut() {
            buf.clear();
            for &word in &batch.digital_in[..batch.num_samples] {
                buf.put_u16_le(word);
            }
            total += write_all(file, &buf)?;
        }

        if let Some(file) = self.digital_out.as_mut() {
            buf.clear();
            for &word in &batch.digital_out[..batch.num_samples] {
                buf.put_u16_le(word);
            }
            total += write_all(file, &buf)?;
        }

        Ok(total)
    }

    fn finish(&mut self) -> AppResult<()> {
        let mut flush = |file: Option<&mut BufWriter<File>>| -> AppResult<()> {
            if let Some(f) = file {
                f.flush()
                    .map_err(|e| DaqError::Storage(format!("flush failed: {e}")))?;
            }
            Ok(())
        };
        self.time
            .flush()
            .map_err(|e| DaqError::Storage(format!("flush failed: {e}")))?;
        flush(self.amplifier.as_mut())?;
        flush(self.auxiliary.as_mut())?;
        flush(self.supply.as_mut())?;
        flush(self.analog_in.as_mut())?;
        flush(self.digital_in.as_mut())?;
        flush(self.digital_out.as_mut())?;
        Ok(())
    }
}
