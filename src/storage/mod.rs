//! Binary persistence: three mutually exclusive on-disk layouts.
//!
//! A `RecordingSession` owns the open file handle(s) for exactly one format,
//! fixed for the session's lifetime:
//!
//! 1. **Monolithic** — one `.edat` file, header followed by repeating
//!    per-block records (subject to timed rollover);
//! 2. **Per-signal-type** — a directory with one data file per signal type
//!    sharing one header file;
//! 3. **Per-channel** — a directory with one data file per enabled channel
//!    plus a shared timestamp file and header file.
//!
//! All three are variants of one session concept: a tagged union with one
//! writer per variant, rather than format-keyed branching inside every
//! operation. Every integer on disk is little-endian. A session that fails a
//! write partway through a block record is marked invalid and refuses
//! further writes, since readers assume exact per-block field cardinality.

pub mod header;
mod monolithic;
mod per_channel;
mod per_signal;

pub use header::SessionHeader;
pub use monolithic::MonolithicWriter;
pub use per_channel::PerChannelWriter;
pub use per_signal::PerSignalWriter;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::channel::SaveList;
use crate::data::processor::LoadedBatch;
use crate::error::{AppResult, DaqError};

/// On-disk layout of a recording session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveFormat {
    /// One file holding every enabled channel.
    #[default]
    Monolithic,
    /// One file per signal type.
    PerSignalType,
    /// One file per enabled channel.
    PerChannel,
}

/// Trait implemented by the per-format block-record encoders.
pub trait FormatWriter {
    /// Append one burst of loaded blocks; returns bytes written.
    fn write_batch(
        &mut self,
        batch: &LoadedBatch<'_>,
        save_list: &SaveList,
        timestamp_offset: i64,
    ) -> AppResult<u64>;

    /// Flush and close every file.
    fn finish(&mut self) -> AppResult<()>;
}

enum SessionWriter {
    Monolithic(MonolithicWriter),
    PerSignalType(PerSignalWriter),
    PerChannel(PerChannelWriter),
    #[cfg(test)]
    Failing(tests::FailingWriter),
}

impl SessionWriter {
    fn as_format_writer(&mut self) -> &mut dyn FormatWriter {
        match self {
            SessionWriter::Monolithic(w) => w,
            SessionWriter::PerSignalType(w) => w,
            SessionWriter::PerChannel(w) => w,
            #[cfg(test)]
            SessionWriter::Failing(w) => w,
        }
    }
}

/// Open file handle(s), byte counters, and elapsed record time for one
/// recording. Created on recording start or trigger fire; destroyed on
/// stop, rollover, or trigger release.
pub struct RecordingSession {
    writer: SessionWriter,
    path: PathBuf,
    format: SaveFormat,
    sample_rate: f64,
    timestamp_offset: i64,
    bytes_written: u64,
    samples_written: u64,
    valid: bool,
}

/// Resolve a session path that does not collide with an existing one.
/// Rollovers or episodes landing in the same wall-clock second get a
/// numeric suffix instead of truncating the previous session.
fn unique_path(base: &Path, stem: &str, extension: &str) -> PathBuf {
    let candidate = base.join(format!("{stem}{extension}"));
    if !candidate.exists() {
        return candidate;
    }
    let mut n = 1;
    loop {
        let candidate = base.join(format!("{stem}_{n}{extension}"));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

/// Truncate a block timestamp to the 2-byte on-disk representation after
/// subtracting the session's timestamp offset.
pub(crate) fn disk_timestamp(timestamp: u32, offset: i64) -> i16 {
    (i64::from(timestamp) - offset) as i16
}

impl RecordingSession {
    /// Create the file(s) for a new session and write the header(s).
    ///
    /// `base` is the directory the session lives under; the file or session
    /// directory name is derived from `name` and the current wall-clock time.
    /// An unopenable path surfaces immediately as a configuration error.
    pub fn create(
        format: SaveFormat,
        base: &Path,
        name: &str,
        header: &SessionHeader,
        save_list: &SaveList,
    ) -> AppResult<Self> {
        if !base.exists() {
            std::fs::create_dir_all(base).map_err(|e| {
                DaqError::Configuration(format!(
                    "cannot create output directory {}: {e}",
                    base.display()
                ))
            })?;
        }
        let stamp = chrono::Local::now().format("%y%m%d_%H%M%S");
        let extension = match format {
            SaveFormat::Monolithic => ".edat",
            _ => "",
        };
        let path = unique_path(base, &format!("{name}_{stamp}"), extension);
        let writer = match format {
            SaveFormat::Monolithic => {
                SessionWriter::Monolithic(MonolithicWriter::create(&path, header)?)
            }
            SaveFormat::PerSignalType => {
                SessionWriter::PerSignalType(PerSignalWriter::create(&path, header, save_list)?)
            }
            SaveFormat::PerChannel => {
                SessionWriter::PerChannel(PerChannelWriter::create(&path, header, save_list)?)
            }
        };
        info!(path = %path.display(), ?format, "recording session opened");
        Ok(Self {
            writer,
            path,
            format,
            sample_rate: header.sample_rate,
            timestamp_offset: 0,
            bytes_written: 0,
            samples_written: 0,
            valid: true,
        })
    }

    /// File or directory this session writes into.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Layout of this session.
    pub fn format(&self) -> SaveFormat {
        self.format
    }

    /// Set the value subtracted from every written timestamp (the trigger's
    /// sample index for episodic sessions, the first recorded sample
    /// otherwise).
    pub fn set_timestamp_offset(&mut self, offset: i64) {
        self.timestamp_offset = offset;
    }

    /// Total bytes persisted so far, header included in the per-file counts.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Amplifier-rate samples persisted so far.
    pub fn samples_written(&self) -> u64 {
        self.samples_written
    }

    /// Elapsed record time in seconds, derived from samples written.
    pub fn elapsed_seconds(&self) -> f64 {
        self.samples_written as f64 / self.sample_rate
    }

    /// Whether the session can accept further writes.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Append one burst. On any write failure the session is marked invalid
    /// and every later call fails fast, so a truncated block record is never
    /// followed by more data.
    pub fn write_batch(
        &mut self,
        batch: &LoadedBatch<'_>,
        save_list: &SaveList,
    ) -> AppResult<u64> {
        if !self.valid {
            return Err(DaqError::Storage(format!(
                "session {} is invalid after a failed write",
                self.path.display()
            )));
        }
        let offset = self.timestamp_offset;
        match self
            .writer
            .as_format_writer()
            .write_batch(batch, save_list, offset)
        {
            Ok(bytes) => {
                self.bytes_written += bytes;
                self.samples_written += batch.num_samples as u64;
                Ok(bytes)
            }
            Err(e) => {
                self.valid = false;
                Err(e)
            }
        }
    }

    /// Flush and close the session.
    pub fn close(mut self) -> AppResult<()> {
        self.writer.as_format_writer().finish()?;
        info!(
            path = %self.path.display(),
            bytes = self.bytes_written,
            samples = self.samples_written,
            "recording session closed"
        );
        Ok(())
    }
}
