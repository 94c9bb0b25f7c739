//! # ephys-daq
//!
//! Core library for multi-channel bioelectric signal acquisition. It
//! acquires fixed-size sample blocks from a recording instrument, converts
//! raw codes to physical units, optionally notch/highpass filters them in
//! real time, and persists selected channels to disk under one of three
//! binary layouts, including triggered ("episodic") recording with a
//! pre-trigger history buffer.
//!
//! The hardware driver and the display are external collaborators reached
//! only through the narrow traits in [`core`]; the library itself is the
//! acquisition/processing/persistence pipeline.
//!
//! ## Crate Structure
//!
//! - **`core`**: the `SampleBlock` data unit, hardware constants, and the
//!   seam traits (`BlockSource`, `AcquisitionSink`, `ClockSync`).
//! - **`config`**: strongly-typed configuration loaded with `figment` from a
//!   TOML file plus `EPHYS_DAQ_` environment overrides.
//! - **`channel`**: channel classification and per-session save lists.
//! - **`data`**: the signal processor (scaling, trigger scan, amplitude
//!   measurement), the IIR filter chain, and the pre-trigger ring buffer.
//! - **`storage`**: the three on-disk session layouts behind one
//!   `RecordingSession`.
//! - **`acquisition`**: the polling-loop controller and its triggered
//!   recording state machine.
//! - **`source`**: the synthetic block generator used without hardware.
//! - **`error`**: the crate-wide `DaqError` enum.

pub mod acquisition;
pub mod channel;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod source;
pub mod storage;
