//! Shared binary header written at the start of every session.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! magic: u32            0xE1EC0D17
//! version: u16 + u16    major, minor
//! sample_rate: f64      per-channel amplifier rate in Hz
//! lower_bandwidth: f32  amplifier analog bandwidth, Hz
//! upper_bandwidth: f32
//! notch_frequency: f32  0.0 = notch disabled
//! highpass_cutoff: f32  0.0 = software highpass disabled
//! impedance_freq: f32   impedance test frequency, Hz
//! notes: 3 × string     length-prefixed UTF-8 (u32 len + bytes)
//! channels: u32 count, then per channel:
//!   signal_type: u8, native_index: u16, stream: u16, chip_channel: u16,
//!   enabled: u8, native_name: string, custom_name: string
//! ```

use bytes::{BufMut, BytesMut};

use crate::channel::Channel;

/// Header magic number.
pub const HEADER_MAGIC: u32 = 0xE1EC_0D17;
/// Current format version.
pub const FORMAT_VERSION: (u16, u16) = (1, 0);

/// Everything a reader needs to interpret the per-block records.
#[derive(Clone, Debug)]
pub struct SessionHeader {
    /// Per-channel amplifier sample rate in Hz.
    pub sample_rate: f64,
    /// Amplifier analog bandwidth lower cutoff, Hz.
    pub lower_bandwidth_hz: f64,
    /// Amplifier analog bandwidth upper cutoff, Hz.
    pub upper_bandwidth_hz: f64,
    /// Notch center frequency; `None` when the notch is disabled.
    pub notch_frequency_hz: Option<f64>,
    /// Software highpass cutoff; `None` when disabled.
    pub highpass_cutoff_hz: Option<f64>,
    /// Impedance test frequency, Hz.
    pub impedance_test_frequency_hz: f64,
    /// Up to three lines of free-text notes.
    pub notes: Vec<String>,
    /// Full channel registry at session start.
    pub channels: Vec<Channel>,
}

fn put_string(buf: &mut BytesMut, s: &str) {
    buf.put_u32_le(s.len() as u32);
    buf.put_slice(s.as_bytes());
}

impl SessionHeader {
    /// Encode the header to its on-disk byte layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(256 + self.channels.len() * 32);
        buf.put_u32_le(HEADER_MAGIC);
        buf.put_u16_le(FORMAT_VERSION.0);
        buf.put_u16_le(FORMAT_VERSION.1);
        buf.put_f64_le(self.sample_rate);
        buf.put_f32_le(self.lower_bandwidth_hz as f32);
        buf.put_f32_le(self.upper_bandwidth_hz as f32);
        buf.put_f32_le(self.notch_frequency_hz.unwrap_or(0.0) as f32);
        buf.put_f32_le(self.highpass_cutoff_hz.unwrap_or(0.0) as f32);
        buf.put_f32_le(self.impedance_test_frequency_hz as f32);

        for i in 0..3 {
            put_string(&mut buf, self.notes.get(i).map_or("", String::as_str));
        }

        buf.put_u32_le(self.channels.len() as u32);
        for ch in &self.channels {
            buf.put_u8(ch.signal_type.code());
            buf.put_u16_le(ch.native_index as u16);
            buf.put_u16_le(ch.stream as u16);
            buf.put_u16_le(ch.chip_channel as u16);
            buf.put_u8(u8::from(ch.enabled));
            put_string(&mut buf, &ch.native_name);
            put_string(&mut buf, &ch.custom_name);
        }
        buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelRegistry;

    fn header() -> SessionHeader {
        let registry = ChannelRegistry::new(1);
        SessionHeader {
            sample_rate: 20000.0,
            lower_bandwidth_hz: 0.1,
            upper_bandwidth_hz: 7500.0,
            notch_frequency_hz: Some(50.0),
            highpass_cutoff_hz: None,
            impedance_test_frequency_hz: 1000.0,
            notes: vec!["subject 12".to_string()],
            channels: registry.channels().to_vec(),
        }
    }

    #[test]
    fn header_starts_with_magic_and_version() {
        let bytes = header().encode();
        assert_eq!(&bytes[0..4], HEADER_MAGIC.to_le_bytes());
        assert_eq!(&bytes[4..6], FORMAT_VERSION.0.to_le_bytes());
        assert_eq!(&bytes[6..8], FORMAT_VERSION.1.to_le_bytes());
        assert_eq!(bytes[8..16], 20000.0f64.to_le_bytes());
    }

    #[test]
    fn disabled_notch_encodes_as_zero() {
        let mut h = header();
        h.notch_frequency_hz = None;
        let bytes = h.encode();
        // magic(4) + version(4) + rate(8) + lower(4) + upper(4) = offset 24
        assert_eq!(bytes[24..28], 0.0f32.to_le_bytes());
    }

    #[test]
    fn channel_count_follows_notes() {
        let h = header();
        let bytes = h.encode();
        // Fixed fields end at 36; then 3 length-prefixed notes.
        let mut off = 36;
        for i in 0..3 {
            let len = u32::from_le_bytes(bytes[off..off + 4].try_into().expect("len")) as usize;
            let expected = h.notes.get(i).map_or(0, String::len);
            assert_eq!(len, expected);
            off += 4 + len;
        }
        let count = u32::from_le_bytes(bytes[off..off + 4].try_into().expect("count"));
        assert_eq!(count as usize, h.channels.len());
    }
}
