//! Byte-level verification of the three on-disk session layouts.
//!
//! Crafts blocks with known codes, writes them through a `RecordingSession`,
//! and reads the raw files back.
//!
//! # Test Coverage
//!
//! - Monolithic: header prefix and exact per-block record layout
//! - Per-signal-type: file set, demultiplexed field streams, supply file
//!   carrying the temperature proxies
//! - Per-channel: signed amplifier offsets, aux/supply sample-and-hold
//!   upsampling, single-line digital words

use std::path::Path;

use ephys_daq::channel::{ChannelRegistry, SaveList};
use ephys_daq::core::{SampleBlock, AUX_SAMPLES_PER_BLOCK, SAMPLES_PER_BLOCK};
use ephys_daq::data::filter::FilterParams;
use ephys_daq::data::processor::SignalProcessor;
use ephys_daq::storage::{RecordingSession, SaveFormat, SessionHeader};
use tempfile::TempDir;

/// Bytes of one monolithic block record for one stream with everything but
/// digital-out enabled: 60 timestamps, 32×60 amplifier, 3×15 aux, one supply,
/// one temperature proxy, 8×60 ADC, 60 digital-in words, 2 bytes each.
const RECORD_BYTES: usize = (60 + 32 * 60 + 3 * 15 + 1 + 1 + 8 * 60 + 60) * 2;

fn amp_code(ch: usize, s: usize) -> u16 {
    (30000 + ch * 100 + s) as u16
}

fn aux_code(ch: usize, k: usize) -> u16 {
    (500 + ch * 50 + k) as u16
}

fn adc_code(ch: usize, s: usize) -> u16 {
    (2000 + ch * 100 + s) as u16
}

const SUPPLY_CODE: u16 = 44000;
// (temp_a - temp_b)/98.9 - 273.15 ≈ 25.0 °C, so the proxy is 2500.
const TEMP_A: u16 = 32768 + 29487;
const TEMP_B: u16 = 32768;

fn crafted_blocks() -> Vec<SampleBlock> {
    (0..2u32)
        .map(|b| {
            let mut block = SampleBlock::zeroed(1, b * SAMPLES_PER_BLOCK as u32);
            let stream = &mut block.streams[0];
            for ch in 0..32 {
                for s in 0..SAMPLES_PER_BLOCK {
                    stream.amplifier[ch][s] = amp_code(ch, s);
                }
            }
            for ch in 0..3 {
                for k in 0..AUX_SAMPLES_PER_BLOCK {
                    stream.aux[ch][k] = aux_code(ch, k);
                }
            }
            stream.supply = SUPPLY_CODE;
            stream.temp_a = TEMP_A;
            stream.temp_b = TEMP_B;
            for ch in 0..8 {
                for s in 0..SAMPLES_PER_BLOCK {
                    block.board_adc[ch][s] = adc_code(ch, s);
                }
            }
            for s in 0..SAMPLES_PER_BLOCK {
                block.digital_in[s] = s as u16;
                block.digital_out[s] = (SAMPLES_PER_BLOCK - 1 - s) as u16;
            }
            block
        })
        .collect()
}

fn header(registry: &ChannelRegistry) -> SessionHeader {
    SessionHeader {
        sample_rate: 20000.0,
        lower_bandwidth_hz: 0.1,
        upper_bandwidth_hz: 7500.0,
        notch_frequency_hz: Some(50.0),
        highpass_cutoff_hz: None,
        impedance_test_frequency_hz: 1000.0,
        notes: vec!["layout fixture".to_string()],
        channels: registry.channels().to_vec(),
    }
}

fn loaded_processor() -> SignalProcessor {
    let params = FilterParams {
        sample_rate: 20000.0,
        notch: None,
        highpass_cutoff_hz: None,
    };
    let mut processor = SignalProcessor::new(1, params);
    processor.scale_and_load(&crafted_blocks(), None);
    processor
}

fn write_session(
    dir: &Path,
    format: SaveFormat,
    save_list: &SaveList,
) -> std::path::PathBuf {
    let registry = ChannelRegistry::new(1);
    let processor = loaded_processor();
    let mut session =
        RecordingSession::create(format, dir, "fixture", &header(&registry), save_list)
            .expect("create session");
    session
        .write_batch(&processor.loaded(), save_list)
        .expect("write batch");
    let path = session.path().to_path_buf();
    session.close().expect("close");
    path
}

fn u16_at(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn i16_at(bytes: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u16_file(path: &Path) -> Vec<u16> {
    let bytes = std::fs::read(path).expect("read file");
    assert_eq!(bytes.len() % 2, 0);
    bytes.chunks_exact(2).map(|c| u16_at(c, 0)).collect()
}

#[test]
fn monolithic_block_record_layout() {
    let dir = TempDir::new().expect("tempdir");
    let registry = ChannelRegistry::new(1);
    let save_list = registry.build_save_list(None, false);
    let path = write_session(dir.path(), SaveFormat::Monolithic, &save_list);

    let bytes = std::fs::read(&path).expect("read session file");
    let header_bytes = header(&registry).encode();
    assert_eq!(&bytes[..header_bytes.len()], &header_bytes[..]);

    let records = &bytes[header_bytes.len()..];
    assert_eq!(records.len(), 2 * RECORD_BYTES);

    for (b, record) in records.chunks_exact(RECORD_BYTES).enumerate() {
        // Timestamps, offset-relative (offset 0 here).
        for s in 0..60 {
            assert_eq!(i16_at(record, s * 2), (b * 60 + s) as i16);
        }
        // Amplifier channels in native order.
        let amp0 = 120;
        for ch in 0..32 {
            for s in 0..60 {
                assert_eq!(u16_at(record, amp0 + (ch * 60 + s) * 2), amp_code(ch, s));
            }
        }
        // Aux at quarter rate.
        let aux0 = amp0 + 32 * 120;
        for ch in 0..3 {
            for k in 0..15 {
                assert_eq!(u16_at(record, aux0 + (ch * 15 + k) * 2), aux_code(ch, k));
            }
        }
        // One supply value and one temperature proxy per block.
        let sup0 = aux0 + 3 * 30;
        assert_eq!(u16_at(record, sup0), SUPPLY_CODE);
        assert_eq!(i16_at(record, sup0 + 2), 2500);
        // Board ADC.
        let adc0 = sup0 + 4;
        for ch in 0..8 {
            for s in 0..60 {
                assert_eq!(u16_at(record, adc0 + (ch * 60 + s) * 2), adc_code(ch, s));
            }
        }
        // Digital input port words close the record.
        let din0 = adc0 + 8 * 120;
        for s in 0..60 {
            assert_eq!(u16_at(record, din0 + s * 2), s as u16);
        }
        assert_eq!(din0 + 120, RECORD_BYTES);
    }
}

#[test]
fn per_signal_layout_demultiplexes_streams() {
    let dir = TempDir::new().expect("tempdir");
    let registry = ChannelRegistry::new(1);
    let save_list = registry.build_save_list(None, false);
    let session_dir = write_session(dir.path(), SaveFormat::PerSignalType, &save_list);

    assert!(session_dir.is_dir());
    let header_bytes = std::fs::read(session_dir.join("header.edh")).expect("header");
    assert_eq!(header_bytes, header(&registry).encode());

    // Digital-out saving was not requested, so its file must not exist.
    assert!(!session_dir.join("digitalout.edat").exists());

    let time: Vec<i16> = std::fs::read(session_dir.join("time.edat"))
        .expect("time")
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(time.len(), 120);
    assert_eq!(time[0], 0);
    assert_eq!(time[119], 119);

    let amp = read_u16_file(&session_dir.join("amplifier.edat"));
    assert_eq!(amp.len(), 2 * 32 * 60);
    // Block 0, channel 7, sample 13.
    assert_eq!(amp[7 * 60 + 13], amp_code(7, 13));
    // Block 1 repeats the per-block channel sweep.
    assert_eq!(amp[32 * 60 + 7 * 60 + 13], amp_code(7, 13));

    let aux = read_u16_file(&session_dir.join("auxiliary.edat"));
    assert_eq!(aux.len(), 2 * 3 * 15);
    assert_eq!(aux[2 * 15 + 4], aux_code(2, 4));

    // Supply file interleaves the supply code and the temperature proxy.
    let supply = read_u16_file(&session_dir.join("supply.edat"));
    assert_eq!(supply.len(), 4);
    assert_eq!(supply[0], SUPPLY_CODE);
    assert_eq!(supply[1] as i16, 2500);
    assert_eq!(supply[2], SUPPLY_CODE);

    let adc = read_u16_file(&session_dir.join("analogin.edat"));
    assert_eq!(adc.len(), 2 * 8 * 60);
    assert_eq!(adc[3 * 60 + 59], adc_code(3, 59));

    let din = read_u16_file(&session_dir.join("digitalin.edat"));
    assert_eq!(din.len(), 120);
    assert_eq!(din[61], 1);
}

#[test]
fn per_signal_layout_writes_digital_out_when_requested() {
    let dir = TempDir::new().expect("tempdir");
    let registry = ChannelRegistry::new(1);
    let save_list = registry.build_save_list(None, true);
    let session_dir = write_session(dir.path(), SaveFormat::PerSignalType, &save_list);

    let dout = read_u16_file(&session_dir.join("digitalout.edat"));
    assert_eq!(dout.len(), 120);
    assert_eq!(dout[0], 59);
    assert_eq!(dout[59], 0);
}

#[test]
fn per_channel_layout_one_file_per_channel() {
    let dir = TempDir::new().expect("tempdir");
    let registry = ChannelRegistry::new(1);
    let save_list = registry.build_save_list(None, false);
    let session_dir = write_session(dir.path(), SaveFormat::PerChannel, &save_list);

    assert!(session_dir.join("header.edh").is_file());
    assert!(session_dir.join("time.edat").is_file());

    // Amplifier samples become signed offsets from the 32768 midpoint.
    let a000: Vec<i16> = std::fs::read(session_dir.join("A-000.edat"))
        .expect("A-000")
        .chunks_exact(2)
        .map(|c| i16::from_le_bytes([c[0], c[1]]))
        .collect();
    assert_eq!(a000.len(), 120);
    assert_eq!(
        a000[13],
        (i32::from(amp_code(0, 13)) - 32768) as i16
    );

    // Aux channels are upsampled by sample-and-hold to the amplifier rate.
    let aux1 = read_u16_file(&session_dir.join("A-AUX1.edat"));
    assert_eq!(aux1.len(), 120);
    assert_eq!(aux1[0], aux_code(0, 0));
    assert_eq!(aux1[3], aux_code(0, 0));
    assert_eq!(aux1[4], aux_code(0, 1));

    // Supply holds one value per block, repeated per sample.
    let vdd = read_u16_file(&session_dir.join("A-VDD.edat"));
    assert_eq!(vdd.len(), 120);
    assert!(vdd.iter().all(|&v| v == SUPPLY_CODE));

    // Digital lines become one 0/1 word per sample; line 3 is high exactly
    // when bit 3 of the scripted port word (the sample index) is set.
    let din3 = read_u16_file(&session_dir.join("DIN-03.edat"));
    assert_eq!(din3.len(), 120);
    for (s, &w) in din3.iter().enumerate() {
        assert_eq!(w, ((s as u16 % 60) >> 3) & 1);
    }

    // Board ADC channels keep their raw unsigned codes.
    let adc5 = read_u16_file(&session_dir.join("ADC-05.edat"));
    assert_eq!(adc5.len(), 120);
    assert_eq!(adc5[59], adc_code(5, 59));

    // Digital outputs were not requested; no files for them.
    assert!(!session_dir.join("DOUT-00.edat").exists());
}
