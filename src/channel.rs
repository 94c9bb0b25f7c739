//! Channel classification and per-session save lists.
//!
//! The `ChannelRegistry` owns the logical channel descriptors for the
//! attached streams and the interface board. It is rebuilt whenever the
//! stream topology changes and classifies channels, in native order, into the
//! six per-signal-type save lists a recording session persists. Save lists
//! are snapshots: once built they are stable for the session's lifetime, no
//! matter what happens to the registry afterwards.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::{
    AMP_CHANNELS_PER_STREAM, AUX_CHANNELS_PER_STREAM, BOARD_ADC_CHANNELS, BOARD_DIGITAL_LINES,
};

/// The six signal types a channel can carry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignalType {
    /// Headstage amplifier channel.
    Amplifier,
    /// Headstage auxiliary analog input.
    AuxInput,
    /// Headstage supply voltage sensor.
    SupplyVoltage,
    /// Interface board analog input.
    BoardAdc,
    /// Interface board digital input line.
    BoardDigitalIn,
    /// Interface board digital output line.
    BoardDigitalOut,
}

impl SignalType {
    /// Stable numeric code used in the binary header.
    pub fn code(self) -> u8 {
        match self {
            SignalType::Amplifier => 0,
            SignalType::AuxInput => 1,
            SignalType::SupplyVoltage => 2,
            SignalType::BoardAdc => 3,
            SignalType::BoardDigitalIn => 4,
            SignalType::BoardDigitalOut => 5,
        }
    }
}

/// Logical descriptor of one signal channel.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Channel {
    /// What kind of signal this channel carries.
    pub signal_type: SignalType,
    /// Index within its signal type, in native hardware order.
    pub native_index: usize,
    /// Owning headstage stream; 0 for board-level channels.
    pub stream: usize,
    /// Channel index on the owning chip or board.
    pub chip_channel: usize,
    /// Whether this channel is selected for persistence.
    pub enabled: bool,
    /// Fixed hardware-derived name, e.g. `A-012`.
    pub native_name: String,
    /// User-editable display name; defaults to the native name.
    pub custom_name: String,
}

/// Which channel an episodic trigger watches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    /// A board digital input line (0..16).
    DigitalIn(usize),
    /// A board analog input, compared against the fixed 1.65 V boundary.
    BoardAdc(usize),
}

/// Edge direction of the trigger condition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerPolarity {
    /// Trigger on a low-to-high transition (or analog rise above 1.65 V).
    Rising,
    /// Trigger on a high-to-low transition (or analog fall below 1.65 V).
    Falling,
}

/// Ordered per-signal-type channel lists persisted by one session.
///
/// Built once per session from the registry; membership and order are frozen
/// for the session's lifetime.
#[derive(Clone, Debug, Default)]
pub struct SaveList {
    /// Enabled amplifier channels, native order.
    pub amplifier: Vec<Channel>,
    /// Enabled auxiliary input channels, native order.
    pub aux_input: Vec<Channel>,
    /// Enabled supply voltage channels, native order.
    pub supply_voltage: Vec<Channel>,
    /// Enabled board ADC channels, native order.
    pub board_adc: Vec<Channel>,
    /// Enabled digital input lines, native order.
    pub board_digital_in: Vec<Channel>,
    /// Enabled digital output lines, native order.
    pub board_digital_out: Vec<Channel>,
    /// Streams that carry a temperature sensor, derived from supply-voltage
    /// channel presence independent of its enable flag.
    pub temp_sensor_streams: Vec<usize>,
    /// Whether digital output saving was requested for this session.
    pub save_digital_out: bool,
}

impl SaveList {
    /// Total number of enabled analog/digital channels across all lists.
    pub fn num_channels(&self) -> usize {
        self.amplifier.len()
            + self.aux_input.len()
            + self.supply_voltage.len()
            + self.board_adc.len()
            + self.board_digital_in.len()
            + self.board_digital_out.len()
    }
}

/// Registry of all configured channels for the current stream topology.
pub struct ChannelRegistry {
    channels: Vec<Channel>,
    num_streams: usize,
}

fn stream_prefix(stream: usize) -> char {
    // Streams are lettered A, B, C, ... like the physical ports.
    (b'A' + (stream as u8)) as char
}

impl ChannelRegistry {
    /// Build a registry for `num_streams` attached headstage streams plus the
    /// board-level channels. All channels start enabled except digital
    /// outputs, which are opt-in.
    pub fn new(num_streams: usize) -> Self {
        let mut registry = Self {
            channels: Vec::new(),
            num_streams: 0,
        };
        registry.rebuild(num_streams);
        registry
    }

    /// Re-classify every channel for a new stream topology.
    ///
    /// Legal only while acquisition is idle; the controller enforces this by
    /// construction (it only hands out `&mut ChannelRegistry` in `Idle`).
    pub fn rebuild(&mut self, num_streams: usize) {
        self.num_streams = num_streams;
        self.channels.clear();

        for stream in 0..num_streams {
            let prefix = stream_prefix(stream);
            for ch in 0..AMP_CHANNELS_PER_STREAM {
                let name = format!("{prefix}-{ch:03}");
                self.channels.push(Channel {
                    signal_type: SignalType::Amplifier,
                    native_index: stream * AMP_CHANNELS_PER_STREAM + ch,
                    stream,
                    chip_channel: ch,
                    enabled: true,
                    native_name: name.clone(),
                    custom_name: name,
                });
            }
            for ch in 0..AUX_CHANNELS_PER_STREAM {
                let name = format!("{prefix}-AUX{}", ch + 1);
                self.channels.push(Channel {
                    signal_type: SignalType::AuxInput,
                    native_index: stream * AUX_CHANNELS_PER_STREAM + ch,
                    stream,
                    chip_channel: ch,
                    enabled: true,
                    native_name: name.clone(),
                    custom_name: name,
                });
            }
            let name = format!("{prefix}-VDD");
            self.channels.push(Channel {
                signal_type: SignalType::SupplyVoltage,
                native_index: stream,
                stream,
                chip_channel: 0,
                enabled: true,
                native_name: name.clone(),
                custom_name: name,
            });
        }

        for ch in 0..BOARD_ADC_CHANNELS {
            let name = format!("ADC-{ch:02}");
            self.channels.push(Channel {
                signal_type: SignalType::BoardAdc,
                native_index: ch,
                stream: 0,
                chip_channel: ch,
                enabled: true,
                native_name: name.clone(),
                custom_name: name,
            });
        }
        for ch in 0..BOARD_DIGITAL_LINES {
            let name = format!("DIN-{ch:02}");
            self.channels.push(Channel {
                signal_type: SignalType::BoardDigitalIn,
                native_index: ch,
                stream: 0,
                chip_channel: ch,
                enabled: true,
                native_name: name.clone(),
                custom_name: name,
            });
        }
        for ch in 0..BOARD_DIGITAL_LINES {
            let name = format!("DOUT-{ch:02}");
            self.channels.push(Channel {
                signal_type: SignalType::BoardDigitalOut,
                native_index: ch,
                stream: 0,
                chip_channel: ch,
                enabled: false,
                native_name: name.clone(),
                custom_name: name,
            });
        }

        debug!(
            num_streams,
            num_channels = self.channels.len(),
            "channel registry rebuilt"
        );
    }

    /// Number of attached headstage streams.
    pub fn num_streams(&self) -> usize {
        self.num_streams
    }

    /// All channels in native order.
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Look up a channel by signal type and native index.
    pub fn channel(&self, signal_type: SignalType, native_index: usize) -> Option<&Channel> {
        self.channels
            .iter()
            .find(|c| c.signal_type == signal_type && c.native_index == native_index)
    }

    /// Enable or disable a channel for persistence. Returns `false` if no
    /// such channel exists.
    pub fn set_enabled(
        &mut self,
        signal_type: SignalType,
        native_index: usize,
        enabled: bool,
    ) -> bool {
        match self
            .channels
            .iter_mut()
            .find(|c| c.signal_type == signal_type && c.native_index == native_index)
        {
            Some(ch) => {
                ch.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Rename a channel's display name. Returns `false` if no such channel
    /// exists.
    pub fn set_custom_name(
        &mut self,
        signal_type: SignalType,
        native_index: usize,
        name: &str,
    ) -> bool {
        match self
            .channels
            .iter_mut()
            .find(|c| c.signal_type == signal_type && c.native_index == native_index)
        {
            Some(ch) => {
                ch.custom_name = name.to_string();
                true
            }
            None => false,
        }
    }

    /// Build the ordered save lists for a new session.
    ///
    /// If an episodic trigger references a currently disabled channel, that
    /// channel is force-included so the recorded file always contains the
    /// signal that opened it. Temperature-sensor proxies are derived from
    /// supply-voltage channel presence regardless of its enable flag.
    pub fn build_save_list(
        &self,
        trigger: Option<(TriggerSource, TriggerPolarity)>,
        save_digital_out: bool,
    ) -> SaveList {
        let mut list = SaveList {
            save_digital_out,
            ..SaveList::default()
        };

        for ch in &self.channels {
            let force = match (trigger, ch.signal_type) {
                (Some((TriggerSource::DigitalIn(line), _)), SignalType::BoardDigitalIn) => {
                    ch.native_index == line
                }
                (Some((TriggerSource::BoardAdc(adc), _)), SignalType::BoardAdc) => {
                    ch.native_index == adc
                }
                _ => false,
            };
            if !ch.enabled && !force {
                continue;
            }
            let mut ch = ch.clone();
            if force && !ch.enabled {
                debug!(name = %ch.native_name, "force-including trigger source channel");
                ch.enabled = true;
            }
            match ch.signal_type {
                SignalType::Amplifier => list.amplifier.push(ch),
                SignalType::AuxInput => list.aux_input.push(ch),
                SignalType::SupplyVoltage => list.supply_voltage.push(ch),
                SignalType::BoardAdc => list.board_adc.push(ch),
                SignalType::BoardDigitalIn => list.board_digital_in.push(ch),
                SignalType::BoardDigitalOut => list.board_digital_out.push(ch),
            }
        }

        list.temp_sensor_streams = self
            .channels
            .iter()
            .filter(|c| c.signal_type == SignalType::SupplyVoltage)
            .map(|c| c.stream)
            .collect();

        list
    }
}
