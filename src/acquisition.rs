//! Acquisition controller: polling loop, triggered-recording state machine,
//! pre-trigger buffering, rollover, and the FIFO fail-safe.
//!
//! One cooperative polling loop drives everything; there is no independent
//! acquisition thread. Each `poll_cycle` fetches a batch of blocks (sized so
//! the display refreshes near 30 Hz), scales and filters it, pushes a display
//! frame, and then acts according to the current state:
//!
//! ```text
//!            start() untriggered                 start() triggered
//!   Idle ───────────────────────▶ Recording        │
//!    ▲                               │             ▼
//!    │            stop()/fatal ──────┘      WaitingForTrigger ◀──┐
//!    │                                             │             │ episodic
//!    └──── stop()/fatal/one-shot end       trigger edge          │
//!                                                  ▼             │
//!                                          TriggeredRecording ───┘
//!                                            (post-trigger expiry)
//! ```
//!
//! The hardware FIFO fill level is read every cycle: three consecutive
//! readings above the critical level are fatal (stop, close files, report);
//! readings above the warning level only raise a status message.

use tracing::{debug, info, warn};

use crate::channel::{ChannelRegistry, SaveList};
use crate::config::DaqConfig;
use crate::core::{
    AcquisitionSink, BlockSource, ClockSync, AMP_CHANNELS_PER_STREAM, MAX_BURST_BLOCKS,
    SAMPLES_PER_BLOCK,
};
use crate::data::filter::{FilterParams, NotchSettings};
use crate::data::processor::SignalProcessor;
use crate::data::ring_buffer::PreTriggerBuffer;
use crate::error::{AppResult, DaqError};
use crate::storage::{RecordingSession, SaveFormat, SessionHeader};

/// FIFO fill percentage above which a reading counts toward the fatal limit.
const FIFO_CRITICAL_PERCENT: f64 = 98.0;
/// FIFO fill percentage above which a warning is raised.
const FIFO_WARNING_PERCENT: f64 = 75.0;
/// Consecutive critical readings that stop acquisition.
const FIFO_FATAL_STRIKES: u32 = 3;
/// Display refresh rate the batch size is chosen for.
const DISPLAY_REFRESH_HZ: f64 = 30.0;

/// State of the acquisition/recording state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerState {
    /// Not polling; registry rebuilds are legal only here.
    Idle,
    /// Untriggered recording straight to a session.
    Recording,
    /// Armed: buffering pre-trigger history, scanning for the edge.
    WaitingForTrigger,
    /// Episode open: recording until the trigger stays released past the
    /// post-trigger window.
    TriggeredRecording,
}

/// Drives the acquisition pipeline against a block source and a sink.
pub struct AcquisitionController<S: BlockSource, K: AcquisitionSink> {
    source: S,
    sink: K,
    clock_sync: Option<Box<dyn ClockSync>>,
    config: DaqConfig,
    registry: ChannelRegistry,
    processor: SignalProcessor,
    visible: Vec<Vec<bool>>,

    state: TriggerState,
    session: Option<RecordingSession>,
    save_list: Option<SaveList>,
    pre_trigger: Option<PreTriggerBuffer>,

    session_base_offset: i64,
    offset_pending: bool,
    clock_offset: i64,

    fifo_strikes: u32,
    trigger_end_count: u64,
    trigger_end_threshold: u64,

    total_samples_saved: u64,
    rollover_count: u32,
    sessions_opened: u32,
}

impl<S: BlockSource, K: AcquisitionSink> AcquisitionController<S, K> {
    /// Build a controller from validated configuration.
    pub fn new(source: S, sink: K, config: DaqConfig) -> AppResult<Self> {
        config.validate()?;
        let num_streams = config.acquisition.num_streams;
        let sample_rate = source.sample_rate();
        let filter_params = FilterParams {
            sample_rate,
            notch: config.acquisition.notch_frequency_hz.map(|f0| NotchSettings {
                frequency_hz: f0,
                bandwidth_hz: config.acquisition.notch_bandwidth_hz,
            }),
            highpass_cutoff_hz: config.acquisition.highpass_cutoff_hz,
        };
        Ok(Self {
            source,
            sink,
            clock_sync: None,
            registry: ChannelRegistry::new(num_streams),
            processor: SignalProcessor::new(num_streams, filter_params),
            visible: vec![vec![true; AMP_CHANNELS_PER_STREAM]; num_streams],
            config,
            state: TriggerState::Idle,
            session: None,
            save_list: None,
            pre_trigger: None,
            session_base_offset: 0,
            offset_pending: false,
            clock_offset: 0,
            fifo_strikes: 0,
            trigger_end_count: 0,
            trigger_end_threshold: 0,
            total_samples_saved: 0,
            rollover_count: 0,
            sessions_opened: 0,
        })
    }

    /// Attach the optional clock synchronizer.
    pub fn set_clock_sync(&mut self, sync: Box<dyn ClockSync>) {
        self.clock_sync = Some(sync);
    }

    /// Current state machine state.
    pub fn state(&self) -> TriggerState {
        self.state
    }

    /// The channel registry, read-only.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Mutable registry access, available only while `Idle` so save lists of
    /// an active session can never be invalidated.
    pub fn registry_mut(&mut self) -> Option<&mut ChannelRegistry> {
        (self.state == TriggerState::Idle).then_some(&mut self.registry)
    }

    /// Mark an amplifier channel visible/invisible for display filtering.
    pub fn set_channel_visible(&mut self, stream: usize, channel: usize, visible: bool) {
        if let Some(row) = self.visible.get_mut(stream) {
            if let Some(v) = row.get_mut(channel) {
                *v = visible;
            }
        }
    }

    /// The processor, for amplitude/impedance measurements on loaded data.
    pub fn processor(&self) -> &SignalProcessor {
        &self.processor
    }

    /// Save list snapshot of the active session, if any.
    pub fn save_list(&self) -> Option<&SaveList> {
        self.save_list.as_ref()
    }

    /// Total amplifier-rate samples persisted across all sessions.
    pub fn total_samples_saved(&self) -> u64 {
        self.total_samples_saved
    }

    /// Monolithic file rollovers performed so far.
    pub fn rollover_count(&self) -> u32 {
        self.rollover_count
    }

    /// Recording sessions opened so far (rollovers included).
    pub fn sessions_opened(&self) -> u32 {
        self.sessions_opened
    }

    /// Blocks fetched per polling cycle, chosen from the sample rate to
    /// sustain a display refresh near 30 Hz.
    pub fn blocks_per_batch(&self) -> usize {
        let fs = self.source.sample_rate();
        let blocks = (fs / (SAMPLES_PER_BLOCK as f64 * DISPLAY_REFRESH_HZ)).round() as usize;
        blocks.clamp(1, MAX_BURST_BLOCKS)
    }

    fn batch_duration_seconds(&self) -> f64 {
        (self.blocks_per_batch() * SAMPLES_PER_BLOCK) as f64 / self.source.sample_rate()
    }

    fn session_header(&self) -> SessionHeader {
        SessionHeader {
            sample_rate: self.source.sample_rate(),
            lower_bandwidth_hz: self.config.acquisition.lower_bandwidth_hz,
            upper_bandwidth_hz: self.config.acquisition.upper_bandwidth_hz,
            notch_frequency_hz: self.config.acquisition.notch_frequency_hz,
            highpass_cutoff_hz: self.config.acquisition.highpass_cutoff_hz,
            impedance_test_frequency_hz: self.config.acquisition.impedance_test_frequency_hz,
            notes: self.config.storage.notes.clone(),
            channels: self.registry.channels().to_vec(),
        }
    }

    fn open_session(&mut self, save_list: &SaveList) -> AppResult<RecordingSession> {
        let session = RecordingSession::create(
            self.config.storage.format,
            &self.config.storage.output_dir,
            &self.config.storage.base_name,
            &self.session_header(),
            save_list,
        )?;
        self.sessions_opened += 1;
        Ok(session)
    }

    /// Begin acquisition.
    ///
    /// Untriggered: open a session immediately and go `Recording`. Triggered:
    /// prime the pre-trigger ring buffer and go `WaitingForTrigger`; the
    /// session is opened when the edge arrives. A bad save path surfaces here
    /// as a configuration error and leaves the controller `Idle`.
    pub fn start(&mut self) -> AppResult<()> {
        if self.state != TriggerState::Idle {
            return Err(DaqError::SessionActive);
        }
        let trigger = self
            .config
            .trigger
            .as_ref()
            .map(|t| (t.source, t.polarity));
        let save_list = self
            .registry
            .build_save_list(trigger, self.config.storage.save_digital_out);
        self.processor.reset_trigger_memory();
        self.fifo_strikes = 0;

        match &self.config.trigger {
            Some(cfg) => {
                // Sized in whole batches, one extra for the batch in flight,
                // then converted to the blocks the ring actually stores.
                let batches = (cfg.pre_trigger_seconds / self.batch_duration_seconds()).ceil()
                    as usize
                    + 1;
                let capacity = batches * self.blocks_per_batch();
                self.pre_trigger = Some(PreTriggerBuffer::new(capacity));
                let fs = self.source.sample_rate();
                let batch_samples = (self.blocks_per_batch() * SAMPLES_PER_BLOCK) as f64;
                let cycles = (cfg.post_trigger_seconds * fs / batch_samples).ceil() as i64 - 1;
                self.trigger_end_threshold = cycles.max(0) as u64;
                self.save_list = Some(save_list);
                self.state = TriggerState::WaitingForTrigger;
                info!(
                    capacity,
                    threshold = self.trigger_end_threshold,
                    "armed for triggered recording"
                );
            }
            None => {
                let session = self.open_session(&save_list)?;
                self.session = Some(session);
                self.save_list = Some(save_list);
                self.offset_pending = true;
                self.state = TriggerState::Recording;
            }
        }
        Ok(())
    }

    /// Run one polling cycle. Returns `false` without doing anything when
    /// `Idle`. A fetch timeout (empty batch) is not an error; it is simply
    /// retried on the next cycle.
    pub fn poll_cycle(&mut self) -> AppResult<bool> {
        if self.state == TriggerState::Idle {
            return Ok(false);
        }

        let batch = self.source.fetch_next_blocks(self.blocks_per_batch())?;
        self.check_fifo()?;
        if batch.is_empty() {
            return Ok(true);
        }

        if let Some(sync) = self.clock_sync.as_mut() {
            self.clock_offset = sync.offset_at_block_boundary();
        }

        let scan = match (&self.state, &self.config.trigger) {
            (TriggerState::WaitingForTrigger, Some(cfg)) => Some((cfg.source, cfg.polarity)),
            _ => None,
        };
        let trigger_hit = self.processor.scale_and_load(&batch, scan);
        self.processor.filter_data(&self.visible);
        self.sink.push_display_frame(self.processor.display_frame());

        match self.state {
            // Returned above before fetching.
            TriggerState::Idle => {}
            TriggerState::Recording => {
                if self.offset_pending {
                    self.session_base_offset = i64::from(batch[0].timestamps[0]);
                    self.offset_pending = false;
                }
                self.write_loaded_batch()?;
                self.maybe_rollover()?;
            }
            TriggerState::WaitingForTrigger => {
                if let Some(ring) = self.pre_trigger.as_mut() {
                    for block in batch {
                        ring.push(block);
                    }
                }
                if let Some(edge) = trigger_hit {
                    self.on_trigger_fired(edge)?;
                }
            }
            TriggerState::TriggeredRecording => {
                self.write_loaded_batch()?;
                let cfg = match &self.config.trigger {
                    Some(cfg) => cfg,
                    None => {
                        return Err(DaqError::Acquisition(
                            "triggered recording without trigger configuration".to_string(),
                        ))
                    }
                };
                if self
                    .processor
                    .trigger_level_asserted(cfg.source, cfg.polarity)
                {
                    self.trigger_end_count = 0;
                } else {
                    self.trigger_end_count += 1;
                }
                if self.trigger_end_count > self.trigger_end_threshold {
                    self.end_episode()?;
                }
            }
        }
        Ok(true)
    }

    /// Three consecutive critical readings are fatal. Every reading above
    /// the warning level raises a status message, critical or not. A single
    /// non-critical reading resets the strike count.
    fn check_fifo(&mut self) -> AppResult<()> {
        let fill = self.source.fifo_fill_percent();
        if fill > FIFO_WARNING_PERCENT {
            self.sink
                .raise_status(&format!("hardware FIFO at {fill:.1}% capacity"));
        }
        if fill > FIFO_CRITICAL_PERCENT {
            self.fifo_strikes += 1;
            warn!(fill, strikes = self.fifo_strikes, "FIFO critically full");
            if self.fifo_strikes >= FIFO_FATAL_STRIKES {
                let err = DaqError::FifoOverrun(fill);
                self.sink.raise_fatal_error(&err.to_string());
                self.stop()?;
                return Err(err);
            }
        } else {
            self.fifo_strikes = 0;
        }
        Ok(())
    }

    /// Write the processor's loaded burst to the active session. A write
    /// failure is fatal: the session is already marked invalid, so close it,
    /// report, and halt.
    fn write_loaded_batch(&mut self) -> AppResult<()> {
        let (Some(session), Some(save_list)) = (self.session.as_mut(), self.save_list.as_ref())
        else {
            return Ok(());
        };
        session.set_timestamp_offset(self.session_base_offset - self.clock_offset);
        let batch = self.processor.loaded();
        match session.write_batch(&batch, save_list) {
            Ok(bytes) => {
                self.total_samples_saved += batch.num_samples as u64;
                self.sink.push_saved_byte_count(bytes);
                Ok(())
            }
            Err(e) => {
                self.sink.raise_fatal_error(&e.to_string());
                self.halt_after_error();
                Err(e)
            }
        }
    }

    /// Close and reopen the monolithic file once elapsed record time exceeds
    /// the rollover threshold. No samples are lost: the check runs between
    /// batches and the new file continues the same timestamp offset.
    fn maybe_rollover(&mut self) -> AppResult<()> {
        if self.config.storage.format != SaveFormat::Monolithic {
            return Ok(());
        }
        let limit = (self.config.storage.rollover_minutes * 60) as f64;
        let needs_rollover = self
            .session
            .as_ref()
            .is_some_and(|s| s.elapsed_seconds() > limit);
        if !needs_rollover {
            return Ok(());
        }
        if let Some(old) = self.session.take() {
            old.close()?;
        }
        let save_list = self.save_list.clone().unwrap_or_default();
        let session = self.open_session(&save_list)?;
        self.session = Some(session);
        self.rollover_count += 1;
        self.sink.raise_status("recording rolled over to a new file");
        debug!(count = self.rollover_count, "rollover");
        Ok(())
    }

    /// The armed trigger fired at absolute sample index `edge`: open a fresh
    /// session, flush the pre-trigger history oldest-first into it, and
    /// transition to `TriggeredRecording`.
    fn on_trigger_fired(&mut self, edge: u32) -> AppResult<()> {
        info!(edge, "trigger fired");
        // A stale session here means a previous episode failed to close
        // cleanly; never append to it.
        if let Some(stale) = self.session.take() {
            stale.close()?;
        }
        let save_list = self.save_list.clone().unwrap_or_default();
        let mut session = self.open_session(&save_list)?;
        self.session_base_offset = i64::from(edge);
        session.set_timestamp_offset(self.session_base_offset - self.clock_offset);
        self.session = Some(session);

        let history = match self.pre_trigger.as_mut() {
            Some(ring) => ring.drain(),
            None => Vec::new(),
        };
        // The history blocks already went through the processor while armed;
        // restore the temperature history afterwards so their readings are
        // not counted twice.
        let temp_history = self.processor.temperature_history();
        for chunk in history.chunks(MAX_BURST_BLOCKS) {
            self.processor.scale_and_load(chunk, None);
            self.write_loaded_batch()?;
        }
        self.processor.restore_temperature_history(temp_history);

        self.trigger_end_count = 0;
        self.state = TriggerState::TriggeredRecording;
        Ok(())
    }

    /// The trigger has been released for longer than the post-trigger
    /// window: close the episode and either re-arm (episodic) or stop.
    fn end_episode(&mut self) -> AppResult<()> {
        if let Some(session) = self.session.take() {
            session.close()?;
        }
        let episodic = self.config.trigger.as_ref().is_some_and(|t| t.episodic);
        if episodic {
            if let Some(ring) = self.pre_trigger.as_mut() {
                ring.clear();
            }
            self.trigger_end_count = 0;
            self.state = TriggerState::WaitingForTrigger;
            self.sink.raise_status("episode closed; re-armed");
        } else {
            self.state = TriggerState::Idle;
            self.sink.raise_status("episode closed; acquisition stopped");
        }
        Ok(())
    }

    fn halt_after_error(&mut self) {
        // The invalid session is dropped; its buffers were flushed as far as
        // the failed write allowed.
        self.session = None;
        self.save_list = None;
        self.pre_trigger = None;
        self.trigger_end_count = 0;
        self.state = TriggerState::Idle;
    }

    /// Halt polling, flush and close any open session, reset counters, and
    /// return to `Idle`. Idempotent.
    pub fn stop(&mut self) -> AppResult<()> {
        if self.state == TriggerState::Idle && self.session.is_none() {
            return Ok(());
        }
        self.state = TriggerState::Idle;
        self.save_list = None;
        self.pre_trigger = None;
        self.trigger_end_count = 0;
        self.fifo_strikes = 0;
        if let Some(session) = self.session.take() {
            session.close()?;
        }
        info!("acquisition stopped");
        Ok(())
    }
}
