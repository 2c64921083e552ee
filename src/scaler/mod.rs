//! Generic multi-channel scalers.
//!
//! A [`GenScaler`] is a block of free-running 32-bit counters read out once
//! per event. Besides the raw counts it keeps the counts of the previous
//! decoded event and derives per-channel rates from the difference, using
//! one of three time bases (see [`ClockBinding`]):
//!
//! 1. the resolved time base of a normalization scaler,
//! 2. an onboard clock channel counting at a known frequency,
//! 3. a fixed fallback interval.
//!
//! Counter differences are taken modulo 2^32, so a counter that wrapped
//! between two events still yields the true number of counts.
//!
//! Normalization-scaler links are held by the owning [`ScalerBank`], which
//! also computes the rates of scalers whose time base lives in a peer.

pub mod bank;
pub mod variants;

pub use bank::{ScalerBank, ScalerId};

use crate::error::{AppResult, DecodeError};
use crate::limits::{check_crate, check_slot, DEFAULT_DELTA_T, DEFAULT_NUM_CHAN_MASK, MAX_SLOT};
use crate::module::{
    load_first_block, BitField, ChannelValue, DecodedBlock, Diagnostic, HeaderRule, Module,
    ModuleIdentity, OnceDiagnostics,
};
use crate::sink::SlotDataSink;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Number of counts between two readings, accounting for 32-bit wraparound.
#[inline]
pub const fn counter_diff(previous: u32, current: u32) -> u32 {
    current.wrapping_sub(previous)
}

// =============================================================================
// Clock configuration
// =============================================================================

fn default_delta_t() -> f64 {
    DEFAULT_DELTA_T
}

/// Clock wiring of a scaler as written in the crate map.
///
/// A `frequency` of 0 declares no clock; `delta_t` is then the only time base.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ClockSpec {
    /// Fallback interval between readings
    #[serde(default = "default_delta_t")]
    pub delta_t: f64,
    /// Channel counting the clock
    #[serde(default)]
    pub channel: u32,
    /// Clock frequency (counts per time unit)
    #[serde(default)]
    pub frequency: f64,
}

impl Default for ClockSpec {
    fn default() -> Self {
        Self {
            delta_t: DEFAULT_DELTA_T,
            channel: 0,
            frequency: 0.0,
        }
    }
}

/// Time base a scaler uses for its rates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockBinding {
    /// Fixed interval between readings.
    DeltaT(f64),
    /// Onboard clock channel.
    Clock {
        /// Clock channel
        channel: u32,
        /// Counts per time unit
        frequency: f64,
    },
    /// Time base of another scaler in the same bank.
    NormScaler(ScalerId),
}

/// Rejected clock declarations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockConfigError {
    /// Clock channel beyond the scaler's channel count.
    #[error("clock channel {channel} out of range (scaler has {num_chan} channels)")]
    ChannelOutOfRange {
        /// Requested channel
        channel: u32,
        /// Channel count of the scaler
        num_chan: usize,
    },
    /// A clock was declared on a scaler that normalizes to a peer.
    #[error("clock declared on a scaler that already uses a normalization scaler")]
    ConflictsWithNormScaler,
}

/// Outcome of [`GenScaler::set_clock`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ClockStatus {
    /// The onboard clock will be used.
    Clock,
    /// Only the fallback interval is usable.
    DeltaTOnly,
    /// Neither a clock nor a positive interval was given.
    Unconfigured,
    /// The declaration was rejected; the previous time base stays in effect.
    ConfigError(ClockConfigError),
}

// =============================================================================
// GenScaler
// =============================================================================

/// A generic scaler module.
#[derive(Debug, Clone)]
pub struct GenScaler {
    identity: ModuleIdentity,
    model: u32,
    name: &'static str,
    rule: HeaderRule,
    num_chan_field: BitField,
    bank: Option<u32>,
    num_chan: usize,
    declared: usize,
    words_expected: usize,
    counts: Vec<u32>,
    previous: Vec<u32>,
    rates: Vec<f64>,
    first_time: bool,
    decoded: bool,
    armed: bool,
    rates_pending: bool,
    delta_t: f64,
    clock: Option<ClockSpec>,
    norm: Option<ScalerId>,
    diagnostics: OnceDiagnostics,
}

impl GenScaler {
    /// Scaler with `num_chan` counters at `identity`.
    pub fn new(
        identity: ModuleIdentity,
        model: u32,
        name: &'static str,
        num_chan: usize,
    ) -> AppResult<Self> {
        check_crate(identity.crate_num)?;
        check_slot(identity.crate_num, identity.slot, MAX_SLOT)?;
        Ok(Self {
            identity,
            model,
            name,
            rule: HeaderRule::default(),
            num_chan_field: BitField::new(DEFAULT_NUM_CHAN_MASK, 0),
            bank: None,
            num_chan,
            declared: 0,
            words_expected: num_chan,
            counts: vec![0; num_chan],
            previous: vec![0; num_chan],
            rates: vec![0.0; num_chan],
            first_time: true,
            decoded: false,
            armed: false,
            rates_pending: false,
            delta_t: DEFAULT_DELTA_T,
            clock: None,
            norm: None,
            diagnostics: OnceDiagnostics::default(),
        })
    }

    /// Header field holding the channel count of the following block.
    pub fn set_num_chan_field(&mut self, field: BitField) {
        self.num_chan_field = field;
    }

    /// Switch to bank-structured readout: the header becomes `slot << 8`
    /// under mask `0xff00`.
    pub fn set_bank(&mut self, bank: u32) {
        self.bank = Some(bank);
        self.rule = HeaderRule::new(self.identity.slot << 8, 0xff00);
    }

    /// Readout bank, if bank-structured.
    pub fn bank(&self) -> Option<u32> {
        self.bank
    }

    /// Declare the time base.
    ///
    /// A positive `delta_t` replaces the fallback interval. A positive
    /// `clock_frequency` declares `clock_channel` as an onboard clock.
    pub fn set_clock(&mut self, delta_t: f64, clock_channel: u32, clock_frequency: f64) -> ClockStatus {
        if delta_t > 0.0 {
            self.delta_t = delta_t;
        } else {
            warn!(module = %self.identity, delta_t = self.delta_t, "Using default delta T");
        }

        if clock_frequency > 0.0 {
            if self.norm.is_some() {
                let err = ClockConfigError::ConflictsWithNormScaler;
                warn!(module = %self.identity, error = %err, "Clock ignored");
                return ClockStatus::ConfigError(err);
            }
            if clock_channel as usize >= self.num_chan {
                let err = ClockConfigError::ChannelOutOfRange {
                    channel: clock_channel,
                    num_chan: self.num_chan,
                };
                warn!(module = %self.identity, error = %err, "Clock ignored");
                return ClockStatus::ConfigError(err);
            }
            self.clock = Some(ClockSpec {
                delta_t: self.delta_t,
                channel: clock_channel,
                frequency: clock_frequency,
            });
            return ClockStatus::Clock;
        }

        self.clock = None;
        if delta_t > 0.0 {
            ClockStatus::DeltaTOnly
        } else {
            warn!(module = %self.identity, "No delta T nor clock frequency defined for scaler");
            ClockStatus::Unconfigured
        }
    }

    /// Declare the time base from a crate map entry.
    pub fn apply_clock(&mut self, spec: &ClockSpec) -> ClockStatus {
        self.set_clock(spec.delta_t, spec.channel, spec.frequency)
    }

    pub(crate) fn set_norm(&mut self, peer: Option<ScalerId>) {
        if peer.is_some() && self.clock.is_some() {
            warn!(
                module = %self.identity,
                "Loading normalization scaler on a scaler with a clock, normalization scaler wins"
            );
        }
        self.norm = peer;
    }

    /// Normalization scaler this scaler takes its time base from.
    pub fn norm_scaler(&self) -> Option<ScalerId> {
        self.norm
    }

    /// Active time base.
    pub fn binding(&self) -> ClockBinding {
        match (self.norm, self.clock) {
            (Some(peer), _) => ClockBinding::NormScaler(peer),
            (None, Some(clock)) => ClockBinding::Clock {
                channel: clock.channel,
                frequency: clock.frequency,
            },
            (None, None) => ClockBinding::DeltaT(self.delta_t),
        }
    }

    /// Time since the previous reading from this scaler's own clock or
    /// fallback interval. The normalization scaler is not consulted.
    ///
    /// The clock is used only when this scaler was decoded in the current
    /// event.
    pub fn local_time_since_prev(&self) -> f64 {
        match self.clock {
            Some(clock) if self.decoded && clock.frequency > 0.0 => {
                let chan = clock.channel as usize;
                match (self.counts.get(chan), self.previous.get(chan)) {
                    (Some(&now), Some(&prev)) => f64::from(counter_diff(prev, now)) / clock.frequency,
                    _ => self.fallback_delta_t(),
                }
            }
            _ => self.fallback_delta_t(),
        }
    }

    fn fallback_delta_t(&self) -> f64 {
        if self.delta_t > 0.0 {
            self.delta_t
        } else {
            0.0
        }
    }

    /// Time since the previous reading for a scaler without a normalization
    /// scaler. Scalers bound to a peer resolve through
    /// [`ScalerBank::time_since_prev`]; for them this returns `None`.
    pub fn time_since_prev(&self) -> Option<f64> {
        match self.norm {
            Some(_) => None,
            None => Some(self.local_time_since_prev()),
        }
    }

    /// Compute rates from the current and previous counts over `dt`.
    ///
    /// A zero (or non-finite) interval sets every rate to 0.
    pub fn load_rates(&mut self, dt: f64) {
        self.rates_pending = false;
        if dt == 0.0 || !dt.is_finite() {
            self.rates.fill(0.0);
            return;
        }
        for ((rate, &now), &prev) in self.rates.iter_mut().zip(&self.counts).zip(&self.previous) {
            *rate = f64::from(counter_diff(prev, now)) / dt;
        }
    }

    pub(crate) fn rates_pending(&self) -> bool {
        self.rates_pending
    }

    /// Count of a channel in the current event (0 when out of range).
    pub fn data(&self, chan: usize) -> u32 {
        self.counts.get(chan).copied().unwrap_or(0)
    }

    /// Count of a channel in the previous decoded event (0 when out of range).
    pub fn prev_data(&self, chan: usize) -> u32 {
        self.previous.get(chan).copied().unwrap_or(0)
    }

    /// Rate of a channel (0 when out of range or before two readings).
    pub fn rate(&self, chan: usize) -> f64 {
        self.rates.get(chan).copied().unwrap_or(0.0)
    }

    /// Whether the scaler was decoded in the current event.
    pub fn is_decoded(&self) -> bool {
        self.decoded
    }

    /// Whether no event has been decoded yet.
    pub fn is_first_time(&self) -> bool {
        self.first_time
    }

    /// Step over a second block of this scaler in an event that already
    /// decoded one. The first block's counts are kept.
    ///
    /// Returns the words the block spans within `block`.
    pub fn skip_duplicate(&mut self, block: &[u32]) -> usize {
        self.armed = false;
        if self.diagnostics.record(Diagnostic::DuplicateBlock) {
            warn!(module = %self.identity, "Scaler header seen twice in one event, keeping first block");
        }
        (self.words_expected + 1).min(block.len())
    }

    /// Multi-line dump of the configuration and the current/previous/rate
    /// triplet of every channel.
    pub fn debug_dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "{}", Module::describe(self));
        let _ = writeln!(out, "  time base {:?}", self.binding());
        let _ = writeln!(out, "  ----  data  ----  {}", self.num_chan);
        let _ = writeln!(out, "  data now  //  previous  //  rate");
        for chan in 0..self.num_chan {
            let _ = writeln!(
                out,
                "  0x{:08x}  0x{:08x}  {}",
                self.counts[chan], self.previous[chan], self.rates[chan]
            );
        }
        out
    }
}

impl Module for GenScaler {
    fn identity(&self) -> ModuleIdentity {
        self.identity
    }

    fn model(&self) -> u32 {
        self.model
    }

    fn name(&self) -> &str {
        self.name
    }

    fn header_rule(&self) -> HeaderRule {
        self.rule
    }

    fn set_header(&mut self, rule: HeaderRule) {
        self.rule = rule;
    }

    fn num_chan(&self) -> usize {
        self.num_chan
    }

    fn words_expected(&self) -> usize {
        self.words_expected
    }

    fn is_slot(&mut self, word: u32) -> bool {
        if !self.rule.matches(word) {
            return false;
        }
        self.declared = self.num_chan_field.extract(word) as usize;
        self.words_expected = match self.declared {
            0 => self.num_chan,
            n => n.min(self.num_chan),
        };
        self.armed = true;
        true
    }

    fn decode(&mut self, block: &[u32]) -> AppResult<DecodedBlock> {
        if !self.armed {
            return Err(DecodeError::NotArmed {
                crate_num: self.identity.crate_num,
                slot: self.identity.slot,
            });
        }
        self.armed = false;
        let nread = self.words_expected;

        if self.decoded {
            return Ok(DecodedBlock {
                words: self.skip_duplicate(block),
                values: Vec::new(),
            });
        }

        if block.len() < nread + 1 {
            if self.diagnostics.record(Diagnostic::Truncated) {
                warn!(
                    module = %self.identity,
                    needed = nread + 1,
                    available = block.len(),
                    "Scaler block truncated"
                );
            }
            return Err(DecodeError::Truncated {
                crate_num: self.identity.crate_num,
                slot: self.identity.slot,
                needed: nread + 1,
                available: block.len(),
            });
        }

        if self.declared == 0 {
            if self.diagnostics.record(Diagnostic::DefaultChannelCount) {
                warn!(module = %self.identity, nchan = self.num_chan, "Using default number of channels");
            }
        } else if self.declared > self.num_chan {
            if self.diagnostics.record(Diagnostic::WordCountClamped) {
                warn!(
                    module = %self.identity,
                    declared = self.declared,
                    max = self.num_chan,
                    "Scaler header declares too many channels, clamping"
                );
            }
        } else if self.declared != self.num_chan
            && self.declared != 16
            && self.diagnostics.record(Diagnostic::WordCountMismatch)
        {
            warn!(
                module = %self.identity,
                declared = self.declared,
                nchan = self.num_chan,
                "Inconsistent number of scaler channels"
            );
        }

        if self.first_time {
            self.first_time = false;
            self.counts[..nread].copy_from_slice(&block[1..=nread]);
            self.decoded = true;
        } else {
            self.previous.copy_from_slice(&self.counts);
            self.counts[..nread].copy_from_slice(&block[1..=nread]);
            self.decoded = true;
            if self.norm.is_some() {
                self.rates_pending = true;
            } else {
                let dt = self.local_time_since_prev();
                self.load_rates(dt);
            }
        }

        debug!(module = %self.identity, nchan = nread, "Decoded scaler block");
        let values = self.counts[..nread]
            .iter()
            .enumerate()
            .map(|(chan, &count)| ChannelValue {
                channel: chan as u32,
                value: count,
                raw: count,
            })
            .collect();
        Ok(DecodedBlock {
            words: nread + 1,
            values,
        })
    }

    /// Each call reads one event: per-event state is reset before the scan.
    fn load_slot(&mut self, sink: &mut dyn SlotDataSink, buffer: &[u32]) -> usize {
        self.clear();
        load_first_block(self, sink, buffer)
    }

    fn clear(&mut self) {
        self.decoded = false;
        self.armed = false;
        self.rates_pending = false;
    }

    fn diagnostics(&self) -> &OnceDiagnostics {
        &self.diagnostics
    }

    fn diagnostics_mut(&mut self) -> &mut OnceDiagnostics {
        &mut self.diagnostics
    }

    fn do_print(&self) {
        info!(module = %self.identity, "{}", self.describe());
        info!(
            module = %self.identity,
            num_chan_mask = format_args!("0x{:x}", self.num_chan_field.mask),
            num_chan_shift = self.num_chan_field.shift,
            words_expected = self.words_expected,
            time_base = ?self.binding(),
            "Scaler configuration"
        );
    }
}
