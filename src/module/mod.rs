//! Front-end modules sitting in a slot of a crate.
//!
//! A [`Module`] recognizes the start of its own block in a raw stream of
//! 32-bit words ([`Module::is_slot`]), extracts channel/value pairs from the
//! block ([`Module::decode`]) and forwards them to a
//! [`SlotDataSink`] ([`Module::load_slot`]).
//!
//! # Families
//!
//! Module families differ only in bit arithmetic, so they are parameter
//! structs behind one trait rather than a class hierarchy:
//!
//! - [`vme::VmeModule`]: header identifies the slot, data words follow
//!   without per-word re-validation.
//! - [`fastbus::FastbusModule`]: geographic slot in bits 27-31 of every word,
//!   optional header carrying the word count.
//! - [`GenScaler`](crate::scaler::GenScaler): counting registers with rate
//!   computation.
//!
//! Vendor models ([`models`]) are pure parameter sets over these families.
//!
//! # Example
//!
//! ```rust
//! use daq_decode::module::{models, Module, ModuleIdentity};
//!
//! # fn main() -> daq_decode::AppResult<()> {
//! let mut adc = models::lecroy_1881(ModuleIdentity::new(1, 5))?;
//! // header (slot 5, 3 words incl. header), two data words
//! let buffer = [0x2800_0003, 0x2802_0064, 0x2804_00c8];
//! let mut hits: Vec<(u32, u32, u32)> = Vec::new();
//! assert_eq!(adc.load_slot(&mut hits, &buffer), 3);
//! assert_eq!(hits[0].0, 1);
//! assert_eq!(hits[0].1, 100);
//! # Ok(())
//! # }
//! ```

pub mod fastbus;
pub mod models;
pub mod vme;

use crate::error::AppResult;
use crate::sink::{SinkStatus, SlotDataSink};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, trace, warn};

pub use fastbus::{FastbusLayout, FastbusModule};
pub use vme::{VmeLayout, VmeModule};

// =============================================================================
// Addressing and bit layout
// =============================================================================

/// Physical address of a module: crate number and slot number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleIdentity {
    /// Crate (readout controller) number
    #[serde(rename = "crate")]
    pub crate_num: u32,
    /// Slot within the crate
    pub slot: u32,
}

impl ModuleIdentity {
    /// Create an identity.
    pub const fn new(crate_num: u32, slot: u32) -> Self {
        Self { crate_num, slot }
    }
}

impl fmt::Display for ModuleIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.crate_num, self.slot)
    }
}

/// Header recognition rule: `word` is a header iff `(word & mask) == header`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderRule {
    /// Expected bit pattern after masking
    pub header: u32,
    /// Bits that take part in the comparison
    pub mask: u32,
}

impl HeaderRule {
    /// Create a rule.
    pub const fn new(header: u32, mask: u32) -> Self {
        Self { header, mask }
    }

    /// Whether `word` carries this header.
    #[inline]
    pub const fn matches(&self, word: u32) -> bool {
        word & self.mask == self.header
    }
}

impl Default for HeaderRule {
    /// Matches only the all-zero word.
    fn default() -> Self {
        Self::new(0, u32::MAX)
    }
}

/// A masked and shifted field of a 32-bit word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitField {
    /// Bits of the field
    pub mask: u32,
    /// Right shift applied after masking
    pub shift: u32,
}

impl BitField {
    /// Create a field.
    pub const fn new(mask: u32, shift: u32) -> Self {
        Self { mask, shift }
    }

    /// Extract the field from `word`. A shift of 32 or more yields 0.
    #[inline]
    pub const fn extract(&self, word: u32) -> u32 {
        match (word & self.mask).checked_shr(self.shift) {
            Some(value) => value,
            None => 0,
        }
    }
}

// =============================================================================
// Decode results
// =============================================================================

/// One decoded channel word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelValue {
    /// Channel index within the module
    pub channel: u32,
    /// Data bits of the word
    pub value: u32,
    /// The full raw word
    pub raw: u32,
}

/// Result of decoding one module block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedBlock {
    /// Words consumed, header and trailer included
    pub words: usize,
    /// Decoded values in buffer order
    pub values: Vec<ChannelValue>,
}

// =============================================================================
// Rate-limited diagnostics
// =============================================================================

/// Categories of per-module diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Diagnostic {
    /// Header declared more words than the module can hold
    WordCountClamped,
    /// Header declared no channel count, configured count used instead
    DefaultChannelCount,
    /// Number of data words differs from the header's count
    WordCountMismatch,
    /// Block extends past the end of the buffer
    Truncated,
    /// Block could not be decoded and was skipped
    Malformed,
    /// Sink refused a value
    SinkRejected,
    /// Same module header seen twice in one event
    DuplicateBlock,
    /// Scaler time base could not be resolved
    TimeBase,
}

/// Occurrence counters that let a module log each category only once.
#[derive(Debug, Clone, Default)]
pub struct OnceDiagnostics {
    occurrences: HashMap<Diagnostic, u64>,
}

impl OnceDiagnostics {
    /// Count one occurrence. Returns `true` only for the first one of its
    /// category, i.e. when the caller should log.
    pub fn record(&mut self, diagnostic: Diagnostic) -> bool {
        let count = self.occurrences.entry(diagnostic).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Number of occurrences of a category so far.
    pub fn occurrences(&self, diagnostic: Diagnostic) -> u64 {
        self.occurrences.get(&diagnostic).copied().unwrap_or(0)
    }

    /// Whether any diagnostic was recorded.
    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}

// =============================================================================
// Module trait
// =============================================================================

/// A module that sits in a slot of a crate.
pub trait Module: fmt::Debug + Send {
    /// Crate and slot of this module.
    fn identity(&self) -> ModuleIdentity;

    /// Registered hardware model number.
    fn model(&self) -> u32;

    /// Class name of the model.
    fn name(&self) -> &str;

    /// Current header recognition rule.
    fn header_rule(&self) -> HeaderRule;

    /// Replace the header recognition rule (usually from the crate map).
    fn set_header(&mut self, rule: HeaderRule);

    /// Static maximum number of channels.
    fn num_chan(&self) -> usize;

    /// Data words expected in the block announced by the last matching header.
    fn words_expected(&self) -> usize;

    /// Test whether `word` starts this module's block.
    ///
    /// On a match this records the expected block size (for families that
    /// encode it in the header) and arms the module for one [`decode`].
    ///
    /// [`decode`]: Module::decode
    fn is_slot(&mut self, word: u32) -> bool;

    /// Decode the block starting at `block[0]`, the word that armed the module.
    fn decode(&mut self, block: &[u32]) -> AppResult<DecodedBlock>;

    /// Reset per-event state. Counter history is kept.
    fn clear(&mut self);

    /// Diagnostics recorded by this instance.
    fn diagnostics(&self) -> &OnceDiagnostics;

    /// Mutable access to the diagnostics.
    fn diagnostics_mut(&mut self) -> &mut OnceDiagnostics;

    /// Scan `buffer` for this module's header, decode the first block found
    /// and forward its values to `sink`.
    ///
    /// Returns the number of words from the start of `buffer` through the end
    /// of the block, or 0 when no word of `buffer` belongs to this module.
    fn load_slot(&mut self, sink: &mut dyn SlotDataSink, buffer: &[u32]) -> usize {
        load_first_block(self, sink, buffer)
    }

    /// One-line description of the module configuration.
    fn describe(&self) -> String {
        let rule = self.header_rule();
        format!(
            "{} model {} in {}  header 0x{:08x} mask 0x{:08x}  nchan {}",
            self.name(),
            self.model(),
            self.identity(),
            rule.header,
            rule.mask,
            self.num_chan()
        )
    }

    /// Log the module configuration.
    fn do_print(&self) {
        info!(module = %self.identity(), "{}", self.describe());
    }
}

/// Scan `buffer` for `module`'s header, decode the first block found and
/// forward its values to `sink`. Body of the default [`Module::load_slot`],
/// shared with implementations that override it.
pub fn load_first_block<M: Module + ?Sized>(
    module: &mut M,
    sink: &mut dyn SlotDataSink,
    buffer: &[u32],
) -> usize {
    let Some(offset) = buffer.iter().position(|&word| module.is_slot(word)) else {
        return 0;
    };

    match module.decode(&buffer[offset..]) {
        Ok(block) => {
            trace!(
                module = %module.identity(),
                words = block.words,
                values = block.values.len(),
                "Loaded slot"
            );
            for value in &block.values {
                if sink.load(value.channel, value.value, value.raw) != SinkStatus::Ok
                    && module.diagnostics_mut().record(Diagnostic::SinkRejected)
                {
                    debug!(
                        module = %module.identity(),
                        channel = value.channel,
                        "Sink rejected decoded value"
                    );
                }
            }
            offset + block.words
        }
        Err(err) => {
            if module.diagnostics_mut().record(Diagnostic::Malformed) {
                warn!(module = %module.identity(), error = %err, "Skipping undecodable block");
            }
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_rule_matching() {
        let rule = HeaderRule::new(0xabc0_0000, 0xffff_0000);
        assert!(rule.matches(0xabc0_0000));
        assert!(rule.matches(0xabc0_1234));
        assert!(!rule.matches(0xabc1_0000));
        assert!(!rule.matches(0));
    }

    #[test]
    fn default_rule_only_matches_zero() {
        let rule = HeaderRule::default();
        assert!(rule.matches(0));
        assert!(!rule.matches(1));
        assert!(!rule.matches(0x8000_0000));
    }

    #[test]
    fn bit_field_extract() {
        let field = BitField::new(0x007e_0000, 17);
        assert_eq!(field.extract(0x2806_0064), 3);
        assert_eq!(BitField::new(0xff, 0).extract(0xabc0_0010), 16);
    }

    #[test]
    fn bit_field_oversized_shift_is_zero() {
        assert_eq!(BitField::new(u32::MAX, 32).extract(u32::MAX), 0);
        assert_eq!(BitField::new(0xff, 40).extract(0xabc0_0010), 0);
        assert_eq!(BitField::new(0x8000_0000, 31).extract(u32::MAX), 1);
    }

    #[test]
    fn once_diagnostics_report_first_only() {
        let mut diag = OnceDiagnostics::default();
        assert!(diag.is_empty());
        assert!(diag.record(Diagnostic::WordCountClamped));
        assert!(!diag.record(Diagnostic::WordCountClamped));
        assert!(diag.record(Diagnostic::Truncated));
        assert_eq!(diag.occurrences(Diagnostic::WordCountClamped), 2);
        assert_eq!(diag.occurrences(Diagnostic::Malformed), 0);
    }
}
