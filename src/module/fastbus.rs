//! Fastbus family modules.
//!
//! Every Fastbus word carries the geographic slot in bits 27-31, so the
//! header rule is derived from the slot number and a block ends at the first
//! word belonging to another slot. Models with a header word announce the
//! block length in it; the count includes the header itself.

use super::{
    BitField, ChannelValue, DecodedBlock, Diagnostic, HeaderRule, Module, ModuleIdentity,
    OnceDiagnostics,
};
use crate::error::{AppResult, DecodeError};
use crate::limits::{check_crate, check_slot, MAX_SLOT_FASTBUS};
use tracing::{debug, warn};

/// Geographic slot field common to all Fastbus words.
pub const SLOT_FIELD: BitField = BitField::new(0xf800_0000, 27);

/// Bit layout of a Fastbus module's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastbusLayout {
    /// Whether the block starts with a header word.
    pub has_header: bool,
    /// Header field holding the block length, header included.
    pub word_count: Option<BitField>,
    /// Channel field of a data word.
    pub channel: BitField,
    /// Data bits of a data word.
    pub data_mask: u32,
    /// Model-specific option bits (range, edge) of a data word.
    pub option: Option<BitField>,
}

/// A Fastbus module described by a [`FastbusLayout`].
#[derive(Debug, Clone)]
pub struct FastbusModule {
    identity: ModuleIdentity,
    model: u32,
    name: &'static str,
    rule: HeaderRule,
    layout: FastbusLayout,
    num_chan: usize,
    max_words: usize,
    declared: Option<usize>,
    words_expected: usize,
    armed: bool,
    diagnostics: OnceDiagnostics,
}

impl FastbusModule {
    /// Build a module at `identity`.
    ///
    /// `max_words` bounds the number of data words in one block.
    pub fn new(
        identity: ModuleIdentity,
        model: u32,
        name: &'static str,
        layout: FastbusLayout,
        num_chan: usize,
        max_words: usize,
    ) -> AppResult<Self> {
        check_crate(identity.crate_num)?;
        check_slot(identity.crate_num, identity.slot, MAX_SLOT_FASTBUS)?;
        Ok(Self {
            identity,
            model,
            name,
            rule: HeaderRule::new(identity.slot << SLOT_FIELD.shift, SLOT_FIELD.mask),
            layout,
            num_chan,
            max_words,
            declared: None,
            words_expected: 0,
            armed: false,
            diagnostics: OnceDiagnostics::default(),
        })
    }

    /// Bit layout of this module.
    pub fn layout(&self) -> &FastbusLayout {
        &self.layout
    }

    /// Option bits of a data word, for models that have them.
    pub fn option_bits(&self, word: u32) -> Option<u32> {
        self.layout.option.map(|field| field.extract(word))
    }

    /// Slot number encoded in any Fastbus word.
    pub fn slot_of(word: u32) -> u32 {
        SLOT_FIELD.extract(word)
    }
}

impl Module for FastbusModule {
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
        self.declared = match (self.layout.has_header, self.layout.word_count) {
            (true, Some(field)) => match field.extract(word) as usize {
                0 => None,
                n => Some(n.saturating_sub(1)),
            },
            _ => None,
        };
        self.words_expected = self.declared.map_or(self.max_words, |n| n.min(self.max_words));
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

        if let Some(declared) = self.declared {
            if declared > self.max_words && self.diagnostics.record(Diagnostic::WordCountClamped) {
                warn!(
                    module = %self.identity,
                    declared,
                    max = self.max_words,
                    "Header word count exceeds module capacity, clamping"
                );
            }
        }

        let start = usize::from(self.layout.has_header);
        let data = block.get(start..).unwrap_or_default();
        let values: Vec<ChannelValue> = data
            .iter()
            .take(self.words_expected)
            .take_while(|&&word| self.rule.matches(word))
            .map(|&word| ChannelValue {
                channel: self.layout.channel.extract(word),
                value: word & self.layout.data_mask,
                raw: word,
            })
            .collect();

        if let Some(declared) = self.declared {
            if values.len() != self.words_expected
                && self.diagnostics.record(Diagnostic::WordCountMismatch)
            {
                debug!(
                    module = %self.identity,
                    declared,
                    seen = values.len(),
                    "Fastbus word count differs from header"
                );
            }
        }

        let words = start + values.len();
        debug!(module = %self.identity, words, "Decoded Fastbus block");
        Ok(DecodedBlock { words, values })
    }

    fn clear(&mut self) {
        self.armed = false;
        self.declared = None;
        self.words_expected = 0;
    }

    fn diagnostics(&self) -> &OnceDiagnostics {
        &self.diagnostics
    }

    fn diagnostics_mut(&mut self) -> &mut OnceDiagnostics {
        &mut self.diagnostics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::models;

    #[test]
    fn header_rule_follows_slot() {
        let m = models::lecroy_1877(ModuleIdentity::new(3, 11)).unwrap();
        assert_eq!(m.header_rule(), HeaderRule::new(11 << 27, 0xf800_0000));
        assert_eq!(FastbusModule::slot_of(0x5800_1234), 11);
    }

    #[test]
    fn headered_block_stops_at_declared_count() {
        let mut m = models::lecroy_1881(ModuleIdentity::new(1, 5)).unwrap();
        // header announces 3 words (header + 2 data), a third data word follows
        let buffer = [0x2800_0003, 0x2802_0064, 0x2804_00c8, 0x2806_0001];
        assert!(m.is_slot(buffer[0]));
        assert_eq!(m.words_expected(), 2);
        let block = m.decode(&buffer).unwrap();
        assert_eq!(block.words, 3);
        assert_eq!(block.values[1].channel, 2);
        assert_eq!(block.values[1].value, 200);
    }

    #[test]
    fn block_ends_at_foreign_slot() {
        let mut m = models::lecroy_1881(ModuleIdentity::new(1, 5)).unwrap();
        // header announces 4 words but slot 6 data starts after one data word
        let buffer = [0x2800_0004, 0x2802_0064, 0x3000_0002, 0x3002_0005];
        assert!(m.is_slot(buffer[0]));
        let block = m.decode(&buffer).unwrap();
        assert_eq!(block.words, 2);
        assert_eq!(block.values.len(), 1);
        assert_eq!(m.diagnostics().occurrences(Diagnostic::WordCountMismatch), 1);
    }

    #[test]
    fn headerless_block_consumes_slot_run() {
        let mut m = models::lecroy_1875(ModuleIdentity::new(0, 2)).unwrap();
        let buffer = [0x1003_0010, 0x1005_0020, 0x1800_0000];
        assert!(m.is_slot(buffer[0]));
        let block = m.decode(&buffer).unwrap();
        assert_eq!(block.words, 2);
        assert_eq!(block.values[0].channel, 3);
        assert_eq!(block.values[0].value, 0x10);
        assert_eq!(block.values[1].channel, 5);
    }

    #[test]
    fn slot_limit_is_enforced() {
        assert!(matches!(
            models::lecroy_1881(ModuleIdentity::new(0, 26)),
            Err(DecodeError::SlotOutOfRange { slot: 26, max: 26, .. })
        ));
        assert!(matches!(
            models::lecroy_1881(ModuleIdentity::new(32, 1)),
            Err(DecodeError::CrateOutOfRange { crate_num: 32, .. })
        ));
    }
}
