//! VME family modules.
//!
//! The header word identifies the slot. Every word after it, up to the
//! expected count, belongs to the same module without re-validation. The
//! count comes either from a field of the header word or from the static
//! channel count of the model.

use super::{
    BitField, ChannelValue, DecodedBlock, Diagnostic, HeaderRule, Module, ModuleIdentity,
    OnceDiagnostics,
};
use crate::error::{AppResult, DecodeError};
use crate::limits::{check_crate, check_slot, MAX_SLOT};
use tracing::{debug, warn};

/// Bit layout of a VME module's block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmeLayout {
    /// Header field holding the number of data words. `None` means the
    /// block always carries `num_chan` data words.
    pub word_count: Option<BitField>,
    /// Channel field of a data word. `None` means the channel is the word's
    /// position in the block.
    pub channel: Option<BitField>,
    /// Data bits of a data word.
    pub data_mask: u32,
    /// Whether the matching word is a header (`true`) or already the first
    /// data word (`false`).
    pub leading_header: bool,
    /// End-of-block words following the data.
    pub trailer_words: usize,
}

/// A VME module described by a [`VmeLayout`].
#[derive(Debug, Clone)]
pub struct VmeModule {
    identity: ModuleIdentity,
    model: u32,
    name: &'static str,
    rule: HeaderRule,
    layout: VmeLayout,
    num_chan: usize,
    declared: usize,
    words_expected: usize,
    armed: bool,
    diagnostics: OnceDiagnostics,
}

impl VmeModule {
    /// Build a module at `identity`, validating the address.
    pub fn new(
        identity: ModuleIdentity,
        model: u32,
        name: &'static str,
        layout: VmeLayout,
        num_chan: usize,
    ) -> AppResult<Self> {
        check_crate(identity.crate_num)?;
        check_slot(identity.crate_num, identity.slot, MAX_SLOT)?;
        Ok(Self {
            identity,
            model,
            name,
            rule: HeaderRule::default(),
            layout,
            num_chan,
            declared: 0,
            words_expected: 0,
            armed: false,
            diagnostics: OnceDiagnostics::default(),
        })
    }

    /// Builder-style header rule.
    pub fn with_header(mut self, rule: HeaderRule) -> Self {
        self.rule = rule;
        self
    }

    /// Bit layout of this module.
    pub fn layout(&self) -> &VmeLayout {
        &self.layout
    }
}

impl Module for VmeModule {
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
        self.declared = match self.layout.word_count {
            Some(field) => field.extract(word) as usize,
            None => self.num_chan,
        };
        self.words_expected = self.declared.min(self.num_chan);
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

        if self.declared > self.num_chan && self.diagnostics.record(Diagnostic::WordCountClamped) {
            warn!(
                module = %self.identity,
                declared = self.declared,
                max = self.num_chan,
                "Header word count exceeds channel count, clamping"
            );
        }

        let start = usize::from(self.layout.leading_header);
        let data_end = start + self.words_expected;
        if block.len() < data_end {
            if self.diagnostics.record(Diagnostic::Truncated) {
                warn!(
                    module = %self.identity,
                    needed = data_end,
                    available = block.len(),
                    "Block truncated"
                );
            }
            return Err(DecodeError::Truncated {
                crate_num: self.identity.crate_num,
                slot: self.identity.slot,
                needed: data_end,
                available: block.len(),
            });
        }

        let values = block[start..data_end]
            .iter()
            .enumerate()
            .map(|(index, &word)| ChannelValue {
                channel: self
                    .layout
                    .channel
                    .map_or(index as u32, |field| field.extract(word)),
                value: word & self.layout.data_mask,
                raw: word,
            })
            .collect();

        let words = (data_end + self.layout.trailer_words).min(block.len());
        debug!(module = %self.identity, words, "Decoded VME block");
        Ok(DecodedBlock { words, values })
    }

    fn clear(&mut self) {
        self.armed = false;
        self.declared = 0;
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

    fn fixed_layout() -> VmeLayout {
        VmeLayout {
            word_count: None,
            channel: None,
            data_mask: 0x00ff_ffff,
            leading_header: true,
            trailer_words: 0,
        }
    }

    fn fixed(num_chan: usize) -> VmeModule {
        VmeModule::new(ModuleIdentity::new(2, 4), 9999, "TestVme", fixed_layout(), num_chan)
            .unwrap()
            .with_header(HeaderRule::new(0xdead_0000, 0xffff_0000))
    }

    #[test]
    fn decode_without_header_is_rejected() {
        let mut m = fixed(4);
        assert_eq!(
            m.decode(&[0xdead_0000, 1, 2, 3, 4]),
            Err(DecodeError::NotArmed { crate_num: 2, slot: 4 })
        );
    }

    #[test]
    fn fixed_count_uses_word_index_as_channel() {
        let mut m = fixed(3);
        assert!(m.is_slot(0xdead_0001));
        let block = m.decode(&[0xdead_0001, 10, 20, 30, 0xffff_ffff]).unwrap();
        assert_eq!(block.words, 4);
        let chans: Vec<u32> = block.values.iter().map(|v| v.channel).collect();
        assert_eq!(chans, vec![0, 1, 2]);
        assert_eq!(block.values[2].value, 30);
    }

    #[test]
    fn truncated_block_is_an_error() {
        let mut m = fixed(3);
        assert!(m.is_slot(0xdead_0000));
        assert!(matches!(
            m.decode(&[0xdead_0000, 1]),
            Err(DecodeError::Truncated { needed: 4, available: 2, .. })
        ));
        assert_eq!(m.diagnostics().occurrences(Diagnostic::Truncated), 1);
    }

    #[test]
    fn header_count_is_clamped() {
        let layout = VmeLayout {
            word_count: Some(BitField::new(0xff, 0)),
            ..fixed_layout()
        };
        let mut m = VmeModule::new(ModuleIdentity::new(0, 1), 1, "Clamp", layout, 2)
            .unwrap()
            .with_header(HeaderRule::new(0xbeef_0000, 0xffff_0000));
        assert!(m.is_slot(0xbeef_0009));
        assert_eq!(m.words_expected(), 2);
        let block = m.decode(&[0xbeef_0009, 5, 6, 7]).unwrap();
        assert_eq!(block.values.len(), 2);
        assert_eq!(m.diagnostics().occurrences(Diagnostic::WordCountClamped), 1);
    }

    #[test]
    fn slot_out_of_range_is_rejected() {
        assert!(matches!(
            VmeModule::new(ModuleIdentity::new(0, 27), 1, "X", fixed_layout(), 1),
            Err(DecodeError::SlotOutOfRange { slot: 27, .. })
        ));
    }
}
