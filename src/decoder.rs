//! Event buffer driver.
//!
//! [`CrateDecoder`] instantiates one module per occupied slot of a
//! [`CrateMap`] and walks raw crate buffers. At every position the first
//! module whose header matches the word loads its block into the slot's
//! [`SlotData`]; the walk then continues after the block. Words no module
//! claims are skipped and counted.

use crate::crate_map::CrateMap;
use crate::error::{AppResult, DecodeError};
use crate::limits::DEFAULT_SLOT_DATA;
use crate::module::{Module, ModuleIdentity};
use crate::registry::{ModuleInstance, ModuleTypeRegistry};
use crate::scaler::{ClockStatus, GenScaler, ScalerBank, ScalerId};
use crate::sink::SlotData;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info, instrument, trace, warn};

/// Outcome of decoding one crate buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeSummary {
    /// Words in the buffer
    pub words: usize,
    /// Module blocks loaded
    pub modules_matched: usize,
    /// Words skipped because no module claimed them
    pub unclaimed_words: usize,
}

#[derive(Debug)]
enum SlotModule {
    Generic(Box<dyn Module>),
    Scaler(ScalerId),
}

#[derive(Debug)]
struct SlotEntry {
    identity: ModuleIdentity,
    module: SlotModule,
    data: SlotData,
}

/// Decoder for all crates of a crate map.
#[derive(Debug)]
pub struct CrateDecoder {
    crates: BTreeMap<u32, Vec<SlotEntry>>,
    bank: ScalerBank,
    warned_unclaimed: BTreeSet<u32>,
    events: u64,
}

impl CrateDecoder {
    /// Build modules for every slot of `map`.
    ///
    /// Unknown models and out-of-range addresses are errors. Rejected clock
    /// declarations and normalization links are logged and left out.
    pub fn from_crate_map(map: &CrateMap, registry: &ModuleTypeRegistry) -> AppResult<Self> {
        map.validate()?;

        let mut crates: BTreeMap<u32, Vec<SlotEntry>> = BTreeMap::new();
        let mut bank = ScalerBank::new();

        for info in &map.crates {
            let entries = crates.entry(info.number).or_default();
            for slot in &info.slots {
                let identity = ModuleIdentity::new(info.number, slot.slot);
                let instance = registry.build(slot.model, identity)?;
                let num_chan = instance.as_module().num_chan() as u32;
                let module = match instance {
                    ModuleInstance::Generic(mut module) => {
                        if let Some(rule) = slot.header_rule() {
                            module.set_header(rule);
                        }
                        SlotModule::Generic(module)
                    }
                    ModuleInstance::Scaler(mut scaler) => {
                        if let Some(bank_num) = slot.bank {
                            scaler.set_bank(bank_num);
                        }
                        if let Some(rule) = slot.header_rule() {
                            scaler.set_header(rule);
                        }
                        if let Some(clock) = &slot.clock {
                            if let ClockStatus::ConfigError(err) = scaler.apply_clock(clock) {
                                warn!(module = %identity, error = %err, "Scaler clock not configured");
                            }
                        }
                        SlotModule::Scaler(bank.push(scaler))
                    }
                };
                let data = SlotData::with_capacity(
                    info.number,
                    slot.slot,
                    slot.nchan.unwrap_or(num_chan),
                    slot.ndata.unwrap_or(DEFAULT_SLOT_DATA),
                );
                debug!(module = %identity, model = slot.model, "Configured slot");
                entries.push(SlotEntry {
                    identity,
                    module,
                    data,
                });
            }
        }

        for info in &map.crates {
            for slot in &info.slots {
                let Some(target) = slot.norm_scaler else {
                    continue;
                };
                let identity = ModuleIdentity::new(info.number, slot.slot);
                let peer_identity = ModuleIdentity::from(target);
                let link = match (bank.find(identity), bank.find(peer_identity)) {
                    (Some(dependent), Some(peer)) => bank.load_norm_scaler(dependent, peer),
                    (None, _) => Err(DecodeError::NotAScaler {
                        crate_num: identity.crate_num,
                        slot: identity.slot,
                    }),
                    (_, None) => Err(DecodeError::NotAScaler {
                        crate_num: peer_identity.crate_num,
                        slot: peer_identity.slot,
                    }),
                };
                if let Err(err) = link {
                    warn!(module = %identity, error = %err, "Normalization scaler not linked");
                }
            }
        }

        info!(
            crates = crates.len(),
            slots = crates.values().map(Vec::len).sum::<usize>(),
            scalers = bank.len(),
            "Crate decoder ready"
        );
        Ok(Self {
            crates,
            bank,
            warned_unclaimed: BTreeSet::new(),
            events: 0,
        })
    }

    /// Decode one crate's buffer of the current event.
    ///
    /// Per-event state of the crate's modules is reset first. Scaler rates
    /// that depend on a normalization scaler are computed at the end, so the
    /// peer should live in the same crate or in a crate decoded earlier in
    /// the event.
    #[instrument(level = "trace", skip(self, buffer), fields(words = buffer.len()))]
    pub fn decode_crate(&mut self, crate_num: u32, buffer: &[u32]) -> AppResult<DecodeSummary> {
        let Self {
            crates,
            bank,
            warned_unclaimed,
            events,
        } = self;
        let entries = crates
            .get_mut(&crate_num)
            .ok_or(DecodeError::UnknownCrate(crate_num))?;

        for entry in entries.iter_mut() {
            entry.data.clear_event();
            match &mut entry.module {
                SlotModule::Generic(module) => module.clear(),
                SlotModule::Scaler(id) => {
                    if let Some(scaler) = bank.get_mut(*id) {
                        scaler.clear();
                    }
                }
            }
        }

        let mut summary = DecodeSummary {
            words: buffer.len(),
            ..DecodeSummary::default()
        };
        let mut pos = 0;
        while pos < buffer.len() {
            let word = buffer[pos];
            let mut consumed = 0;
            for entry in entries.iter_mut() {
                let block = &buffer[pos..];
                let matched = match &mut entry.module {
                    SlotModule::Generic(module) => {
                        let hit = module.is_slot(word);
                        if hit {
                            consumed = module.load_slot(&mut entry.data, block);
                        }
                        hit
                    }
                    SlotModule::Scaler(id) => {
                        let Some(scaler) = bank.get_mut(*id) else {
                            continue;
                        };
                        let hit = scaler.is_slot(word);
                        if hit {
                            // a scaler reads out once per event
                            consumed = if scaler.is_decoded() {
                                scaler.skip_duplicate(block)
                            } else {
                                scaler.load_slot(&mut entry.data, block)
                            };
                        }
                        hit
                    }
                };
                if matched {
                    trace!(module = %entry.identity, pos, consumed, "Header matched");
                    break;
                }
            }
            if consumed == 0 {
                summary.unclaimed_words += 1;
                pos += 1;
            } else {
                summary.modules_matched += 1;
                pos += consumed;
            }
        }

        bank.finish_event();
        *events += 1;

        if summary.unclaimed_words > 0 {
            if warned_unclaimed.insert(crate_num) {
                warn!(
                    crate_num,
                    unclaimed = summary.unclaimed_words,
                    "Words not claimed by any module, skipped"
                );
            } else {
                debug!(crate_num, unclaimed = summary.unclaimed_words, "Unclaimed words skipped");
            }
        }
        Ok(summary)
    }

    /// Slot data of the last decoded event.
    pub fn slot_data(&self, crate_num: u32, slot: u32) -> Option<&SlotData> {
        self.entry(crate_num, slot).map(|e| &e.data)
    }

    /// Scaler in a slot.
    pub fn scaler(&self, crate_num: u32, slot: u32) -> Option<&GenScaler> {
        match self.entry(crate_num, slot)?.module {
            SlotModule::Scaler(id) => self.bank.get(id),
            SlotModule::Generic(_) => None,
        }
    }

    /// Module in a slot.
    pub fn module(&self, crate_num: u32, slot: u32) -> Option<&dyn Module> {
        match &self.entry(crate_num, slot)?.module {
            SlotModule::Generic(module) => Some(module.as_ref()),
            SlotModule::Scaler(id) => self.bank.get(*id).map(|s| s as &dyn Module),
        }
    }

    /// All scalers.
    pub fn scaler_bank(&self) -> &ScalerBank {
        &self.bank
    }

    /// Resolved time since the previous reading of the scaler in a slot.
    pub fn time_since_prev(&self, crate_num: u32, slot: u32) -> AppResult<f64> {
        match self.entry(crate_num, slot).map(|e| &e.module) {
            Some(SlotModule::Scaler(id)) => self.bank.time_since_prev(*id),
            _ => Err(DecodeError::NotAScaler { crate_num, slot }),
        }
    }

    /// Configured slots in crate order.
    pub fn slots(&self) -> impl Iterator<Item = ModuleIdentity> + '_ {
        self.crates.values().flatten().map(|e| e.identity)
    }

    /// Configured crate numbers.
    pub fn crates(&self) -> impl Iterator<Item = u32> + '_ {
        self.crates.keys().copied()
    }

    /// Number of `decode_crate` calls so far.
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Log the configuration of every module.
    pub fn do_print(&self) {
        for identity in self.slots() {
            if let Some(module) = self.module(identity.crate_num, identity.slot) {
                module.do_print();
            }
        }
    }

    fn entry(&self, crate_num: u32, slot: u32) -> Option<&SlotEntry> {
        self.crates
            .get(&crate_num)?
            .iter()
            .find(|e| e.identity.slot == slot)
    }
}
