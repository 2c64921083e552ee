//! Crate map: which module sits in which crate and slot.
//!
//! The map is read from TOML. Integers may be written in hex:
//!
//! ```toml
//! [[crates]]
//! number = 1
//! kind = "scaler"
//!
//! [[crates.slots]]
//! slot = 0
//! model = 3801
//! header = 0xabc00000
//! mask = 0xffff0000
//! clock = { delta_t = 4.0, channel = 7, frequency = 1024.0 }
//!
//! [[crates.slots]]
//! slot = 1
//! model = 3801
//! header = 0xabc10000
//! mask = 0xffff0000
//! norm_scaler = { crate = 1, slot = 0 }
//! ```

use crate::error::{AppResult, ConfigError, DecodeError};
use crate::limits::{check_crate, check_slot, MAX_SLOT, MAX_SLOT_FASTBUS};
use crate::module::{HeaderRule, ModuleIdentity};
use crate::scaler::ClockSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Bus standard of a crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrateKind {
    /// Fastbus crate
    Fastbus,
    /// VME crate
    Vme,
    /// CAMAC crate
    Camac,
    /// Crate read out as scalers only
    Scaler,
}

impl CrateKind {
    /// Exclusive upper bound on slot numbers.
    pub fn max_slot(self) -> u32 {
        match self {
            CrateKind::Fastbus => MAX_SLOT_FASTBUS,
            _ => MAX_SLOT,
        }
    }
}

/// Reference to another slot, used for normalization scalers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotRef {
    /// Crate number
    #[serde(rename = "crate")]
    pub crate_num: u32,
    /// Slot number
    pub slot: u32,
}

impl From<SlotRef> for ModuleIdentity {
    fn from(r: SlotRef) -> Self {
        ModuleIdentity::new(r.crate_num, r.slot)
    }
}

/// One occupied slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotInfo {
    /// Slot number
    pub slot: u32,
    /// Hardware model number
    pub model: u32,
    /// Header pattern, overriding the model default
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<u32>,
    /// Header mask, `0xffffffff` when only `header` is given
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask: Option<u32>,
    /// Channels accepted by the slot's data store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nchan: Option<u32>,
    /// Data words per event accepted by the slot's data store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ndata: Option<u32>,
    /// Readout bank for bank-structured scalers
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank: Option<u32>,
    /// Scaler clock wiring
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clock: Option<ClockSpec>,
    /// Scaler providing this scaler's time base
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub norm_scaler: Option<SlotRef>,
}

impl SlotInfo {
    /// Minimal entry for `model` in `slot`.
    pub fn new(slot: u32, model: u32) -> Self {
        Self {
            slot,
            model,
            header: None,
            mask: None,
            nchan: None,
            ndata: None,
            bank: None,
            clock: None,
            norm_scaler: None,
        }
    }

    /// Header rule configured for this slot, if any.
    pub fn header_rule(&self) -> Option<HeaderRule> {
        match (self.header, self.mask) {
            (Some(header), mask) => Some(HeaderRule::new(header, mask.unwrap_or(u32::MAX))),
            (None, _) => None,
        }
    }
}

/// One crate and its slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrateInfo {
    /// Crate number
    pub number: u32,
    /// Bus standard
    pub kind: CrateKind,
    /// Occupied slots
    #[serde(default)]
    pub slots: Vec<SlotInfo>,
}

/// Complete crate map.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrateMap {
    /// Crates in the map
    #[serde(default)]
    pub crates: Vec<CrateInfo>,
}

impl CrateMap {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let map: CrateMap = toml::from_str(text)?;
        map.validate()?;
        Ok(map)
    }

    /// Check addressing bounds, duplicates and normalization targets.
    pub fn validate(&self) -> AppResult<()> {
        let mut crates = BTreeSet::new();
        for info in &self.crates {
            check_crate(info.number)?;
            if !crates.insert(info.number) {
                return Err(DecodeError::Configuration(format!(
                    "crate {} listed twice",
                    info.number
                )));
            }
            let mut slots = BTreeSet::new();
            for slot in &info.slots {
                check_slot(info.number, slot.slot, info.kind.max_slot())?;
                if !slots.insert(slot.slot) {
                    return Err(DecodeError::Configuration(format!(
                        "slot {} of crate {} listed twice",
                        slot.slot, info.number
                    )));
                }
            }
        }

        for info in &self.crates {
            for slot in &info.slots {
                let Some(target) = slot.norm_scaler else {
                    continue;
                };
                if target.crate_num == info.number && target.slot == slot.slot {
                    return Err(DecodeError::Configuration(format!(
                        "slot ({},{}) normalizes to itself",
                        info.number, slot.slot
                    )));
                }
                if self.slot(target.crate_num, target.slot).is_none() {
                    return Err(DecodeError::Configuration(format!(
                        "slot ({},{}) normalizes to empty slot ({},{})",
                        info.number, slot.slot, target.crate_num, target.slot
                    )));
                }
            }
        }
        Ok(())
    }

    /// Crate entry.
    pub fn crate_info(&self, crate_num: u32) -> Option<&CrateInfo> {
        self.crates.iter().find(|c| c.number == crate_num)
    }

    /// Slot entry.
    pub fn slot(&self, crate_num: u32, slot: u32) -> Option<&SlotInfo> {
        self.crate_info(crate_num)?.slots.iter().find(|s| s.slot == slot)
    }

    /// Model number in a slot.
    pub fn model(&self, crate_num: u32, slot: u32) -> Option<u32> {
        self.slot(crate_num, slot).map(|s| s.model)
    }

    /// Header pattern of a slot.
    pub fn header(&self, crate_num: u32, slot: u32) -> Option<u32> {
        self.slot(crate_num, slot)?.header
    }

    /// Header mask of a slot.
    pub fn mask(&self, crate_num: u32, slot: u32) -> Option<u32> {
        self.slot(crate_num, slot)?.header_rule().map(|r| r.mask)
    }

    /// Channel count of a slot's data store.
    pub fn nchan(&self, crate_num: u32, slot: u32) -> Option<u32> {
        self.slot(crate_num, slot)?.nchan
    }

    /// Crate numbers in ascending order.
    pub fn used_crates(&self) -> Vec<u32> {
        let mut crates: Vec<u32> = self.crates.iter().map(|c| c.number).collect();
        crates.sort_unstable();
        crates
    }

    /// Occupied slots of a crate in ascending order.
    pub fn used_slots(&self, crate_num: u32) -> Vec<u32> {
        let mut slots: Vec<u32> = self
            .crate_info(crate_num)
            .map(|c| c.slots.iter().map(|s| s.slot).collect())
            .unwrap_or_default();
        slots.sort_unstable();
        slots
    }

    fn is_kind(&self, crate_num: u32, kind: CrateKind) -> bool {
        self.crate_info(crate_num).is_some_and(|c| c.kind == kind)
    }

    /// Whether a crate is Fastbus.
    pub fn is_fastbus(&self, crate_num: u32) -> bool {
        self.is_kind(crate_num, CrateKind::Fastbus)
    }

    /// Whether a crate is VME.
    pub fn is_vme(&self, crate_num: u32) -> bool {
        self.is_kind(crate_num, CrateKind::Vme)
    }

    /// Whether a crate is CAMAC.
    pub fn is_camac(&self, crate_num: u32) -> bool {
        self.is_kind(crate_num, CrateKind::Camac)
    }

    /// Whether a crate holds scalers only.
    pub fn is_scaler_crate(&self, crate_num: u32) -> bool {
        self.is_kind(crate_num, CrateKind::Scaler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAP: &str = r#"
[[crates]]
number = 3
kind = "fastbus"
slots = [
    { slot = 5, model = 1881 },
    { slot = 2, model = 1877, nchan = 96 },
]

[[crates]]
number = 1
kind = "scaler"

[[crates.slots]]
slot = 0
model = 3801
header = 0xabc00000
mask = 0xffff0000
clock = { delta_t = 4.0, channel = 7, frequency = 1024.0 }

[[crates.slots]]
slot = 1
model = 560
header = 0xabc10000
mask = 0xffff0000
norm_scaler = { crate = 1, slot = 0 }
"#;

    #[test]
    fn parse_and_query() {
        let map = CrateMap::from_toml_str(MAP).unwrap();
        assert_eq!(map.used_crates(), vec![1, 3]);
        assert_eq!(map.used_slots(3), vec![2, 5]);
        assert!(map.is_fastbus(3));
        assert!(map.is_scaler_crate(1));
        assert!(!map.is_vme(1));
        assert_eq!(map.model(3, 5), Some(1881));
        assert_eq!(map.header(1, 0), Some(0xabc0_0000));
        assert_eq!(map.mask(1, 1), Some(0xffff_0000));
        assert_eq!(map.nchan(3, 2), Some(96));
        let clock = map.slot(1, 0).unwrap().clock.unwrap();
        assert_eq!(clock.channel, 7);
        assert_eq!(clock.frequency, 1024.0);
        assert_eq!(
            map.slot(1, 1).unwrap().norm_scaler,
            Some(SlotRef { crate_num: 1, slot: 0 })
        );
    }

    #[test]
    fn header_without_mask_matches_exactly() {
        let mut slot = SlotInfo::new(0, 560);
        slot.header = Some(0x1234);
        assert_eq!(slot.header_rule(), Some(HeaderRule::new(0x1234, u32::MAX)));
    }

    #[test]
    fn fastbus_slot_bound() {
        let text = "[[crates]]\nnumber = 0\nkind = \"fastbus\"\nslots = [{ slot = 26, model = 1881 }]\n";
        assert!(matches!(
            CrateMap::from_toml_str(text),
            Err(ConfigError::Validation(_))
        ));
        let text = text.replace("fastbus", "vme");
        assert!(CrateMap::from_toml_str(&text).is_ok());
    }

    #[test]
    fn duplicates_are_rejected() {
        let text = "[[crates]]\nnumber = 0\nkind = \"vme\"\nslots = [{ slot = 1, model = 775 }, { slot = 1, model = 775 }]\n";
        assert!(CrateMap::from_toml_str(text).is_err());
    }

    #[test]
    fn dangling_norm_scaler_is_rejected() {
        let text = "[[crates]]\nnumber = 0\nkind = \"scaler\"\nslots = [{ slot = 1, model = 560, norm_scaler = { crate = 0, slot = 4 } }]\n";
        let err = CrateMap::from_toml_str(text).unwrap_err();
        assert!(err.to_string().contains("empty slot (0,4)"));
    }

    #[test]
    fn malformed_toml() {
        assert!(matches!(
            CrateMap::from_toml_str("crates = 5"),
            Err(ConfigError::Toml(_))
        ));
    }
}
