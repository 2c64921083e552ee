//! Vendor module models.
//!
//! Each model is a parameter set over a module family plus a registry
//! entry; none adds behavior of its own.

use super::{BitField, FastbusLayout, FastbusModule, HeaderRule, ModuleIdentity, VmeLayout, VmeModule};
use crate::error::AppResult;

// =============================================================================
// Model numbers
// =============================================================================

/// LeCroy 1881 charge ADC (Fastbus).
pub const LECROY_1881: u32 = 1881;
/// LeCroy 1877 multi-hit TDC (Fastbus).
pub const LECROY_1877: u32 = 1877;
/// LeCroy 1875 TDC (Fastbus, no header word).
pub const LECROY_1875: u32 = 1875;
/// CAEN V775 TDC (VME).
pub const CAEN_775: u32 = 775;

// =============================================================================
// LeCroy Fastbus
// =============================================================================

const LECROY_1881_LAYOUT: FastbusLayout = FastbusLayout {
    has_header: true,
    word_count: Some(BitField::new(0x7f, 0)),
    channel: BitField::new(0x007e_0000, 17),
    data_mask: 0x3fff,
    option: Some(BitField::new(0x0300_0000, 24)),
};

const LECROY_1877_LAYOUT: FastbusLayout = FastbusLayout {
    has_header: true,
    word_count: Some(BitField::new(0x7ff, 0)),
    channel: BitField::new(0x00fe_0000, 17),
    data_mask: 0xffff,
    option: Some(BitField::new(0x0001_0000, 16)),
};

const LECROY_1875_LAYOUT: FastbusLayout = FastbusLayout {
    has_header: false,
    word_count: None,
    channel: BitField::new(0x007f_0000, 16),
    data_mask: 0xfff,
    option: Some(BitField::new(0x0080_0000, 23)),
};

/// LeCroy 1881: 64 channels, one word per channel.
pub fn lecroy_1881(identity: ModuleIdentity) -> AppResult<FastbusModule> {
    FastbusModule::new(identity, LECROY_1881, "Lecroy1881Module", LECROY_1881_LAYOUT, 64, 64)
}

/// LeCroy 1877: 96 channels, up to 16 hits each.
pub fn lecroy_1877(identity: ModuleIdentity) -> AppResult<FastbusModule> {
    FastbusModule::new(identity, LECROY_1877, "Lecroy1877Module", LECROY_1877_LAYOUT, 96, 96 * 16)
}

/// LeCroy 1875: 64 channels, up to 8 hits each.
pub fn lecroy_1875(identity: ModuleIdentity) -> AppResult<FastbusModule> {
    FastbusModule::new(identity, LECROY_1875, "Lecroy1875Module", LECROY_1875_LAYOUT, 64, 64 * 8)
}

// =============================================================================
// CAEN VME
// =============================================================================

const CAEN_775_LAYOUT: VmeLayout = VmeLayout {
    word_count: Some(BitField::new(0x3f00, 8)),
    channel: Some(BitField::new(0x001f_0000, 16)),
    data_mask: 0xfff,
    leading_header: true,
    trailer_words: 1,
};

/// Header word type bits of a V775 block.
const CAEN_HEADER_TYPE: u32 = 0x0200_0000;

/// CAEN V775: 32 channels, header and end-of-block words around the data.
///
/// The default header rule expects the geographic address in bits 27-31 and
/// the header type code in bits 24-26.
pub fn caen_775(identity: ModuleIdentity) -> AppResult<VmeModule> {
    let module = VmeModule::new(identity, CAEN_775, "Caen775Module", CAEN_775_LAYOUT, 32)?;
    let rule = HeaderRule::new((identity.slot << 27) | CAEN_HEADER_TYPE, 0xff00_0000);
    Ok(module.with_header(rule))
}
