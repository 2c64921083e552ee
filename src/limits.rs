//! Shared hard limits of the crate/slot addressing scheme and decoder defaults.
//!
//! This module centralizes:
//! - Addressing bounds (crates per run, slots per crate)
//! - Default sizes for per-slot hit storage
//! - Scaler time-base defaults
//!
//! Using centralized constants keeps the crate map validation, the module
//! constructors and the slot sinks consistent with each other.

use crate::error::{AppResult, DecodeError};

// =============================================================================
// Addressing
// =============================================================================

/// Number of readout controllers (crates) addressable in one run.
pub const MAX_CRATES: u32 = 32;

/// Slots in a Fastbus crate (geographic address is 5 bits, 0..26).
pub const MAX_SLOT_FASTBUS: u32 = 26;

/// Slots in a VME/CAMAC/scaler crate.
pub const MAX_SLOT: u32 = 27;

// =============================================================================
// Slot storage
// =============================================================================

/// Default number of channels a slot sink accepts.
pub const DEFAULT_SLOT_CHANNELS: u32 = 128;

/// Default number of data words a slot sink stores per event.
pub const DEFAULT_SLOT_DATA: u32 = 1024;

// =============================================================================
// Scalers
// =============================================================================

/// Fallback interval between scaler readings when no clock is available.
///
/// Expressed in the same unit the caller's clock frequencies imply
/// (seconds for frequencies in Hz).
pub const DEFAULT_DELTA_T: f64 = 4.0;

/// Default header mask bits holding a scaler's channel count.
pub const DEFAULT_NUM_CHAN_MASK: u32 = 0xff;

/// Upper bound on the number of normalization-scaler hops followed when
/// resolving a chained time base.
pub const MAX_NORM_CHAIN: usize = 16;

/// Validate a crate number against [`MAX_CRATES`].
pub fn check_crate(crate_num: u32) -> AppResult<()> {
    if crate_num >= MAX_CRATES {
        return Err(DecodeError::CrateOutOfRange {
            crate_num,
            max: MAX_CRATES,
        });
    }
    Ok(())
}

/// Validate a slot number against an exclusive upper bound.
pub fn check_slot(crate_num: u32, slot: u32, max: u32) -> AppResult<()> {
    if slot >= max {
        return Err(DecodeError::SlotOutOfRange {
            crate_num,
            slot,
            max,
        });
    }
    Ok(())
}
