//! Error types for the decoder.
//!
//! Using the `thiserror` crate, this module provides one error enum per concern:
//!
//! - **`DecodeError`**: contract violations, malformed data and configuration
//!   problems met while building or running modules. None of these abort the
//!   decoding of an event buffer; the driver logs them and moves on.
//! - **`RegistryError`**: rejected module-type registrations (duplicate model
//!   number, empty class name). Reported, never fatal to the program.
//! - **`ConfigError`**: configuration file loading and semantic validation.
//!
//! By using `#[from]`, `ConfigError` is created from the underlying parser
//! errors with the `?` operator.

use thiserror::Error;

/// Convenience alias for results using the decoder error type.
pub type AppResult<T> = std::result::Result<T, DecodeError>;

/// Errors raised while building modules or decoding their data.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DecodeError {
    /// `decode` was called without a preceding matching `is_slot`.
    #[error("Module ({crate_num},{slot}) asked to decode without a matching header")]
    NotArmed { crate_num: u32, slot: u32 },

    /// The block handed to `decode` ends before the declared data does.
    #[error("Module ({crate_num},{slot}) block truncated: need {needed} words, {available} available")]
    Truncated {
        crate_num: u32,
        slot: u32,
        needed: usize,
        available: usize,
    },

    /// Crate number beyond the addressable range.
    #[error("Crate {crate_num} out of bounds (max {max})")]
    CrateOutOfRange { crate_num: u32, max: u32 },

    /// Slot number beyond the range of its crate type.
    #[error("Slot {slot} in crate {crate_num} out of bounds (max {max})")]
    SlotOutOfRange { crate_num: u32, slot: u32, max: u32 },

    /// No module type is registered under this model number.
    #[error("No module type registered for model {model}")]
    UnknownModel { model: u32 },

    /// The decoder has no modules configured for this crate.
    #[error("Crate {0} is not present in the crate map")]
    UnknownCrate(u32),

    /// A scaler index that does not belong to the bank.
    #[error("Scaler index {0} is not part of this bank")]
    UnknownScaler(usize),

    /// A normalization-scaler reference points at a non-scaler slot.
    #[error("Slot ({crate_num},{slot}) is not a scaler")]
    NotAScaler { crate_num: u32, slot: u32 },

    /// A scaler was asked to take its time base from itself.
    #[error("Scaler {0} cannot normalize to itself")]
    SelfNormalization(usize),

    /// Following normalization-scaler links leads back to a visited scaler.
    #[error("Normalization scaler chain starting at scaler {start} is cyclic")]
    NormScalerCycle { start: usize },

    /// Semantic configuration problem.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

/// Errors raised by the module type registry.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Another class already owns this model number.
    #[error("Attempt to register duplicate module model {model} (\"{name}\", already \"{existing}\")")]
    DuplicateModel {
        model: u32,
        name: String,
        existing: String,
    },

    /// The descriptor carries no class name.
    #[error("Attempt to register empty class name for model {model}")]
    EmptyName { model: u32 },
}

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Layered configuration (file + environment) could not be extracted.
    #[error("Configuration error: {0}")]
    Figment(#[from] figment::Error),

    /// A crate map document is not valid TOML for the expected schema.
    #[error("Crate map parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Values parsed but are logically inconsistent.
    #[error("Configuration validation error: {0}")]
    Validation(String),

    /// File access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DecodeError> for ConfigError {
    fn from(err: DecodeError) -> Self {
        ConfigError::Validation(err.to_string())
    }
}
