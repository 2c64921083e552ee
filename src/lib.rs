//! # DAQ Decode Library
//!
//! This crate decodes raw event buffers from crate-based front-end
//! electronics (Fastbus and VME digitizers, multi-channel scalers) into
//! per-channel values. It recognizes which words of an unframed stream of
//! 32-bit words belong to which module, applies each model's bit layout,
//! and keeps scaler counters with wraparound-safe rates.
//!
//! ## Crate Structure
//!
//! - **`module`**: the `Module` trait, header rules, and the VME and Fastbus
//!   families with their vendor models.
//! - **`scaler`**: `GenScaler`, its clock bindings, the `ScalerBank` holding
//!   normalization links, and the scaler models.
//! - **`registry`**: model number to constructor table, lazily filled with
//!   the builtin models.
//! - **`sink`**: the `SlotDataSink` trait and the in-memory `SlotData` store.
//! - **`crate_map`**: which model sits in which crate and slot, from TOML.
//! - **`decoder`**: `CrateDecoder`, the driver that walks event buffers.
//! - **`config`**: Figment-based configuration (TOML file plus environment).
//! - **`telemetry`**: `tracing-subscriber` setup.
//! - **`error`**: `DecodeError`, `RegistryError` and `ConfigError`.
//! - **`limits`**: addressing bounds and defaults.
//!
//! ## Example
//!
//! ```rust
//! use daq_decode::crate_map::CrateMap;
//! use daq_decode::decoder::CrateDecoder;
//! use daq_decode::registry::ModuleTypeRegistry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let map = CrateMap::from_toml_str(r#"
//!     [[crates]]
//!     number = 5
//!     kind = "fastbus"
//!     slots = [{ slot = 5, model = 1881 }]
//! "#)?;
//! let mut decoder = CrateDecoder::from_crate_map(&map, ModuleTypeRegistry::global())?;
//! let summary = decoder.decode_crate(5, &[0x2800_0002, 0x2802_0064])?;
//! assert_eq!(summary.modules_matched, 1);
//! assert_eq!(decoder.slot_data(5, 5).and_then(|s| s.data(1, 0)), Some(100));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod crate_map;
pub mod decoder;
pub mod error;
pub mod limits;
pub mod module;
pub mod registry;
pub mod scaler;
pub mod sink;
pub mod telemetry;

pub use decoder::{CrateDecoder, DecodeSummary};
pub use error::{AppResult, ConfigError, DecodeError, RegistryError};
pub use module::{Module, ModuleIdentity};
pub use scaler::GenScaler;
