//! Fuzz target for the crate buffer walk.
//!
//! Tests:
//! - Arbitrary words never panic any module family
//! - Every decode consumes at most the buffer it was given
//! - Scaler rates stay finite

#![no_main]

use arbitrary::Arbitrary;
use daq_decode::crate_map::CrateMap;
use daq_decode::decoder::CrateDecoder;
use daq_decode::registry::ModuleTypeRegistry;
use libfuzzer_sys::fuzz_target;

const MAP: &str = r#"
[[crates]]
number = 1
kind = "scaler"
slots = [
    { slot = 0, model = 3801, header = 0xabc00000, mask = 0xffff0000, clock = { channel = 7, frequency = 1024.0 } },
    { slot = 1, model = 560, header = 0xabc10000, mask = 0xffff0000, norm_scaler = { crate = 1, slot = 0 } },
]

[[crates]]
number = 5
kind = "fastbus"
slots = [{ slot = 5, model = 1881 }, { slot = 10, model = 1877 }, { slot = 12, model = 1875 }]

[[crates]]
number = 7
kind = "vme"
slots = [{ slot = 6, model = 775 }]
"#;

/// Fuzz input: a sequence of events for one crate
#[derive(Debug, Arbitrary)]
struct DecodeInput {
    /// Selects the crate (scaler, Fastbus or VME)
    crate_selector: u8,
    /// Event buffers
    events: Vec<Vec<u32>>,
}

fuzz_target!(|input: DecodeInput| {
    let Ok(map) = CrateMap::from_toml_str(MAP) else {
        return;
    };
    let Ok(mut decoder) = CrateDecoder::from_crate_map(&map, ModuleTypeRegistry::global()) else {
        return;
    };
    let crate_num = [1, 5, 7][usize::from(input.crate_selector) % 3];

    for buffer in input.events.iter().take(64) {
        let Ok(summary) = decoder.decode_crate(crate_num, buffer) else {
            continue;
        };
        assert_eq!(summary.words, buffer.len());
        assert!(summary.unclaimed_words <= buffer.len());

        if crate_num == 1 {
            for slot in 0..2 {
                if let Some(scaler) = decoder.scaler(1, slot) {
                    for chan in 0..32 {
                        assert!(scaler.rate(chan).is_finite());
                    }
                }
            }
        }
    }
});
