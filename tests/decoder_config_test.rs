//! Decoding with the shipped configuration and sample events.

use daq_decode::config::DecoderConfig;
use daq_decode::decoder::CrateDecoder;
use daq_decode::registry::ModuleTypeRegistry;
use daq_decode::scaler::ClockBinding;
use daq_decode::ConfigError;
use std::path::PathBuf;

fn config_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("config").join(name)
}

fn decoder() -> CrateDecoder {
    let config = DecoderConfig::load_from(config_path("decoder.toml")).unwrap();
    CrateDecoder::from_crate_map(&config.crate_map, ModuleTypeRegistry::global()).unwrap()
}

/// Parse `crate: word word ...` lines, skipping comments.
fn sample_events() -> Vec<(u32, Vec<u32>)> {
    let text = std::fs::read_to_string(config_path("sample_events.txt")).unwrap();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(|line| {
            let (crate_num, words) = line.split_once(':').unwrap();
            let words = words
                .split_whitespace()
                .map(|w| u32::from_str_radix(w, 16).unwrap())
                .collect();
            (crate_num.trim().parse().unwrap(), words)
        })
        .collect()
}

#[test]
fn test_shipped_config_loads() {
    let config = DecoderConfig::load_from(config_path("decoder.toml")).unwrap();
    config.validate().unwrap();

    let map = &config.crate_map;
    assert_eq!(map.used_crates(), vec![1, 5, 7]);
    assert_eq!(map.used_slots(1), vec![0, 1, 2, 3]);
    assert!(map.is_scaler_crate(1));
    assert!(map.is_fastbus(5));
    assert!(map.is_vme(7));
    assert_eq!(map.model(5, 10), Some(1877));
    assert_eq!(map.slot(5, 10).and_then(|s| s.ndata), Some(2048));
}

#[test]
fn test_sample_events() {
    let mut decoder = decoder();
    let events = sample_events();
    assert_eq!(events.len(), 3);

    let (crate_num, buffer) = &events[0];
    let summary = decoder.decode_crate(*crate_num, buffer).unwrap();
    assert_eq!(summary.modules_matched, 2);
    assert_eq!(summary.unclaimed_words, 0);
    assert_eq!(decoder.slot_data(5, 5).unwrap().data(2, 0), Some(200));
    assert_eq!(decoder.slot_data(5, 6).unwrap().data(0, 0), Some(7));

    let (crate_num, buffer) = &events[1];
    let summary = decoder.decode_crate(*crate_num, buffer).unwrap();
    assert_eq!(summary.modules_matched, 1);
    assert_eq!(summary.unclaimed_words, 0);
    let tdc = decoder.slot_data(7, 6).unwrap();
    assert_eq!(tdc.data(3, 0), Some(0x123));
    assert_eq!(tdc.data(17, 0), Some(0x456));

    let (crate_num, buffer) = &events[2];
    let summary = decoder.decode_crate(*crate_num, buffer).unwrap();
    assert_eq!(summary.modules_matched, 2);
    assert_eq!(decoder.slot_data(5, 5).unwrap().data(1, 0), Some(0x65));
    assert_eq!(decoder.slot_data(5, 6).unwrap().num_raw(), 0);
    let headerless = decoder.slot_data(5, 12).unwrap();
    assert_eq!(headerless.data(0, 0), Some(1));
    assert_eq!(headerless.data(2, 0), Some(0x10));

    assert_eq!(decoder.events(), 3);
}

#[test]
fn test_scaler_crate_rates() {
    let mut decoder = decoder();
    for slot in 1..=3 {
        assert!(matches!(
            decoder.scaler(1, slot).unwrap().binding(),
            ClockBinding::NormScaler(_)
        ));
    }

    for event in 1..=2u32 {
        let mut buffer = vec![0xabc0_0020];
        let mut clocked = vec![0u32; 32];
        clocked[7] = 2048 * event;
        buffer.extend(&clocked);
        for (slot, nchan) in [(1u32, 32u32), (2, 32), (3, 16)] {
            buffer.push(0xabc0_0000 | (slot << 16) | nchan);
            buffer.extend(std::iter::repeat(100 * slot * event).take(nchan as usize));
        }
        let summary = decoder.decode_crate(1, &buffer).unwrap();
        assert_eq!(summary.modules_matched, 4);
        assert_eq!(summary.unclaimed_words, 0);
    }

    // 2048 clock counts at 1024 per unit
    for slot in 0..=3 {
        assert_eq!(decoder.time_since_prev(1, slot).unwrap(), 2.0);
    }
    assert_eq!(decoder.scaler(1, 1).unwrap().rate(0), 50.0);
    assert_eq!(decoder.scaler(1, 2).unwrap().rate(31), 100.0);
    assert_eq!(decoder.scaler(1, 3).unwrap().rate(15), 150.0);
    assert_eq!(decoder.scaler(1, 3).unwrap().prev_data(15), 300);
    assert_eq!(decoder.slot_data(1, 3).unwrap().data(15, 0), Some(600));
}

#[test]
fn test_missing_norm_peer_falls_back() {
    let config = DecoderConfig::from_toml_str(
        r#"
[[crate_map.crates]]
number = 1
kind = "scaler"
slots = [
    { slot = 0, model = 1151, header = 0xabc00000, mask = 0xffff0000, clock = { delta_t = 2.0 } },
    { slot = 1, model = 560, header = 0xabc10000, mask = 0xffff0000, norm_scaler = { crate = 5, slot = 5 } },
]

[[crate_map.crates]]
number = 5
kind = "fastbus"
slots = [{ slot = 5, model = 1881 }]
"#,
    )
    .unwrap();
    config.validate().unwrap();

    // the peer is an ADC: the link is dropped, the scaler keeps its own time base
    let decoder = CrateDecoder::from_crate_map(&config.crate_map, ModuleTypeRegistry::global()).unwrap();
    assert_eq!(decoder.scaler(1, 1).unwrap().norm_scaler(), None);
    assert_eq!(
        decoder.scaler(1, 0).unwrap().binding(),
        ClockBinding::DeltaT(2.0)
    );
}

#[test]
fn test_environment_overrides_file() {
    std::env::set_var("DAQ_DECODE_APPLICATION__LOG_LEVEL", "debug");
    let config = DecoderConfig::load_from(config_path("decoder.toml"));
    std::env::remove_var("DAQ_DECODE_APPLICATION__LOG_LEVEL");

    let config = config.unwrap();
    assert_eq!(config.application.log_level, "debug");
    assert_eq!(config.crate_map.used_crates(), vec![1, 5, 7]);
}

#[test]
fn test_invalid_crate_map_is_rejected() {
    let result = DecoderConfig::from_toml_str(
        r#"
[[crate_map.crates]]
number = 40
kind = "vme"
"#,
    )
    .and_then(|config| config.validate());
    assert!(matches!(result, Err(ConfigError::Validation(_))));
}
