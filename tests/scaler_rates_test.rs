//! Scaler counting, time bases and rate computation.

use daq_decode::module::{HeaderRule, Module, ModuleIdentity};
use daq_decode::scaler::{counter_diff, variants, ClockBinding, ClockStatus, GenScaler, ScalerBank};
use daq_decode::DecodeError;
use proptest::prelude::*;

const HEADER: u32 = 0xabc0_0000;

fn scaler_16() -> GenScaler {
    let mut scaler = variants::scaler_1151(ModuleIdentity::new(1, 0)).unwrap();
    scaler.set_header(HeaderRule::new(HEADER, 0xffff_0000));
    scaler
}

/// Run one event through `load_slot` and return the words consumed.
fn load_event(scaler: &mut GenScaler, header: u32, counts: &[u32]) -> usize {
    let mut buffer = vec![header | counts.len() as u32];
    buffer.extend_from_slice(counts);
    scaler.clear();
    let mut sink: Vec<(u32, u32, u32)> = Vec::new();
    scaler.load_slot(&mut sink, &buffer)
}

#[test]
fn test_clock_scaler_end_to_end() {
    let mut scaler = scaler_16();
    assert_eq!(scaler.set_clock(4.0, 7, 1024.0), ClockStatus::Clock);

    let mut counts = [0u32; 16];
    counts[7] = 1024;
    assert_eq!(load_event(&mut scaler, HEADER, &counts), 17);
    assert_eq!(scaler.rate(0), 0.0);
    assert_eq!(scaler.rate(7), 0.0);

    counts[7] = 2048;
    counts[0] = 500;
    assert_eq!(load_event(&mut scaler, HEADER, &counts), 17);
    assert_eq!(scaler.time_since_prev(), Some(1.0));
    assert_eq!(scaler.rate(0), 500.0);
    assert_eq!(scaler.data(0), 500);
    assert_eq!(scaler.prev_data(7), 1024);
}

#[test]
fn test_first_event_rates_are_zero() {
    let mut scaler = scaler_16();
    assert!(scaler.is_first_time());
    load_event(&mut scaler, HEADER, &[1_000_000; 16]);
    for chan in 0..16 {
        assert_eq!(scaler.rate(chan), 0.0);
    }
    assert!(!scaler.is_first_time());
}

#[test]
fn test_wraparound_rate() {
    let mut scaler = scaler_16();
    assert_eq!(scaler.set_clock(1.0, 0, 0.0), ClockStatus::DeltaTOnly);

    let mut counts = [0u32; 16];
    counts[2] = 4_294_967_290;
    load_event(&mut scaler, HEADER, &counts);
    counts[2] = 5;
    load_event(&mut scaler, HEADER, &counts);
    assert_eq!(scaler.rate(2), 11.0);
}

#[test]
fn test_zero_delta_t_gives_zero_rates() {
    let mut scaler = scaler_16();
    scaler.set_clock(4.0, 7, 1024.0);

    let mut counts = [0u32; 16];
    counts[7] = 5000;
    load_event(&mut scaler, HEADER, &counts);
    counts[0] = 999;
    load_event(&mut scaler, HEADER, &counts);

    assert_eq!(scaler.time_since_prev(), Some(0.0));
    for chan in 0..16 {
        assert_eq!(scaler.rate(chan), 0.0);
    }
}

#[test]
fn test_norm_scaler_takes_precedence() {
    let mut bank = ScalerBank::new();
    let clocked = {
        let mut s = variants::scaler_3801(ModuleIdentity::new(1, 0)).unwrap();
        s.set_header(HeaderRule::new(0xabc0_0000, 0xffff_0000));
        s.set_clock(4.0, 7, 1024.0);
        bank.push(s)
    };
    let dependent = {
        let mut s = variants::scaler_560(ModuleIdentity::new(1, 1)).unwrap();
        s.set_header(HeaderRule::new(0xabc1_0000, 0xffff_0000));
        // own clock would give 1000 / 100 = 10
        s.set_clock(4.0, 3, 100.0);
        bank.push(s)
    };
    bank.load_norm_scaler(dependent, clocked).unwrap();
    assert_eq!(
        bank.get(dependent).unwrap().binding(),
        ClockBinding::NormScaler(clocked)
    );

    for event in 1..=2u32 {
        bank.clear_event();
        let mut clock_counts = [0u32; 32];
        clock_counts[7] = 2048 * event;
        let s = bank.get_mut(clocked).unwrap();
        assert_eq!(load_event(s, 0xabc0_0000, &clock_counts), 33);

        let mut dep_counts = [0u32; 16];
        dep_counts[3] = 1000 * event;
        dep_counts[0] = 600 * event;
        let s = bank.get_mut(dependent).unwrap();
        assert_eq!(load_event(s, 0xabc1_0000, &dep_counts), 17);
        bank.finish_event();
    }

    assert_eq!(bank.time_since_prev(dependent).unwrap(), 2.0);
    assert_eq!(bank.get(dependent).unwrap().rate(0), 300.0);
    assert_eq!(bank.get(dependent).unwrap().rate(3), 500.0);
}

#[test]
fn test_successive_load_slot_calls_track_counts() {
    let mut scaler = scaler_16();
    let mut sink: Vec<(u32, u32, u32)> = Vec::new();
    for counts in [[0u32; 16], [400u32; 16]] {
        let mut buffer = vec![HEADER | 16];
        buffer.extend_from_slice(&counts);
        sink.clear();
        assert_eq!(scaler.load_slot(&mut sink, &buffer), 17);
        assert_eq!(sink.len(), 16);
    }
    assert!(scaler.is_decoded());
    assert_eq!(scaler.data(0), 400);
    assert_eq!(scaler.prev_data(0), 0);
    assert_eq!(scaler.rate(0), 100.0);
    assert_eq!(sink[15], (15, 400, 400));
}

#[test]
fn test_header_recognition_is_idempotent() {
    let mut scaler = scaler_16();
    let header = HEADER | 12;
    assert!(scaler.is_slot(header));
    let first = scaler.words_expected();
    assert!(scaler.is_slot(header));
    assert_eq!(scaler.words_expected(), first);
    assert_eq!(first, 12);

    let mut buffer = vec![header];
    buffer.extend(0..12);
    let block = scaler.decode(&buffer).unwrap();
    assert_eq!(block.words, 13);
    assert_eq!(block.values.len(), 12);
}

#[test]
fn test_mismatch_passes_through() {
    let mut scaler = scaler_16();
    let mut sink: Vec<(u32, u32, u32)> = Vec::new();
    assert_eq!(scaler.load_slot(&mut sink, &[0xabc1_0010, 1, 2, 3]), 0);
    assert_eq!(scaler.load_slot(&mut sink, &[]), 0);
    assert!(sink.is_empty());
    assert!(!scaler.is_decoded());
}

#[test]
fn test_header_found_after_offset() {
    let mut scaler = scaler_16();
    let buffer = [0x1111_1111, 0x2222_2222, HEADER | 2, 40, 50, 0x3333_3333];
    let mut sink: Vec<(u32, u32, u32)> = Vec::new();
    assert_eq!(scaler.load_slot(&mut sink, &buffer), 5);
    assert_eq!(sink, vec![(0, 40, 40), (1, 50, 50)]);
}

#[test]
fn test_decode_without_header() {
    let mut scaler = scaler_16();
    assert_eq!(
        scaler.decode(&[HEADER | 16]),
        Err(DecodeError::NotArmed { crate_num: 1, slot: 0 })
    );
}

#[test]
fn test_truncated_block_is_skipped() {
    let mut scaler = scaler_16();
    let mut sink: Vec<(u32, u32, u32)> = Vec::new();
    assert_eq!(scaler.load_slot(&mut sink, &[HEADER | 16, 1, 2, 3]), 0);
    assert!(sink.is_empty());
    assert!(scaler.is_first_time());
}

proptest! {
    #[test]
    fn prop_counter_diff_is_modular(previous in any::<u32>(), current in any::<u32>()) {
        let diff = counter_diff(previous, current);
        prop_assert_eq!(u64::from(diff), (u64::from(current) + (1u64 << 32) - u64::from(previous)) % (1u64 << 32));
    }

    #[test]
    fn prop_rate_uses_modular_difference(previous in any::<u32>(), current in any::<u32>()) {
        let mut scaler = scaler_16();
        scaler.set_clock(1.0, 0, 0.0);
        let mut counts = [0u32; 16];
        counts[5] = previous;
        load_event(&mut scaler, HEADER, &counts);
        counts[5] = current;
        load_event(&mut scaler, HEADER, &counts);
        prop_assert_eq!(scaler.rate(5), f64::from(current.wrapping_sub(previous)));
    }
}
