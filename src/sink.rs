//! Slot data sinks.
//!
//! A module forwards every decoded channel value to a [`SlotDataSink`]. What
//! the sink does with it (publishing to analysis variables, writing a tree,
//! histogramming) is outside the decoder. [`SlotData`] is the in-memory sink
//! the [`CrateDecoder`](crate::decoder::CrateDecoder) keeps per crate/slot:
//! a flat list of hits with per-channel indices, cleared once per event.

use crate::limits::{DEFAULT_SLOT_CHANNELS, DEFAULT_SLOT_DATA};
use tracing::warn;

/// Result of handing one value to a sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    /// Value stored.
    Ok,
    /// Value ignored (channel out of bounds, storage full).
    Ignored,
}

/// Receiver of decoded (channel, value, raw word) triples.
pub trait SlotDataSink {
    /// Accept one decoded value. Called once per decoded channel word.
    fn load(&mut self, channel: u32, value: u32, raw: u32) -> SinkStatus;
}

impl SlotDataSink for Vec<(u32, u32, u32)> {
    fn load(&mut self, channel: u32, value: u32, raw: u32) -> SinkStatus {
        self.push((channel, value, raw));
        SinkStatus::Ok
    }
}

/// Per-event data of one slot of one crate.
///
/// Hits are kept in arrival order. Per-channel accessors index into that
/// list, so `data(chan, hit)` returns the `hit`-th value seen on `chan`.
#[derive(Debug, Clone)]
pub struct SlotData {
    crate_num: u32,
    slot: u32,
    nchan: u32,
    ndata: u32,
    raw: Vec<u32>,
    data: Vec<u32>,
    hits: Vec<Vec<usize>>,
    chan_list: Vec<u32>,
    warned_channel: bool,
    warned_full: bool,
}

impl SlotData {
    /// Sink sized with the default channel and data limits.
    pub fn new(crate_num: u32, slot: u32) -> Self {
        Self::with_capacity(crate_num, slot, DEFAULT_SLOT_CHANNELS, DEFAULT_SLOT_DATA)
    }

    /// Sink accepting `nchan` channels and up to `ndata` words per event.
    pub fn with_capacity(crate_num: u32, slot: u32, nchan: u32, ndata: u32) -> Self {
        Self {
            crate_num,
            slot,
            nchan,
            ndata,
            raw: Vec::with_capacity(ndata as usize),
            data: Vec::with_capacity(ndata as usize),
            hits: vec![Vec::new(); nchan as usize],
            chan_list: Vec::new(),
            warned_channel: false,
            warned_full: false,
        }
    }

    /// Crate number.
    pub fn crate_num(&self) -> u32 {
        self.crate_num
    }

    /// Slot number.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Maximum number of channels.
    pub fn nchan(&self) -> u32 {
        self.nchan
    }

    /// Number of words loaded this event.
    pub fn num_raw(&self) -> usize {
        self.raw.len()
    }

    /// Raw word of the `index`-th hit this event.
    pub fn raw_data(&self, index: usize) -> Option<u32> {
        self.raw.get(index).copied()
    }

    /// Number of hits on a channel.
    pub fn num_hits(&self, chan: u32) -> usize {
        self.hits.get(chan as usize).map_or(0, Vec::len)
    }

    /// Number of distinct channels hit this event.
    pub fn num_chan_hit(&self) -> usize {
        self.chan_list.len()
    }

    /// Channels hit this event, in order of first appearance.
    pub fn channels_hit(&self) -> &[u32] {
        &self.chan_list
    }

    /// Decoded value of the `hit`-th hit on `chan`.
    pub fn data(&self, chan: u32, hit: usize) -> Option<u32> {
        let index = *self.hits.get(chan as usize)?.get(hit)?;
        self.data.get(index).copied()
    }

    /// Raw word of the `hit`-th hit on `chan`.
    pub fn raw(&self, chan: u32, hit: usize) -> Option<u32> {
        let index = *self.hits.get(chan as usize)?.get(hit)?;
        self.raw.get(index).copied()
    }

    /// Reset hit counters. Called once per event before decoding.
    pub fn clear_event(&mut self) {
        for &chan in &self.chan_list {
            if let Some(list) = self.hits.get_mut(chan as usize) {
                list.clear();
            }
        }
        self.chan_list.clear();
        self.raw.clear();
        self.data.clear();
    }
}

impl SlotDataSink for SlotData {
    fn load(&mut self, channel: u32, value: u32, raw: u32) -> SinkStatus {
        if channel >= self.nchan {
            if !self.warned_channel {
                self.warned_channel = true;
                warn!(
                    crate_num = self.crate_num,
                    slot = self.slot,
                    channel,
                    nchan = self.nchan,
                    "Channel out of bounds, ignored"
                );
            }
            return SinkStatus::Ignored;
        }
        if self.raw.len() >= self.ndata as usize {
            if !self.warned_full {
                self.warned_full = true;
                warn!(
                    crate_num = self.crate_num,
                    slot = self.slot,
                    ndata = self.ndata,
                    "Too many data words for slot, ignored"
                );
            }
            return SinkStatus::Ignored;
        }

        let index = self.raw.len();
        self.raw.push(raw);
        self.data.push(value);
        let list = &mut self.hits[channel as usize];
        if list.is_empty() {
            self.chan_list.push(channel);
        }
        list.push(index);
        SinkStatus::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hits_are_indexed_per_channel() {
        let mut sd = SlotData::with_capacity(1, 4, 8, 16);
        assert_eq!(sd.load(3, 100, 0xa003_0064), SinkStatus::Ok);
        assert_eq!(sd.load(1, 7, 0xa001_0007), SinkStatus::Ok);
        assert_eq!(sd.load(3, 101, 0xa003_0065), SinkStatus::Ok);

        assert_eq!(sd.num_raw(), 3);
        assert_eq!(sd.num_chan_hit(), 2);
        assert_eq!(sd.channels_hit(), &[3, 1]);
        assert_eq!(sd.num_hits(3), 2);
        assert_eq!(sd.data(3, 0), Some(100));
        assert_eq!(sd.data(3, 1), Some(101));
        assert_eq!(sd.raw(1, 0), Some(0xa001_0007));
        assert_eq!(sd.data(1, 1), None);
    }

    #[test]
    fn out_of_range_channel_is_ignored() {
        let mut sd = SlotData::with_capacity(0, 0, 4, 16);
        assert_eq!(sd.load(4, 1, 1), SinkStatus::Ignored);
        assert_eq!(sd.num_raw(), 0);
        assert_eq!(sd.num_hits(4), 0);
    }

    #[test]
    fn full_slot_ignores_extra_words() {
        let mut sd = SlotData::with_capacity(0, 0, 4, 2);
        assert_eq!(sd.load(0, 1, 1), SinkStatus::Ok);
        assert_eq!(sd.load(0, 2, 2), SinkStatus::Ok);
        assert_eq!(sd.load(0, 3, 3), SinkStatus::Ignored);
        assert_eq!(sd.num_hits(0), 2);
    }

    #[test]
    fn clear_event_resets_hits() {
        let mut sd = SlotData::new(2, 5);
        sd.load(10, 1, 1);
        sd.load(11, 2, 2);
        sd.clear_event();
        assert_eq!(sd.num_raw(), 0);
        assert_eq!(sd.num_chan_hit(), 0);
        assert_eq!(sd.num_hits(10), 0);
        sd.load(11, 3, 3);
        assert_eq!(sd.data(11, 0), Some(3));
    }
}
