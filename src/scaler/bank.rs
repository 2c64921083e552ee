//! Caller-owned collection of scalers.
//!
//! Scalers refer to their normalization scaler by [`ScalerId`], an index
//! into the bank, never by reference. The bank validates links when they are
//! made and follows them, with a hop limit, when a time base is resolved.

use super::GenScaler;
use crate::error::{AppResult, DecodeError};
use crate::limits::MAX_NORM_CHAIN;
use crate::module::{Diagnostic, Module, ModuleIdentity};
use tracing::warn;

/// Index of a scaler in its [`ScalerBank`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScalerId(pub usize);

/// Scalers of one decoder, with their normalization links.
#[derive(Debug, Default)]
pub struct ScalerBank {
    scalers: Vec<GenScaler>,
}

impl ScalerBank {
    /// Empty bank.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a scaler and return its id.
    pub fn push(&mut self, scaler: GenScaler) -> ScalerId {
        self.scalers.push(scaler);
        ScalerId(self.scalers.len() - 1)
    }

    /// Number of scalers.
    pub fn len(&self) -> usize {
        self.scalers.len()
    }

    /// Whether the bank holds no scaler.
    pub fn is_empty(&self) -> bool {
        self.scalers.is_empty()
    }

    /// Scaler by id.
    pub fn get(&self, id: ScalerId) -> Option<&GenScaler> {
        self.scalers.get(id.0)
    }

    /// Mutable scaler by id.
    pub fn get_mut(&mut self, id: ScalerId) -> Option<&mut GenScaler> {
        self.scalers.get_mut(id.0)
    }

    /// Id of the scaler at `identity`.
    pub fn find(&self, identity: ModuleIdentity) -> Option<ScalerId> {
        self.scalers
            .iter()
            .position(|s| s.identity() == identity)
            .map(ScalerId)
    }

    /// All scalers with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (ScalerId, &GenScaler)> {
        self.scalers.iter().enumerate().map(|(i, s)| (ScalerId(i), s))
    }

    fn check(&self, id: ScalerId) -> AppResult<()> {
        if id.0 >= self.scalers.len() {
            return Err(DecodeError::UnknownScaler(id.0));
        }
        Ok(())
    }

    /// Make `dependent` take its time base from `peer`.
    ///
    /// Rejects unknown ids, self-normalization, and links that would close a
    /// cycle.
    pub fn load_norm_scaler(&mut self, dependent: ScalerId, peer: ScalerId) -> AppResult<()> {
        self.check(dependent)?;
        self.check(peer)?;
        if dependent == peer {
            return Err(DecodeError::SelfNormalization(dependent.0));
        }

        let mut hop = Some(peer);
        let mut hops = 0;
        while let Some(current) = hop {
            if current == dependent || hops > MAX_NORM_CHAIN {
                return Err(DecodeError::NormScalerCycle { start: dependent.0 });
            }
            hop = self.scalers.get(current.0).and_then(GenScaler::norm_scaler);
            hops += 1;
        }

        self.scalers[dependent.0].set_norm(Some(peer));
        Ok(())
    }

    /// Resolved time since the previous reading of scaler `id`, following
    /// normalization links to the scaler that owns the time base.
    pub fn time_since_prev(&self, id: ScalerId) -> AppResult<f64> {
        let mut current = id;
        let mut visited = Vec::with_capacity(4);
        loop {
            if visited.contains(&current) || visited.len() > MAX_NORM_CHAIN {
                return Err(DecodeError::NormScalerCycle { start: id.0 });
            }
            visited.push(current);
            let scaler = self
                .scalers
                .get(current.0)
                .ok_or(DecodeError::UnknownScaler(current.0))?;
            match scaler.norm_scaler() {
                Some(next) => current = next,
                None => return Ok(scaler.local_time_since_prev()),
            }
        }
    }

    /// Reset per-event state of every scaler.
    pub fn clear_event(&mut self) {
        for scaler in &mut self.scalers {
            scaler.clear();
        }
    }

    /// Compute the rates of scalers that normalize to a peer. Called once the
    /// whole event has been decoded, so that peers have their new counts.
    ///
    /// An unresolvable time base yields zero rates.
    pub fn finish_event(&mut self) {
        for index in 0..self.scalers.len() {
            if !self.scalers[index].rates_pending() {
                continue;
            }
            let dt = match self.time_since_prev(ScalerId(index)) {
                Ok(dt) => dt,
                Err(err) => {
                    let scaler = &mut self.scalers[index];
                    if scaler.diagnostics_mut().record(Diagnostic::TimeBase) {
                        warn!(module = %scaler.identity(), error = %err, "Cannot resolve time base, rates set to 0");
                    }
                    0.0
                }
            };
            self.scalers[index].load_rates(dt);
        }
    }
}
