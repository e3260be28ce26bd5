use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NeuronId, SynapseId};

/// Clamp a strength into `[0, 1]`, treating NaN as severed.
pub fn clamp_strength(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weighted directed link between two neurons.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Synapse {
    pub id: SynapseId,
    pub from_id: NeuronId,
    pub to_id: NeuronId,
    strength: f64,
    pub traversals: u64,
    pub last_used: DateTime<Utc>,
    /// Set on traversal, cleared by the disuse sweep
    #[serde(skip)]
    pub(crate) used_since_sweep: bool,
}

impl Synapse {
    pub fn new(id: SynapseId, from_id: NeuronId, to_id: NeuronId, strength: f64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            from_id,
            to_id,
            strength: clamp_strength(strength),
            traversals: 0,
            last_used: now,
            used_since_sweep: true,
        }
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn set_strength(&mut self, value: f64) {
        self.strength = clamp_strength(value);
    }

    pub fn is_active(&self, floor: f64) -> bool {
        self.strength > floor
    }

    pub(crate) fn traverse(&mut self, reinforcement: f64, now: DateTime<Utc>) {
        self.traversals += 1;
        self.last_used = now;
        self.used_since_sweep = true;
        self.set_strength(self.strength + reinforcement);
    }

    /// Disuse decay. Returns true if the strength changed.
    pub(crate) fn sweep(&mut self, decay: f64) -> bool {
        if self.used_since_sweep {
            self.used_since_sweep = false;
            return false;
        }
        let before = self.strength;
        self.set_strength(self.strength * (1.0 - decay));
        self.strength != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strength_clamped() {
        let mut s = Synapse::new(SynapseId(1), "a".into(), "b".into(), 1.7, Utc::now());
        assert_eq!(s.strength(), 1.0);
        s.set_strength(-0.2);
        assert_eq!(s.strength(), 0.0);
    }

    #[test]
    fn test_unused_synapse_decays() {
        let mut s = Synapse::new(SynapseId(1), "a".into(), "b".into(), 0.8, Utc::now());
        // fresh synapses count as used for their first sweep
        assert!(!s.sweep(0.5));
        assert!(s.sweep(0.5));
        assert!((s.strength() - 0.4).abs() < 1e-9);
        s.traverse(0.05, Utc::now());
        assert!(!s.sweep(0.5));
    }
}
