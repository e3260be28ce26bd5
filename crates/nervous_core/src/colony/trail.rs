use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{NeuronId, TrailId};

/// A scored route between two points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PheromoneTrail {
    pub id: TrailId,
    pub path: Vec<NeuronId>,
    strength: f64,
    /// Smoothed delivery latency in milliseconds
    pub latency_ms: Option<f64>,
    pub reinforcements: u64,
    pub created_at: DateTime<Utc>,
    pub last_reinforced: Option<DateTime<Utc>>,
}

impl PheromoneTrail {
    pub(crate) fn new(id: TrailId, path: Vec<NeuronId>, strength: f64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            path,
            strength: strength.max(0.0),
            latency_ms: None,
            reinforcements: 0,
            created_at: now,
            last_reinforced: None,
        }
    }

    pub fn strength(&self) -> f64 {
        self.strength
    }

    pub fn origin(&self) -> Option<&NeuronId> {
        self.path.first()
    }

    pub fn destination(&self) -> Option<&NeuronId> {
        self.path.last()
    }

    /// True when the trail walks `from -> to` as consecutive nodes.
    pub fn crosses(&self, from: &NeuronId, to: &NeuronId) -> bool {
        self.path.windows(2).any(|w| &w[0] == from && &w[1] == to)
    }

    pub(crate) fn observe_latency(&mut self, latency_ms: f64, smoothing: f64) {
        self.latency_ms = Some(match self.latency_ms {
            Some(avg) => avg + smoothing * (latency_ms - avg),
            None => latency_ms,
        });
    }

    /// Closes `fraction` of the gap between the current strength and `cap`.
    /// Any fraction in (0, 1) raises a trail below the cap without reaching it.
    pub(crate) fn reinforce(&mut self, fraction: f64, cap: f64, now: DateTime<Utc>) {
        let gap = (cap - self.strength).max(0.0);
        self.strength = (self.strength + gap * fraction.clamp(0.0, 1.0)).min(cap);
        self.reinforcements += 1;
        self.last_reinforced = Some(now);
    }

    pub(crate) fn weaken(&mut self, factor: f64) {
        self.strength *= factor.clamp(0.0, 1.0);
    }

    pub(crate) fn evaporate(&mut self, rate: f64) {
        self.strength *= 1.0 - rate;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trail() -> PheromoneTrail {
        PheromoneTrail::new(
            TrailId(1),
            vec!["a".into(), "b".into(), "c".into()],
            0.5,
            Utc::now(),
        )
    }

    #[test]
    fn test_crosses_only_consecutive_nodes() {
        let t = trail();
        assert!(t.crosses(&"a".into(), &"b".into()));
        assert!(!t.crosses(&"a".into(), &"c".into()));
        assert!(!t.crosses(&"b".into(), &"a".into()));
    }

    #[test]
    fn test_latency_is_smoothed() {
        let mut t = trail();
        t.observe_latency(100.0, 0.5);
        t.observe_latency(50.0, 0.5);
        assert_eq!(t.latency_ms, Some(75.0));
    }

    #[test]
    fn test_reinforcement_approaches_cap() {
        let mut t = trail();
        let mut last = t.strength();
        for _ in 0..5 {
            t.reinforce(10.0 / 11.0, 5.0, Utc::now());
            assert!(t.strength() > last);
            assert!(t.strength() < 5.0);
            last = t.strength();
        }
        assert_eq!(t.reinforcements, 5);
    }

    #[test]
    fn test_reinforcement_never_lowers_trail_above_cap() {
        let mut t = PheromoneTrail::new(TrailId(2), vec!["a".into(), "b".into()], 8.0, Utc::now());
        t.reinforce(0.5, 5.0, Utc::now());
        assert_eq!(t.strength(), 8.0);
    }
}
