//! Topology Store: neurons (delivery endpoints) and synapses (weighted links).
//!
//! The store exclusively owns neuron and synapse records. Other subsystems
//! read it through [`TopologyView`] and refer to endpoints by [`NeuronId`]
//! only.

pub mod neuron;
pub mod repository;
pub mod synapse;

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::TopologyConfig;
use crate::error::{FabricError, FabricResult};
use crate::ids::NeuronId;
use crate::maintenance::{Healable, StageOutcome};
use crate::status::{NeuronCounts, SynapseCounts};

pub use neuron::{Neuron, NeuronStatus};
pub use repository::{InMemoryTopology, TopologyRepository};
pub use synapse::Synapse;

/// Synapses at or above this strength count as strong in the status snapshot.
const STRONG_SYNAPSE: f64 = 0.7;
/// Synapses below this strength count as weak.
const WEAK_SYNAPSE: f64 = 0.3;

/// Read-only view of the topology used by the routing subsystems.
pub trait TopologyView: Send + Sync {
    fn node_health(&self, id: &NeuronId) -> Option<f64>;

    /// Exists and is neither damaged nor healing.
    fn is_routable(&self, id: &NeuronId) -> bool;

    /// Functionally active outgoing links as `(target, strength)`.
    fn neighbors(&self, id: &NeuronId) -> Vec<(NeuronId, f64)>;
}

/// Result of firing a neuron.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FiringReport {
    /// `(target, activation delivered)` for every link the signal crossed
    pub propagated: Vec<(NeuronId, f64)>,
    /// Targets that crossed the activation threshold on this firing
    pub activated: Vec<NeuronId>,
}

pub struct Topology {
    repo: Arc<dyn TopologyRepository>,
    config: TopologyConfig,
    clock: Arc<dyn Clock>,
}

impl Topology {
    pub fn new(repo: Arc<dyn TopologyRepository>, config: TopologyConfig, clock: Arc<dyn Clock>) -> Self {
        Self { repo, config, clock }
    }

    pub fn config(&self) -> &TopologyConfig {
        &self.config
    }

    /// Create the neuron on first reference; existing neurons are returned unchanged.
    pub fn upsert_neuron(&self, id: impl Into<NeuronId>) -> Neuron {
        let id = id.into();
        self.repo.insert_neuron_if_absent(Neuron::new(id, self.clock.now()))
    }

    pub fn neuron(&self, id: &NeuronId) -> Option<Neuron> {
        self.repo.neuron(id)
    }

    pub fn neurons(&self) -> Vec<Neuron> {
        self.repo.neurons()
    }

    pub fn synapses(&self) -> Vec<Synapse> {
        self.repo.synapses()
    }

    /// Connect two existing neurons, or set the strength of an existing link.
    ///
    /// A link naming an unknown endpoint is skipped with a warning and
    /// `None` is returned; this is not an error.
    pub fn upsert_synapse(&self, from: &NeuronId, to: &NeuronId, strength: f64) -> Option<Synapse> {
        for endpoint in [from, to] {
            if self.repo.neuron(endpoint).is_none() {
                warn!(from = %from, to = %to, missing = %endpoint, "Synapse references unknown neuron, skipping");
                return None;
            }
        }
        let now = self.clock.now();
        let (synapse, created) = self.repo.get_or_insert_synapse(from, to, &mut |id| {
            Synapse::new(id, from.clone(), to.clone(), strength, now)
        });
        if created {
            debug!(synapse = %synapse.id, from = %from, to = %to, strength = synapse.strength(), "Synapse created");
            return Some(synapse);
        }
        self.repo
            .update_synapse(synapse.id, &mut |s| s.set_strength(strength))
    }

    /// Fire `id` with `signal` and propagate activation one hop.
    ///
    /// Each outgoing active synapse delivers `signal * strength` to its
    /// target and is reinforced by the traversal. Damaged or healing
    /// neurons absorb the firing without propagating.
    pub fn fire_neuron(&self, id: &NeuronId, signal: f64) -> FabricResult<FiringReport> {
        let now = self.clock.now();
        let source = self
            .repo
            .update_neuron(id, &mut |n| {
                if n.status().is_routable() {
                    n.mark_fired(now);
                }
            })
            .ok_or_else(|| FabricError::UnknownNeuron(id.clone()))?;

        let mut report = FiringReport::default();
        if !source.status().is_routable() {
            debug!(neuron = %id, status = ?source.status(), "Firing absorbed by unroutable neuron");
            return Ok(report);
        }

        let signal = signal.max(0.0);
        for synapse in self.repo.outgoing(id) {
            if !synapse.is_active(self.config.synapse_active_floor) {
                continue;
            }
            let amount = signal * synapse.strength();
            let mut activated = false;
            let delivered = self.repo.update_neuron(&synapse.to_id, &mut |target| {
                activated = target.receive(amount, self.config.activation_threshold, now);
            });
            if delivered.is_none() {
                warn!(synapse = %synapse.id, target = %synapse.to_id, "Synapse target vanished, skipping");
                continue;
            }
            self.repo.update_synapse(synapse.id, &mut |s| {
                s.traverse(self.config.synapse_reinforcement, now)
            });
            report.propagated.push((synapse.to_id.clone(), amount));
            if activated {
                info!(neuron = %synapse.to_id, from = %id, "Neuron activated by propagation");
                report.activated.push(synapse.to_id.clone());
            }
        }
        Ok(report)
    }

    /// Record whether a delivery to `id` was acknowledged.
    pub fn record_outcome(&self, id: &NeuronId, success: bool) -> FabricResult<NeuronStatus> {
        let now = self.clock.now();
        let mut damaged = false;
        let neuron = self
            .repo
            .update_neuron(id, &mut |n| {
                if success {
                    n.record_success(&self.config, now);
                } else {
                    damaged = n.record_failure(&self.config);
                }
            })
            .ok_or_else(|| FabricError::UnknownNeuron(id.clone()))?;
        if damaged {
            warn!(
                neuron = %id,
                failures = neuron.consecutive_failures,
                health = neuron.health(),
                "Neuron damaged after repeated unacknowledged deliveries"
            );
        }
        Ok(neuron.status())
    }

    /// `active -> inactive`. Neurons are never removed.
    pub fn deactivate_neuron(&self, id: &NeuronId) -> FabricResult<NeuronStatus> {
        self.repo
            .update_neuron(id, &mut |n| {
                n.deactivate();
            })
            .map(|n| n.status())
            .ok_or_else(|| FabricError::UnknownNeuron(id.clone()))
    }

    /// Mean neuron health as a fraction; 1.0 for an empty topology.
    pub fn health_ratio(&self) -> f64 {
        let neurons = self.repo.neurons();
        if neurons.is_empty() {
            return 1.0;
        }
        neurons.iter().map(|n| n.health()).sum::<f64>() / (neurons.len() as f64 * neuron::MAX_HEALTH)
    }

    pub fn neuron_counts(&self) -> NeuronCounts {
        let mut counts = NeuronCounts::default();
        for n in self.repo.neurons() {
            counts.total += 1;
            match n.status() {
                NeuronStatus::Active => counts.active += 1,
                NeuronStatus::Inactive => counts.inactive += 1,
                NeuronStatus::Damaged => counts.damaged += 1,
                NeuronStatus::Healing => counts.healing += 1,
            }
        }
        counts
    }

    pub fn synapse_counts(&self) -> SynapseCounts {
        let mut counts = SynapseCounts::default();
        for s in self.repo.synapses() {
            counts.total += 1;
            if s.is_active(self.config.synapse_active_floor) {
                counts.active += 1;
            }
            if s.strength() >= STRONG_SYNAPSE {
                counts.strong += 1;
            } else if s.strength() < WEAK_SYNAPSE {
                counts.weak += 1;
            }
        }
        counts
    }
}

impl TopologyView for Topology {
    fn node_health(&self, id: &NeuronId) -> Option<f64> {
        self.repo.neuron(id).map(|n| n.health())
    }

    fn is_routable(&self, id: &NeuronId) -> bool {
        self.repo
            .neuron(id)
            .map(|n| n.status().is_routable())
            .unwrap_or(false)
    }

    fn neighbors(&self, id: &NeuronId) -> Vec<(NeuronId, f64)> {
        self.repo
            .outgoing(id)
            .into_iter()
            .filter(|s| s.is_active(self.config.synapse_active_floor))
            .map(|s| (s.to_id.clone(), s.strength()))
            .collect()
    }
}

impl Healable for Topology {
    /// Neuron healing and state transitions, then synapse disuse decay.
    /// Each record is locked only for its own update.
    fn heal(&self) -> FabricResult<StageOutcome> {
        let now = self.clock.now();
        let mut outcome = StageOutcome::default();

        for id in self.repo.neuron_ids() {
            let before = self.repo.neuron(&id);
            let mut transition = None;
            let after = self
                .repo
                .update_neuron(&id, &mut |n| transition = n.heal(&self.config, now));
            if let Some(status) = transition {
                info!(neuron = %id, status = ?status, "Neuron status changed during healing");
            }
            if before != after {
                outcome.touched += 1;
            }
        }

        for id in self.repo.synapse_ids() {
            let mut changed = false;
            self.repo
                .update_synapse(id, &mut |s| changed = s.sweep(self.config.synapse_decay));
            if changed {
                outcome.touched += 1;
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn topology() -> Topology {
        Topology::new(
            Arc::new(InMemoryTopology::new()),
            TopologyConfig::default(),
            Arc::new(ManualClock::default()),
        )
    }

    #[test]
    fn test_synapse_to_unknown_neuron_is_skipped() {
        let topo = topology();
        topo.upsert_neuron("a");
        assert!(topo.upsert_synapse(&"a".into(), &"ghost".into(), 0.5).is_none());
        assert!(topo.synapses().is_empty());
    }

    #[test]
    fn test_upsert_synapse_updates_strength() {
        let topo = topology();
        topo.upsert_neuron("a");
        topo.upsert_neuron("b");
        let first = topo.upsert_synapse(&"a".into(), &"b".into(), 0.2).unwrap();
        let second = topo.upsert_synapse(&"a".into(), &"b".into(), 0.8).unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.strength(), 0.8);
        assert_eq!(topo.synapses().len(), 1);
    }

    #[test]
    fn test_fire_propagates_proportionally() {
        let topo = topology();
        for n in ["a", "b", "c"] {
            topo.upsert_neuron(n);
        }
        topo.upsert_synapse(&"a".into(), &"b".into(), 0.9);
        topo.upsert_synapse(&"a".into(), &"c".into(), 0.2);

        let report = topo.fire_neuron(&"a".into(), 1.0).unwrap();
        assert_eq!(report.propagated.len(), 2);
        assert_eq!(report.activated, vec![NeuronId::from("b")]);
        assert_eq!(topo.neuron(&"b".into()).unwrap().status(), NeuronStatus::Active);
        assert_eq!(topo.neuron(&"c".into()).unwrap().status(), NeuronStatus::Inactive);
        assert_eq!(topo.neuron(&"a".into()).unwrap().status(), NeuronStatus::Active);
    }

    #[test]
    fn test_fire_unknown_neuron_errors() {
        let topo = topology();
        assert!(matches!(
            topo.fire_neuron(&"nope".into(), 1.0),
            Err(FabricError::UnknownNeuron(_))
        ));
    }

    #[test]
    fn test_damaged_neuron_does_not_propagate() {
        let topo = topology();
        topo.upsert_neuron("a");
        topo.upsert_neuron("b");
        topo.upsert_synapse(&"a".into(), &"b".into(), 1.0);
        topo.fire_neuron(&"a".into(), 0.1).unwrap();
        for _ in 0..=topo.config().failure_bound {
            topo.record_outcome(&"a".into(), false).unwrap();
        }
        assert_eq!(topo.neuron(&"a".into()).unwrap().status(), NeuronStatus::Damaged);
        let report = topo.fire_neuron(&"a".into(), 1.0).unwrap();
        assert!(report.propagated.is_empty());
    }

    #[test]
    fn test_heal_moves_damaged_into_healing() {
        let topo = topology();
        topo.upsert_neuron("a");
        topo.fire_neuron(&"a".into(), 1.0).unwrap();
        for _ in 0..=topo.config().failure_bound {
            topo.record_outcome(&"a".into(), false).unwrap();
        }
        topo.heal().unwrap();
        assert_eq!(topo.neuron(&"a".into()).unwrap().status(), NeuronStatus::Healing);
        assert_eq!(topo.neuron_counts().healing, 1);
    }
}
