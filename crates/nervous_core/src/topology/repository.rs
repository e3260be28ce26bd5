//! Storage seam for neurons and synapses.
//!
//! Mutation goes through closures applied under a per-entity lock, so a
//! request-path update and a maintenance sweep never see a torn record and
//! never hold the whole map while they work.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::ids::{IdSequence, NeuronId, SynapseId};
use crate::topology::neuron::Neuron;
use crate::topology::synapse::Synapse;

pub trait TopologyRepository: Send + Sync {
    /// Insert `neuron` unless one with the same id exists; returns the stored record.
    fn insert_neuron_if_absent(&self, neuron: Neuron) -> Neuron;

    fn neuron(&self, id: &NeuronId) -> Option<Neuron>;

    fn neuron_ids(&self) -> Vec<NeuronId>;

    fn neurons(&self) -> Vec<Neuron>;

    /// Apply `update` atomically; returns the updated record.
    fn update_neuron(&self, id: &NeuronId, update: &mut dyn FnMut(&mut Neuron)) -> Option<Neuron>;

    /// Return the synapse `from -> to`, creating it with `create` if absent.
    /// The bool is true when a new synapse was created.
    fn get_or_insert_synapse(
        &self,
        from: &NeuronId,
        to: &NeuronId,
        create: &mut dyn FnMut(SynapseId) -> Synapse,
    ) -> (Synapse, bool);

    fn synapse(&self, id: SynapseId) -> Option<Synapse>;

    fn synapse_ids(&self) -> Vec<SynapseId>;

    fn synapses(&self) -> Vec<Synapse>;

    /// Synapses leaving `from`.
    fn outgoing(&self, from: &NeuronId) -> Vec<Synapse>;

    fn update_synapse(&self, id: SynapseId, update: &mut dyn FnMut(&mut Synapse)) -> Option<Synapse>;
}

type Slot<T> = Arc<Mutex<T>>;

/// Arena-backed repository living for the process lifetime.
#[derive(Default)]
pub struct InMemoryTopology {
    neurons: RwLock<HashMap<NeuronId, Slot<Neuron>>>,
    synapses: RwLock<BTreeMap<SynapseId, Slot<Synapse>>>,
    /// `from -> [(to, synapse)]`
    adjacency: RwLock<HashMap<NeuronId, Vec<(NeuronId, SynapseId)>>>,
    ids: IdSequence,
}

impl InMemoryTopology {
    pub fn new() -> Self {
        Self::default()
    }

    fn neuron_slot(&self, id: &NeuronId) -> Option<Slot<Neuron>> {
        self.neurons.read().get(id).cloned()
    }

    fn synapse_slot(&self, id: SynapseId) -> Option<Slot<Synapse>> {
        self.synapses.read().get(&id).cloned()
    }
}

impl TopologyRepository for InMemoryTopology {
    fn insert_neuron_if_absent(&self, neuron: Neuron) -> Neuron {
        let slot = {
            let mut neurons = self.neurons.write();
            neurons
                .entry(neuron.id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(neuron)))
                .clone()
        };
        let stored = slot.lock().clone();
        stored
    }

    fn neuron(&self, id: &NeuronId) -> Option<Neuron> {
        self.neuron_slot(id).map(|slot| slot.lock().clone())
    }

    fn neuron_ids(&self) -> Vec<NeuronId> {
        let mut ids: Vec<NeuronId> = self.neurons.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn neurons(&self) -> Vec<Neuron> {
        let slots: Vec<Slot<Neuron>> = self.neurons.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    fn update_neuron(&self, id: &NeuronId, update: &mut dyn FnMut(&mut Neuron)) -> Option<Neuron> {
        let slot = self.neuron_slot(id)?;
        let mut neuron = slot.lock();
        update(&mut neuron);
        Some(neuron.clone())
    }

    fn get_or_insert_synapse(
        &self,
        from: &NeuronId,
        to: &NeuronId,
        create: &mut dyn FnMut(SynapseId) -> Synapse,
    ) -> (Synapse, bool) {
        // Adjacency write lock serializes concurrent creation of the same edge.
        let mut adjacency = self.adjacency.write();
        let edges = adjacency.entry(from.clone()).or_default();
        if let Some((_, existing)) = edges.iter().find(|(target, _)| target == to) {
            if let Some(slot) = self.synapse_slot(*existing) {
                let synapse = slot.lock().clone();
                return (synapse, false);
            }
        }
        let id = SynapseId(self.ids.next());
        let synapse = create(id);
        edges.push((to.clone(), id));
        self.synapses
            .write()
            .insert(id, Arc::new(Mutex::new(synapse.clone())));
        (synapse, true)
    }

    fn synapse(&self, id: SynapseId) -> Option<Synapse> {
        self.synapse_slot(id).map(|slot| slot.lock().clone())
    }

    fn synapse_ids(&self) -> Vec<SynapseId> {
        self.synapses.read().keys().copied().collect()
    }

    fn synapses(&self) -> Vec<Synapse> {
        let slots: Vec<Slot<Synapse>> = self.synapses.read().values().cloned().collect();
        slots.iter().map(|slot| slot.lock().clone()).collect()
    }

    fn outgoing(&self, from: &NeuronId) -> Vec<Synapse> {
        let ids: Vec<SynapseId> = self
            .adjacency
            .read()
            .get(from)
            .map(|edges| edges.iter().map(|(_, id)| *id).collect())
            .unwrap_or_default();
        ids.into_iter().filter_map(|id| self.synapse(id)).collect()
    }

    fn update_synapse(&self, id: SynapseId, update: &mut dyn FnMut(&mut Synapse)) -> Option<Synapse> {
        let slot = self.synapse_slot(id)?;
        let mut synapse = slot.lock();
        update(&mut synapse);
        Some(synapse.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_insert_neuron_is_idempotent() {
        let repo = InMemoryTopology::new();
        let now = Utc::now();
        repo.insert_neuron_if_absent(Neuron::new("a".into(), now));
        repo.update_neuron(&"a".into(), &mut |n| n.set_health(42.0));
        let stored = repo.insert_neuron_if_absent(Neuron::new("a".into(), now));
        assert_eq!(stored.health(), 42.0);
        assert_eq!(repo.neurons().len(), 1);
    }

    #[test]
    fn test_synapse_created_once_per_edge() {
        let repo = InMemoryTopology::new();
        let now = Utc::now();
        let (from, to): (NeuronId, NeuronId) = ("a".into(), "b".into());
        let (first, created) = repo.get_or_insert_synapse(&from, &to, &mut |id| {
            Synapse::new(id, from.clone(), to.clone(), 0.4, now)
        });
        assert!(created);
        let (second, created) = repo.get_or_insert_synapse(&from, &to, &mut |id| {
            Synapse::new(id, from.clone(), to.clone(), 0.9, now)
        });
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert_eq!(repo.outgoing(&from).len(), 1);
        assert!(repo.outgoing(&to).is_empty());
    }
}
