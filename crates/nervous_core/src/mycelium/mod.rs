//! Mycelium Path Network: redundant multi-hop paths with healing.
//!
//! Hyphae are directed segments between topology points, grouped into named
//! mycelia (routing domains). Parallel hyphae with the same endpoints list
//! each other as alternatives. Path search prices each hypha by its health,
//! its in-flight load and the health of the neuron it leads to; severed
//! hyphae never take part.

pub mod hypha;
pub mod pending;
pub mod repository;
pub mod search;

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::MyceliumConfig;
use crate::error::{FabricError, FabricResult};
use crate::ids::{HyphaId, MyceliumId, NeuronId};
use crate::maintenance::{Healable, StageOutcome};
use crate::status::MyceliumCounts;
use crate::topology::TopologyView;

pub use hypha::{Hypha, Mycelium};
pub use pending::{PendingQueue, PendingRoute, RetrySweep};
pub use repository::{InMemoryRouting, RoutingRepository};

use hypha::HealStep;
use search::Score;

/// A chosen route through one mycelium.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PathPlan {
    pub mycelium: MyceliumId,
    pub hyphae: Vec<HyphaId>,
    pub cost: f64,
    pub cumulative_load: u64,
}

pub struct MyceliumNetwork {
    repo: Arc<dyn RoutingRepository>,
    topology: Arc<dyn TopologyView>,
    config: MyceliumConfig,
    clock: Arc<dyn Clock>,
    pending: PendingQueue,
    /// Serializes hypha creation so parallel siblings always see each other.
    growth: Mutex<()>,
}

impl MyceliumNetwork {
    pub fn new(
        repo: Arc<dyn RoutingRepository>,
        topology: Arc<dyn TopologyView>,
        config: MyceliumConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            repo,
            topology,
            config,
            clock,
            pending: PendingQueue::new(),
            growth: Mutex::new(()),
        }
    }

    pub fn config(&self) -> &MyceliumConfig {
        &self.config
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Grow a hypha `from -> to` in `mycelium`.
    ///
    /// Any live hypha in the same mycelium with the same endpoints becomes
    /// a mutual alternative. Recreating a severed route goes through here.
    pub fn create_hypha(
        &self,
        mycelium: impl Into<MyceliumId>,
        from: impl Into<NeuronId>,
        to: impl Into<NeuronId>,
        health: f64,
    ) -> FabricResult<Hypha> {
        let (mycelium, from, to) = (mycelium.into(), from.into(), to.into());
        let now = self.clock.now();
        let _growth = self.growth.lock();

        let siblings: Vec<HyphaId> = self
            .members(&mycelium)
            .into_iter()
            .filter(|h| !h.is_severed() && h.from_id == from && h.to_id == to)
            .map(|h| h.id)
            .collect();

        let mut hypha = self.repo.insert_hypha(
            &mut |id| Hypha::new(id, mycelium.clone(), from.clone(), to.clone(), health, now),
            now,
        );
        for sibling in &siblings {
            let mut linked = Ok(());
            self.repo
                .update_hypha(*sibling, &mut |h| linked = h.add_alternative(hypha.id))
                .ok_or(FabricError::UnknownHypha(*sibling))?;
            linked?;
        }
        if !siblings.is_empty() {
            let mut linked = Ok(());
            hypha = self
                .repo
                .update_hypha(hypha.id, &mut |h| {
                    linked = siblings.iter().try_for_each(|s| h.add_alternative(*s));
                })
                .ok_or(FabricError::UnknownHypha(hypha.id))?;
            linked?;
        }

        info!(
            hypha = %hypha.id,
            mycelium = %mycelium,
            from = %hypha.from_id,
            to = %hypha.to_id,
            health = hypha.health(),
            alternatives = siblings.len(),
            "Hypha grown"
        );
        Ok(hypha)
    }

    pub fn hypha(&self, id: HyphaId) -> Option<Hypha> {
        self.repo.hypha(id)
    }

    pub fn hyphae(&self) -> Vec<Hypha> {
        self.repo.hyphae()
    }

    pub fn mycelia(&self) -> Vec<Mycelium> {
        self.repo.mycelia()
    }

    fn members(&self, mycelium: &MyceliumId) -> Vec<Hypha> {
        let Some(m) = self.repo.mycelium(mycelium) else {
            return Vec::new();
        };
        m.hypha_ids
            .iter()
            .filter_map(|id| {
                let hypha = self.repo.hypha(*id);
                if hypha.is_none() {
                    warn!(mycelium = %mycelium, hypha = %id, "Mycelium references a missing hypha");
                }
                hypha
            })
            .collect()
    }

    /// Cost of crossing one hypha. Always at least 1, so shorter chains win
    /// among equally healthy ones.
    fn cost(&self, hypha: &Hypha) -> f64 {
        let missing_health = (hypha::MAX_HEALTH - hypha.health()) / hypha::MAX_HEALTH;
        let node_penalty = self
            .topology
            .node_health(&hypha.to_id)
            .map(|h| (100.0 - h) / 100.0 * self.config.node_weight)
            .unwrap_or(0.0);
        1.0 + missing_health * self.config.health_weight
            + hypha.load as f64 * self.config.load_weight
            + node_penalty
    }

    fn search(&self, from: &NeuronId, to: &NeuronId, usable: impl Fn(&Hypha) -> bool) -> Option<PathPlan> {
        let mut best: Option<(PathPlan, Score)> = None;
        for mycelium in self.repo.mycelia() {
            let candidates: Vec<Hypha> = self
                .members(&mycelium.id)
                .into_iter()
                .filter(|h| !h.is_severed() && usable(h))
                .collect();
            let Some((hyphae, score)) = search::cheapest_path(&candidates, from, to, |h| self.cost(h)) else {
                continue;
            };
            let better = best
                .as_ref()
                .map_or(true, |(_, b)| score.cmp(b) == std::cmp::Ordering::Less);
            if better {
                let plan = PathPlan {
                    mycelium: mycelium.id.clone(),
                    hyphae,
                    cost: score.cost,
                    cumulative_load: score.load,
                };
                best = Some((plan, score));
            }
        }
        best.map(|(plan, _)| plan)
    }

    /// Cheapest health- and load-weighted route `from -> to` across all mycelia.
    pub fn find_optimal_path(&self, from: &NeuronId, to: &NeuronId) -> Option<PathPlan> {
        let plan = self.search(from, to, |_| true);
        debug!(from = %from, to = %to, found = plan.is_some(), "Optimal path search");
        plan
    }

    /// Re-search without the `excluding` hyphae.
    ///
    /// Damaged hyphae are avoided when any route of healthy ones exists;
    /// otherwise the best remaining route is returned regardless of damage.
    pub fn find_alternative_path(
        &self,
        from: &NeuronId,
        to: &NeuronId,
        excluding: &[HyphaId],
    ) -> Option<PathPlan> {
        let excluded: HashSet<HyphaId> = excluding.iter().copied().collect();
        let threshold = self.config.damage_threshold;
        let plan = self
            .search(from, to, |h| !excluded.contains(&h.id) && !h.is_damaged(threshold))
            .or_else(|| self.search(from, to, |h| !excluded.contains(&h.id)));
        debug!(
            from = %from,
            to = %to,
            excluded = excluding.len(),
            found = plan.is_some(),
            "Alternative path search"
        );
        plan
    }

    /// Adjust in-flight load: `+1` on dispatch, `-1` on completion or timeout.
    pub fn update_hypha_load(&self, id: HyphaId, delta: i64) -> FabricResult<u64> {
        self.repo
            .update_hypha(id, &mut |h| h.apply_load(delta))
            .map(|h| h.load)
            .ok_or(FabricError::UnknownHypha(id))
    }

    /// Apply `delta` to every hypha of a plan.
    pub fn update_path_load(&self, plan: &PathPlan, delta: i64) -> FabricResult<()> {
        plan.hyphae
            .iter()
            .try_for_each(|id| self.update_hypha_load(*id, delta).map(|_| ()))
    }

    pub fn set_hypha_health(&self, id: HyphaId, health: f64) -> FabricResult<Hypha> {
        self.repo
            .update_hypha(id, &mut |h| h.set_health(health))
            .ok_or(FabricError::UnknownHypha(id))
    }

    /// A delivery through the hypha failed.
    pub fn record_hypha_failure(&self, id: HyphaId) -> FabricResult<Hypha> {
        let hypha = self
            .repo
            .update_hypha(id, &mut |h| h.set_health(h.health() - self.config.failure_penalty))
            .ok_or(FabricError::UnknownHypha(id))?;
        if hypha.is_damaged(self.config.damage_threshold) {
            warn!(hypha = %id, health = hypha.health(), "Hypha damaged by delivery failure");
        }
        Ok(hypha)
    }

    /// Damaged hyphae regain `recovery_rate` per call; dead ones are counted
    /// down to severance instead.
    pub fn heal_hyphae(&self) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        for id in self.repo.hypha_ids() {
            let mut step = HealStep::Untouched;
            let mut corrupt = false;
            self.repo.update_hypha(id, &mut |h| {
                if !h.health().is_finite() {
                    corrupt = true;
                    return;
                }
                step = h.heal(&self.config);
            });
            if corrupt {
                outcome.errors.push(format!("{}: health is not finite", id));
                continue;
            }
            match step {
                HealStep::Untouched => {}
                HealStep::Regrew | HealStep::Withering => outcome.touched += 1,
                HealStep::Severed => {
                    warn!(hypha = %id, "Hypha severed after persistent zero health");
                    outcome.removed += 1;
                }
            }
        }
        outcome
    }

    /// Mean hypha health as a fraction; 1.0 with no hyphae.
    pub fn health_ratio(&self) -> f64 {
        let hyphae = self.repo.hyphae();
        if hyphae.is_empty() {
            return 1.0;
        }
        hyphae.iter().map(|h| h.health()).sum::<f64>() / (hyphae.len() as f64 * hypha::MAX_HEALTH)
    }

    pub fn counts(&self) -> MyceliumCounts {
        let hyphae = self.repo.hyphae();
        let live: HashSet<HyphaId> = hyphae.iter().filter(|h| !h.is_severed()).map(|h| h.id).collect();
        MyceliumCounts {
            networks: self.repo.mycelia().len(),
            total_hyphae: hyphae.len(),
            healthy_paths: hyphae
                .iter()
                .filter(|h| !h.is_severed() && !h.is_damaged(self.config.damage_threshold))
                .count(),
            alternative_paths: hyphae
                .iter()
                .filter(|h| !h.is_severed() && h.alternative_paths().iter().any(|a| live.contains(a)))
                .count(),
            pending_routes: self.pending.len(),
            severed_hyphae: hyphae.len() - live.len(),
        }
    }
}

impl Healable for MyceliumNetwork {
    fn heal(&self) -> FabricResult<StageOutcome> {
        Ok(self.heal_hyphae())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TopologyConfig;
    use crate::topology::{InMemoryTopology, Topology};

    fn network() -> (MyceliumNetwork, Arc<Topology>) {
        let clock = Arc::new(ManualClock::default());
        let topology = Arc::new(Topology::new(
            Arc::new(InMemoryTopology::new()),
            TopologyConfig::default(),
            clock.clone(),
        ));
        let network = MyceliumNetwork::new(
            Arc::new(InMemoryRouting::new()),
            topology.clone(),
            MyceliumConfig::default(),
            clock,
        );
        (network, topology)
    }

    #[test]
    fn test_parallel_hyphae_are_alternatives() {
        let (net, _) = network();
        let h1 = net.create_hypha("core", "a", "b", 90.0).unwrap();
        let h2 = net.create_hypha("core", "a", "b", 40.0).unwrap();
        assert_eq!(h2.alternative_paths(), &[h1.id]);
        assert_eq!(net.hypha(h1.id).unwrap().alternative_paths(), &[h2.id]);
        assert_eq!(net.counts().alternative_paths, 2);
    }

    #[test]
    fn test_optimal_prefers_health() {
        let (net, _) = network();
        let h1 = net.create_hypha("core", "a", "b", 90.0).unwrap();
        net.create_hypha("core", "a", "b", 40.0).unwrap();
        let plan = net.find_optimal_path(&"a".into(), &"b".into()).unwrap();
        assert_eq!(plan.hyphae, vec![h1.id]);
    }

    #[test]
    fn test_load_can_outweigh_health() {
        let (net, _) = network();
        let h1 = net.create_hypha("core", "a", "b", 100.0).unwrap();
        let h2 = net.create_hypha("core", "a", "b", 90.0).unwrap();
        for _ in 0..10 {
            net.update_hypha_load(h1.id, 1).unwrap();
        }
        let plan = net.find_optimal_path(&"a".into(), &"b".into()).unwrap();
        assert_eq!(plan.hyphae, vec![h2.id]);
    }

    #[test]
    fn test_damaged_downstream_neuron_raises_cost() {
        let (net, topo) = network();
        topo.upsert_neuron("b");
        topo.upsert_neuron("c");
        let via_b = net.create_hypha("core", "a", "b", 100.0).unwrap();
        net.create_hypha("core", "b", "d", 100.0).unwrap();
        let via_c = net.create_hypha("core", "a", "c", 100.0).unwrap();
        net.create_hypha("core", "c", "d", 100.0).unwrap();

        topo.fire_neuron(&"b".into(), 1.0).unwrap();
        for _ in 0..=topo.config().failure_bound {
            topo.record_outcome(&"b".into(), false).unwrap();
        }
        let plan = net.find_optimal_path(&"a".into(), &"d".into()).unwrap();
        assert_eq!(plan.hyphae[0], via_c.id);
        assert_ne!(plan.hyphae[0], via_b.id);
    }

    #[test]
    fn test_alternative_skips_damaged_when_possible() {
        let (net, _) = network();
        let h1 = net.create_hypha("core", "a", "b", 90.0).unwrap();
        let h2 = net.create_hypha("core", "a", "b", 10.0).unwrap();
        let h3 = net.create_hypha("core", "a", "b", 60.0).unwrap();
        let plan = net
            .find_alternative_path(&"a".into(), &"b".into(), &[h1.id])
            .unwrap();
        assert_eq!(plan.hyphae, vec![h3.id]);

        let plan = net
            .find_alternative_path(&"a".into(), &"b".into(), &[h1.id, h3.id])
            .unwrap();
        assert_eq!(plan.hyphae, vec![h2.id]);
        assert!(net
            .find_alternative_path(&"a".into(), &"b".into(), &[h1.id, h2.id, h3.id])
            .is_none());
    }

    #[test]
    fn test_severed_hypha_excluded_until_recreated() {
        let (net, _) = network();
        let h = net.create_hypha("core", "a", "b", 0.0).unwrap();
        for _ in 0..net.config().sever_after_cycles {
            net.heal_hyphae();
        }
        assert!(net.hypha(h.id).unwrap().is_severed());
        assert!(net.find_optimal_path(&"a".into(), &"b".into()).is_none());
        assert_eq!(net.counts().severed_hyphae, 1);

        let fresh = net.create_hypha("core", "a", "b", 80.0).unwrap();
        assert!(fresh.alternative_paths().is_empty());
        assert_eq!(
            net.find_optimal_path(&"a".into(), &"b".into()).unwrap().hyphae,
            vec![fresh.id]
        );
    }

    #[test]
    fn test_failure_penalty_and_healing() {
        let (net, _) = network();
        let h = net.create_hypha("core", "a", "b", 40.0).unwrap();
        let damaged = net.record_hypha_failure(h.id).unwrap();
        assert_eq!(damaged.health(), 15.0);
        let outcome = net.heal_hyphae();
        assert_eq!(outcome.touched, 1);
        assert_eq!(net.hypha(h.id).unwrap().health(), 25.0);
        net.heal_hyphae();
        assert_eq!(net.hypha(h.id).unwrap().health(), 35.0);
        assert!(net.heal_hyphae().is_noop());
    }

    #[test]
    fn test_unknown_hypha_errors() {
        let (net, _) = network();
        assert!(matches!(
            net.update_hypha_load(HyphaId(42), 1),
            Err(FabricError::UnknownHypha(_))
        ));
    }
}
