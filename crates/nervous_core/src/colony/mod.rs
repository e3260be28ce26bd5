//! Ant Colony Router: pheromone-reinforced adaptive routing.
//!
//! An ant walks the topology one hop at a time from its origin towards its
//! destination. At each hop it scores the active outgoing synapses by the
//! pheromone laid on that edge by trails to the same destination plus the
//! synapse strength, takes the best one, and now and then explores another
//! instead. Completed deliveries move the walked trail towards a ceiling,
//! faster deliveries by a larger step. Failures weaken it and maintenance
//! evaporates everything.
//!
//! No global recomputation ever happens: routes converge through
//! reinforcement alone.

pub mod ant;
pub mod trail;

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ColonyConfig;
use crate::error::{FabricError, FabricResult};
use crate::ids::{AntId, IdSequence, NeuronId, TrailId};
use crate::maintenance::{Decayable, Reapable, StageOutcome};
use crate::status::ColonyCounts;
use crate::topology::TopologyView;

pub use ant::{Ant, AntState};
pub use trail::PheromoneTrail;

/// Outcome of a delivery made along an ant's path.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryResult {
    pub success: bool,
    pub latency_ms: f64,
}

impl DeliveryResult {
    pub fn success(latency_ms: f64) -> Self {
        Self {
            success: true,
            latency_ms,
        }
    }

    pub fn failure() -> Self {
        Self {
            success: false,
            latency_ms: 0.0,
        }
    }
}

/// What one call to [`AntColony::follow_trail`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Hop {
    Moved(NeuronId),
    /// Dead end; the ant stepped back
    Backtracked,
    Arrived,
    Stuck,
}

/// Latencies below this are treated as this.
const MIN_LATENCY_MS: f64 = 1.0;

pub struct AntColony {
    topology: Arc<dyn TopologyView>,
    config: ColonyConfig,
    clock: Arc<dyn Clock>,
    ants: RwLock<BTreeMap<AntId, Ant>>,
    trails: RwLock<BTreeMap<TrailId, PheromoneTrail>>,
    /// `(from, to)` pairs whose last ant got stuck
    stuck_pairs: Mutex<BTreeSet<(NeuronId, NeuronId)>>,
    rng: Mutex<ChaCha20Rng>,
    completed: AtomicU64,
    stuck: AtomicU64,
    ant_ids: IdSequence,
    trail_ids: IdSequence,
}

impl AntColony {
    pub fn new(topology: Arc<dyn TopologyView>, config: ColonyConfig, clock: Arc<dyn Clock>) -> Self {
        let rng = match config.seed {
            Some(seed) => ChaCha20Rng::seed_from_u64(seed),
            None => ChaCha20Rng::from_entropy(),
        };
        Self {
            topology,
            config,
            clock,
            ants: RwLock::new(BTreeMap::new()),
            trails: RwLock::new(BTreeMap::new()),
            stuck_pairs: Mutex::new(BTreeSet::new()),
            rng: Mutex::new(rng),
            completed: AtomicU64::new(0),
            stuck: AtomicU64::new(0),
            ant_ids: IdSequence::new(),
            trail_ids: IdSequence::new(),
        }
    }

    pub fn config(&self) -> &ColonyConfig {
        &self.config
    }

    pub fn create_ant(&self, from: impl Into<NeuronId>, to: impl Into<NeuronId>) -> AntId {
        let id = AntId(self.ant_ids.next());
        let ant = Ant::new(id, from.into(), to.into(), self.clock.now());
        debug!(ant = %id, from = %ant.from_id, to = %ant.to_id, "Ant released");
        self.ants.write().insert(id, ant);
        id
    }

    /// Ants still tracked: active ones and stuck ones not yet reaped.
    pub fn ant(&self, id: AntId) -> Option<Ant> {
        self.ants.read().get(&id).cloned()
    }

    /// Lay a trail by hand, e.g. to seed a known route.
    pub fn create_trail(&self, path: Vec<NeuronId>, strength: f64) -> TrailId {
        let id = TrailId(self.trail_ids.next());
        let trail = PheromoneTrail::new(id, path, strength, self.clock.now());
        self.trails.write().insert(id, trail);
        id
    }

    pub fn trail(&self, id: TrailId) -> Option<PheromoneTrail> {
        self.trails.read().get(&id).cloned()
    }

    pub fn trails(&self) -> Vec<PheromoneTrail> {
        self.trails.read().values().cloned().collect()
    }

    /// Strongest trail currently leading `from -> to`.
    pub fn best_trail(&self, from: &NeuronId, to: &NeuronId) -> Option<PheromoneTrail> {
        self.trails
            .read()
            .values()
            .filter(|t| t.origin() == Some(from) && t.destination() == Some(to))
            .max_by(|a, b| a.strength().total_cmp(&b.strength()))
            .cloned()
    }

    pub fn strongest_trails(&self, limit: usize) -> Vec<PheromoneTrail> {
        let mut trails = self.trails();
        trails.sort_by(|a, b| b.strength().total_cmp(&a.strength()).then(a.id.cmp(&b.id)));
        trails.truncate(limit);
        trails
    }

    /// Pheromone on `from -> next` laid by trails ending at `destination`.
    fn pheromone(&self, from: &NeuronId, next: &NeuronId, destination: &NeuronId) -> f64 {
        self.trails
            .read()
            .values()
            .filter(|t| t.destination() == Some(destination) && t.crosses(from, next))
            .map(|t| t.strength())
            .sum()
    }

    /// Advance `id` by one hop.
    pub fn follow_trail(&self, id: AntId) -> FabricResult<Hop> {
        let ant = self.ant(id).ok_or(FabricError::UnknownAnt(id))?;
        match ant.state() {
            AntState::Stuck => return Ok(Hop::Stuck),
            AntState::Completed => return Ok(Hop::Arrived),
            AntState::Active => {}
        }
        if ant.has_arrived() {
            return Ok(Hop::Arrived);
        }
        if ant.over_budget(self.config.max_hops, self.config.max_failed_hops) {
            self.mark_ant_stuck(id)?;
            return Ok(Hop::Stuck);
        }

        let here = ant.position().clone();
        let visited: HashSet<&NeuronId> = ant.current_path.iter().collect();
        let mut candidates: Vec<(NeuronId, f64)> = self
            .topology
            .neighbors(&here)
            .into_iter()
            .filter(|(next, _)| {
                !visited.contains(next) && !ant.dead_ends.contains(next) && self.topology.is_routable(next)
            })
            .map(|(next, strength)| {
                let score = self.pheromone(&here, &next, &ant.to_id) + strength;
                (next, score)
            })
            .collect();
        candidates.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        let choice = if candidates.is_empty() {
            None
        } else {
            let mut rng = self.rng.lock();
            if candidates.len() > 1 && rng.gen_bool(self.config.exploration_rate) {
                candidates[1..].choose(&mut *rng).map(|(n, _)| n.clone())
            } else {
                Some(candidates[0].0.clone())
            }
        };

        let updated = self.update_ant(id, |a| match &choice {
            Some(next) => a.step(next.clone()),
            None => a.backtrack(),
        })?;
        let hop = match choice {
            Some(_) if updated.has_arrived() => Hop::Arrived,
            Some(next) => Hop::Moved(next),
            None => Hop::Backtracked,
        };
        if hop != Hop::Arrived && updated.over_budget(self.config.max_hops, self.config.max_failed_hops) {
            self.mark_ant_stuck(id)?;
            return Ok(Hop::Stuck);
        }
        Ok(hop)
    }

    /// Walk until the ant arrives or gets stuck. Returns the walked path on arrival.
    pub fn explore(&self, id: AntId) -> FabricResult<Option<Vec<NeuronId>>> {
        loop {
            match self.follow_trail(id)? {
                Hop::Arrived => {
                    return Ok(self.ant(id).map(|a| a.current_path));
                }
                Hop::Stuck => return Ok(None),
                Hop::Moved(_) | Hop::Backtracked => {}
            }
        }
    }

    fn update_ant(&self, id: AntId, update: impl FnOnce(&mut Ant)) -> FabricResult<Ant> {
        let mut ants = self.ants.write();
        let ant = ants.get_mut(&id).ok_or(FabricError::UnknownAnt(id))?;
        update(ant);
        Ok(ant.clone())
    }

    /// Report the delivery made along the ant's path and retire the ant.
    ///
    /// Success closes `deposit_scale / (deposit_scale + latency_ms)` of the
    /// gap between that path's trail and `max_trail_strength`, laying a new
    /// trail if this is the first ant to complete it. Failure weakens the
    /// trail directly and removes it once it falls to the floor. An ant that never reached its
    /// destination cannot complete and is marked stuck instead.
    pub fn complete_ant(&self, id: AntId, result: DeliveryResult) -> FabricResult<Ant> {
        let ant = self.ant(id).ok_or(FabricError::UnknownAnt(id))?;
        if ant.state() != AntState::Active {
            return Ok(ant);
        }
        if !ant.has_arrived() {
            warn!(ant = %id, "Ant completed before reaching its destination");
            return self.mark_ant_stuck(id);
        }

        let now = self.clock.now();
        {
            let mut trails = self.trails.write();
            let existing = trails
                .values()
                .find(|t| t.path == ant.current_path)
                .map(|t| t.id);
            let latency = result.latency_ms.max(MIN_LATENCY_MS);
            match existing {
                Some(trail_id) if result.success => {
                    if let Some(trail) = trails.get_mut(&trail_id) {
                        let fraction = self.config.deposit_scale / (self.config.deposit_scale + latency);
                        trail.reinforce(fraction, self.config.max_trail_strength, now);
                        trail.observe_latency(latency, self.config.latency_smoothing);
                        debug!(trail = %trail_id, strength = trail.strength(), "Trail reinforced");
                    }
                }
                Some(trail_id) => {
                    let weakened = trails.get_mut(&trail_id).map(|trail| {
                        trail.weaken(self.config.failure_penalty);
                        trail.strength()
                    });
                    if weakened.is_some_and(|s| s <= self.config.trail_floor) {
                        trails.remove(&trail_id);
                        info!(trail = %trail_id, "Trail dropped after failed delivery");
                    }
                }
                None if result.success => {
                    let trail_id = TrailId(self.trail_ids.next());
                    let mut trail = PheromoneTrail::new(
                        trail_id,
                        ant.current_path.clone(),
                        self.config.initial_trail_strength,
                        now,
                    );
                    trail.observe_latency(latency, 1.0);
                    info!(trail = %trail_id, hops = ant.hops, "Pheromone trail laid");
                    trails.insert(trail_id, trail);
                }
                None => {}
            }
        }

        let mut ants = self.ants.write();
        let mut finished = ants.remove(&id).ok_or(FabricError::UnknownAnt(id))?;
        finished.finish(AntState::Completed, now);
        drop(ants);
        self.completed.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.stuck_pairs
                .lock()
                .remove(&(finished.from_id.clone(), finished.to_id.clone()));
        }
        Ok(finished)
    }

    /// `active -> stuck`. The ant stays visible until the next reap.
    pub fn mark_ant_stuck(&self, id: AntId) -> FabricResult<Ant> {
        let now = self.clock.now();
        let mut changed = false;
        let ant = self.update_ant(id, |a| changed = a.finish(AntState::Stuck, now))?;
        if changed {
            self.stuck.fetch_add(1, Ordering::Relaxed);
            self.stuck_pairs
                .lock()
                .insert((ant.from_id.clone(), ant.to_id.clone()));
            warn!(
                ant = %id,
                from = %ant.from_id,
                to = %ant.to_id,
                hops = ant.hops,
                failed_hops = ant.failed_hops,
                "Ant stuck: no healthy path"
            );
        }
        Ok(ant)
    }

    /// Multiply every trail by `1 - evaporation_rate` and drop those at or
    /// below the floor.
    pub fn evaporate_trails(&self) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let mut trails = self.trails.write();
        for trail in trails.values_mut() {
            trail.evaporate(self.config.evaporation_rate);
            outcome.touched += 1;
        }
        let before = trails.len();
        trails.retain(|_, t| t.strength() > self.config.trail_floor);
        outcome.removed = before - trails.len();
        outcome
    }

    /// Stuck detection: over-budget ants become stuck, stuck ants stop being tracked.
    pub fn reap_stuck_ants(&self) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let over_budget: Vec<AntId> = self
            .ants
            .read()
            .values()
            .filter(|a| {
                a.state() == AntState::Active
                    && a.over_budget(self.config.max_hops, self.config.max_failed_hops)
            })
            .map(|a| a.id)
            .collect();
        for id in over_budget {
            if let Err(e) = self.mark_ant_stuck(id) {
                outcome.errors.push(e.to_string());
                continue;
            }
            outcome.touched += 1;
        }
        let mut ants = self.ants.write();
        let before = ants.len();
        ants.retain(|_, a| a.state() != AntState::Stuck);
        outcome.removed = before - ants.len();
        outcome
    }

    pub fn stuck_routes(&self) -> Vec<(NeuronId, NeuronId)> {
        self.stuck_pairs.lock().iter().cloned().collect()
    }

    pub fn counts(&self) -> ColonyCounts {
        let active_ants = self
            .ants
            .read()
            .values()
            .filter(|a| a.state() == AntState::Active)
            .count();
        let trails = self.trails.read();
        let latencies: Vec<f64> = trails.values().filter_map(|t| t.latency_ms).collect();
        let average_latency = if latencies.is_empty() {
            0.0
        } else {
            latencies.iter().sum::<f64>() / latencies.len() as f64
        };
        ColonyCounts {
            active_ants,
            completed_ants: self.completed.load(Ordering::Relaxed),
            stuck_ants: self.stuck.load(Ordering::Relaxed),
            stuck_routes: self.stuck_pairs.lock().len(),
            pheromone_trails: trails.len(),
            average_latency,
        }
    }
}

impl Decayable for AntColony {
    fn decay(&self) -> FabricResult<StageOutcome> {
        Ok(self.evaporate_trails())
    }
}

impl Reapable for AntColony {
    fn reap(&self) -> FabricResult<StageOutcome> {
        Ok(self.reap_stuck_ants())
    }
}
