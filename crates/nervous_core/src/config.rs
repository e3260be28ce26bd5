//! Tunables for every fabric subsystem.
//!
//! Each section deserializes with per-field defaults so a partial TOML/JSON
//! document is enough to override a single threshold.

use serde::{Deserialize, Serialize};

use crate::error::{FabricError, FabricResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FabricConfig {
    #[serde(default)]
    pub topology: TopologyConfig,
    #[serde(default)]
    pub immune: ImmuneConfig,
    #[serde(default)]
    pub mycelium: MyceliumConfig,
    #[serde(default)]
    pub colony: ColonyConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    /// Cumulative incoming activation that flips an inactive neuron to active
    pub activation_threshold: f64,
    /// Consecutive unacknowledged activations tolerated before `damaged`
    pub failure_bound: u32,
    /// Health lost per failed acknowledgement
    pub failure_health_penalty: f64,
    /// Health regained per acknowledged delivery
    pub success_health_gain: f64,
    /// Health regained per maintenance cycle
    pub heal_rate: f64,
    /// Health at which a healing neuron returns to `active`
    pub recovery_threshold: f64,
    /// Fraction of strength an unused synapse loses per cycle
    pub synapse_decay: f64,
    /// Strength added per successful traversal
    pub synapse_reinforcement: f64,
    /// Synapses at or below this strength are functionally inactive
    pub synapse_active_floor: f64,
    /// Active neurons idle longer than this fall back to `inactive`
    pub idle_timeout_secs: i64,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            activation_threshold: 0.5,
            failure_bound: 3,
            failure_health_penalty: 15.0,
            success_health_gain: 2.0,
            heal_rate: 10.0,
            recovery_threshold: 70.0,
            synapse_decay: 0.05,
            synapse_reinforcement: 0.05,
            synapse_active_floor: 0.05,
            idle_timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImmuneConfig {
    /// Antibodies below this effectiveness cannot neutralize
    pub min_antibody_effectiveness: f64,
    /// Effectiveness of a freshly created antibody
    pub initial_antibody_effectiveness: f64,
    /// Effectiveness gained per successful neutralization
    pub effectiveness_reinforcement: f64,
    /// Retention weight a memory cell loses per decay pass
    pub memory_decay_step: f64,
    /// Jaccard similarity of payload fingerprints for a fuzzy memory hit
    pub fuzzy_match_threshold: f64,
    /// Serialized payloads larger than this are anomalous
    pub max_payload_bytes: usize,
    /// Payloads nested deeper than this are anomalous
    pub max_nesting_depth: usize,
    /// Events from one source within a single batch before it counts as a burst
    pub burst_threshold: usize,
    /// Antigens older than this are pruned during memory decay
    pub antigen_retention_secs: i64,
    /// Case-insensitive substrings that mark an injection attempt
    pub suspicious_patterns: Vec<String>,
    /// Respond to new antigens immediately (create antibody + neutralize)
    pub auto_neutralize: bool,
}

impl Default for ImmuneConfig {
    fn default() -> Self {
        Self {
            min_antibody_effectiveness: 0.3,
            initial_antibody_effectiveness: 0.6,
            effectiveness_reinforcement: 0.05,
            memory_decay_step: 0.02,
            fuzzy_match_threshold: 0.8,
            max_payload_bytes: 64 * 1024,
            max_nesting_depth: 16,
            burst_threshold: 20,
            antigen_retention_secs: 24 * 3600,
            suspicious_patterns: default_suspicious_patterns(),
            auto_neutralize: true,
        }
    }
}

fn default_suspicious_patterns() -> Vec<String> {
    ["<script", "javascript:", "../", "drop table", "${jndi:", "union select"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MyceliumConfig {
    /// Hyphae below this health are damaged: avoided by alternates, healed by maintenance
    pub damage_threshold: f64,
    /// Health regained per maintenance cycle by a damaged hypha
    pub recovery_rate: f64,
    /// Consecutive zero-health cycles before a hypha is severed
    pub sever_after_cycles: u32,
    /// Health lost when a delivery through the hypha fails
    pub failure_penalty: f64,
    /// Cost weight of missing health
    pub health_weight: f64,
    /// Cost weight per unit of in-flight load
    pub load_weight: f64,
    /// Cost weight of the downstream neuron's missing health
    pub node_weight: f64,
}

impl Default for MyceliumConfig {
    fn default() -> Self {
        Self {
            damage_threshold: 30.0,
            recovery_rate: 10.0,
            sever_after_cycles: 3,
            failure_penalty: 25.0,
            health_weight: 4.0,
            load_weight: 0.25,
            node_weight: 2.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColonyConfig {
    /// Hops an ant may take before it is marked stuck
    pub max_hops: u32,
    /// Hop attempts with no viable move before an ant is marked stuck
    pub max_failed_hops: u32,
    /// Probability of taking a lower-scored edge instead of the best one
    pub exploration_rate: f64,
    /// Fraction of strength lost per evaporation pass
    pub evaporation_rate: f64,
    /// Trails at or below this strength are removed
    pub trail_floor: f64,
    /// Strength of a trail laid by the first completing ant
    pub initial_trail_strength: f64,
    /// A success closes `deposit_scale / (deposit_scale + latency_ms)` of the
    /// gap between a trail's strength and `max_trail_strength`
    pub deposit_scale: f64,
    /// Ceiling that reinforcement approaches but never reaches. Keep
    /// `max * (1 - evaporation_rate)^10` below `trail_floor` so an idle
    /// trail is gone after ten evaporation passes.
    pub max_trail_strength: f64,
    /// Multiplier applied to a trail when a delivery over it fails
    pub failure_penalty: f64,
    /// Weight of the newest sample in the trail's latency average
    pub latency_smoothing: f64,
    /// Fixed seed for exploration; entropy when absent
    pub seed: Option<u64>,
}

impl Default for ColonyConfig {
    fn default() -> Self {
        Self {
            max_hops: 16,
            max_failed_hops: 3,
            exploration_rate: 0.1,
            evaporation_rate: 0.4,
            trail_floor: 0.05,
            initial_trail_strength: 0.5,
            deposit_scale: 10.0,
            max_trail_strength: 5.0,
            failure_penalty: 0.5,
            latency_smoothing: 0.2,
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Schedule used by the host process
    pub interval_secs: u64,
    /// A cycle requested sooner than this after the previous one is skipped
    pub min_spacing_secs: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            min_spacing_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoutingStrategy {
    Mycelium,
    AntColony,
    /// Mycelium first, ant colony when no hypha path exists
    Adaptive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub strategy: RoutingStrategy,
    /// Retry windows a pending route gets before it is abandoned
    pub pending_max_retries: u32,
    /// Upper bound on each observability sample list in the status snapshot
    pub sample_limit: usize,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            strategy: RoutingStrategy::Adaptive,
            pending_max_retries: 1,
            sample_limit: 10,
        }
    }
}

fn check(cond: bool, what: &str) -> FabricResult<()> {
    if cond {
        Ok(())
    } else {
        Err(FabricError::InvalidConfig(what.to_string()))
    }
}

fn unit(v: f64) -> bool {
    (0.0..=1.0).contains(&v)
}

fn health(v: f64) -> bool {
    (0.0..=100.0).contains(&v)
}

impl FabricConfig {
    /// Reject values that would break the clamping invariants.
    pub fn validate(&self) -> FabricResult<()> {
        let t = &self.topology;
        check(t.activation_threshold > 0.0, "topology.activation_threshold must be > 0")?;
        check(health(t.recovery_threshold), "topology.recovery_threshold must be in [0, 100]")?;
        check(t.heal_rate >= 0.0, "topology.heal_rate must be >= 0")?;
        check(unit(t.synapse_decay), "topology.synapse_decay must be in [0, 1]")?;
        check(unit(t.synapse_active_floor), "topology.synapse_active_floor must be in [0, 1]")?;

        let i = &self.immune;
        check(unit(i.min_antibody_effectiveness), "immune.min_antibody_effectiveness must be in [0, 1]")?;
        check(unit(i.initial_antibody_effectiveness), "immune.initial_antibody_effectiveness must be in [0, 1]")?;
        check(i.memory_decay_step > 0.0, "immune.memory_decay_step must be > 0")?;
        check(unit(i.fuzzy_match_threshold), "immune.fuzzy_match_threshold must be in [0, 1]")?;

        let m = &self.mycelium;
        check(health(m.damage_threshold), "mycelium.damage_threshold must be in [0, 100]")?;
        check(m.recovery_rate >= 0.0, "mycelium.recovery_rate must be >= 0")?;
        check(m.sever_after_cycles > 0, "mycelium.sever_after_cycles must be > 0")?;

        let c = &self.colony;
        check(c.max_hops > 0, "colony.max_hops must be > 0")?;
        check(unit(c.exploration_rate), "colony.exploration_rate must be in [0, 1]")?;
        check(
            c.evaporation_rate > 0.0 && c.evaporation_rate < 1.0,
            "colony.evaporation_rate must be in (0, 1)",
        )?;
        check(c.trail_floor >= 0.0, "colony.trail_floor must be >= 0")?;
        check(
            c.initial_trail_strength > c.trail_floor,
            "colony.initial_trail_strength must exceed trail_floor",
        )?;
        check(c.deposit_scale > 0.0, "colony.deposit_scale must be > 0")?;
        check(
            c.max_trail_strength > c.initial_trail_strength,
            "colony.max_trail_strength must exceed initial_trail_strength",
        )?;
        check(unit(c.failure_penalty), "colony.failure_penalty must be in [0, 1]")?;
        check(unit(c.latency_smoothing), "colony.latency_smoothing must be in [0, 1]")?;

        check(self.maintenance.interval_secs > 0, "maintenance.interval_secs must be > 0")?;
        check(self.maintenance.min_spacing_secs >= 0, "maintenance.min_spacing_secs must be >= 0")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        FabricConfig::default().validate().unwrap();
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config: FabricConfig =
            serde_json::from_str(r#"{"colony": {"max_hops": 4, "seed": 7}}"#).unwrap();
        assert_eq!(config.colony.max_hops, 4);
        assert_eq!(config.colony.seed, Some(7));
        assert_eq!(config.colony.trail_floor, ColonyConfig::default().trail_floor);
        assert_eq!(config.routing.strategy, RoutingStrategy::Adaptive);
    }

    #[test]
    fn test_default_cap_evaporates_within_ten_passes() {
        let c = ColonyConfig::default();
        let remaining = c.max_trail_strength * (1.0 - c.evaporation_rate).powi(10);
        assert!(remaining <= c.trail_floor, "capped trail keeps {}", remaining);
    }

    #[test]
    fn test_rejects_cap_below_initial_strength() {
        let mut config = FabricConfig::default();
        config.colony.max_trail_strength = config.colony.initial_trail_strength;
        assert!(matches!(config.validate(), Err(FabricError::InvalidConfig(_))));
    }

    #[test]
    fn test_rejects_evaporation_of_one() {
        let mut config = FabricConfig::default();
        config.colony.evaporation_rate = 1.0;
        assert!(matches!(config.validate(), Err(FabricError::InvalidConfig(_))));
    }
}
