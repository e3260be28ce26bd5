//! The polled health snapshot.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::colony::PheromoneTrail;
use crate::immune::Antigen;
use crate::reflex::ReflexTrigger;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeuronCounts {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub damaged: usize,
    pub healing: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SynapseCounts {
    pub total: usize,
    pub active: usize,
    pub strong: usize,
    pub weak: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflexCounts {
    pub total: usize,
    pub enabled: usize,
    pub triggered: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImmuneCounts {
    pub antigens: usize,
    pub antibodies: usize,
    pub memory_cells: usize,
    pub neutralized_threats: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MyceliumCounts {
    pub networks: usize,
    pub total_hyphae: usize,
    /// Live hyphae at or above the damage threshold
    pub healthy_paths: usize,
    /// Live hyphae with at least one live alternative
    pub alternative_paths: usize,
    pub pending_routes: usize,
    pub severed_hyphae: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColonyCounts {
    pub active_ants: usize,
    pub completed_ants: u64,
    pub stuck_ants: u64,
    /// Pairs whose last ant got stuck, plus abandoned pending routes
    pub stuck_routes: usize,
    pub pheromone_trails: usize,
    /// Mean smoothed trail latency in milliseconds
    pub average_latency: f64,
}

/// Bounded observability samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSamples {
    pub recent_antigens: Vec<Antigen>,
    pub strongest_trails: Vec<PheromoneTrail>,
    pub recent_reflex_triggers: Vec<ReflexTrigger>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NervousSystemStatus {
    pub neurons: NeuronCounts,
    pub synapses: SynapseCounts,
    pub reflex_arcs: ReflexCounts,
    pub immune_system: ImmuneCounts,
    pub mycelium: MyceliumCounts,
    pub ant_colony: ColonyCounts,
    /// Mean of neuron and hypha health ratios, 0-100
    pub health: f64,
    pub last_update: DateTime<Utc>,
    pub samples: StatusSamples,
}

/// Overall score from the two health ratios (fractions in `[0, 1]`).
pub fn overall_health(neuron_ratio: f64, hypha_ratio: f64) -> f64 {
    ((neuron_ratio + hypha_ratio) / 2.0 * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_health_is_mean_of_ratios() {
        assert_eq!(overall_health(1.0, 1.0), 100.0);
        assert_eq!(overall_health(0.5, 1.0), 75.0);
        assert_eq!(overall_health(0.0, 0.0), 0.0);
    }

    #[test]
    fn test_counts_serialize_camel_case() {
        let json = serde_json::to_value(ImmuneCounts {
            memory_cells: 2,
            neutralized_threats: 3,
            ..Default::default()
        })
        .unwrap();
        assert_eq!(json["memoryCells"], 2);
        assert_eq!(json["neutralizedThreats"], 3);
    }
}
