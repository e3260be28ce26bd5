use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::MyceliumConfig;
use crate::error::{FabricError, FabricResult};
use crate::ids::{HyphaId, MyceliumId, NeuronId};

pub const MAX_HEALTH: f64 = 100.0;

pub(crate) fn clamp_health(health: f64) -> f64 {
    if health.is_nan() {
        return 0.0;
    }
    health.clamp(0.0, MAX_HEALTH)
}

/// One directed path segment between two topology points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hypha {
    pub id: HyphaId,
    pub mycelium: MyceliumId,
    pub from_id: NeuronId,
    pub to_id: NeuronId,
    health: f64,
    /// In-flight deliveries
    pub load: u64,
    alternative_paths: Vec<HyphaId>,
    severed: bool,
    /// Consecutive maintenance cycles spent at zero health
    pub zero_health_cycles: u32,
    pub created_at: DateTime<Utc>,
}

/// What a healing pass did to one hypha.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HealStep {
    Untouched,
    Regrew,
    Withering,
    Severed,
}

impl Hypha {
    pub(crate) fn new(
        id: HyphaId,
        mycelium: MyceliumId,
        from_id: NeuronId,
        to_id: NeuronId,
        health: f64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            mycelium,
            from_id,
            to_id,
            health: clamp_health(health),
            load: 0,
            alternative_paths: Vec::new(),
            severed: false,
            zero_health_cycles: 0,
            created_at: now,
        }
    }

    pub fn health(&self) -> f64 {
        self.health
    }

    pub fn set_health(&mut self, health: f64) {
        self.health = clamp_health(health);
    }

    pub fn is_severed(&self) -> bool {
        self.severed
    }

    pub fn is_damaged(&self, threshold: f64) -> bool {
        self.health < threshold
    }

    pub fn alternative_paths(&self) -> &[HyphaId] {
        &self.alternative_paths
    }

    pub fn same_endpoints(&self, other: &Hypha) -> bool {
        self.from_id == other.from_id && self.to_id == other.to_id
    }

    /// Record `other` as a parallel route. A hypha never lists itself.
    pub fn add_alternative(&mut self, other: HyphaId) -> FabricResult<()> {
        if other == self.id {
            return Err(FabricError::SelfAlternative(self.id));
        }
        if !self.alternative_paths.contains(&other) {
            self.alternative_paths.push(other);
        }
        Ok(())
    }

    /// Saturating: load never goes negative.
    pub(crate) fn apply_load(&mut self, delta: i64) {
        self.load = if delta >= 0 {
            self.load.saturating_add(delta.unsigned_abs())
        } else {
            self.load.saturating_sub(delta.unsigned_abs())
        };
    }

    pub(crate) fn heal(&mut self, config: &MyceliumConfig) -> HealStep {
        if self.severed || !self.is_damaged(config.damage_threshold) {
            return HealStep::Untouched;
        }
        // Dead segments do not regrow; they are cut once they stay dead long enough.
        if self.health <= 0.0 {
            self.zero_health_cycles += 1;
            if self.zero_health_cycles >= config.sever_after_cycles {
                self.severed = true;
                return HealStep::Severed;
            }
            return HealStep::Withering;
        }
        self.zero_health_cycles = 0;
        self.health = clamp_health(self.health + config.recovery_rate);
        HealStep::Regrew
    }
}

/// A named routing domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Mycelium {
    pub id: MyceliumId,
    pub hypha_ids: Vec<HyphaId>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hypha(health: f64) -> Hypha {
        Hypha::new(HyphaId(1), "core".into(), "a".into(), "b".into(), health, Utc::now())
    }

    #[test]
    fn test_health_clamped() {
        assert_eq!(hypha(140.0).health(), 100.0);
        assert_eq!(hypha(-3.0).health(), 0.0);
        assert_eq!(hypha(f64::NAN).health(), 0.0);
    }

    #[test]
    fn test_never_its_own_alternative() {
        let mut h = hypha(50.0);
        assert!(matches!(h.add_alternative(HyphaId(1)), Err(FabricError::SelfAlternative(_))));
        h.add_alternative(HyphaId(2)).unwrap();
        h.add_alternative(HyphaId(2)).unwrap();
        assert_eq!(h.alternative_paths(), &[HyphaId(2)]);
    }

    #[test]
    fn test_load_saturates_at_zero() {
        let mut h = hypha(50.0);
        h.apply_load(2);
        h.apply_load(-5);
        assert_eq!(h.load, 0);
    }

    #[test]
    fn test_heal_stops_at_threshold() {
        let config = MyceliumConfig::default();
        let mut h = hypha(config.damage_threshold - 5.0);
        assert_eq!(h.heal(&config), HealStep::Regrew);
        assert!(h.health() >= config.damage_threshold);
        assert_eq!(h.heal(&config), HealStep::Untouched);
    }

    #[test]
    fn test_zero_health_is_severed() {
        let config = MyceliumConfig::default();
        let mut h = hypha(0.0);
        for _ in 1..config.sever_after_cycles {
            assert_eq!(h.heal(&config), HealStep::Withering);
        }
        assert_eq!(h.heal(&config), HealStep::Severed);
        assert!(h.is_severed());
        assert_eq!(h.heal(&config), HealStep::Untouched);
    }
}
