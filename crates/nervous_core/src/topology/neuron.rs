use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::TopologyConfig;
use crate::ids::NeuronId;

pub const MAX_HEALTH: f64 = 100.0;

/// Lifecycle of a delivery endpoint.
///
/// `inactive ⇄ active → damaged → healing → active`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NeuronStatus {
    #[default]
    Inactive,
    Active,
    Damaged,
    Healing,
}

impl NeuronStatus {
    /// Damaged and healing endpoints neither propagate nor accept routes.
    pub fn is_routable(self) -> bool {
        matches!(self, NeuronStatus::Inactive | NeuronStatus::Active)
    }
}

/// Clamp a health reading into `[0, 100]`, treating NaN as dead.
pub fn clamp_health(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, MAX_HEALTH)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Neuron {
    pub id: NeuronId,
    health: f64,
    status: NeuronStatus,
    /// Incoming activation accumulated since the neuron last became active
    pub activation: f64,
    pub consecutive_failures: u32,
    pub fire_count: u64,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Neuron {
    pub fn new(id: NeuronId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            health: MAX_HEALTH,
            status: NeuronStatus::Inactive,
            activation: 0.0,
            consecutive_failures: 0,
            fire_count: 0,
            created_at: now,
            last_active: now,
        }
    }

    pub fn health(&self) -> f64 {
        self.health
    }

    pub fn status(&self) -> NeuronStatus {
        self.status
    }

    pub fn set_health(&mut self, value: f64) {
        self.health = clamp_health(value);
    }

    /// The neuron itself fires: an inactive neuron becomes active.
    pub(crate) fn mark_fired(&mut self, now: DateTime<Utc>) {
        self.fire_count += 1;
        self.last_active = now;
        if self.status == NeuronStatus::Inactive {
            self.status = NeuronStatus::Active;
            self.activation = 0.0;
        }
    }

    /// Accumulate incoming activation. Returns true when this flips the
    /// neuron from inactive to active.
    pub(crate) fn receive(&mut self, amount: f64, threshold: f64, now: DateTime<Utc>) -> bool {
        if !self.status.is_routable() {
            return false;
        }
        self.activation += amount.max(0.0);
        if self.status == NeuronStatus::Active {
            self.last_active = now;
            return false;
        }
        if self.activation >= threshold {
            self.status = NeuronStatus::Active;
            self.activation = 0.0;
            self.last_active = now;
            return true;
        }
        false
    }

    /// Acknowledged delivery.
    pub(crate) fn record_success(&mut self, config: &TopologyConfig, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.set_health(self.health + config.success_health_gain);
        self.last_active = now;
    }

    /// Unacknowledged delivery. Returns true when the neuron became damaged.
    pub(crate) fn record_failure(&mut self, config: &TopologyConfig) -> bool {
        self.consecutive_failures += 1;
        self.set_health(self.health - config.failure_health_penalty);
        if self.status == NeuronStatus::Active && self.consecutive_failures > config.failure_bound {
            self.status = NeuronStatus::Damaged;
            return true;
        }
        false
    }

    pub(crate) fn deactivate(&mut self) -> bool {
        if self.status == NeuronStatus::Active {
            self.status = NeuronStatus::Inactive;
            self.activation = 0.0;
            return true;
        }
        false
    }

    /// One maintenance step. Returns the new status if it changed.
    pub(crate) fn heal(&mut self, config: &TopologyConfig, now: DateTime<Utc>) -> Option<NeuronStatus> {
        let before = self.status;
        match self.status {
            // Enter healing; recovery is checked from the next cycle on.
            NeuronStatus::Damaged => {
                self.status = NeuronStatus::Healing;
                self.set_health(self.health + config.heal_rate);
            }
            NeuronStatus::Healing => {
                self.set_health(self.health + config.heal_rate);
                if self.health >= config.recovery_threshold {
                    self.status = NeuronStatus::Active;
                    self.consecutive_failures = 0;
                    self.last_active = now;
                }
            }
            NeuronStatus::Active => {
                self.set_health(self.health + config.heal_rate);
                let idle = now.signed_duration_since(self.last_active).num_seconds();
                if idle > config.idle_timeout_secs {
                    self.deactivate();
                }
            }
            NeuronStatus::Inactive => {
                self.set_health(self.health + config.heal_rate);
            }
        }
        (self.status != before).then_some(self.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn neuron() -> Neuron {
        Neuron::new(NeuronId::from("n"), Utc::now())
    }

    #[test]
    fn test_activation_threshold() {
        let mut n = neuron();
        let now = Utc::now();
        assert!(!n.receive(0.3, 0.5, now));
        assert_eq!(n.status(), NeuronStatus::Inactive);
        assert!(n.receive(0.3, 0.5, now));
        assert_eq!(n.status(), NeuronStatus::Active);
        assert_eq!(n.activation, 0.0);
    }

    #[test]
    fn test_failures_damage_active_neuron() {
        let config = TopologyConfig::default();
        let mut n = neuron();
        n.mark_fired(Utc::now());
        for _ in 0..config.failure_bound {
            assert!(!n.record_failure(&config));
        }
        assert!(n.record_failure(&config));
        assert_eq!(n.status(), NeuronStatus::Damaged);
        assert!(n.health() >= 0.0);
    }

    #[test]
    fn test_damaged_heals_through_healing() {
        let config = TopologyConfig::default();
        let mut n = neuron();
        n.mark_fired(Utc::now());
        for _ in 0..=config.failure_bound {
            n.record_failure(&config);
        }
        n.set_health(10.0);
        let now = Utc::now();
        assert_eq!(n.heal(&config, now), Some(NeuronStatus::Healing));
        let mut cycles = 0;
        while n.status() == NeuronStatus::Healing {
            n.heal(&config, now);
            cycles += 1;
            assert!(cycles < 20);
        }
        assert_eq!(n.status(), NeuronStatus::Active);
        assert!(n.health() >= config.recovery_threshold);
        assert_eq!(n.consecutive_failures, 0);
    }

    #[test]
    fn test_health_clamped() {
        let mut n = neuron();
        n.set_health(250.0);
        assert_eq!(n.health(), 100.0);
        n.set_health(-3.0);
        assert_eq!(n.health(), 0.0);
        n.set_health(f64::NAN);
        assert_eq!(n.health(), 0.0);
    }

    #[test]
    fn test_damaged_ignores_activation() {
        let config = TopologyConfig::default();
        let mut n = neuron();
        n.mark_fired(Utc::now());
        for _ in 0..=config.failure_bound {
            n.record_failure(&config);
        }
        let before = n.activation;
        assert!(!n.receive(1.0, 0.5, Utc::now()));
        assert_eq!(n.activation, before);
    }
}
