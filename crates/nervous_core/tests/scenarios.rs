//! End-to-end scenarios over the public API.

use std::sync::Arc;

use nervous_core::colony::{AntColony, AntState};
use nervous_core::config::{ColonyConfig, ImmuneConfig, MyceliumConfig, TopologyConfig};
use nervous_core::immune::{Classification, ImmuneSystem};
use nervous_core::mycelium::{InMemoryRouting, MyceliumNetwork};
use nervous_core::topology::{InMemoryTopology, NeuronStatus, Topology};
use nervous_core::{DeliveryResult, ManualClock, NeuronId, Severity, WebhookEvent};
use serde_json::json;

fn topology(clock: Arc<ManualClock>) -> Arc<Topology> {
    Arc::new(Topology::new(
        Arc::new(InMemoryTopology::new()),
        TopologyConfig::default(),
        clock,
    ))
}

#[test]
fn scenario_a_strong_synapse_activates_target() {
    let clock = Arc::new(ManualClock::default());
    let topo = topology(clock);
    topo.upsert_neuron("N1");
    topo.upsert_neuron("N2");
    topo.upsert_synapse(&"N1".into(), &"N2".into(), 0.9).unwrap();

    assert_eq!(topo.neuron(&"N2".into()).unwrap().status(), NeuronStatus::Inactive);
    let report = topo.fire_neuron(&"N1".into(), 1.0).unwrap();

    assert_eq!(report.propagated.len(), 1);
    assert!(report.propagated[0].1 > topo.config().activation_threshold);
    assert_eq!(topo.neuron(&"N2".into()).unwrap().status(), NeuronStatus::Active);
}

fn network(clock: Arc<ManualClock>) -> MyceliumNetwork {
    let topo = topology(clock.clone());
    MyceliumNetwork::new(
        Arc::new(InMemoryRouting::new()),
        topo,
        MyceliumConfig::default(),
        clock,
    )
}

#[test]
fn scenario_b_optimal_path_prefers_healthy_hypha() {
    let net = network(Arc::new(ManualClock::default()));
    let h1 = net.create_hypha("ab", "A", "B", 90.0).unwrap();
    let _h2 = net.create_hypha("ab", "A", "B", 40.0).unwrap();

    let plan = net.find_optimal_path(&"A".into(), &"B".into()).unwrap();
    assert_eq!(plan.hyphae, vec![h1.id]);
}

#[test]
fn scenario_c_alternative_path_after_degradation() {
    let net = network(Arc::new(ManualClock::default()));
    let h1 = net.create_hypha("ab", "A", "B", 90.0).unwrap();
    let h2 = net.create_hypha("ab", "A", "B", 40.0).unwrap();

    net.set_hypha_health(h1.id, 10.0).unwrap();
    let plan = net
        .find_alternative_path(&"A".into(), &"B".into(), &[h1.id])
        .unwrap();
    assert_eq!(plan.hyphae, vec![h2.id]);
}

fn reinforce_then_evaporate(latency_ms: f64) {
    let clock = Arc::new(ManualClock::default());
    let topo = topology(clock.clone());
    topo.upsert_neuron("A");
    topo.upsert_neuron("B");
    topo.upsert_synapse(&"A".into(), &"B".into(), 0.8).unwrap();
    let colony = AntColony::new(
        topo,
        ColonyConfig {
            seed: Some(42),
            ..Default::default()
        },
        clock,
    );

    let trail = colony.create_trail(vec!["A".into(), "B".into()], 0.5);
    let mut last = colony.trail(trail).unwrap().strength();

    println!(">> Phase 1: three successful ants at {} ms", latency_ms);
    for _ in 0..3 {
        let ant = colony.create_ant("A", "B");
        let path = colony.explore(ant).unwrap().unwrap();
        assert_eq!(path, vec![NeuronId::from("A"), "B".into()]);
        let done = colony.complete_ant(ant, DeliveryResult::success(latency_ms)).unwrap();
        assert_eq!(done.state(), AntState::Completed);

        let now = colony.trail(trail).unwrap().strength();
        assert!(now > last, "strength did not increase: {} -> {}", last, now);
        last = now;
    }

    println!(">> Phase 2: ten evaporation passes");
    for _ in 0..10 {
        colony.evaporate_trails();
    }
    assert!(colony.trail(trail).is_none(), "trail survived evaporation");
}

#[test]
fn scenario_d_trail_reinforcement_then_evaporation() {
    reinforce_then_evaporate(50.0);
}

#[test]
fn scenario_d_near_instant_deliveries_still_reinforce_and_fade() {
    reinforce_then_evaporate(1.0);
}

#[test]
fn scenario_d_zero_latency_acks_still_reinforce_and_fade() {
    reinforce_then_evaporate(0.0);
}

#[test]
fn scenario_e_memory_short_circuits_repeat_threat() {
    let immune = ImmuneSystem::new(ImmuneConfig::default(), Arc::new(ManualClock::default()));
    let payload = json!({"query": "1 UNION SELECT password FROM users"});
    let first = WebhookEvent::new("e1", "api", "search", payload.clone(), Severity::Medium);
    let second = WebhookEvent::new("e2", "api", "search", payload, Severity::Medium);

    let verdict = immune.detect_antigens(&[first]);
    assert!(matches!(
        verdict[0],
        Classification::Anomalous {
            new: true,
            neutralized: true,
            ..
        }
    ));
    let antigens_after_first = immune.counts().antigens;

    let verdict = immune.detect_antigens(&[second]);
    assert!(matches!(verdict[0], Classification::MemoryNeutralized { .. }));
    assert_eq!(immune.counts().antigens, antigens_after_first);
    assert_eq!(immune.counts().neutralized_threats, 2);
}
