//! Reflex Arc Engine: the fast path.
//!
//! Reflex arcs are standing rules bound to a target neuron. An event that
//! matches an enabled arc fires the target and dispatches the arc's action
//! straight to the executor, before the slower path search runs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

use crate::action::{ActionExecutor, ActionKind, FabricAction};
use crate::error::{FabricError, FabricResult};
use crate::event::{Severity, WebhookEvent};
use crate::ids::{IdSequence, NeuronId, ReflexArcId};
use crate::status::ReflexCounts;
use crate::topology::Topology;

/// Trigger condition evaluated against each event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "kebab-case")]
pub enum ReflexCondition {
    SourceType(String),
    EventType(String),
    SeverityAtLeast(Severity),
    /// Case-insensitive substring of the serialized payload
    PayloadContains(String),
    All(Vec<ReflexCondition>),
    Any(Vec<ReflexCondition>),
}

impl ReflexCondition {
    pub fn matches(&self, event: &WebhookEvent) -> bool {
        match self {
            ReflexCondition::SourceType(s) => event.source_type.eq_ignore_ascii_case(s),
            ReflexCondition::EventType(t) => event.event_type.eq_ignore_ascii_case(t),
            ReflexCondition::SeverityAtLeast(min) => event.severity >= *min,
            ReflexCondition::PayloadContains(needle) => event
                .payload
                .to_string()
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            ReflexCondition::All(all) => all.iter().all(|c| c.matches(event)),
            ReflexCondition::Any(any) => any.iter().any(|c| c.matches(event)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflexArc {
    pub id: ReflexArcId,
    pub condition: ReflexCondition,
    pub target_neuron_id: NeuronId,
    pub action: ActionKind,
    pub enabled: bool,
    pub last_triggered: Option<DateTime<Utc>>,
    pub trigger_count: u64,
}

/// One firing of an arc, kept for the status samples.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReflexTrigger {
    pub arc: ReflexArcId,
    pub event_id: String,
    pub target: NeuronId,
    pub at: DateTime<Utc>,
}

/// Bound on remembered triggers.
const TRIGGER_HISTORY: usize = 64;

#[derive(Default)]
pub struct ReflexEngine {
    arcs: RwLock<BTreeMap<ReflexArcId, ReflexArc>>,
    recent: RwLock<Vec<ReflexTrigger>>,
    ids: IdSequence,
}

impl ReflexEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an enabled arc. The target neuron must already exist.
    pub fn register_reflex_arc(
        &self,
        topology: &Topology,
        condition: ReflexCondition,
        target: NeuronId,
        action: ActionKind,
    ) -> FabricResult<ReflexArcId> {
        if topology.neuron(&target).is_none() {
            warn!(target = %target, "Reflex arc targets an unknown neuron, rejected");
            return Err(FabricError::UnknownNeuron(target));
        }
        let id = ReflexArcId(self.ids.next());
        info!(arc = %id, target = %target, condition = ?condition, "Reflex arc registered");
        self.arcs.write().insert(
            id,
            ReflexArc {
                id,
                condition,
                target_neuron_id: target,
                action,
                enabled: true,
                last_triggered: None,
                trigger_count: 0,
            },
        );
        Ok(id)
    }

    pub fn set_enabled(&self, id: ReflexArcId, enabled: bool) -> FabricResult<()> {
        let mut arcs = self.arcs.write();
        let arc = arcs.get_mut(&id).ok_or(FabricError::UnknownReflexArc(id))?;
        arc.enabled = enabled;
        Ok(())
    }

    pub fn arc(&self, id: ReflexArcId) -> Option<ReflexArc> {
        self.arcs.read().get(&id).cloned()
    }

    pub fn arcs(&self) -> Vec<ReflexArc> {
        self.arcs.read().values().cloned().collect()
    }

    /// Evaluate every enabled arc against `event`.
    ///
    /// Each match stamps `last_triggered`, fires the target neuron with the
    /// event's severity signal and dispatches the arc's action without
    /// waiting for routing. Returns the arcs that fired.
    pub fn check_reflex_arcs(
        &self,
        event: &WebhookEvent,
        topology: &Topology,
        executor: &dyn ActionExecutor,
        now: DateTime<Utc>,
    ) -> Vec<ReflexArcId> {
        // Stamp under the write lock, dispatch after releasing it.
        let fired: Vec<ReflexArc> = {
            let mut arcs = self.arcs.write();
            arcs.values_mut()
                .filter(|arc| arc.enabled && arc.condition.matches(event))
                .map(|arc| {
                    arc.last_triggered = Some(now);
                    arc.trigger_count += 1;
                    arc.clone()
                })
                .collect()
        };

        for arc in &fired {
            if let Err(e) = topology.fire_neuron(&arc.target_neuron_id, event.severity.signal()) {
                warn!(arc = %arc.id, error = %e, "Reflex target could not fire");
            }
            executor.dispatch(FabricAction::new(
                arc.action,
                json!({
                    "reflexArc": arc.id,
                    "eventId": event.id,
                    "sourceType": event.source_type,
                    "eventType": event.event_type,
                    "severity": event.severity,
                    "target": arc.target_neuron_id,
                }),
            ));
            info!(arc = %arc.id, event = %event.id, target = %arc.target_neuron_id, "Reflex arc triggered");
        }

        if !fired.is_empty() {
            let mut recent = self.recent.write();
            recent.extend(fired.iter().map(|arc| ReflexTrigger {
                arc: arc.id,
                event_id: event.id.clone(),
                target: arc.target_neuron_id.clone(),
                at: now,
            }));
            let overflow = recent.len().saturating_sub(TRIGGER_HISTORY);
            recent.drain(..overflow);
        }

        fired.into_iter().map(|arc| arc.id).collect()
    }

    /// Most recent triggers, newest first.
    pub fn recent_triggers(&self, limit: usize) -> Vec<ReflexTrigger> {
        self.recent.read().iter().rev().take(limit).cloned().collect()
    }

    pub fn counts(&self) -> ReflexCounts {
        let arcs = self.arcs.read();
        ReflexCounts {
            total: arcs.len(),
            enabled: arcs.values().filter(|a| a.enabled).count(),
            triggered: arcs.values().filter(|a| a.trigger_count > 0).count(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TopologyConfig;
    use crate::topology::{InMemoryTopology, NeuronStatus};
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<FabricAction>>);

    impl ActionExecutor for Recorder {
        fn dispatch(&self, action: FabricAction) {
            self.0.lock().push(action);
        }
    }

    fn topology() -> Topology {
        Topology::new(
            Arc::new(InMemoryTopology::new()),
            TopologyConfig::default(),
            Arc::new(ManualClock::default()),
        )
    }

    fn event(source: &str, severity: Severity) -> WebhookEvent {
        WebhookEvent::new("e1", source, "charge.failed", json!({"amount": 12}), severity)
    }

    #[test]
    fn test_matching_arc_fires_and_dispatches() {
        let topo = topology();
        let engine = ReflexEngine::new();
        let recorder = Recorder::default();
        topo.upsert_neuron("billing-alerts");
        let id = engine
            .register_reflex_arc(
                &topo,
                ReflexCondition::All(vec![
                    ReflexCondition::SourceType("stripe".into()),
                    ReflexCondition::SeverityAtLeast(Severity::High),
                ]),
                "billing-alerts".into(),
                ActionKind::CreateTask,
            )
            .unwrap();

        let now = Utc::now();
        let fired = engine.check_reflex_arcs(&event("stripe", Severity::Critical), &topo, &recorder, now);
        assert_eq!(fired, vec![id]);
        assert_eq!(engine.arc(id).unwrap().last_triggered, Some(now));
        assert_eq!(recorder.0.lock()[0].kind, ActionKind::CreateTask);
        assert_eq!(
            topo.neuron(&"billing-alerts".into()).unwrap().status(),
            NeuronStatus::Active
        );
        assert_eq!(engine.recent_triggers(10).len(), 1);
    }

    #[test]
    fn test_disabled_arc_never_fires() {
        let topo = topology();
        let engine = ReflexEngine::new();
        let recorder = Recorder::default();
        topo.upsert_neuron("billing");
        let id = engine
            .register_reflex_arc(
                &topo,
                ReflexCondition::SourceType("stripe".into()),
                "billing".into(),
                ActionKind::Notify,
            )
            .unwrap();
        engine.set_enabled(id, false).unwrap();

        let fired = engine.check_reflex_arcs(&event("stripe", Severity::Low), &topo, &recorder, Utc::now());
        assert!(fired.is_empty());
        assert!(recorder.0.lock().is_empty());
        assert_eq!(engine.arc(id).unwrap().last_triggered, None);
        assert_eq!(engine.counts().enabled, 0);
    }

    #[test]
    fn test_unknown_target_is_rejected() {
        let topo = topology();
        let engine = ReflexEngine::new();
        let result = engine.register_reflex_arc(
            &topo,
            ReflexCondition::SourceType("stripe".into()),
            "nowhere".into(),
            ActionKind::Notify,
        );
        assert!(matches!(result, Err(FabricError::UnknownNeuron(_))));
        assert!(topo.neuron(&"nowhere".into()).is_none());
        assert_eq!(engine.counts().total, 0);
    }

    #[test]
    fn test_condition_payload_contains_is_case_insensitive() {
        let cond = ReflexCondition::PayloadContains("AMOUNT".into());
        assert!(cond.matches(&event("stripe", Severity::Low)));
        let cond = ReflexCondition::Any(vec![
            ReflexCondition::EventType("push".into()),
            ReflexCondition::SeverityAtLeast(Severity::Critical),
        ]);
        assert!(!cond.matches(&event("stripe", Severity::High)));
    }

    #[test]
    fn test_unknown_arc_toggle_errors() {
        let engine = ReflexEngine::new();
        assert!(matches!(
            engine.set_enabled(ReflexArcId(99), true),
            Err(FabricError::UnknownReflexArc(_))
        ));
    }
}
