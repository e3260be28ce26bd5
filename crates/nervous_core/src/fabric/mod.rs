//! Fabric Aggregator: wires the subsystems into one event pipeline.
//!
//! ```text
//! event -> validate -> reflex arcs -> immune -> route (mycelium | ant colony) -> ticket
//!                          |             |                    |
//!                       actions     quarantine            pending queue
//! ```
//!
//! The host delivers each [`DeliveryTicket`] and reports back through
//! [`Fabric::complete_delivery`]. [`Fabric::run_maintenance_cycle`] runs on
//! the host's schedule.

mod router;

use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use crate::action::{ActionExecutor, ActionKind, FabricAction};
use crate::clock::{Clock, SystemClock};
use crate::colony::AntColony;
use crate::config::FabricConfig;
use crate::error::{FabricError, FabricResult};
use crate::event::{Severity, WebhookEvent};
use crate::ids::{NeuronId, ReflexArcId};
use crate::immune::{Classification, ImmuneSystem};
use crate::maintenance::{MaintenanceCycle, MaintenanceReport, StageTask};
use crate::mycelium::{InMemoryRouting, MyceliumNetwork, RoutingRepository};
use crate::reflex::{ReflexArc, ReflexCondition, ReflexEngine};
use crate::status::{self, NervousSystemStatus, StatusSamples};
use crate::topology::{InMemoryTopology, Synapse, Topology, TopologyRepository};

pub use crate::colony::DeliveryResult;
pub use router::{DeliveryFollowUp, DeliveryTicket, Route};

use router::Router;

/// Where an event ended up.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Disposition {
    /// Failed validation; nothing was touched
    Dropped { reason: String },
    /// Classified as a threat and not routed
    Quarantined { classification: Classification },
    Routed { ticket: DeliveryTicket },
    /// No path right now; queued for a retry window
    Pending,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessOutcome {
    pub event_id: String,
    /// Reflex arcs that fired on the fast path
    pub reflex_arcs: Vec<ReflexArcId>,
    pub disposition: Disposition,
}

pub struct Fabric {
    config: FabricConfig,
    clock: Arc<dyn Clock>,
    executor: Arc<dyn ActionExecutor>,
    topology: Arc<Topology>,
    reflexes: ReflexEngine,
    immune: Arc<ImmuneSystem>,
    mycelium: Arc<MyceliumNetwork>,
    colony: Arc<AntColony>,
    router: Arc<Router>,
    maintenance: MaintenanceCycle,
}

impl Fabric {
    /// In-memory fabric on the system clock.
    pub fn new(config: FabricConfig, executor: Arc<dyn ActionExecutor>) -> FabricResult<Self> {
        Self::with_clock(config, executor, Arc::new(SystemClock))
    }

    pub fn with_clock(
        config: FabricConfig,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
    ) -> FabricResult<Self> {
        Self::with_repositories(
            config,
            executor,
            clock,
            Arc::new(InMemoryTopology::new()),
            Arc::new(InMemoryRouting::new()),
        )
    }

    /// Build over caller-supplied storage.
    pub fn with_repositories(
        config: FabricConfig,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
        topology_repo: Arc<dyn TopologyRepository>,
        routing_repo: Arc<dyn RoutingRepository>,
    ) -> FabricResult<Self> {
        config.validate()?;

        let topology = Arc::new(Topology::new(topology_repo, config.topology.clone(), clock.clone()));
        let immune = Arc::new(ImmuneSystem::new(config.immune.clone(), clock.clone()));
        let mycelium = Arc::new(MyceliumNetwork::new(
            routing_repo,
            topology.clone(),
            config.mycelium.clone(),
            clock.clone(),
        ));
        let colony = Arc::new(AntColony::new(topology.clone(), config.colony.clone(), clock.clone()));
        let router = Arc::new(Router::new(
            config.routing.clone(),
            topology.clone(),
            mycelium.clone(),
            colony.clone(),
            executor.clone(),
            clock.clone(),
        ));

        // Topology health feeds the routing cost functions, so it heals first.
        let maintenance = MaintenanceCycle::new(clock.clone(), config.maintenance.min_spacing_secs)
            .with_stage("topology-healing", StageTask::Heal(topology.clone()))
            .with_stage("hypha-healing", StageTask::Heal(mycelium.clone()))
            .with_stage("trail-evaporation", StageTask::Decay(colony.clone()))
            .with_stage("memory-decay", StageTask::Decay(immune.clone()))
            .with_stage("stuck-ant-detection", StageTask::Reap(colony.clone()))
            .with_stage("pending-retry", StageTask::Reap(router.clone()));

        info!(
            strategy = ?config.routing.strategy,
            stages = ?maintenance.stage_names(),
            "Fabric initialized"
        );

        Ok(Self {
            config,
            clock,
            executor,
            topology,
            reflexes: ReflexEngine::new(),
            immune,
            mycelium,
            colony,
            router,
            maintenance,
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn reflexes(&self) -> &ReflexEngine {
        &self.reflexes
    }

    pub fn immune(&self) -> &ImmuneSystem {
        &self.immune
    }

    pub fn mycelium(&self) -> &MyceliumNetwork {
        &self.mycelium
    }

    pub fn colony(&self) -> &AntColony {
        &self.colony
    }

    /// Ensure both neurons exist and link them.
    pub fn connect(&self, from: impl Into<NeuronId>, to: impl Into<NeuronId>, strength: f64) -> Option<Synapse> {
        let from = self.topology.upsert_neuron(from).id;
        let to = self.topology.upsert_neuron(to).id;
        self.topology.upsert_synapse(&from, &to, strength)
    }

    pub fn register_reflex_arc(
        &self,
        condition: ReflexCondition,
        target: impl Into<NeuronId>,
        action: ActionKind,
    ) -> FabricResult<ReflexArcId> {
        self.reflexes
            .register_reflex_arc(&self.topology, condition, target.into(), action)
    }

    pub fn set_reflex_enabled(&self, id: ReflexArcId, enabled: bool) -> FabricResult<ReflexArc> {
        self.reflexes.set_enabled(id, enabled)?;
        self.reflexes
            .arc(id)
            .ok_or(FabricError::UnknownReflexArc(id))
    }

    pub fn process(&self, event: WebhookEvent, destination: &NeuronId) -> FabricResult<ProcessOutcome> {
        let event_id = event.id.clone();
        self.process_batch(vec![event], destination)?
            .pop()
            .ok_or_else(|| FabricError::MalformedEvent {
                id: event_id,
                reason: "event produced no outcome".to_string(),
            })
    }

    /// Run a batch of events through the pipeline: reflex arcs first, then
    /// immune classification, then routing. Burst detection counts events
    /// per source within the batch.
    pub fn process_batch(
        &self,
        events: Vec<WebhookEvent>,
        destination: &NeuronId,
    ) -> FabricResult<Vec<ProcessOutcome>> {
        let now = self.clock.now();
        let mut outcomes: Vec<Option<ProcessOutcome>> = Vec::with_capacity(events.len());
        let mut valid = Vec::new();
        for event in events {
            match event.validate() {
                Ok(()) => {
                    outcomes.push(None);
                    valid.push(event);
                }
                Err(e) => {
                    warn!(event = %event.id, error = %e, "Dropping malformed event");
                    outcomes.push(Some(ProcessOutcome {
                        event_id: event.id,
                        reflex_arcs: Vec::new(),
                        disposition: Disposition::Dropped { reason: e.to_string() },
                    }));
                }
            }
        }

        let mut fired = Vec::with_capacity(valid.len());
        for event in &valid {
            let source = self.topology.upsert_neuron(event.source_type.as_str()).id;
            self.topology.upsert_neuron(destination.clone());
            let reflex_arcs = self
                .reflexes
                .check_reflex_arcs(event, &self.topology, self.executor.as_ref(), now);
            fired.push((source, reflex_arcs));
        }

        let classifications = self.immune.detect_antigens(&valid);
        let mut routed = Vec::with_capacity(valid.len());
        for ((event, (source, reflex_arcs)), classification) in valid.into_iter().zip(fired).zip(classifications) {
            if classification.is_threat() {
                info!(event = %event.id, classification = ?classification, "Event quarantined");
                routed.push(ProcessOutcome {
                    event_id: event.id,
                    reflex_arcs,
                    disposition: Disposition::Quarantined { classification },
                });
                continue;
            }

            if reflex_arcs.is_empty() && event.severity >= Severity::High {
                self.executor.dispatch(FabricAction::new(
                    ActionKind::CreateTask,
                    json!({
                        "reason": "unmatched-high-severity",
                        "eventId": event.id,
                        "sourceType": event.source_type,
                        "eventType": event.event_type,
                        "severity": event.severity,
                    }),
                ));
            }

            self.topology.fire_neuron(&source, event.severity.signal())?;

            let disposition = match self.router.route(&event, destination)? {
                Some(ticket) => Disposition::Routed { ticket },
                None => {
                    let event_id = event.id.clone();
                    self.router.enqueue_pending(event, destination.clone());
                    routed.push(ProcessOutcome {
                        event_id,
                        reflex_arcs,
                        disposition: Disposition::Pending,
                    });
                    continue;
                }
            };
            routed.push(ProcessOutcome {
                event_id: event.id,
                reflex_arcs,
                disposition,
            });
        }

        let mut routed = routed.into_iter();
        Ok(outcomes
            .into_iter()
            .filter_map(|slot| slot.or_else(|| routed.next()))
            .collect())
    }

    /// Report the result of delivering `ticket`.
    pub fn complete_delivery(&self, ticket: DeliveryTicket, result: DeliveryResult) -> FabricResult<DeliveryFollowUp> {
        self.router.complete(ticket, result)
    }

    /// Tickets produced by pending-route retries since the last call.
    pub fn take_retried_deliveries(&self) -> Vec<DeliveryTicket> {
        self.router.take_retried()
    }

    /// Heal, evaporate, decay and reap, in that order.
    ///
    /// Skipped without touching state when another run is in progress or
    /// the previous one finished less than `maintenance.min_spacing_secs` ago.
    pub fn run_maintenance_cycle(&self) -> MaintenanceReport {
        self.maintenance.run()
    }

    pub fn status(&self) -> NervousSystemStatus {
        let limit = self.config.routing.sample_limit;
        let mut ant_colony = self.colony.counts();
        ant_colony.stuck_routes += self.mycelium.pending().abandoned() as usize;

        NervousSystemStatus {
            neurons: self.topology.neuron_counts(),
            synapses: self.topology.synapse_counts(),
            reflex_arcs: self.reflexes.counts(),
            immune_system: self.immune.counts(),
            mycelium: self.mycelium.counts(),
            ant_colony,
            health: status::overall_health(self.topology.health_ratio(), self.mycelium.health_ratio()),
            last_update: self.clock.now(),
            samples: StatusSamples {
                recent_antigens: self.immune.recent_antigens(limit),
                strongest_trails: self.colony.strongest_trails(limit),
                recent_reflex_triggers: self.reflexes.recent_triggers(limit),
            },
        }
    }
}
