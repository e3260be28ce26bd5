//! Strategy selection, delivery feedback and pending-route retry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::action::{ActionExecutor, ActionKind, FabricAction};
use crate::clock::Clock;
use crate::colony::{AntColony, DeliveryResult};
use crate::config::{RoutingConfig, RoutingStrategy};
use crate::error::FabricResult;
use crate::event::WebhookEvent;
use crate::ids::{AntId, IdSequence, NeuronId};
use crate::maintenance::{Reapable, StageOutcome};
use crate::mycelium::{MyceliumNetwork, PathPlan};
use crate::topology::Topology;

/// How a delivery travels.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "strategy", rename_all = "kebab-case")]
pub enum Route {
    Mycelium(PathPlan),
    #[serde(rename_all = "camelCase")]
    AntColony { ant: AntId, path: Vec<NeuronId> },
}

/// Handed to the host for every routed event; returned with the result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryTicket {
    pub id: u64,
    pub event: WebhookEvent,
    pub source: NeuronId,
    pub destination: NeuronId,
    pub route: Route,
    pub dispatched_at: DateTime<Utc>,
}

/// What happened after a delivery result came back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DeliveryFollowUp {
    Delivered,
    /// Failed; retry along this fresh route
    Rerouted { ticket: DeliveryTicket },
    /// Failed with no alternative; queued for the next retry window
    Pending,
}

pub(crate) struct Router {
    config: RoutingConfig,
    topology: Arc<Topology>,
    mycelium: Arc<MyceliumNetwork>,
    colony: Arc<AntColony>,
    executor: Arc<dyn ActionExecutor>,
    clock: Arc<dyn Clock>,
    /// Tickets produced by pending retries, waiting for the host to collect
    retried: Mutex<Vec<DeliveryTicket>>,
    ticket_ids: IdSequence,
}

impl Router {
    pub fn new(
        config: RoutingConfig,
        topology: Arc<Topology>,
        mycelium: Arc<MyceliumNetwork>,
        colony: Arc<AntColony>,
        executor: Arc<dyn ActionExecutor>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            topology,
            mycelium,
            colony,
            executor,
            clock,
            retried: Mutex::new(Vec::new()),
            ticket_ids: IdSequence::new(),
        }
    }

    fn via_mycelium(&self, from: &NeuronId, to: &NeuronId) -> FabricResult<Option<Route>> {
        let Some(plan) = self.mycelium.find_optimal_path(from, to) else {
            return Ok(None);
        };
        self.mycelium.update_path_load(&plan, 1)?;
        Ok(Some(Route::Mycelium(plan)))
    }

    fn via_colony(&self, from: &NeuronId, to: &NeuronId) -> FabricResult<Option<Route>> {
        let ant = self.colony.create_ant(from.clone(), to.clone());
        Ok(self
            .colony
            .explore(ant)?
            .map(|path| Route::AntColony { ant, path }))
    }

    fn find_route(&self, from: &NeuronId, to: &NeuronId) -> FabricResult<Option<Route>> {
        match self.config.strategy {
            RoutingStrategy::Mycelium => self.via_mycelium(from, to),
            RoutingStrategy::AntColony => self.via_colony(from, to),
            RoutingStrategy::Adaptive => match self.via_mycelium(from, to)? {
                Some(route) => Ok(Some(route)),
                None => self.via_colony(from, to),
            },
        }
    }

    fn ticket(&self, event: &WebhookEvent, destination: &NeuronId, route: Route) -> DeliveryTicket {
        DeliveryTicket {
            id: self.ticket_ids.next(),
            event: event.clone(),
            source: NeuronId::from(event.source_type.as_str()),
            destination: destination.clone(),
            route,
            dispatched_at: self.clock.now(),
        }
    }

    /// Route `event` from its source neuron to `destination`, or `None` when
    /// neither strategy has a path.
    pub fn route(&self, event: &WebhookEvent, destination: &NeuronId) -> FabricResult<Option<DeliveryTicket>> {
        let source = NeuronId::from(event.source_type.as_str());
        let route = self.find_route(&source, destination)?;
        Ok(route.map(|r| {
            let ticket = self.ticket(event, destination, r);
            debug!(ticket = ticket.id, event = %event.id, route = ?ticket.route, "Event routed");
            ticket
        }))
    }

    pub fn enqueue_pending(&self, event: WebhookEvent, destination: NeuronId) {
        info!(event = %event.id, destination = %destination, "No route found, queued as pending");
        self.mycelium
            .pending()
            .enqueue(event, destination, self.clock.now());
    }

    pub fn complete(&self, ticket: DeliveryTicket, result: DeliveryResult) -> FabricResult<DeliveryFollowUp> {
        if self.topology.neuron(&ticket.destination).is_some() {
            self.topology.record_outcome(&ticket.destination, result.success)?;
        }

        match &ticket.route {
            Route::Mycelium(plan) => {
                self.mycelium.update_path_load(plan, -1)?;
                if result.success {
                    return Ok(DeliveryFollowUp::Delivered);
                }
                for hypha in &plan.hyphae {
                    self.mycelium.record_hypha_failure(*hypha)?;
                }
                let alternative =
                    self.mycelium
                        .find_alternative_path(&ticket.source, &ticket.destination, &plan.hyphae);
                if let Some(plan) = alternative {
                    self.mycelium.update_path_load(&plan, 1)?;
                    let rerouted = self.ticket(&ticket.event, &ticket.destination, Route::Mycelium(plan));
                    info!(
                        event = %ticket.event.id,
                        ticket = rerouted.id,
                        "Delivery failed, rerouted through alternative hyphae"
                    );
                    return Ok(DeliveryFollowUp::Rerouted { ticket: rerouted });
                }
            }
            Route::AntColony { ant, .. } => {
                self.colony.complete_ant(*ant, result)?;
                if result.success {
                    return Ok(DeliveryFollowUp::Delivered);
                }
            }
        }

        self.enqueue_pending(ticket.event, ticket.destination);
        Ok(DeliveryFollowUp::Pending)
    }

    pub fn take_retried(&self) -> Vec<DeliveryTicket> {
        std::mem::take(&mut *self.retried.lock())
    }

    /// Give each pending route one more window; report the ones that ran out.
    pub fn retry_pending(&self) -> StageOutcome {
        let mut outcome = StageOutcome::default();
        let mut routed = Vec::new();
        let sweep = self
            .mycelium
            .pending()
            .retry(self.config.pending_max_retries, |pending| {
                match self.route(&pending.event, &pending.destination) {
                    Ok(Some(ticket)) => {
                        routed.push(ticket);
                        true
                    }
                    Ok(None) => false,
                    Err(e) => {
                        outcome.errors.push(format!("{}: {}", pending.event.id, e));
                        false
                    }
                }
            });

        outcome.touched = sweep.routed + sweep.requeued;
        outcome.removed = sweep.abandoned.len();
        self.retried.lock().extend(routed);

        for route in sweep.abandoned {
            warn!(
                event = %route.event.id,
                destination = %route.destination,
                attempts = route.attempts,
                "Pending route abandoned: no healthy path"
            );
            self.executor.dispatch(FabricAction::new(
                ActionKind::Notify,
                json!({
                    "reason": "route-abandoned",
                    "eventId": route.event.id,
                    "sourceType": route.event.source_type,
                    "destination": route.destination,
                    "attempts": route.attempts,
                    "queuedAt": route.queued_at,
                }),
            ));
        }
        outcome
    }
}

impl Reapable for Router {
    fn reap(&self) -> FabricResult<StageOutcome> {
        Ok(self.retry_pending())
    }
}
