//! Nervous Core: a self-healing, multi-strategy event-routing fabric.
//!
//! The fabric keeps a live graph of delivery endpoints and composes four
//! mechanisms over it:
//!
//! | Subsystem | Role |
//! |-----------|------|
//! | [`topology`] | Neurons (endpoints) and synapses (weighted links), activation propagation |
//! | [`reflex`] | Standing trigger rules that dispatch actions before routing completes |
//! | [`immune`] | Anomaly classification with antibody countermeasures and memory cells |
//! | [`mycelium`] | Redundant multi-hop hyphae, health-weighted path search and healing |
//! | [`colony`] | Pheromone-trail routing reinforced by exploring ants |
//!
//! [`Fabric`] wires them together, exposes the [`NervousSystemStatus`]
//! snapshot and drives the periodic [`maintenance`] cycle.
//!
//! All state is process-local. Storage sits behind the repository traits
//! ([`topology::TopologyRepository`], [`mycelium::RoutingRepository`]) so a
//! durable backend can replace the in-memory arenas without touching the
//! algorithms.

pub mod action;
pub mod clock;
pub mod colony;
pub mod config;
pub mod error;
pub mod event;
pub mod fabric;
pub mod ids;
pub mod immune;
pub mod maintenance;
pub mod mycelium;
pub mod reflex;
pub mod status;
pub mod topology;

pub use action::{ActionExecutor, ActionKind, FabricAction, NoopExecutor};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::FabricConfig;
pub use error::{FabricError, FabricResult};
pub use event::{Severity, WebhookEvent};
pub use fabric::{
    DeliveryFollowUp, DeliveryResult, DeliveryTicket, Disposition, Fabric, ProcessOutcome, Route,
};
pub use ids::{
    AntId, AntibodyId, AntigenId, HyphaId, MemoryCellId, MyceliumId, NeuronId, ReflexArcId,
    SynapseId, TrailId,
};
pub use status::NervousSystemStatus;
