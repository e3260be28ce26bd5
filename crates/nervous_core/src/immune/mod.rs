//! Immune Subsystem: anomaly classification with memory.
//!
//! Every event is first looked up against memory cells (exact signature,
//! then fuzzy token similarity). A hit neutralizes the event on the spot
//! and skips the heuristic rules entirely. Only misses run the payload
//! rules in [`detector`]; a rule hit becomes an [`Antigen`], which an
//! [`Antibody`] neutralizes, which in turn records a [`MemoryCell`].
//!
//! Severity and burst rate say nothing about the payload, so they only
//! flag the event. A flagged event is still delivered and leaves no
//! antigen or memory behind.

pub mod cells;
pub mod detector;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Duration;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::config::ImmuneConfig;
use crate::error::{FabricError, FabricResult};
use crate::event::WebhookEvent;
use crate::ids::{AntibodyId, AntigenId, IdSequence, MemoryCellId};
use crate::maintenance::{Decayable, StageOutcome};
use crate::status::ImmuneCounts;

pub use cells::{Antibody, Antigen, MemoryCell};
pub use detector::{AnomalyRule, Fingerprint};

/// Verdict for one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Classification {
    Clean,
    /// Matched a memory cell; no antigen was created
    MemoryNeutralized { cell: MemoryCellId },
    Anomalous {
        antigen: AntigenId,
        rule: AnomalyRule,
        /// False when the event re-triggered an antigen that is still active
        new: bool,
        neutralized: bool,
    },
    /// Tripped a delivery rule; routed like a clean event
    Flagged { rule: AnomalyRule },
}

impl Classification {
    pub fn is_threat(&self) -> bool {
        matches!(
            self,
            Classification::MemoryNeutralized { .. } | Classification::Anomalous { .. }
        )
    }
}

pub struct ImmuneSystem {
    config: ImmuneConfig,
    clock: Arc<dyn Clock>,
    antigens: RwLock<BTreeMap<AntigenId, Antigen>>,
    antibodies: RwLock<BTreeMap<AntibodyId, Antibody>>,
    memory: RwLock<BTreeMap<MemoryCellId, MemoryCell>>,
    neutralized_threats: AtomicU64,
    antigen_ids: IdSequence,
    antibody_ids: IdSequence,
    memory_ids: IdSequence,
}

impl ImmuneSystem {
    pub fn new(config: ImmuneConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            antigens: RwLock::new(BTreeMap::new()),
            antibodies: RwLock::new(BTreeMap::new()),
            memory: RwLock::new(BTreeMap::new()),
            neutralized_threats: AtomicU64::new(0),
            antigen_ids: IdSequence::new(),
            antibody_ids: IdSequence::new(),
            memory_ids: IdSequence::new(),
        }
    }

    /// Classify a batch of events; results line up with the input.
    ///
    /// Burst detection counts events per source within this batch.
    pub fn detect_antigens(&self, events: &[WebhookEvent]) -> Vec<Classification> {
        let bursting = detector::burst_sources(events, self.config.burst_threshold);
        events
            .iter()
            .map(|event| self.classify_one(event, &bursting))
            .collect()
    }

    fn classify_one(
        &self,
        event: &WebhookEvent,
        bursting: &std::collections::HashSet<String>,
    ) -> Classification {
        let fingerprint = Fingerprint::of(event);

        if let Some(cell) = self.recall(&fingerprint) {
            self.neutralized_threats.fetch_add(1, Ordering::Relaxed);
            debug!(event = %event.id, cell = %cell, "Memory cell short-circuited detection");
            return Classification::MemoryNeutralized { cell };
        }

        let Some(rule) = detector::classify(event, &self.config) else {
            return match detector::flag(event, bursting) {
                Some(rule) => {
                    debug!(event = %event.id, rule = %rule, "Event flagged");
                    Classification::Flagged { rule }
                }
                None => Classification::Clean,
            };
        };

        let now = self.clock.now();
        let (antigen, new) = {
            let mut antigens = self.antigens.write();
            let active = antigens
                .values_mut()
                .find(|a| !a.is_neutralized() && a.signature == fingerprint.signature);
            match active {
                Some(existing) => {
                    existing.occurrences += 1;
                    existing.last_seen = now;
                    (existing.id, false)
                }
                None => {
                    let id = AntigenId(self.antigen_ids.next());
                    antigens.insert(id, Antigen::new(id, &fingerprint, rule, event.severity, now));
                    (id, true)
                }
            }
        };
        if new {
            warn!(
                antigen = %antigen,
                event = %event.id,
                rule = %rule,
                source = %event.source_type,
                "Antigen detected"
            );
        }

        let neutralized = self.config.auto_neutralize && self.respond(antigen, &fingerprint).is_ok();
        Classification::Anomalous {
            antigen,
            rule,
            new,
            neutralized,
        }
    }

    /// Exact signature first, then the most similar resembling cell.
    fn recall(&self, fingerprint: &Fingerprint) -> Option<MemoryCellId> {
        let now = self.clock.now();
        let mut memory = self.memory.write();
        let exact = memory
            .values()
            .find(|c| c.signature == fingerprint.signature)
            .map(|c| c.id);
        let hit = exact.or_else(|| {
            memory
                .values()
                .filter(|c| c.resembles(fingerprint, self.config.fuzzy_match_threshold))
                .max_by(|a, b| {
                    fingerprint
                        .similarity(&a.tokens)
                        .total_cmp(&fingerprint.similarity(&b.tokens))
                })
                .map(|c| c.id)
        })?;
        if let Some(cell) = memory.get_mut(&hit) {
            cell.reinforce(now);
        }
        Some(hit)
    }

    /// Bind an antibody to a fresh antigen (creating one if none binds) and neutralize it.
    fn respond(&self, antigen: AntigenId, fingerprint: &Fingerprint) -> FabricResult<MemoryCellId> {
        let has_binding = {
            let antigens = self.antigens.read();
            let antigen = antigens.get(&antigen).ok_or(FabricError::UnknownAntigen(antigen))?;
            self.antibodies
                .read()
                .values()
                .any(|ab| ab.binds(antigen) && ab.effectiveness() >= self.config.min_antibody_effectiveness)
        };
        if !has_binding {
            self.create_antibody(fingerprint.signature.clone());
        }
        self.neutralize_with(antigen, Some(fingerprint))
    }

    /// Create a countermeasure for `signature`, or return the existing one.
    ///
    /// `signature` is either an exact antigen signature or `rule:<name>`.
    pub fn create_antibody(&self, signature: impl Into<String>) -> AntibodyId {
        let signature = signature.into();
        let mut antibodies = self.antibodies.write();
        if let Some(existing) = antibodies.values().find(|ab| ab.antigen_signature == signature) {
            return existing.id;
        }
        let id = AntibodyId(self.antibody_ids.next());
        antibodies.insert(
            id,
            Antibody::new(
                id,
                signature.clone(),
                self.config.initial_antibody_effectiveness,
                self.clock.now(),
            ),
        );
        info!(antibody = %id, signature = %signature, "Antibody created");
        id
    }

    /// One rule-wide antibody per built-in payload rule.
    pub fn create_default_antibodies(&self) -> Vec<AntibodyId> {
        AnomalyRule::ALL
            .iter()
            .filter(|rule| rule.is_intrinsic())
            .map(|rule| self.create_antibody(rule.antibody_pattern()))
            .collect()
    }

    /// Neutralize an antigen with the most effective binding antibody.
    ///
    /// Fails unless an antibody at or above the minimum effectiveness binds
    /// it. Success reinforces that antibody and records (or refreshes) a
    /// memory cell for the signature. Neutralizing twice is a no-op that
    /// returns the memory cell.
    pub fn neutralize_antigen(&self, id: AntigenId) -> FabricResult<MemoryCellId> {
        self.neutralize_with(id, None)
    }

    fn neutralize_with(&self, id: AntigenId, fingerprint: Option<&Fingerprint>) -> FabricResult<MemoryCellId> {
        let now = self.clock.now();
        let antigen = {
            let mut antigens = self.antigens.write();
            let antigen = antigens.get_mut(&id).ok_or(FabricError::UnknownAntigen(id))?;
            if !antigen.is_neutralized() {
                let mut antibodies = self.antibodies.write();
                let best = antibodies
                    .values_mut()
                    .filter(|ab| ab.binds(antigen))
                    .max_by(|a, b| a.effectiveness().total_cmp(&b.effectiveness()))
                    .filter(|ab| ab.effectiveness() >= self.config.min_antibody_effectiveness);
                let Some(antibody) = best else {
                    return Err(FabricError::NoEffectiveAntibody {
                        signature: antigen.signature.clone(),
                        min_effectiveness: self.config.min_antibody_effectiveness,
                    });
                };
                antibody.reinforce(self.config.effectiveness_reinforcement);
                antigen.neutralize(now);
                self.neutralized_threats.fetch_add(1, Ordering::Relaxed);
                info!(antigen = %id, antibody = %antibody.id, "Antigen neutralized");
            }
            antigen.clone()
        };

        let mut memory = self.memory.write();
        if let Some(cell) = memory.values_mut().find(|c| c.signature == antigen.signature) {
            cell.reinforce(now);
            return Ok(cell.id);
        }
        let cell_id = MemoryCellId(self.memory_ids.next());
        let fingerprint = fingerprint.cloned().unwrap_or_else(|| Fingerprint {
            signature: antigen.signature.clone(),
            source_type: antigen.source_type.clone(),
            event_type: String::new(),
            tokens: Default::default(),
        });
        memory.insert(
            cell_id,
            MemoryCell::new(cell_id, &fingerprint, antigen.rule, antigen.detected_at, now),
        );
        debug!(cell = %cell_id, signature = %antigen.signature, "Memory cell recorded");
        Ok(cell_id)
    }

    /// Lower every memory cell's retention weight; forget cells at zero.
    /// Antigens past their retention window are pruned in the same pass.
    pub fn decay_memory_cells(&self) -> StageOutcome {
        let now = self.clock.now();
        let mut outcome = StageOutcome::default();
        {
            let mut memory = self.memory.write();
            for cell in memory.values_mut() {
                cell.weight = (cell.weight - self.config.memory_decay_step).max(0.0);
                outcome.touched += 1;
            }
            let before = memory.len();
            memory.retain(|_, c| c.weight > 0.0);
            outcome.removed += before - memory.len();
        }

        let horizon = now - Duration::seconds(self.config.antigen_retention_secs);
        let mut antigens = self.antigens.write();
        let before = antigens.len();
        antigens.retain(|_, a| a.last_seen >= horizon);
        outcome.removed += before - antigens.len();
        outcome
    }

    pub fn antigen(&self, id: AntigenId) -> Option<Antigen> {
        self.antigens.read().get(&id).cloned()
    }

    pub fn antigens(&self) -> Vec<Antigen> {
        self.antigens.read().values().cloned().collect()
    }

    pub fn antibodies(&self) -> Vec<Antibody> {
        self.antibodies.read().values().cloned().collect()
    }

    pub fn memory_cells(&self) -> Vec<MemoryCell> {
        self.memory.read().values().cloned().collect()
    }

    /// Most recently seen antigens, newest first.
    pub fn recent_antigens(&self, limit: usize) -> Vec<Antigen> {
        let mut antigens = self.antigens();
        antigens.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then(b.id.cmp(&a.id)));
        antigens.truncate(limit);
        antigens
    }

    pub fn counts(&self) -> ImmuneCounts {
        ImmuneCounts {
            antigens: self.antigens.read().len(),
            antibodies: self.antibodies.read().len(),
            memory_cells: self.memory.read().len(),
            neutralized_threats: self.neutralized_threats.load(Ordering::Relaxed),
        }
    }
}

impl Decayable for ImmuneSystem {
    fn decay(&self) -> FabricResult<StageOutcome> {
        Ok(self.decay_memory_cells())
    }
}
