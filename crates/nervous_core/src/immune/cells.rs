use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::event::Severity;
use crate::ids::{AntibodyId, AntigenId, MemoryCellId};
use crate::immune::detector::{AnomalyRule, Fingerprint};

/// A detected anomalous payload signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Antigen {
    pub id: AntigenId,
    pub signature: String,
    pub rule: AnomalyRule,
    pub severity: Severity,
    pub source_type: String,
    neutralized: bool,
    pub occurrences: u64,
    pub detected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub neutralized_at: Option<DateTime<Utc>>,
}

impl Antigen {
    pub(crate) fn new(
        id: AntigenId,
        fingerprint: &Fingerprint,
        rule: AnomalyRule,
        severity: Severity,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            signature: fingerprint.signature.clone(),
            rule,
            severity,
            source_type: fingerprint.source_type.clone(),
            neutralized: false,
            occurrences: 1,
            detected_at: now,
            last_seen: now,
            neutralized_at: None,
        }
    }

    pub fn is_neutralized(&self) -> bool {
        self.neutralized
    }

    /// One-way: a neutralized antigen never becomes active again.
    pub(crate) fn neutralize(&mut self, now: DateTime<Utc>) {
        if !self.neutralized {
            self.neutralized = true;
            self.neutralized_at = Some(now);
        }
    }
}

/// Countermeasure bound to a signature, or to a whole rule via `rule:<name>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Antibody {
    pub id: AntibodyId,
    pub antigen_signature: String,
    effectiveness: f64,
    pub uses: u64,
    pub created_at: DateTime<Utc>,
}

impl Antibody {
    pub(crate) fn new(id: AntibodyId, antigen_signature: String, effectiveness: f64, now: DateTime<Utc>) -> Self {
        Self {
            id,
            antigen_signature,
            effectiveness: effectiveness.clamp(0.0, 1.0),
            uses: 0,
            created_at: now,
        }
    }

    pub fn effectiveness(&self) -> f64 {
        self.effectiveness
    }

    pub fn binds(&self, antigen: &Antigen) -> bool {
        self.antigen_signature == antigen.signature
            || self.antigen_signature == antigen.rule.antibody_pattern()
    }

    pub(crate) fn reinforce(&mut self, amount: f64) {
        self.uses += 1;
        self.effectiveness = (self.effectiveness + amount).clamp(0.0, 1.0);
    }
}

/// Long-lived record of a neutralized signature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryCell {
    pub id: MemoryCellId,
    pub signature: String,
    pub rule: AnomalyRule,
    pub source_type: String,
    pub event_type: String,
    pub tokens: BTreeSet<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_matched: DateTime<Utc>,
    /// Retention weight in `(0, 1]`; the cell is forgotten at zero
    pub weight: f64,
    pub hits: u64,
}

impl MemoryCell {
    pub(crate) fn new(
        id: MemoryCellId,
        fingerprint: &Fingerprint,
        rule: AnomalyRule,
        first_seen_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            signature: fingerprint.signature.clone(),
            rule,
            source_type: fingerprint.source_type.clone(),
            event_type: fingerprint.event_type.clone(),
            tokens: fingerprint.tokens.clone(),
            first_seen_at,
            last_matched: now,
            weight: 1.0,
            hits: 0,
        }
    }

    /// Fuzzy comparison: same source and event type, similar payload shape.
    pub fn resembles(&self, fingerprint: &Fingerprint, threshold: f64) -> bool {
        self.source_type == fingerprint.source_type
            && self.event_type == fingerprint.event_type
            && fingerprint.similarity(&self.tokens) >= threshold
    }

    pub(crate) fn reinforce(&mut self, now: DateTime<Utc>) {
        self.weight = 1.0;
        self.hits += 1;
        self.last_matched = now;
    }
}
