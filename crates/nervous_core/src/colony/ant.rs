use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{AntId, NeuronId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntState {
    Active,
    Stuck,
    Completed,
}

/// One route-exploration attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ant {
    pub id: AntId,
    pub from_id: NeuronId,
    pub to_id: NeuronId,
    /// Nodes walked so far, starting at `from_id`
    pub current_path: Vec<NeuronId>,
    state: AntState,
    pub hops: u32,
    pub failed_hops: u32,
    /// Nodes this ant backed out of; never re-entered
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dead_ends: Vec<NeuronId>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Ant {
    pub(crate) fn new(id: AntId, from_id: NeuronId, to_id: NeuronId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            current_path: vec![from_id.clone()],
            from_id,
            to_id,
            state: AntState::Active,
            hops: 0,
            failed_hops: 0,
            dead_ends: Vec::new(),
            created_at: now,
            finished_at: None,
        }
    }

    pub fn state(&self) -> AntState {
        self.state
    }

    pub fn position(&self) -> &NeuronId {
        self.current_path.last().unwrap_or(&self.from_id)
    }

    pub fn has_arrived(&self) -> bool {
        self.position() == &self.to_id
    }

    pub(crate) fn over_budget(&self, max_hops: u32, max_failed_hops: u32) -> bool {
        self.hops >= max_hops || self.failed_hops >= max_failed_hops
    }

    pub(crate) fn step(&mut self, next: NeuronId) {
        self.current_path.push(next);
        self.hops += 1;
    }

    /// Retreat from a dead end. The origin is never popped.
    pub(crate) fn backtrack(&mut self) {
        self.failed_hops += 1;
        if self.current_path.len() > 1 {
            if let Some(dead_end) = self.current_path.pop() {
                self.dead_ends.push(dead_end);
            }
        }
    }

    /// `active -> stuck | completed`; anything else is ignored.
    pub(crate) fn finish(&mut self, state: AntState, now: DateTime<Utc>) -> bool {
        if self.state != AntState::Active || state == AntState::Active {
            return false;
        }
        self.state = state;
        self.finished_at = Some(now);
        true
    }
}
