//! Fire-and-forget actions handed to the host's executor.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    CreateTask,
    Notify,
    Log,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FabricAction {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub payload: Value,
}

impl FabricAction {
    pub fn new(kind: ActionKind, payload: Value) -> Self {
        Self { kind, payload }
    }
}

/// Receives actions from reflex arcs, unmatched high-severity events and
/// pending-route resolution. Dispatch must not block the caller.
pub trait ActionExecutor: Send + Sync {
    fn dispatch(&self, action: FabricAction);
}

/// Executor for a fabric with no action integration configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

impl ActionExecutor for NoopExecutor {
    fn dispatch(&self, action: FabricAction) {
        tracing::debug!(kind = ?action.kind, "Action executor disabled, dropping action");
    }
}
