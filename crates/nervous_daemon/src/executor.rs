//! Action dispatch.
//!
//! The fabric is synchronous and must never block on an action, so the
//! executor only pushes onto an unbounded channel. A tokio task drains it.

use nervous_core::{ActionExecutor, ActionKind, FabricAction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct ChannelExecutor {
    tx: mpsc::UnboundedSender<FabricAction>,
}

impl ChannelExecutor {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<FabricAction>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ActionExecutor for ChannelExecutor {
    fn dispatch(&self, action: FabricAction) {
        if let Err(e) = self.tx.send(action) {
            warn!(kind = ?e.0.kind, "Action dispatcher stopped, dropping action");
        }
    }
}

/// Log every action. Task and notification integrations hang off here.
pub fn spawn_dispatcher(mut rx: mpsc::UnboundedReceiver<FabricAction>) -> JoinHandle<u64> {
    tokio::spawn(async move {
        let mut handled = 0u64;
        while let Some(action) = rx.recv().await {
            handled += 1;
            match action.kind {
                ActionKind::CreateTask => {
                    info!(payload = %action.payload, "Task requested")
                }
                ActionKind::Notify => {
                    warn!(payload = %action.payload, "Notification")
                }
                ActionKind::Log => {
                    info!(payload = %action.payload, "Reflex log action")
                }
            }
        }
        handled
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_dispatch_reaches_dispatcher() {
        let (executor, rx) = ChannelExecutor::new();
        let handle = spawn_dispatcher(rx);

        executor.dispatch(FabricAction::new(ActionKind::Notify, json!({"route": "a->b"})));
        executor.dispatch(FabricAction::new(ActionKind::CreateTask, json!({"eventId": "e1"})));
        drop(executor);

        assert_eq!(handle.await.unwrap(), 2);
    }

    #[test]
    fn test_dispatch_after_shutdown_does_not_panic() {
        let (executor, rx) = ChannelExecutor::new();
        drop(rx);
        executor.dispatch(FabricAction::new(ActionKind::Log, json!({})));
    }
}
