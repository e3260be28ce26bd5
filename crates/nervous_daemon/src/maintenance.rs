//! Fixed-interval maintenance schedule.

use std::sync::Arc;
use std::time::Duration;

use nervous_core::maintenance::MaintenanceReport;
use nervous_core::Fabric;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::deliveries::DeliveryLedger;

/// Run one cycle and pick up any tickets the pending retry produced.
pub async fn run_once(fabric: &Fabric, ledger: &DeliveryLedger) -> MaintenanceReport {
    let report = fabric.run_maintenance_cycle();
    match report.skipped {
        Some(reason) => debug!(reason = ?reason, "Maintenance cycle skipped"),
        None => {
            let failed = report.failed_stages();
            if failed.is_empty() {
                info!(stages = report.stages.len(), "Maintenance cycle complete");
            } else {
                warn!(failed = ?failed, "Maintenance cycle finished with failed stages");
            }
        }
    }

    let retried = fabric.take_retried_deliveries();
    if !retried.is_empty() {
        info!(count = retried.len(), "Pending routes recovered");
        ledger.track_all(retried).await;
    }
    report
}

pub fn spawn_schedule(fabric: Arc<Fabric>, ledger: Arc<DeliveryLedger>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // the first tick fires immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            run_once(&fabric, &ledger).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use nervous_core::{FabricConfig, NoopExecutor, Severity, WebhookEvent};
    use serde_json::json;

    #[tokio::test]
    async fn test_recovered_routes_land_in_ledger() {
        let mut config = FabricConfig::default();
        config.maintenance.min_spacing_secs = 0;
        config.routing.pending_max_retries = 3;
        let fabric = Fabric::new(config, Arc::new(NoopExecutor)).unwrap();
        let ledger = DeliveryLedger::new();

        let event = WebhookEvent::new("e1", "github", "push", json!({"ref": "main"}), Severity::Low);
        fabric.process(event, &"sink".into()).unwrap();
        assert_eq!(fabric.status().mycelium.pending_routes, 1);

        fabric.mycelium().create_hypha("core", "github", "sink", 90.0).unwrap();
        let report = run_once(&fabric, &ledger).await;

        assert!(report.skipped.is_none());
        let outstanding = ledger.outstanding().await;
        assert_eq!(outstanding.len(), 1);
        assert_eq!(outstanding[0].event.id, "e1");
    }
}
