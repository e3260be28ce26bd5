//! Outstanding delivery tickets, waiting for their delivery result.

use std::collections::BTreeMap;

use nervous_core::DeliveryTicket;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Default)]
pub struct DeliveryLedger {
    tickets: Mutex<BTreeMap<u64, DeliveryTicket>>,
}

impl DeliveryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, ticket: DeliveryTicket) {
        debug!(ticket = ticket.id, event = %ticket.event.id, destination = %ticket.destination, "Tracking delivery");
        self.tickets.lock().await.insert(ticket.id, ticket);
    }

    pub async fn track_all(&self, tickets: impl IntoIterator<Item = DeliveryTicket>) {
        let mut guard = self.tickets.lock().await;
        for ticket in tickets {
            guard.insert(ticket.id, ticket);
        }
    }

    pub async fn take(&self, id: u64) -> Option<DeliveryTicket> {
        self.tickets.lock().await.remove(&id)
    }

    pub async fn outstanding(&self) -> Vec<DeliveryTicket> {
        self.tickets.lock().await.values().cloned().collect()
    }
}
