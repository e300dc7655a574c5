use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

// Define the various events that can occur in the engine. Consumers drain
// them through `process_events`; producers never depend on delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    // Level events
    LevelInitialized {
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        quantity: Decimal,
    },
    LevelChanged {
        tenant_id: Uuid,
        product_id: Uuid,
        variant_id: Option<Uuid>,
        location_id: Uuid,
        previous_level: Decimal,
        new_level: Decimal,
        movement_id: Uuid,
    },
    LowStock {
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        current_level: Decimal,
        reorder_point: Decimal,
        reorder_quantity: Decimal,
    },

    // Ledger events
    MovementRecorded {
        tenant_id: Uuid,
        movement_id: Uuid,
        movement_type: String,
        quantity: Decimal,
        pending_approval: bool,
    },
    MovementApproved {
        tenant_id: Uuid,
        movement_id: Uuid,
        approved_by: Uuid,
    },
    MovementRejected {
        tenant_id: Uuid,
        movement_id: Uuid,
        rejected_by: Uuid,
    },

    // Reconciliation events
    VarianceDetected {
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        variance: Decimal,
        variance_value: Option<Decimal>,
    },
    ReconciliationCompleted {
        tenant_id: Uuid,
        location_id: Uuid,
        total_items: u64,
        items_with_variance: u64,
        accuracy_percentage: Decimal,
        completed_at: DateTime<Utc>,
    },

    // Transfer events
    TransferCompleted {
        tenant_id: Uuid,
        product_id: Uuid,
        from_location_id: Uuid,
        to_location_id: Uuid,
        quantity: Decimal,
        reference_id: Uuid,
    },

    // Batch events
    BatchCreated {
        tenant_id: Uuid,
        batch_id: Uuid,
        batch_number: String,
        quantity: Decimal,
    },
    BatchConsumed {
        tenant_id: Uuid,
        batch_id: Uuid,
        quantity: Decimal,
        remaining: Decimal,
    },
    BatchRecalled {
        tenant_id: Uuid,
        batch_number: String,
        batches_affected: u64,
    },
    BatchExpired {
        tenant_id: Uuid,
        batch_id: Uuid,
        batch_number: String,
    },

    // Reservation events
    ReservationCreated {
        tenant_id: Uuid,
        reservation_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        quantity: Decimal,
    },
    ReservationReleased {
        tenant_id: Uuid,
        reservation_id: Uuid,
        quantity: Decimal,
    },
    ReservationConsumed {
        tenant_id: Uuid,
        reservation_id: Uuid,
        movement_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Builds a sender/receiver pair with the given channel capacity.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event, surfacing delivery failure to the caller.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Fire-and-forget delivery. Mutation success must never depend on the
    /// notification sink, so a full or closed channel is logged and dropped.
    pub async fn emit(&self, event: Event) {
        if let Err(e) = self.sender.send(event).await {
            warn!(error = %e, "event sink unavailable, dropping notification");
        }
    }
}

// Drains incoming events and logs them. External consumers replace this loop
// with their own dispatch (webhooks, notification fan-out, projections).
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::LowStock {
                product_id,
                location_id,
                current_level,
                reorder_point,
                ..
            } => {
                warn!(
                    product_id = %product_id,
                    location_id = %location_id,
                    current_level = %current_level,
                    reorder_point = %reorder_point,
                    "Low stock threshold reached"
                );
            }
            Event::VarianceDetected {
                product_id,
                variance,
                ..
            } => {
                warn!(
                    product_id = %product_id,
                    variance = %variance,
                    "Inventory variance detected"
                );
            }
            other => {
                info!(event = ?other, "Received event");
            }
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn emit_does_not_fail_when_receiver_dropped() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);

        // Must not panic or return an error path to the caller.
        sender
            .emit(Event::LowStock {
                tenant_id: Uuid::new_v4(),
                product_id: Uuid::new_v4(),
                location_id: Uuid::new_v4(),
                current_level: dec!(3),
                reorder_point: dec!(10),
                reorder_quantity: dec!(50),
            })
            .await;
    }

    #[tokio::test]
    async fn send_surfaces_failure_when_receiver_dropped() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);

        let result = sender
            .send(Event::MovementApproved {
                tenant_id: Uuid::new_v4(),
                movement_id: Uuid::new_v4(),
                approved_by: Uuid::new_v4(),
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn events_round_trip_through_channel() {
        let (sender, mut rx) = EventSender::channel(4);
        let tenant_id = Uuid::new_v4();

        sender
            .emit(Event::BatchRecalled {
                tenant_id,
                batch_number: "LOT-2024-001".to_string(),
                batches_affected: 2,
            })
            .await;

        match rx.recv().await {
            Some(Event::BatchRecalled {
                tenant_id: got,
                batch_number,
                batches_affected,
            }) => {
                assert_eq!(got, tenant_id);
                assert_eq!(batch_number, "LOT-2024-001");
                assert_eq!(batches_affected, 2);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
