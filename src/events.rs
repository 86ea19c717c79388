use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::entities::customer::CustomerTier;
use crate::entities::order::OrderStatus;

/// Events emitted by the settlement services after their transaction
/// commits. Consumers (notifications, analytics) subscribe through the
/// receiver half of [`channel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Event {
    OrderCreated(Uuid),
    OrderStatusChanged {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderCompleted(Uuid),
    OrderCancelled {
        order_id: Uuid,
        refunded: Decimal,
    },
    OrderDeleted(Uuid),
    CheckoutCompleted {
        order_id: Uuid,
        customer_id: Uuid,
        total: Decimal,
        wallet_used: Decimal,
    },
    PaymentCompleted {
        payment_id: Uuid,
        order_id: Uuid,
        amount: Decimal,
    },
    WalletCredited {
        customer_id: Uuid,
        amount: Decimal,
        order_id: Option<Uuid>,
    },
    WalletDebited {
        customer_id: Uuid,
        amount: Decimal,
        order_id: Option<Uuid>,
    },
    TierChanged {
        customer_id: Uuid,
        tier: CustomerTier,
        at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Sends an event asynchronously.
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Sends an event, logging instead of failing when the receiver is
    /// gone. Events are advisory; losing one must never fail the
    /// settlement operation that produced it.
    pub async fn send_or_log(&self, event: Event) {
        if let Err(e) = self.send(event).await {
            warn!("event dropped: {}", e);
        }
    }
}

/// Create an event channel with the given buffer capacity.
pub fn channel(capacity: usize) -> (EventSender, mpsc::Receiver<Event>) {
    let (tx, rx) = mpsc::channel(capacity);
    (EventSender::new(tx), rx)
}

/// Drain the event channel, logging each event. Serves as the default
/// consumer when the embedding application does not attach its own.
pub fn spawn_event_logger(mut receiver: mpsc::Receiver<Event>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = receiver.recv().await {
            match &event {
                Event::CheckoutCompleted {
                    order_id,
                    total,
                    wallet_used,
                    ..
                } => info!(
                    "checkout completed: order {} total {} (wallet {})",
                    order_id, total, wallet_used
                ),
                Event::OrderStatusChanged { order_id, from, to } => {
                    info!("order {} status {} -> {}", order_id, from, to)
                }
                Event::OrderCancelled { order_id, refunded } => {
                    info!("order {} cancelled, refunded {}", order_id, refunded)
                }
                Event::PaymentCompleted {
                    order_id, amount, ..
                } => info!("payment completed for order {}: {}", order_id, amount),
                other => info!("event: {:?}", other),
            }
        }
        warn!("event channel closed");
    })
}
