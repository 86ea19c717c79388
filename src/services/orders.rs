use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{
    order::{self, OrderStatus},
    order_item,
    payment::{self, PaymentMethod, PaymentStatus},
    wallet_transaction::WalletTransactionKind,
    Order, OrderItem, Payment,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::services::tier::TierService;
use crate::services::wallet::WalletService;

/// An order with its lines and payment, for display.
#[derive(Debug, Clone, Serialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
    pub payment: Option<payment::Model>,
}

/// Owns the order status state machine, including cancellation-triggered
/// refunds and retention-gated deletion.
#[derive(Clone)]
pub struct OrderService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    events: EventSender,
    tiers: Arc<TierService>,
    wallet: Arc<WalletService>,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        events: EventSender,
        tiers: Arc<TierService>,
        wallet: Arc<WalletService>,
    ) -> Self {
        Self {
            db,
            config,
            events,
            tiers,
            wallet,
        }
    }

    /// Advance an order along its lifecycle.
    ///
    /// Completion also recomputes the customer's tier (their monthly spend
    /// just grew) in the same transaction. Cancellation is delegated to
    /// [`cancel`](Self::cancel) so refunds always go through one path.
    #[instrument(skip(self), fields(order_id = %order_id, new_status = %new_status))]
    pub async fn update_status(
        &self,
        order_id: Uuid,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        if new_status == OrderStatus::Cancelled {
            return self.cancel(order_id, None).await;
        }

        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let old_status = order.status;
        if !is_valid_transition(old_status, new_status) {
            return Err(ServiceError::InvalidTransition {
                from: old_status,
                to: new_status,
            });
        }

        let customer_id = order.customer_id;
        let version = order.version;
        let mut active: order::ActiveModel = order.into();
        active.status = Set(new_status);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        if new_status == OrderStatus::Completed {
            self.tiers.recompute_on(&txn, customer_id).await?;
        }

        txn.commit().await?;

        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                from: old_status,
                to: new_status,
            })
            .await;
        if new_status == OrderStatus::Completed {
            self.events.send_or_log(Event::OrderCompleted(order_id)).await;
        }

        info!(%order_id, %old_status, %new_status, "order status updated");
        Ok(updated)
    }

    /// Cancel an order, reversing whatever was already settled.
    ///
    /// Refund eligibility is derived from the ledger itself: any refund
    /// rows already linked to the order mean the reversal has happened and
    /// none is issued again, so a retried or racing cancellation cannot
    /// double-pay. What gets credited back: a completed gateway payment's
    /// amount, and the sum of prior wallet debits for the order.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        order_id: Uuid,
        reason: Option<&str>,
    ) -> Result<order::Model, ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        if order.status.is_terminal() {
            return Err(ServiceError::InvalidTransition {
                from: order.status,
                to: OrderStatus::Cancelled,
            });
        }

        let already_refunded = self.wallet.refunded_for_order_on(&txn, order_id).await?;
        let mut refunded = Decimal::ZERO;

        if already_refunded.is_zero() {
            let gateway_payment = Payment::find()
                .filter(payment::Column::OrderId.eq(order_id))
                .one(&txn)
                .await?
                .filter(|p| {
                    p.method == PaymentMethod::Gateway && p.status == PaymentStatus::Completed
                });

            if let Some(p) = gateway_payment {
                self.wallet
                    .credit_on(
                        &txn,
                        order.customer_id,
                        p.amount,
                        WalletTransactionKind::Refund,
                        Some(order_id),
                        format!("Refund of gateway payment for cancelled order {order_id}"),
                    )
                    .await?;
                refunded += p.amount;
            }

            let wallet_debited = self.wallet.debited_for_order_on(&txn, order_id).await?;
            if wallet_debited > Decimal::ZERO {
                self.wallet
                    .credit_on(
                        &txn,
                        order.customer_id,
                        wallet_debited,
                        WalletTransactionKind::Refund,
                        Some(order_id),
                        format!("Refund of wallet payment for cancelled order {order_id}"),
                    )
                    .await?;
                refunded += wallet_debited;
            }
        }

        let old_status = order.status;
        let customer_id = order.customer_id;
        let version = order.version;
        let notes = match (&order.notes, reason) {
            (Some(notes), Some(reason)) => Some(format!("{notes}\n[cancelled: {reason}]")),
            (None, Some(reason)) => Some(format!("[cancelled: {reason}]")),
            (notes, None) => notes.clone(),
        };

        let mut active: order::ActiveModel = order.into();
        active.status = Set(OrderStatus::Cancelled);
        active.notes = Set(notes);
        active.updated_at = Set(Some(Utc::now()));
        active.version = Set(version + 1);
        let updated = active.update(&txn).await?;

        txn.commit().await?;

        self.events
            .send_or_log(Event::OrderStatusChanged {
                order_id,
                from: old_status,
                to: OrderStatus::Cancelled,
            })
            .await;
        self.events
            .send_or_log(Event::OrderCancelled { order_id, refunded })
            .await;
        if refunded > Decimal::ZERO {
            self.events
                .send_or_log(Event::WalletCredited {
                    customer_id,
                    amount: refunded,
                    order_id: Some(order_id),
                })
                .await;
        }

        info!(%order_id, %refunded, "order cancelled");
        Ok(updated)
    }

    /// Hard-delete an order.
    ///
    /// Permitted only for cancelled orders, or completed orders older than
    /// the retention window — recent financial history is not destroyable.
    /// Line items and the payment go with the order; ledger rows survive
    /// with their order reference nulled.
    #[instrument(skip(self))]
    pub async fn delete(&self, order_id: Uuid) -> Result<(), ServiceError> {
        let txn = self.db.begin().await?;

        let order = Order::find_by_id(order_id)
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let retention = Duration::days(self.config.order_retention_days);
        let deletable = match order.status {
            OrderStatus::Cancelled => true,
            OrderStatus::Completed => order.created_at <= Utc::now() - retention,
            _ => false,
        };
        if !deletable {
            return Err(ServiceError::ValidationError(format!(
                "only cancelled orders, or completed orders older than {} days, may be deleted",
                self.config.order_retention_days
            )));
        }

        OrderItem::delete_many()
            .filter(order_item::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        Payment::delete_many()
            .filter(payment::Column::OrderId.eq(order_id))
            .exec(&txn)
            .await?;
        order.delete(&txn).await?;

        txn.commit().await?;

        self.events.send_or_log(Event::OrderDeleted(order_id)).await;
        info!(%order_id, "order deleted");
        Ok(())
    }

    /// Fetch an order with its lines and payment.
    pub async fn get(&self, order_id: Uuid) -> Result<OrderDetails, ServiceError> {
        let order = Order::find_by_id(order_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let items = order.find_related(OrderItem).all(&*self.db).await?;
        let payment = order.find_related(Payment).one(&*self.db).await?;

        Ok(OrderDetails {
            order,
            items,
            payment,
        })
    }

    /// A customer's orders, newest first.
    pub async fn list_for_customer(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// All orders in a given status, newest first.
    pub async fn list_by_status(
        &self,
        status: OrderStatus,
    ) -> Result<Vec<order::Model>, ServiceError> {
        Ok(Order::find()
            .filter(order::Column::Status.eq(status))
            .order_by_desc(order::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }
}

/// The lifecycle table: forward one step at a time, cancel from any
/// non-terminal state, terminal states immutable.
fn is_valid_transition(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (AwaitingConfirmation, Preparing)
            | (Preparing, Delivering)
            | (Delivering, Completed)
            | (AwaitingConfirmation, Cancelled)
            | (Preparing, Cancelled)
            | (Delivering, Cancelled)
    )
}
