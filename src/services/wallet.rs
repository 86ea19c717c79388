use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::entities::{
    customer,
    wallet_transaction::{self, WalletTransactionKind},
    Customer, WalletTransaction,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// The wallet ledger.
///
/// Every balance change is an append-only ledger row plus a matching
/// update of the customer's materialized `wallet_balance`, executed on the
/// same connection — callers running a larger atomic unit (checkout,
/// cancellation) pass their transaction in, so a later failure rolls the
/// ledger back with everything else.
#[derive(Clone)]
pub struct WalletService {
    db: Arc<DatabaseConnection>,
    events: EventSender,
}

impl WalletService {
    pub fn new(db: Arc<DatabaseConnection>, events: EventSender) -> Self {
        Self { db, events }
    }

    /// Append a signed ledger row and move the balance with it.
    ///
    /// Negative amounts are debits and require sufficient balance; the
    /// whole operation fails with `InsufficientFunds` otherwise, applying
    /// nothing. Credits have no upper bound.
    pub async fn apply_on(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
        amount: Decimal,
        kind: WalletTransactionKind,
        description: String,
        order_id: Option<Uuid>,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        if amount.is_zero() {
            return Err(ServiceError::ValidationError(
                "wallet transaction amount must be non-zero".to_string(),
            ));
        }

        let customer = Customer::find_by_id(customer_id)
            .lock_exclusive()
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {customer_id} not found")))?;

        let new_balance = customer.wallet_balance + amount;
        if new_balance < Decimal::ZERO {
            return Err(ServiceError::InsufficientFunds {
                requested: -amount,
                available: customer.wallet_balance,
            });
        }

        let row = wallet_transaction::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            amount: Set(amount),
            kind: Set(kind),
            description: Set(description),
            order_id: Set(order_id),
            created_at: Set(Utc::now()),
        }
        .insert(conn)
        .await?;

        let mut active: customer::ActiveModel = customer.into();
        active.wallet_balance = Set(new_balance);
        active.update(conn).await?;

        info!(%customer_id, %amount, %kind, "wallet transaction applied");
        Ok(row)
    }

    /// Debit `amount` (positive) from the wallet against an order.
    pub async fn debit_on(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
        amount: Decimal,
        order_id: Uuid,
        description: String,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "debit amount must be positive".to_string(),
            ));
        }
        self.apply_on(
            conn,
            customer_id,
            -amount,
            WalletTransactionKind::Payment,
            description,
            Some(order_id),
        )
        .await
    }

    /// Credit `amount` (positive) to the wallet.
    pub async fn credit_on(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
        amount: Decimal,
        kind: WalletTransactionKind,
        order_id: Option<Uuid>,
        description: String,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        if amount <= Decimal::ZERO {
            return Err(ServiceError::ValidationError(
                "credit amount must be positive".to_string(),
            ));
        }
        self.apply_on(conn, customer_id, amount, kind, description, order_id)
            .await
    }

    /// External top-up in its own transaction.
    #[instrument(skip(self))]
    pub async fn top_up(
        &self,
        customer_id: Uuid,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<wallet_transaction::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let row = self
            .credit_on(
                &txn,
                customer_id,
                amount,
                WalletTransactionKind::TopUp,
                None,
                description.unwrap_or_else(|| "Wallet top-up".to_string()),
            )
            .await?;
        txn.commit().await?;

        self.events
            .send_or_log(Event::WalletCredited {
                customer_id,
                amount,
                order_id: None,
            })
            .await;
        Ok(row)
    }

    /// Current materialized balance.
    pub async fn balance(&self, customer_id: Uuid) -> Result<Decimal, ServiceError> {
        let customer = Customer::find_by_id(customer_id)
            .one(&*self.db)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {customer_id} not found")))?;
        Ok(customer.wallet_balance)
    }

    /// Full ledger for a customer, newest first.
    pub async fn history(
        &self,
        customer_id: Uuid,
    ) -> Result<Vec<wallet_transaction::Model>, ServiceError> {
        Ok(WalletTransaction::find()
            .filter(wallet_transaction::Column::CustomerId.eq(customer_id))
            .order_by_desc(wallet_transaction::Column::CreatedAt)
            .all(&*self.db)
            .await?)
    }

    /// Magnitude of payment debits previously recorded against an order.
    ///
    /// The refund path derives what is owed back from these rows rather
    /// than from any cached field.
    pub async fn debited_for_order_on(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let rows = WalletTransaction::find()
            .filter(wallet_transaction::Column::OrderId.eq(order_id))
            .filter(wallet_transaction::Column::Kind.eq(WalletTransactionKind::Payment))
            .all(conn)
            .await?;
        Ok(-rows.iter().map(|r| r.amount).sum::<Decimal>())
    }

    /// Sum of refund credits already issued for an order.
    pub async fn refunded_for_order_on(
        &self,
        conn: &impl ConnectionTrait,
        order_id: Uuid,
    ) -> Result<Decimal, ServiceError> {
        let rows = WalletTransaction::find()
            .filter(wallet_transaction::Column::OrderId.eq(order_id))
            .filter(wallet_transaction::Column::Kind.eq(WalletTransactionKind::Refund))
            .all(conn)
            .await?;
        Ok(rows.iter().map(|r| r.amount).sum::<Decimal>())
    }
}
