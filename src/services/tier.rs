use std::sync::Arc;

use chrono::{DateTime, Datelike, FixedOffset, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    Set, TransactionTrait,
};
use serde::Serialize;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::config::{AppConfig, TierConfig};
use crate::entities::{
    customer::{self, CustomerTier},
    order::{self, OrderStatus},
    Customer, Order,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};

/// Tier information shaped for display.
#[derive(Debug, Clone, Serialize)]
pub struct TierInfo {
    pub tier: CustomerTier,
    pub monthly_spending: Decimal,
    pub discount_percent: u32,
    pub next_tier: Option<CustomerTier>,
    pub amount_to_next_tier: Decimal,
}

/// Computes and persists customer discount tiers from trailing monthly
/// completed-order spend.
///
/// The persisted tier/spend/timestamp triple is a deliberate
/// denormalization: checkout reads the stored tier after a recompute
/// instead of re-aggregating history on every request. Recompute is
/// idempotent and safe to run several times per request.
#[derive(Clone)]
pub struct TierService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    events: EventSender,
}

impl TierService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>, events: EventSender) -> Self {
        Self { db, config, events }
    }

    /// Recompute a customer's tier in its own transaction.
    #[instrument(skip(self))]
    pub async fn recompute(&self, customer_id: Uuid) -> Result<customer::Model, ServiceError> {
        let txn = self.db.begin().await?;
        let before = Customer::find_by_id(customer_id)
            .one(&txn)
            .await?
            .map(|c| c.tier);
        let updated = self.recompute_on(&txn, customer_id).await?;
        txn.commit().await?;

        if before != Some(updated.tier) {
            self.events
                .send_or_log(Event::TierChanged {
                    customer_id,
                    tier: updated.tier,
                    at: updated.tier_updated_at,
                })
                .await;
        }
        Ok(updated)
    }

    /// Recompute a customer's tier on the caller's connection, so checkout
    /// and order completion can fold it into their own atomic unit.
    ///
    /// Month boundaries are taken in the business timezone. A stale
    /// last-recompute month means the accumulator no longer applies; the
    /// fresh aggregation below starts from the new month's completed
    /// orders either way.
    pub async fn recompute_on(
        &self,
        conn: &impl ConnectionTrait,
        customer_id: Uuid,
    ) -> Result<customer::Model, ServiceError> {
        let customer = Customer::find_by_id(customer_id)
            .one(conn)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Customer {customer_id} not found")))?;

        let offset = self.config.business_offset();
        let since = month_start_utc(Utc::now(), offset);

        let completed = Order::find()
            .filter(order::Column::CustomerId.eq(customer_id))
            .filter(order::Column::Status.eq(OrderStatus::Completed))
            .filter(order::Column::CreatedAt.gte(since))
            .all(conn)
            .await?;

        let spending: Decimal = completed.iter().map(|o| o.total_amount).sum();
        let tier = tier_for(&self.config.tier, spending);

        let mut active: customer::ActiveModel = customer.into();
        active.monthly_spending = Set(spending);
        active.tier = Set(tier);
        active.tier_updated_at = Set(Utc::now());
        let updated = active.update(conn).await?;

        info!(%customer_id, %tier, %spending, "tier recomputed");
        Ok(updated)
    }

    /// Recompute and shape the result for display: current tier, discount
    /// percentage, and the distance to the next bracket.
    #[instrument(skip(self))]
    pub async fn classify(&self, customer_id: Uuid) -> Result<TierInfo, ServiceError> {
        let customer = self.recompute(customer_id).await?;
        Ok(self.info_for(&customer))
    }

    fn info_for(&self, customer: &customer::Model) -> TierInfo {
        let tier_cfg = &self.config.tier;
        let spending = customer.monthly_spending;
        let (next_tier, amount_to_next_tier) = match customer.tier {
            CustomerTier::Bronze => (
                Some(CustomerTier::Silver),
                (tier_cfg.silver_threshold - spending).max(Decimal::ZERO),
            ),
            CustomerTier::Silver => (
                Some(CustomerTier::Gold),
                (tier_cfg.gold_threshold - spending).max(Decimal::ZERO),
            ),
            CustomerTier::Gold => (
                Some(CustomerTier::Diamond),
                (tier_cfg.diamond_threshold - spending).max(Decimal::ZERO),
            ),
            CustomerTier::Diamond => (None, Decimal::ZERO),
        };

        TierInfo {
            tier: customer.tier,
            monthly_spending: spending,
            discount_percent: (discount_rate(tier_cfg, customer.tier) * Decimal::ONE_HUNDRED)
                .to_u32()
                .unwrap_or(0),
            next_tier,
            amount_to_next_tier,
        }
    }

    /// The discount applied to a pre-discount order total for a tier.
    pub fn discount_amount(&self, total: Decimal, tier: CustomerTier) -> Decimal {
        total * discount_rate(&self.config.tier, tier)
    }

    /// Batch reset for customers whose last recompute happened in an
    /// earlier month: spend back to zero, tier back to the base bracket.
    /// Suitable for a scheduled job around month rollover.
    #[instrument(skip(self))]
    pub async fn reset_expired_tiers(&self) -> Result<u64, ServiceError> {
        let offset = self.config.business_offset();
        let month_start = month_start_utc(Utc::now(), offset);

        let stale = Customer::find()
            .filter(customer::Column::TierUpdatedAt.lt(month_start))
            .all(&*self.db)
            .await?;

        let txn = self.db.begin().await?;
        let mut reset = 0u64;
        for customer in stale {
            let mut active: customer::ActiveModel = customer.into();
            active.monthly_spending = Set(Decimal::ZERO);
            active.tier = Set(CustomerTier::Bronze);
            active.tier_updated_at = Set(Utc::now());
            active.update(&txn).await?;
            reset += 1;
        }
        txn.commit().await?;

        info!(reset, "expired tiers reset");
        Ok(reset)
    }
}

/// Map cumulative monthly spend to a tier by the configured ascending
/// thresholds.
pub fn tier_for(config: &TierConfig, spending: Decimal) -> CustomerTier {
    if spending >= config.diamond_threshold {
        CustomerTier::Diamond
    } else if spending >= config.gold_threshold {
        CustomerTier::Gold
    } else if spending >= config.silver_threshold {
        CustomerTier::Silver
    } else {
        CustomerTier::Bronze
    }
}

/// Fixed discount rate for a tier, as a fraction.
pub fn discount_rate(config: &TierConfig, tier: CustomerTier) -> Decimal {
    match tier {
        CustomerTier::Bronze => Decimal::ZERO,
        CustomerTier::Silver => config.silver_rate,
        CustomerTier::Gold => config.gold_rate,
        CustomerTier::Diamond => config.diamond_rate,
    }
}

/// First instant of the current calendar month in the given business
/// timezone, expressed in UTC.
pub(crate) fn month_start_utc(now: DateTime<Utc>, offset: FixedOffset) -> DateTime<Utc> {
    let local = now.with_timezone(&offset);
    offset
        .with_ymd_and_hms(local.year(), local.month(), 1, 0, 0, 0)
        .single()
        .map(|start| start.with_timezone(&Utc))
        .unwrap_or(now)
}
