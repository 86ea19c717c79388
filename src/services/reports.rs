use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
};
use serde::Serialize;
use tracing::instrument;

use crate::config::AppConfig;
use crate::entities::{
    order::{self, OrderStatus},
    Order,
};
use crate::errors::ServiceError;
use crate::services::tier::month_start_utc;

/// Revenue figures for a time window. Only completed orders count toward
/// revenue; the other buckets exist so dashboards can show the funnel.
#[derive(Debug, Clone, Serialize)]
pub struct RevenueSummary {
    pub total_revenue: Decimal,
    pub completed_orders: u64,
    pub cancelled_orders: u64,
    pub open_orders: u64,
}

/// Read-only revenue reporting for the storefront's dashboard.
#[derive(Clone)]
pub struct ReportsService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
}

impl ReportsService {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>) -> Self {
        Self { db, config }
    }

    /// Summarize orders created within `[from, to)`; open bounds when
    /// `None`.
    #[instrument(skip(self))]
    pub async fn revenue_summary(
        &self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<RevenueSummary, ServiceError> {
        let mut query = Order::find();
        if let Some(from) = from {
            query = query.filter(order::Column::CreatedAt.gte(from));
        }
        if let Some(to) = to {
            query = query.filter(order::Column::CreatedAt.lt(to));
        }

        let orders = query.all(&*self.db).await?;

        let mut summary = RevenueSummary {
            total_revenue: Decimal::ZERO,
            completed_orders: 0,
            cancelled_orders: 0,
            open_orders: 0,
        };
        for order in &orders {
            match order.status {
                OrderStatus::Completed => {
                    summary.completed_orders += 1;
                    summary.total_revenue += order.total_amount;
                }
                OrderStatus::Cancelled => summary.cancelled_orders += 1,
                _ => summary.open_orders += 1,
            }
        }
        Ok(summary)
    }

    /// Revenue for the current business-timezone day.
    pub async fn todays_revenue(&self) -> Result<RevenueSummary, ServiceError> {
        let offset = self.config.business_offset();
        let local_now = Utc::now().with_timezone(&offset);
        let day_start = local_now
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .and_then(|start| start.and_local_timezone(offset).single())
            .map(|start| start.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        self.revenue_summary(Some(day_start), Some(day_start + Duration::days(1)))
            .await
    }

    /// Revenue for the current business-timezone calendar month.
    pub async fn this_months_revenue(&self) -> Result<RevenueSummary, ServiceError> {
        let start = month_start_utc(Utc::now(), self.config.business_offset());
        self.revenue_summary(Some(start), None).await
    }
}
