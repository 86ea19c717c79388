use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::entities::{
    cart, cart_item, order,
    order::OrderStatus,
    order_item,
    payment::{self, PaymentMethod, PaymentStatus},
    Cart, CartItem, Payment,
};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::GatewayClient;
use crate::services::tier::TierService;
use crate::services::wallet::WalletService;

/// Checkout command from the storefront.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutInput {
    pub delivery_address: String,
    pub notes: Option<String>,
    pub method: PaymentMethod,
    /// Shopper's IP, forwarded into the gateway request.
    pub client_ip: String,
}

/// What checkout hands back to the storefront.
///
/// `redirect_url` is set only for the gateway path; the caller owns the
/// external redirect, and completion then arrives asynchronously through
/// the signed callback.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutOutcome {
    pub order: order::Model,
    pub payment: payment::Model,
    pub wallet_used: Decimal,
    pub redirect_url: Option<String>,
}

/// Converts a cart into an order plus payment record, choosing wallet,
/// gateway, or hybrid settlement.
#[derive(Clone)]
pub struct CheckoutService {
    db: Arc<DatabaseConnection>,
    config: Arc<AppConfig>,
    events: EventSender,
    tiers: Arc<TierService>,
    wallet: Arc<WalletService>,
    gateway: Arc<GatewayClient>,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        config: Arc<AppConfig>,
        events: EventSender,
        tiers: Arc<TierService>,
        wallet: Arc<WalletService>,
        gateway: Arc<GatewayClient>,
    ) -> Self {
        Self {
            db,
            config,
            events,
            tiers,
            wallet,
            gateway,
        }
    }

    /// Settle the customer's cart into an order.
    ///
    /// Everything from order creation through cart destruction happens in
    /// one transaction: a failure at any step leaves no partial wallet
    /// debit, order, or payment behind. The wallet is always drawn first,
    /// up to the discounted total; only the remainder goes to the chosen
    /// method.
    #[instrument(skip(self, input), fields(method = %input.method))]
    pub async fn checkout(
        &self,
        customer_id: Uuid,
        input: CheckoutInput,
    ) -> Result<CheckoutOutcome, ServiceError> {
        if input.delivery_address.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "delivery address is required".to_string(),
            ));
        }

        let txn = self.db.begin().await?;

        let cart = Cart::find()
            .filter(cart::Column::CustomerId.eq(customer_id))
            .one(&txn)
            .await?
            .ok_or_else(|| ServiceError::ValidationError("cart is empty".to_string()))?;
        let items = cart.find_related(CartItem).all(&txn).await?;
        if items.is_empty() {
            return Err(ServiceError::ValidationError("cart is empty".to_string()));
        }

        let subtotal: Decimal = items
            .iter()
            .map(|line| Decimal::from(line.quantity) * line.unit_price)
            .sum();
        let shipping = shipping_fee(subtotal, &self.config);

        // Tier state may be stale (new month, new completed orders); the
        // discount must come from a fresh recompute in this same unit.
        let customer = self.tiers.recompute_on(&txn, customer_id).await?;
        let pre_discount = subtotal + shipping;
        let discount = self.tiers.discount_amount(pre_discount, customer.tier);
        let total = pre_discount - discount;

        let wallet_used = customer.wallet_balance.min(total);
        let remaining = total - wallet_used;

        if input.method == PaymentMethod::Wallet && remaining > Decimal::ZERO {
            return Err(ServiceError::InsufficientFunds {
                requested: total,
                available: customer.wallet_balance,
            });
        }

        let order_id = Uuid::new_v4();
        let order = order::ActiveModel {
            id: Set(order_id),
            customer_id: Set(customer_id),
            total_amount: Set(total),
            status: Set(OrderStatus::AwaitingConfirmation),
            delivery_address: Set(input.delivery_address.trim().to_string()),
            notes: Set(input.notes.clone()),
            created_at: Set(Utc::now()),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(&txn)
        .await?;

        for line in &items {
            order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                menu_item_id: Set(line.menu_item_id),
                quantity: Set(line.quantity),
                unit_price: Set(line.unit_price),
            }
            .insert(&txn)
            .await?;
        }

        if wallet_used > Decimal::ZERO {
            self.wallet
                .debit_on(
                    &txn,
                    customer_id,
                    wallet_used,
                    order_id,
                    format!("Payment for order {order_id}"),
                )
                .await?;
        }

        let fully_covered = remaining.is_zero();
        let payment = payment::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_id: Set(order_id),
            method: Set(if fully_covered {
                PaymentMethod::Wallet
            } else {
                input.method
            }),
            amount: Set(remaining),
            status: Set(if fully_covered {
                PaymentStatus::Completed
            } else {
                PaymentStatus::Pending
            }),
            transaction_ref: Set(None),
            created_at: Set(Utc::now()),
            completed_at: Set(fully_covered.then(Utc::now)),
        }
        .insert(&txn)
        .await?;

        // The cart dies with a successful checkout.
        CartItem::delete_many()
            .filter(cart_item::Column::CartId.eq(cart.id))
            .exec(&txn)
            .await?;

        txn.commit().await?;

        self.events
            .send_or_log(Event::CheckoutCompleted {
                order_id,
                customer_id,
                total,
                wallet_used,
            })
            .await;
        self.events.send_or_log(Event::OrderCreated(order_id)).await;
        if wallet_used > Decimal::ZERO {
            self.events
                .send_or_log(Event::WalletDebited {
                    customer_id,
                    amount: wallet_used,
                    order_id: Some(order_id),
                })
                .await;
        }
        if fully_covered {
            self.events
                .send_or_log(Event::PaymentCompleted {
                    payment_id: payment.id,
                    order_id,
                    amount: Decimal::ZERO,
                })
                .await;
        }

        // Building the redirect is local computation; nothing left to roll
        // back at this point.
        let redirect_url = if payment.method == PaymentMethod::Gateway
            && payment.status == PaymentStatus::Pending
        {
            Some(self.gateway.build_payment_url(
                order_id,
                remaining,
                &format!("Payment for order {order_id}"),
                &input.client_ip,
            )?)
        } else {
            None
        };

        info!(%order_id, %total, %wallet_used, %remaining, "checkout settled");
        Ok(CheckoutOutcome {
            order,
            payment,
            wallet_used,
            redirect_url,
        })
    }

    /// Complete a pending gateway payment from a signed callback.
    ///
    /// The signature is the integrity boundary: a mismatch rejects the
    /// callback outright, and a valid-but-declined response mutates
    /// nothing. Replays of the confirming callback are no-ops.
    #[instrument(skip(self, params))]
    pub async fn confirm_gateway_payment(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<payment::Model, ServiceError> {
        let callback = self.gateway.verify_callback(params)?;

        let txn = self.db.begin().await?;

        let payment = Payment::find()
            .filter(payment::Column::OrderId.eq(callback.order_id))
            .lock_exclusive()
            .one(&txn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No payment for order {}", callback.order_id))
            })?;

        if !callback.accepted {
            warn!(
                order_id = %callback.order_id,
                code = %callback.response_code,
                "gateway declined payment"
            );
            return Err(ServiceError::PaymentFailed(format!(
                "gateway declined with response code {}",
                callback.response_code
            )));
        }

        if payment.method != PaymentMethod::Gateway {
            return Err(ServiceError::Conflict(format!(
                "payment for order {} is not a gateway payment",
                callback.order_id
            )));
        }

        match payment.status {
            PaymentStatus::Completed => {
                if payment.transaction_ref == callback.transaction_ref {
                    // Replayed callback; settlement already happened.
                    return Ok(payment);
                }
                Err(ServiceError::Conflict(format!(
                    "payment for order {} already completed under a different transaction",
                    callback.order_id
                )))
            }
            PaymentStatus::Pending => {
                let order_id = payment.order_id;
                let amount = payment.amount;
                let payment_id = payment.id;

                let mut active: payment::ActiveModel = payment.into();
                active.status = Set(PaymentStatus::Completed);
                active.transaction_ref = Set(callback.transaction_ref.clone());
                active.completed_at = Set(Some(Utc::now()));
                let updated = active.update(&txn).await?;
                txn.commit().await?;

                self.events
                    .send_or_log(Event::PaymentCompleted {
                        payment_id,
                        order_id,
                        amount,
                    })
                    .await;

                info!(%order_id, %amount, "gateway payment completed");
                Ok(updated)
            }
        }
    }
}

/// Flat fee below the free-shipping threshold, zero at or above it.
fn shipping_fee(subtotal: Decimal, config: &AppConfig) -> Decimal {
    if subtotal >= config.free_shipping_threshold {
        Decimal::ZERO
    } else {
        config.shipping_fee
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::tier::{discount_rate, tier_for};
    use crate::config::TierConfig;
    use crate::entities::customer::CustomerTier;
    use rust_decimal_macros::dec;

    #[test]
    fn shipping_is_flat_below_threshold() {
        let config = AppConfig::new("sqlite::memory:");
        assert_eq!(shipping_fee(dec!(200_000), &config), dec!(35_000));
        assert_eq!(shipping_fee(dec!(499_999), &config), dec!(35_000));
    }

    #[test]
    fn shipping_is_free_at_threshold() {
        let config = AppConfig::new("sqlite::memory:");
        assert_eq!(shipping_fee(dec!(500_000), &config), dec!(0));
        assert_eq!(shipping_fee(dec!(2_000_000), &config), dec!(0));
    }

    #[test]
    fn silver_settlement_arithmetic() {
        // 2 x 100_000 -> 200_000 subtotal, below free shipping, silver 3%.
        let config = AppConfig::new("sqlite::memory:");
        let tier_cfg = TierConfig::default();

        let subtotal = dec!(2) * dec!(100_000);
        let shipping = shipping_fee(subtotal, &config);
        let pre_discount = subtotal + shipping;
        assert_eq!(pre_discount, dec!(235_000));

        let discount = pre_discount * discount_rate(&tier_cfg, CustomerTier::Silver);
        assert_eq!(discount, dec!(7_050));

        let total = pre_discount - discount;
        assert_eq!(total, dec!(227_950));

        let wallet_balance = dec!(50_000);
        let wallet_used = wallet_balance.min(total);
        assert_eq!(wallet_used, dec!(50_000));
        assert_eq!(total - wallet_used, dec!(177_950));
    }

    #[test]
    fn spend_maps_to_silver_for_worked_scenario() {
        let tier_cfg = TierConfig::default();
        assert_eq!(tier_for(&tier_cfg, dec!(1_500_000)), CustomerTier::Silver);
    }
}
