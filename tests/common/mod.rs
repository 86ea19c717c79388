#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set};
use sha2::Sha512;
use uuid::Uuid;

use savora_core::config::AppConfig;
use savora_core::db;
use savora_core::entities::{
    customer::{self, CustomerTier},
    menu_item,
    order::{self, OrderStatus},
    wallet_transaction, WalletTransaction,
};
use savora_core::events;
use savora_core::services::SettlementServices;

/// Test harness: the full settlement core wired against an in-memory
/// SQLite database with migrations applied.
pub struct TestApp {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<AppConfig>,
    pub services: SettlementServices,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut config = AppConfig::new("sqlite::memory:");
        config.auto_migrate = true;
        // A single connection keeps every statement on the same in-memory
        // database.
        config.db_max_connections = 1;
        config.db_min_connections = 1;
        config.gateway.merchant_code = "SAVORA01".to_string();
        let config = Arc::new(config);

        let db = Arc::new(db::connect(&config).await.expect("connect test database"));

        let (sender, receiver) = events::channel(64);
        let event_task = events::spawn_event_logger(receiver);
        let services = SettlementServices::new(db.clone(), config.clone(), sender);

        Self {
            db,
            config,
            services,
            _event_task: event_task,
        }
    }

    /// Insert a customer with an empty wallet. Fund it through
    /// [`fund_wallet`](Self::fund_wallet) so the ledger stays consistent
    /// with the balance.
    pub async fn seed_customer(&self, name: &str) -> customer::Model {
        customer::ActiveModel {
            id: Set(Uuid::new_v4()),
            full_name: Set(name.to_string()),
            email: Set(format!(
                "{}@example.com",
                name.to_lowercase().replace(' ', ".")
            )),
            wallet_balance: Set(Decimal::ZERO),
            tier: Set(CustomerTier::Bronze),
            monthly_spending: Set(Decimal::ZERO),
            tier_updated_at: Set(Utc::now()),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed customer")
    }

    /// Top up a customer's wallet through the ledger.
    pub async fn fund_wallet(&self, customer_id: Uuid, amount: Decimal) {
        self.services
            .wallet
            .top_up(customer_id, amount, None)
            .await
            .expect("fund wallet");
    }

    pub async fn seed_menu_item(&self, name: &str, price: Decimal) -> menu_item::Model {
        menu_item::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_string()),
            price: Set(price),
            is_available: Set(true),
            created_at: Set(Utc::now()),
        }
        .insert(&*self.db)
        .await
        .expect("seed menu item")
    }

    /// Insert an order directly in a given status, bypassing checkout.
    /// Used to seed tier history and retention-window fixtures.
    pub async fn seed_order(
        &self,
        customer_id: Uuid,
        total: Decimal,
        status: OrderStatus,
        created_at: DateTime<Utc>,
    ) -> order::Model {
        order::ActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            total_amount: Set(total),
            status: Set(status),
            delivery_address: Set("1 Test Street".to_string()),
            notes: Set(None),
            created_at: Set(created_at),
            updated_at: Set(None),
            version: Set(1),
        }
        .insert(&*self.db)
        .await
        .expect("seed order")
    }

    pub async fn customer(&self, customer_id: Uuid) -> customer::Model {
        customer::Entity::find_by_id(customer_id)
            .one(&*self.db)
            .await
            .expect("query customer")
            .expect("customer exists")
    }

    /// Sum of all ledger rows for a customer — must always equal the
    /// materialized wallet balance.
    pub async fn ledger_sum(&self, customer_id: Uuid) -> Decimal {
        WalletTransaction::find()
            .filter(wallet_transaction::Column::CustomerId.eq(customer_id))
            .all(&*self.db)
            .await
            .expect("query ledger")
            .iter()
            .map(|row| row.amount)
            .sum()
    }

    pub async fn ledger_rows_for_order(&self, order_id: Uuid) -> Vec<wallet_transaction::Model> {
        WalletTransaction::find()
            .filter(wallet_transaction::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .expect("query ledger")
    }

    /// Build a gateway callback the way the provider would: sorted,
    /// URL-encoded, HMAC-SHA512-signed parameters. Implemented
    /// independently of the crate's signer so the two must agree.
    pub fn gateway_callback(
        &self,
        order_id: Uuid,
        transaction_no: &str,
        response_code: &str,
        amount_minor: &str,
    ) -> HashMap<String, String> {
        let mut params = BTreeMap::new();
        params.insert("vnp_Amount".to_string(), amount_minor.to_string());
        params.insert("vnp_BankCode".to_string(), "NCB".to_string());
        params.insert("vnp_ResponseCode".to_string(), response_code.to_string());
        params.insert(
            "vnp_TmnCode".to_string(),
            self.config.gateway.merchant_code.clone(),
        );
        params.insert("vnp_TransactionNo".to_string(), transaction_no.to_string());
        params.insert("vnp_TxnRef".to_string(), order_id.to_string());

        let canonical = params
            .iter()
            .filter(|(_, value)| !value.is_empty())
            .map(|(key, value)| format!("{}={}", url_encode(key), url_encode(value)))
            .collect::<Vec<_>>()
            .join("&");

        let mut mac = Hmac::<Sha512>::new_from_slice(self.config.gateway.hash_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(canonical.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());

        let mut callback: HashMap<String, String> = params.into_iter().collect();
        callback.insert("vnp_SecureHash".to_string(), hash);
        callback
    }
}

fn url_encode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}
