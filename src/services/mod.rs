pub mod cart;
pub mod checkout;
pub mod orders;
pub mod reports;
pub mod tier;
pub mod wallet;

pub use cart::{CartOwner, CartService, CartWithItems};
pub use checkout::{CheckoutInput, CheckoutOutcome, CheckoutService};
pub use orders::{OrderDetails, OrderService};
pub use reports::{ReportsService, RevenueSummary};
pub use tier::{TierInfo, TierService};
pub use wallet::WalletService;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use crate::config::AppConfig;
use crate::events::EventSender;
use crate::gateway::GatewayClient;

/// The wired-up settlement core: one instance of every service sharing a
/// connection pool, configuration, and event channel.
#[derive(Clone)]
pub struct SettlementServices {
    pub carts: Arc<CartService>,
    pub tiers: Arc<TierService>,
    pub wallet: Arc<WalletService>,
    pub gateway: Arc<GatewayClient>,
    pub checkout: Arc<CheckoutService>,
    pub orders: Arc<OrderService>,
    pub reports: Arc<ReportsService>,
}

impl SettlementServices {
    pub fn new(db: Arc<DatabaseConnection>, config: Arc<AppConfig>, events: EventSender) -> Self {
        let gateway = Arc::new(GatewayClient::new(
            config.gateway.clone(),
            config.business_offset(),
        ));
        let tiers = Arc::new(TierService::new(db.clone(), config.clone(), events.clone()));
        let wallet = Arc::new(WalletService::new(db.clone(), events.clone()));
        let carts = Arc::new(CartService::new(db.clone()));
        let checkout = Arc::new(CheckoutService::new(
            db.clone(),
            config.clone(),
            events.clone(),
            tiers.clone(),
            wallet.clone(),
            gateway.clone(),
        ));
        let orders = Arc::new(OrderService::new(
            db.clone(),
            config.clone(),
            events,
            tiers.clone(),
            wallet.clone(),
        ));
        let reports = Arc::new(ReportsService::new(db, config));

        Self {
            carts,
            tiers,
            wallet,
            gateway,
            checkout,
            orders,
            reports,
        }
    }
}
