pub mod cart;
pub mod cart_item;
pub mod customer;
pub mod menu_item;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod wallet_transaction;

pub use cart::Entity as Cart;
pub use cart_item::Entity as CartItem;
pub use customer::Entity as Customer;
pub use menu_item::Entity as MenuItem;
pub use order::Entity as Order;
pub use order_item::Entity as OrderItem;
pub use payment::Entity as Payment;
pub use wallet_transaction::Entity as WalletTransaction;
