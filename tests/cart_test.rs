//! Cart behavior: price snapshots, quantity merging, guest carts, and the
//! login-time merge.

mod common;

use common::TestApp;
use rust_decimal_macros::dec;
use savora_core::services::CartOwner;
use savora_core::ServiceError;
use uuid::Uuid;

#[tokio::test]
async fn adding_the_same_item_merges_quantity_and_keeps_the_snapshot() {
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};
    use savora_core::entities::menu_item;

    let app = TestApp::new().await;
    let customer = app.seed_customer("Cart Fan").await;
    let owner = CartOwner::Customer(customer.id);
    let item = app.seed_menu_item("Bun bo", dec!(70_000)).await;

    app.services
        .carts
        .add_item(&owner, item.id, 1)
        .await
        .expect("first add");

    // Price changes between the two adds.
    let mut active: menu_item::ActiveModel = item.clone().into();
    active.price = Set(dec!(90_000));
    active.update(&*app.db).await.expect("reprice");

    let cart = app
        .services
        .carts
        .add_item(&owner, item.id, 2)
        .await
        .expect("second add");

    assert_eq!(cart.items.len(), 1);
    assert_eq!(cart.items[0].quantity, 3);
    // The line keeps the price captured at first add.
    assert_eq!(cart.items[0].unit_price, dec!(70_000));
}

#[tokio::test]
async fn quantity_zero_removes_the_line() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Undecided").await;
    let owner = CartOwner::Customer(customer.id);
    let item = app.seed_menu_item("Che ba mau", dec!(25_000)).await;

    app.services
        .carts
        .add_item(&owner, item.id, 2)
        .await
        .expect("add");
    let cart = app
        .services
        .carts
        .update_quantity(&owner, item.id, 0)
        .await
        .expect("set to zero");

    assert!(cart.items.is_empty());
}

#[tokio::test]
async fn invalid_quantities_are_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Fat Fingers").await;
    let owner = CartOwner::Customer(customer.id);
    let item = app.seed_menu_item("Nuoc mia", dec!(15_000)).await;

    assert!(matches!(
        app.services.carts.add_item(&owner, item.id, 0).await,
        Err(ServiceError::ValidationError(_))
    ));
    assert!(matches!(
        app.services.carts.add_item(&owner, item.id, -2).await,
        Err(ServiceError::ValidationError(_))
    ));
    assert!(matches!(
        app.services.carts.update_quantity(&owner, item.id, -1).await,
        Err(ServiceError::ValidationError(_))
    ));
}

#[tokio::test]
async fn unknown_and_unavailable_items_are_rejected() {
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};
    use savora_core::entities::menu_item;

    let app = TestApp::new().await;
    let customer = app.seed_customer("Hopeful").await;
    let owner = CartOwner::Customer(customer.id);

    assert!(matches!(
        app.services.carts.add_item(&owner, Uuid::new_v4(), 1).await,
        Err(ServiceError::NotFound(_))
    ));

    let item = app.seed_menu_item("Seasonal special", dec!(99_000)).await;
    let mut active: menu_item::ActiveModel = item.clone().into();
    active.is_available = Set(false);
    active.update(&*app.db).await.expect("take off the menu");

    assert!(matches!(
        app.services.carts.add_item(&owner, item.id, 1).await,
        Err(ServiceError::ValidationError(_))
    ));
}

#[tokio::test]
async fn guests_keep_their_own_carts() {
    let app = TestApp::new().await;
    let guest_a = CartOwner::Guest("sess-aaaa".to_string());
    let guest_b = CartOwner::Guest("sess-bbbb".to_string());
    let item = app.seed_menu_item("Banh xeo", dec!(55_000)).await;

    app.services
        .carts
        .add_item(&guest_a, item.id, 2)
        .await
        .expect("guest a adds");

    let cart_a = app
        .services
        .carts
        .get_with_items(&guest_a)
        .await
        .expect("cart a");
    let cart_b = app
        .services
        .carts
        .get_with_items(&guest_b)
        .await
        .expect("cart b");

    assert_eq!(cart_a.items.len(), 1);
    assert!(cart_b.items.is_empty());
    assert_ne!(cart_a.cart.id, cart_b.cart.id);
}

#[tokio::test]
async fn login_merges_the_guest_cart_into_the_customer_cart() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Returning Shopper").await;
    let owner = CartOwner::Customer(customer.id);
    let guest = CartOwner::Guest("sess-merge".to_string());

    let shared = app.seed_menu_item("Pho tai", dec!(95_000)).await;
    let guest_only = app.seed_menu_item("Tra da", dec!(10_000)).await;

    app.services
        .carts
        .add_item(&owner, shared.id, 1)
        .await
        .expect("customer adds");
    app.services
        .carts
        .add_item(&guest, shared.id, 2)
        .await
        .expect("guest adds shared");
    app.services
        .carts
        .add_item(&guest, guest_only.id, 1)
        .await
        .expect("guest adds own");

    app.services
        .carts
        .merge_guest_cart("sess-merge", customer.id)
        .await
        .expect("merge");

    let merged = app
        .services
        .carts
        .get_with_items(&owner)
        .await
        .expect("merged cart");
    assert_eq!(merged.items.len(), 2);

    let shared_line = merged
        .items
        .iter()
        .find(|line| line.menu_item_id == shared.id)
        .expect("shared line");
    assert_eq!(shared_line.quantity, 3);

    // The guest cart is gone; a new lookup starts empty.
    let guest_after = app
        .services
        .carts
        .get_with_items(&guest)
        .await
        .expect("guest cart");
    assert!(guest_after.items.is_empty());
}

#[tokio::test]
async fn clear_empties_the_cart_but_keeps_it() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Changed Mind").await;
    let owner = CartOwner::Customer(customer.id);
    let item = app.seed_menu_item("Sua chua", dec!(20_000)).await;

    app.services
        .carts
        .add_item(&owner, item.id, 4)
        .await
        .expect("add");
    let before = app
        .services
        .carts
        .get_with_items(&owner)
        .await
        .expect("cart before");

    app.services.carts.clear(&owner).await.expect("clear");

    let after = app
        .services
        .carts
        .get_with_items(&owner)
        .await
        .expect("cart after");
    assert!(after.items.is_empty());
    assert_eq!(before.cart.id, after.cart.id);
}
