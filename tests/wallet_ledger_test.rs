//! Wallet ledger: balance/ledger agreement, debit guards, and the
//! append-only rule.

mod common;

use common::TestApp;
use rust_decimal_macros::dec;
use savora_core::entities::wallet_transaction::{self, WalletTransactionKind};
use savora_core::ServiceError;

#[tokio::test]
async fn top_ups_keep_balance_and_ledger_in_lockstep() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Khanh Doan").await;

    app.fund_wallet(customer.id, dec!(100_000)).await;
    app.fund_wallet(customer.id, dec!(250_000)).await;

    let balance = app
        .services
        .wallet
        .balance(customer.id)
        .await
        .expect("balance");
    assert_eq!(balance, dec!(350_000));
    assert_eq!(app.ledger_sum(customer.id).await, dec!(350_000));
}

#[tokio::test]
async fn overdraft_is_refused_without_side_effects() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Son Dinh").await;
    app.fund_wallet(customer.id, dec!(30_000)).await;

    let err = app
        .services
        .wallet
        .debit_on(
            &*app.db,
            customer.id,
            dec!(30_001),
            uuid::Uuid::new_v4(),
            "overdraft attempt".to_string(),
        )
        .await
        .expect_err("debit above balance");
    match err {
        ServiceError::InsufficientFunds {
            requested,
            available,
        } => {
            assert_eq!(requested, dec!(30_001));
            assert_eq!(available, dec!(30_000));
        }
        other => panic!("expected InsufficientFunds, got {other:?}"),
    }

    assert_eq!(app.ledger_sum(customer.id).await, dec!(30_000));
    let history = app
        .services
        .wallet
        .history(customer.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 1);
}

#[tokio::test]
async fn debit_up_to_the_full_balance_is_allowed() {
    use chrono::Utc;
    use savora_core::entities::order::OrderStatus;

    let app = TestApp::new().await;
    let customer = app.seed_customer("Chi Lam").await;
    app.fund_wallet(customer.id, dec!(75_000)).await;
    let order = app
        .seed_order(
            customer.id,
            dec!(75_000),
            OrderStatus::AwaitingConfirmation,
            Utc::now(),
        )
        .await;

    app.services
        .wallet
        .debit_on(
            &*app.db,
            customer.id,
            dec!(75_000),
            order.id,
            "exact cover".to_string(),
        )
        .await
        .expect("debit the whole balance");

    assert_eq!(
        app.services
            .wallet
            .balance(customer.id)
            .await
            .expect("balance"),
        dec!(0)
    );
}

#[tokio::test]
async fn zero_amount_transactions_are_rejected() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("My Duong").await;

    let err = app
        .services
        .wallet
        .apply_on(
            &*app.db,
            customer.id,
            dec!(0),
            WalletTransactionKind::TopUp,
            "nothing".to_string(),
            None,
        )
        .await
        .expect_err("zero amount");
    assert!(matches!(err, ServiceError::ValidationError(_)));
}

#[tokio::test]
async fn ledger_rows_are_append_only() {
    use sea_orm::{ActiveModelTrait, ActiveValue::Set};

    let app = TestApp::new().await;
    let customer = app.seed_customer("Long Trieu").await;
    app.fund_wallet(customer.id, dec!(10_000)).await;

    let row = app
        .services
        .wallet
        .history(customer.id)
        .await
        .expect("history")
        .pop()
        .expect("one row");

    let mut active: wallet_transaction::ActiveModel = row.into();
    active.amount = Set(dec!(999_999));
    let err = active.update(&*app.db).await;
    assert!(err.is_err(), "ledger rows must not be editable");

    assert_eq!(app.ledger_sum(customer.id).await, dec!(10_000));
}

#[tokio::test]
async fn history_is_newest_first_with_full_provenance() {
    let app = TestApp::new().await;
    let customer = app.seed_customer("Oanh Kim").await;
    app.fund_wallet(customer.id, dec!(20_000)).await;
    app.fund_wallet(customer.id, dec!(30_000)).await;

    let history = app
        .services
        .wallet
        .history(customer.id)
        .await
        .expect("history");
    assert_eq!(history.len(), 2);
    assert!(history[0].created_at >= history[1].created_at);
    assert!(history
        .iter()
        .all(|row| row.kind == WalletTransactionKind::TopUp));
}
