//! Property-based checks over the pure core: gateway signing round-trips
//! and tier threshold monotonicity.

use std::collections::HashMap;

use chrono::FixedOffset;
use proptest::prelude::*;
use rust_decimal::Decimal;
use savora_core::config::{GatewayConfig, TierConfig};
use savora_core::gateway::GatewayClient;
use savora_core::services::tier::{discount_rate, tier_for};
use savora_core::ServiceError;
use uuid::Uuid;

fn client() -> GatewayClient {
    GatewayClient::new(
        GatewayConfig {
            base_url: "https://pay.example/gateway".to_string(),
            merchant_code: "SAVORA01".to_string(),
            hash_secret: "property_test_secret_key_material".to_string(),
            return_url: "https://shop.example/return".to_string(),
        },
        FixedOffset::east_opt(7 * 3600).expect("offset"),
    )
}

fn parse_query(url: &str) -> HashMap<String, String> {
    let (_, query) = url.split_once('?').expect("query string");
    url::form_urlencoded::parse(query.as_bytes())
        .into_owned()
        .collect()
}

proptest! {
    /// Signing a request then verifying its own parameter set always
    /// passes signature verification and round-trips the order id.
    #[test]
    fn request_signature_round_trips(
        order_bits in any::<u128>(),
        amount_units in 1i64..10_000_000,
        order_info in "[ -~]{0,40}",
        last_octet in 1u8..255,
    ) {
        let client = client();
        let order_id = Uuid::from_u128(order_bits);
        let ip = format!("203.0.113.{last_octet}");

        let url = client
            .build_payment_url(order_id, Decimal::from(amount_units), &order_info, &ip)
            .expect("build url");
        let params = parse_query(&url);

        let outcome = client.verify_callback(&params).expect("own signature verifies");
        prop_assert_eq!(outcome.order_id, order_id);
        // A request carries no response code, so it never reads as an
        // accepted settlement.
        prop_assert!(!outcome.accepted);
    }

    /// Flipping any single signed parameter value invalidates the
    /// signature.
    #[test]
    fn tampering_breaks_the_signature(
        order_bits in any::<u128>(),
        amount_units in 1i64..10_000_000,
        order_info in "[ -~]{1,40}",
    ) {
        let client = client();
        let order_id = Uuid::from_u128(order_bits);

        let url = client
            .build_payment_url(order_id, Decimal::from(amount_units), &order_info, "192.0.2.1")
            .expect("build url");
        let mut params = parse_query(&url);

        let amount = params.get("vnp_Amount").cloned().expect("amount present");
        params.insert("vnp_Amount".to_string(), format!("{amount}9"));

        prop_assert!(matches!(
            client.verify_callback(&params),
            Err(ServiceError::SignatureMismatch)
        ));
    }

    /// More spend never yields a lower tier, and the discount rate grows
    /// with the tier.
    #[test]
    fn tiers_are_monotonic_in_spend(a in 0i64..20_000_000, b in 0i64..20_000_000) {
        let config = TierConfig::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };

        let low_tier = tier_for(&config, Decimal::from(low));
        let high_tier = tier_for(&config, Decimal::from(high));
        prop_assert!(low_tier <= high_tier);
        prop_assert!(discount_rate(&config, low_tier) <= discount_rate(&config, high_tier));
    }

    /// The bracket edges: below the lowest threshold is always the base
    /// tier at 0%, at or past the top threshold always the maximum.
    #[test]
    fn threshold_edges_hold(spend in 0i64..999_999) {
        let config = TierConfig::default();
        let below = tier_for(&config, Decimal::from(spend));
        prop_assert_eq!(discount_rate(&config, below), Decimal::ZERO);

        let top = tier_for(&config, Decimal::from(5_000_000i64 + spend));
        prop_assert_eq!(discount_rate(&config, top), config.diamond_rate);
    }
}
