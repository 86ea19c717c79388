use std::collections::{BTreeMap, HashMap};

use chrono::{FixedOffset, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use sha2::Sha512;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::GatewayConfig;
use crate::errors::ServiceError;

type HmacSha512 = Hmac<Sha512>;

const PROTOCOL_VERSION: &str = "2.1.0";
const COMMAND_PAY: &str = "pay";
const CURRENCY_CODE: &str = "VND";
const LOCALE: &str = "vn";
const ORDER_TYPE: &str = "other";
const SUCCESS_CODE: &str = "00";

const PARAM_PREFIX: &str = "vnp_";
const PARAM_SECURE_HASH: &str = "vnp_SecureHash";
const PARAM_SECURE_HASH_TYPE: &str = "vnp_SecureHashType";
const PARAM_TXN_REF: &str = "vnp_TxnRef";
const PARAM_TRANSACTION_NO: &str = "vnp_TransactionNo";
const PARAM_RESPONSE_CODE: &str = "vnp_ResponseCode";

/// Verified gateway callback.
///
/// `accepted` is true only when the signature checked out *and* the
/// provider reported success; a valid signature with a decline code still
/// yields `accepted == false`.
#[derive(Debug, Clone)]
pub struct CallbackOutcome {
    pub order_id: Uuid,
    pub transaction_ref: Option<String>,
    pub response_code: String,
    pub accepted: bool,
}

/// Adapter for the external payment provider.
///
/// Builds HMAC-SHA512-signed redirect URLs and verifies signed inbound
/// callbacks. Everything here is local computation; the network round trip
/// is the shopper's redirect, owned by the caller.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    business_offset: FixedOffset,
}

impl GatewayClient {
    pub fn new(config: GatewayConfig, business_offset: FixedOffset) -> Self {
        Self {
            config,
            business_offset,
        }
    }

    /// Build the signed payment-page URL for an order.
    ///
    /// The canonical parameter set is serialized in strict ordinal key
    /// order, URL-encoded pair by pair, and signed over the joined string;
    /// the provider recomputes the same signature on its side.
    #[instrument(skip(self))]
    pub fn build_payment_url(
        &self,
        order_id: Uuid,
        amount: Decimal,
        order_info: &str,
        client_ip: &str,
    ) -> Result<String, ServiceError> {
        let minor_units = (amount * Decimal::ONE_HUNDRED)
            .trunc()
            .to_i64()
            .ok_or_else(|| {
                ServiceError::ValidationError(format!("amount {amount} out of gateway range"))
            })?;
        if minor_units <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "gateway amount must be positive, got {amount}"
            )));
        }

        let create_date = Utc::now()
            .with_timezone(&self.business_offset)
            .format("%Y%m%d%H%M%S")
            .to_string();

        let mut params = BTreeMap::new();
        for (key, value) in [
            ("vnp_Version", PROTOCOL_VERSION.to_string()),
            ("vnp_Command", COMMAND_PAY.to_string()),
            ("vnp_TmnCode", self.config.merchant_code.clone()),
            ("vnp_Amount", minor_units.to_string()),
            ("vnp_CreateDate", create_date),
            ("vnp_CurrCode", CURRENCY_CODE.to_string()),
            ("vnp_IpAddr", client_ip.to_string()),
            ("vnp_Locale", LOCALE.to_string()),
            ("vnp_OrderInfo", order_info.to_string()),
            ("vnp_OrderType", ORDER_TYPE.to_string()),
            ("vnp_ReturnUrl", self.config.return_url.clone()),
            (PARAM_TXN_REF, order_id.to_string()),
        ] {
            if !value.is_empty() {
                params.insert(key.to_string(), value);
            }
        }

        let query = canonical_query(&params);
        let signature = self.sign(&query);

        info!(%order_id, "built gateway payment url");
        Ok(format!(
            "{}?{}&{}={}",
            self.config.base_url, query, PARAM_SECURE_HASH, signature
        ))
    }

    /// Verify an inbound callback's signature and extract its outcome.
    ///
    /// The hash fields themselves are stripped from the parameter set
    /// before re-signing; comparison is case-insensitive over the hex
    /// digest. A signature mismatch is a hard reject.
    #[instrument(skip(self, params))]
    pub fn verify_callback(
        &self,
        params: &HashMap<String, String>,
    ) -> Result<CallbackOutcome, ServiceError> {
        let supplied_hash = params
            .get(PARAM_SECURE_HASH)
            .filter(|h| !h.is_empty())
            .ok_or(ServiceError::SignatureMismatch)?;

        let signed_params: BTreeMap<String, String> = params
            .iter()
            .filter(|(key, value)| {
                key.starts_with(PARAM_PREFIX)
                    && !value.is_empty()
                    && key.as_str() != PARAM_SECURE_HASH
                    && key.as_str() != PARAM_SECURE_HASH_TYPE
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        let expected = self.sign(&canonical_query(&signed_params));
        if !expected.eq_ignore_ascii_case(supplied_hash) {
            warn!("gateway callback rejected: signature mismatch");
            return Err(ServiceError::SignatureMismatch);
        }

        let txn_ref = signed_params.get(PARAM_TXN_REF).ok_or_else(|| {
            ServiceError::ValidationError("callback missing vnp_TxnRef".to_string())
        })?;
        let order_id = Uuid::parse_str(txn_ref).map_err(|_| {
            ServiceError::ValidationError(format!("callback vnp_TxnRef {txn_ref} is not an order id"))
        })?;

        let response_code = signed_params
            .get(PARAM_RESPONSE_CODE)
            .cloned()
            .unwrap_or_default();

        Ok(CallbackOutcome {
            order_id,
            transaction_ref: signed_params.get(PARAM_TRANSACTION_NO).cloned(),
            accepted: response_code == SUCCESS_CODE,
            response_code,
        })
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = HmacSha512::new_from_slice(self.config.hash_secret.as_bytes())
            .expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }
}

/// Serialize parameters as `key=value` pairs, URL-encoded, joined with
/// `&`, in the map's (ordinal) key order. This exact byte sequence is what
/// gets signed, so both directions must use it unchanged.
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .filter(|(_, value)| !value.is_empty())
        .map(|(key, value)| format!("{}={}", url_encode(key), url_encode(value)))
        .collect::<Vec<_>>()
        .join("&")
}

fn url_encode(input: &str) -> String {
    url::form_urlencoded::byte_serialize(input.as_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn client() -> GatewayClient {
        GatewayClient::new(
            GatewayConfig {
                base_url: "https://pay.example/gateway".to_string(),
                merchant_code: "SAVORA01".to_string(),
                hash_secret: "test_secret_key_with_enough_length".to_string(),
                return_url: "https://shop.example/return".to_string(),
            },
            FixedOffset::east_opt(7 * 3600).expect("valid offset"),
        )
    }

    fn callback_params(client: &GatewayClient, order_id: Uuid, code: &str) -> HashMap<String, String> {
        let mut signed = BTreeMap::new();
        signed.insert("vnp_Amount".to_string(), "17795000".to_string());
        signed.insert("vnp_TmnCode".to_string(), "SAVORA01".to_string());
        signed.insert("vnp_TxnRef".to_string(), order_id.to_string());
        signed.insert("vnp_TransactionNo".to_string(), "14422574".to_string());
        signed.insert("vnp_ResponseCode".to_string(), code.to_string());

        let hash = client.sign(&canonical_query(&signed));
        let mut params: HashMap<String, String> = signed.into_iter().collect();
        params.insert("vnp_SecureHash".to_string(), hash);
        params
    }

    #[test]
    fn payment_url_parameters_are_sorted_and_signed() {
        let client = client();
        let order_id = Uuid::new_v4();
        let url = client
            .build_payment_url(order_id, dec!(177950), "Payment for order", "203.0.113.7")
            .expect("url");

        let (base, query) = url.split_once('?').expect("query string");
        assert_eq!(base, "https://pay.example/gateway");

        let keys: Vec<&str> = query
            .split('&')
            .map(|pair| pair.split_once('=').expect("pair").0)
            .collect();

        // Signature rides last, outside the signed set.
        assert_eq!(keys.last(), Some(&"vnp_SecureHash"));

        let signed_keys = &keys[..keys.len() - 1];
        let mut sorted = signed_keys.to_vec();
        sorted.sort_unstable();
        assert_eq!(signed_keys, sorted.as_slice());

        assert!(query.contains("vnp_Amount=17795000"));
        assert!(query.contains("vnp_Version=2.1.0"));
        assert!(query.contains(&format!("vnp_TxnRef={order_id}")));
    }

    #[test]
    fn own_callback_round_trips() {
        let client = client();
        let order_id = Uuid::new_v4();
        let params = callback_params(&client, order_id, "00");

        let outcome = client.verify_callback(&params).expect("valid signature");
        assert!(outcome.accepted);
        assert_eq!(outcome.order_id, order_id);
        assert_eq!(outcome.transaction_ref.as_deref(), Some("14422574"));
    }

    #[test]
    fn uppercased_hash_still_verifies() {
        let client = client();
        let order_id = Uuid::new_v4();
        let mut params = callback_params(&client, order_id, "00");
        let hash = params.get("vnp_SecureHash").cloned().expect("hash");
        params.insert("vnp_SecureHash".to_string(), hash.to_uppercase());

        assert!(client.verify_callback(&params).is_ok());
    }

    #[test]
    fn flipped_parameter_invalidates_signature() {
        let client = client();
        let order_id = Uuid::new_v4();
        let mut params = callback_params(&client, order_id, "00");
        params.insert("vnp_Amount".to_string(), "17795001".to_string());

        assert!(matches!(
            client.verify_callback(&params),
            Err(ServiceError::SignatureMismatch)
        ));
    }

    #[test]
    fn decline_code_is_not_accepted() {
        let client = client();
        let order_id = Uuid::new_v4();
        let params = callback_params(&client, order_id, "24");

        let outcome = client.verify_callback(&params).expect("valid signature");
        assert!(!outcome.accepted);
        assert_eq!(outcome.response_code, "24");
    }

    #[test]
    fn missing_hash_is_a_mismatch() {
        let client = client();
        let order_id = Uuid::new_v4();
        let mut params = callback_params(&client, order_id, "00");
        params.remove("vnp_SecureHash");

        assert!(matches!(
            client.verify_callback(&params),
            Err(ServiceError::SignatureMismatch)
        ));
    }

    #[test]
    fn non_gateway_parameters_are_ignored_when_signing() {
        let client = client();
        let order_id = Uuid::new_v4();
        let mut params = callback_params(&client, order_id, "00");
        params.insert("utm_source".to_string(), "email".to_string());

        assert!(client.verify_callback(&params).is_ok());
    }

    #[test]
    fn garbled_txn_ref_is_rejected() {
        let client = client();
        let mut signed = BTreeMap::new();
        signed.insert("vnp_TxnRef".to_string(), "not-a-uuid".to_string());
        signed.insert("vnp_ResponseCode".to_string(), "00".to_string());
        let hash = client.sign(&canonical_query(&signed));
        let mut params: HashMap<String, String> = signed.into_iter().collect();
        params.insert("vnp_SecureHash".to_string(), hash);

        assert!(matches!(
            client.verify_callback(&params),
            Err(ServiceError::ValidationError(_))
        ));
    }

    #[test]
    fn amount_scales_to_minor_units() {
        let client = client();
        let url = client
            .build_payment_url(Uuid::new_v4(), dec!(227950), "order", "127.0.0.1")
            .expect("url");
        assert!(url.contains("vnp_Amount=22795000"));
    }

    #[test]
    fn zero_amount_is_rejected() {
        let client = client();
        assert!(matches!(
            client.build_payment_url(Uuid::new_v4(), dec!(0), "order", "127.0.0.1"),
            Err(ServiceError::ValidationError(_))
        ));
    }
}
