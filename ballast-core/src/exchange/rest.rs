//! Signed REST exchange client.
//!
//! Authenticated endpoints take the request parameters plus a millisecond
//! timestamp, canonicalized as `k=v&…` in sorted key order and signed with
//! HMAC-SHA256; the hex digest travels in a signature header next to the
//! API key.

use super::{AccountSnapshot, Exchange, ExchangeError};
use crate::domain::OrderSide;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Deserialize)]
struct BalanceResponse {
    #[serde(rename = "Success")]
    success: bool,
    #[serde(rename = "ErrMsg", default)]
    err_msg: String,
    #[serde(rename = "SpotWallet", alias = "Wallet", default)]
    wallet: HashMap<String, WalletEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct WalletEntry {
    #[serde(rename = "Free", default)]
    free: f64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    #[serde(rename = "Success")]
    success: bool,
    #[serde(rename = "ErrMsg", default)]
    err_msg: String,
}

pub struct RestExchange {
    client: reqwest::blocking::Client,
    base_url: String,
    api_key: String,
    secret_key: String,
    quote_currency: String,
}

impl RestExchange {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        secret_key: impl Into<String>,
    ) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .expect("failed to build HTTP client");
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            secret_key: secret_key.into(),
            quote_currency: "USD".to_string(),
        }
    }

    pub fn with_quote_currency(mut self, quote: impl Into<String>) -> Self {
        self.quote_currency = quote.into();
        self
    }

    /// Stamp, canonicalize, and sign a parameter set.
    fn signed_params(&self, mut params: BTreeMap<String, String>) -> (BTreeMap<String, String>, String) {
        params.insert(
            "timestamp".to_string(),
            Utc::now().timestamp_millis().to_string(),
        );
        let canonical = canonical_query(&params);
        let sig = signature(&self.secret_key, &canonical);
        (params, sig)
    }
}

/// `k=v` pairs joined with `&` in sorted key order.
fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// Hex HMAC-SHA256 of the canonical query.
fn signature(secret: &str, canonical: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(canonical.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

impl Exchange for RestExchange {
    fn get_positions_and_equity(
        &self,
        prices: &HashMap<String, f64>,
    ) -> Result<AccountSnapshot, ExchangeError> {
        let (params, sig) = self.signed_params(BTreeMap::new());
        let response = self
            .client
            .get(format!("{}/v3/balance", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .header("X-SIGNATURE", sig)
            .query(&params)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExchangeError::ResponseFormat(format!(
                "balance endpoint returned status {status}"
            )));
        }
        let balance: BalanceResponse = response
            .json()
            .map_err(|e| ExchangeError::ResponseFormat(e.to_string()))?;
        if !balance.success {
            return Err(ExchangeError::Rejected(balance.err_msg));
        }

        let mut snapshot = AccountSnapshot::default();
        let cash_keys = [self.quote_currency.as_str(), "USDT"];
        for key in cash_keys {
            if let Some(entry) = balance.wallet.get(key) {
                snapshot.free_cash = entry.free;
                snapshot.total_equity += entry.free;
                break;
            }
        }
        for (coin, entry) in &balance.wallet {
            if cash_keys.contains(&coin.as_str()) || entry.free <= 0.0 {
                continue;
            }
            let pair = format!("{coin}/{}", self.quote_currency);
            let price = prices.get(&pair).copied().unwrap_or(0.0);
            snapshot.total_equity += entry.free * price;
            snapshot.positions.insert(pair, entry.free);
        }
        debug!(
            positions = snapshot.positions.len(),
            equity = snapshot.total_equity,
            cash = snapshot.free_cash,
            "parsed balance"
        );
        Ok(snapshot)
    }

    fn submit_order(
        &self,
        symbol: &str,
        side: OrderSide,
        quantity: f64,
    ) -> Result<serde_json::Value, ExchangeError> {
        let params = BTreeMap::from([
            ("pair".to_string(), symbol.to_string()),
            ("side".to_string(), side.as_str().to_uppercase()),
            ("quantity".to_string(), quantity.to_string()),
            ("type".to_string(), "MARKET".to_string()),
        ]);
        let (params, sig) = self.signed_params(params);
        let response = self
            .client
            .post(format!("{}/v3/place_order", self.base_url))
            .header("X-API-KEY", &self.api_key)
            .header("X-SIGNATURE", sig)
            .form(&params)
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ExchangeError::ResponseFormat(format!(
                "order endpoint returned status {status}"
            )));
        }
        let raw: serde_json::Value = response
            .json()
            .map_err(|e| ExchangeError::ResponseFormat(e.to_string()))?;
        let ack: OrderResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ExchangeError::ResponseFormat(e.to_string()))?;
        if !ack.success {
            return Err(ExchangeError::Rejected(ack.err_msg));
        }
        Ok(raw)
    }
}
