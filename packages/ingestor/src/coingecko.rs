//! CoinGecko Price Provider

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::pricing::{CoinListing, PriceError, PriceSource};
use crate::rate_limit::{Attempt, RateLimiter};

const QUOTE_CURRENCY: &str = "usd";

/// [`PriceSource`] backed by the CoinGecko public API
pub struct CoinGeckoClient {
    client: reqwest::Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
}

impl CoinGeckoClient {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
        }
    }

    async fn get_json(&self, path: &str, query: &[(&str, &str)]) -> Result<Attempt<Value>, PriceError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::RateLimited);
        }
        if !status.is_success() {
            return Err(PriceError::Status(status.as_u16()));
        }

        Ok(Attempt::Done(response.json().await?))
    }
}

#[async_trait]
impl PriceSource for CoinGeckoClient {
    async fn list_symbols(&self) -> Result<Vec<CoinListing>, PriceError> {
        let body = self
            .limiter
            .execute("coingecko coins/list", || self.get_json("/coins/list", &[]))
            .await?;
        parse_coin_list(body)
    }

    async fn unit_price_usd(&self, id: &str) -> Result<Option<Decimal>, PriceError> {
        let query = [("ids", id), ("vs_currencies", QUOTE_CURRENCY)];
        let body = self
            .limiter
            .execute("coingecko simple/price", || self.get_json("/simple/price", &query))
            .await?;
        parse_simple_price(&body, id)
    }
}

fn parse_coin_list(body: Value) -> Result<Vec<CoinListing>, PriceError> {
    serde_json::from_value(body).map_err(|e| PriceError::Parse(e.to_string()))
}

/// Extract `body[id].usd`; an absent id or currency means no quote
fn parse_simple_price(body: &Value, id: &str) -> Result<Option<Decimal>, PriceError> {
    if !body.is_object() {
        return Err(PriceError::Parse(format!("expected object, got {body}")));
    }
    let Some(quote) = body.get(id).and_then(|coin| coin.get(QUOTE_CURRENCY)) else {
        return Ok(None);
    };

    match quote {
        Value::Number(n) => {
            let text = n.to_string();
            Decimal::from_str(&text)
                .or_else(|_| Decimal::from_scientific(&text))
                .map(Some)
                .map_err(|e| PriceError::Parse(format!("{id} price {text}: {e}")))
        }
        Value::Null => Ok(None),
        other => Err(PriceError::Parse(format!("{id} price is {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use serde_json::json;

    #[test]
    fn test_parse_simple_price() {
        let body = json!({"usd-coin": {"usd": 0.999}});
        assert_eq!(parse_simple_price(&body, "usd-coin").unwrap(), Some(dec!(0.999)));
    }

    #[test]
    fn test_parse_integer_price() {
        let body = json!({"wrapped-bitcoin": {"usd": 64000}});
        assert_eq!(parse_simple_price(&body, "wrapped-bitcoin").unwrap(), Some(dec!(64000)));
    }

    #[test]
    fn test_parse_scientific_price() {
        let body: Value = serde_json::from_str(r#"{"shiba-inu": {"usd": 1.2e-5}}"#).unwrap();
        assert_eq!(parse_simple_price(&body, "shiba-inu").unwrap(), Some(dec!(0.000012)));
    }

    #[test]
    fn test_missing_id_is_no_quote() {
        assert_eq!(parse_simple_price(&json!({}), "tether").unwrap(), None);
    }

    #[test]
    fn test_missing_currency_is_no_quote() {
        let body = json!({"tether": {}});
        assert_eq!(parse_simple_price(&body, "tether").unwrap(), None);
    }

    #[test]
    fn test_non_numeric_price_is_parse_error() {
        let body = json!({"tether": {"usd": "one"}});
        assert!(matches!(parse_simple_price(&body, "tether"), Err(PriceError::Parse(_))));
    }

    #[test]
    fn test_non_object_body_is_parse_error() {
        assert!(matches!(parse_simple_price(&json!([]), "tether"), Err(PriceError::Parse(_))));
    }

    #[test]
    fn test_parse_coin_list() {
        let body = json!([
            {"id": "ethereum", "symbol": "eth", "name": "Ethereum"},
            {"id": "usd-coin", "symbol": "usdc", "name": "USDC"}
        ]);
        let coins = parse_coin_list(body).unwrap();
        assert_eq!(coins.len(), 2);
        assert_eq!(coins[1].id, "usd-coin");
        assert_eq!(coins[1].symbol, "usdc");
    }

    #[test]
    fn test_parse_coin_list_rejects_object() {
        assert!(matches!(
            parse_coin_list(json!({"status": {"error_code": 429}})),
            Err(PriceError::Parse(_))
        ));
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let limiter = Arc::new(RateLimiter::new(crate::rate_limit::RateLimitPolicy::new(
            std::time::Duration::from_secs(1),
            std::time::Duration::from_secs(1),
            0,
        )));
        let client = CoinGeckoClient::new(reqwest::Client::new(), "https://api.coingecko.com/api/v3/", limiter);
        assert_eq!(client.base_url, "https://api.coingecko.com/api/v3");
    }
}
