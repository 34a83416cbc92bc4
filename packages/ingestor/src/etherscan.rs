//! Etherscan ABI Provider
//!
//! Fetches verified contract interfaces through the `contract/getabi` action.
//! Etherscan reports most failures with HTTP 200 and `status: "0"`, so the
//! body is inspected for the unverified and rate limit cases as well.

use std::sync::Arc;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;

use crate::metadata::{AbiError, AbiLookup, AbiSource};
use crate::rate_limit::{Attempt, RateLimiter};

const UNVERIFIED_MARKER: &str = "not verified";
const RATE_LIMIT_MARKER: &str = "rate limit";

#[derive(Debug, Deserialize)]
struct EtherscanResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    message: String,
    #[serde(default)]
    result: Value,
}

/// [`AbiSource`] backed by the Etherscan HTTP API
pub struct EtherscanClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    limiter: Arc<RateLimiter>,
}

impl EtherscanClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        limiter: Arc<RateLimiter>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            limiter,
        }
    }

    async fn fetch_once(&self, address: Address) -> Result<Attempt<AbiLookup>, AbiError> {
        let address = format!("{:#x}", address);
        let response = self
            .client
            .get(&self.base_url)
            .query(&[
                ("module", "contract"),
                ("action", "getabi"),
                ("address", address.as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(Attempt::RateLimited);
        }
        if !status.is_success() {
            return Err(AbiError::Status(status.as_u16()));
        }

        let body: EtherscanResponse = response.json().await?;
        interpret_response(body)
    }
}

#[async_trait]
impl AbiSource for EtherscanClient {
    async fn fetch_interface(&self, address: Address) -> Result<AbiLookup, AbiError> {
        self.limiter
            .execute("etherscan getabi", || self.fetch_once(address))
            .await
    }
}

fn interpret_response(body: EtherscanResponse) -> Result<Attempt<AbiLookup>, AbiError> {
    let result = match &body.result {
        Value::String(s) => s.as_str(),
        other => {
            return Err(AbiError::Provider(format!("unexpected result: {other}")));
        }
    };

    if body.status == "1" {
        let abi: JsonAbi = serde_json::from_str(result)?;
        return Ok(Attempt::Done(AbiLookup::Verified(abi)));
    }

    let lowered = result.to_ascii_lowercase();
    if lowered.contains(UNVERIFIED_MARKER) {
        return Ok(Attempt::Done(AbiLookup::Unverified));
    }
    if lowered.contains(RATE_LIMIT_MARKER) {
        return Ok(Attempt::RateLimited);
    }

    Err(AbiError::Provider(format!("{}: {}", body.message, result)))
}
