//! Value Normalization
//!
//! Scales raw token amounts by their decimal precision and converts them to
//! USD through the price provider. Arithmetic is decimal and checked; prices
//! are passed through as quoted.

use std::collections::HashMap;
use std::str::FromStr;

use alloy::primitives::U256;
use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::rate_limit::RateLimitExceeded;

/// Errors that can occur talking to the price provider
#[derive(Error, Debug)]
pub enum PriceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Price provider returned HTTP {0}")]
    Status(u16),

    #[error("Malformed price response: {0}")]
    Parse(String),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

/// Errors converting a raw amount into a decimal quantity
#[derive(Error, Debug, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("Amount {raw} with {decimals} decimals exceeds decimal range")]
    Overflow { raw: U256, decimals: u8 },

    #[error("Amount {raw} with {decimals} decimals rounds to zero")]
    Underflow { raw: U256, decimals: u8 },

    #[error("USD value of {quantity} at {unit_price} exceeds decimal range")]
    ValueOverflow { quantity: Decimal, unit_price: Decimal },
}

/// One entry of the provider's coin catalog
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoinListing {
    pub id: String,
    pub symbol: String,
    #[serde(default)]
    pub name: String,
}

/// Source of USD quotes
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Full coin catalog, used once at startup
    async fn list_symbols(&self) -> Result<Vec<CoinListing>, PriceError>;

    /// Current USD price for a provider coin id; `None` if not quoted
    async fn unit_price_usd(&self, id: &str) -> Result<Option<Decimal>, PriceError>;
}

/// Lower-cased ticker to provider coin id, fixed for the process lifetime
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolPriceMap {
    ids: HashMap<String, String>,
}

impl SymbolPriceMap {
    /// Build from a catalog snapshot
    ///
    /// Tickers are not unique in the catalog; the last listing wins.
    pub fn from_listings(listings: impl IntoIterator<Item = CoinListing>) -> Self {
        let ids = listings
            .into_iter()
            .map(|coin| (coin.symbol.to_lowercase(), coin.id))
            .collect();
        Self { ids }
    }

    /// Fetch the catalog from the provider and build the map
    pub async fn load<P: PriceSource + ?Sized>(source: &P) -> Result<Self, PriceError> {
        let listings = source.list_symbols().await?;
        let map = Self::from_listings(listings);
        info!(symbols = map.len(), "Loaded symbol price map");
        Ok(map)
    }

    pub fn id_for(&self, symbol: &str) -> Option<&str> {
        self.ids.get(&symbol.to_lowercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Why a transfer could not be valued
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Unavailable {
    /// The token did not report a symbol
    NoSymbol,
    /// The symbol is not in the price catalog
    UnknownSymbol(String),
    /// The provider has no quote for the coin
    NoQuote(String),
}

/// Result of valuing one transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Valuation {
    Usd {
        quantity: Decimal,
        unit_price: Decimal,
        value: Decimal,
    },
    Unavailable(Unavailable),
}

impl Valuation {
    pub fn usd_value(&self) -> Option<Decimal> {
        match self {
            Valuation::Usd { value, .. } => Some(*value),
            Valuation::Unavailable(_) => None,
        }
    }
}

/// Scale a raw integer amount by `10^-decimals`
///
/// Amounts that do not fit in a `Decimal` are rejected. Digits beyond the
/// 28th fractional place are rounded away; a non-zero amount that rounds to
/// zero is rejected rather than recorded as nothing.
pub fn normalize_quantity(raw: U256, decimals: u8) -> Result<Decimal, NormalizeError> {
    let digits = raw.to_string();
    let scale = usize::from(decimals);

    let text = if scale == 0 {
        digits
    } else if digits.len() > scale {
        let (int_part, frac_part) = digits.split_at(digits.len() - scale);
        format!("{int_part}.{frac_part}")
    } else {
        format!("0.{}{}", "0".repeat(scale - digits.len()), digits)
    };

    let quantity = Decimal::from_str(&text)
        .map(|d| d.normalize())
        .map_err(|_| NormalizeError::Overflow { raw, decimals })?;

    if quantity.is_zero() && !raw.is_zero() {
        return Err(NormalizeError::Underflow { raw, decimals });
    }
    Ok(quantity)
}

/// Converts raw transfer amounts into USD
pub struct ValueNormalizer<P> {
    source: P,
    price_map: SymbolPriceMap,
}

impl<P: PriceSource> ValueNormalizer<P> {
    pub fn new(source: P, price_map: SymbolPriceMap) -> Self {
        Self { source, price_map }
    }

    /// Value `raw` units of the token identified by `symbol`
    ///
    /// Missing symbols and missing quotes yield `Valuation::Unavailable`;
    /// provider failures and amounts or values outside decimal range are
    /// errors.
    pub async fn normalize(
        &self,
        raw: U256,
        decimals: u8,
        symbol: Option<&str>,
    ) -> Result<Valuation, NormalizeFailure> {
        let quantity = normalize_quantity(raw, decimals)?;

        let Some(symbol) = symbol else {
            return Ok(Valuation::Unavailable(Unavailable::NoSymbol));
        };
        let Some(id) = self.price_map.id_for(symbol) else {
            debug!(symbol, "Symbol not in price catalog");
            return Ok(Valuation::Unavailable(Unavailable::UnknownSymbol(symbol.to_string())));
        };
        let Some(unit_price) = self.source.unit_price_usd(id).await? else {
            debug!(symbol, id, "No USD quote");
            return Ok(Valuation::Unavailable(Unavailable::NoQuote(id.to_string())));
        };

        let value = quantity
            .checked_mul(unit_price)
            .ok_or(NormalizeError::ValueOverflow { quantity, unit_price })?;

        Ok(Valuation::Usd {
            quantity,
            unit_price,
            value,
        })
    }
}

/// Either side of a failed normalization
#[derive(Error, Debug)]
pub enum NormalizeFailure {
    #[error(transparent)]
    Amount(#[from] NormalizeError),

    #[error(transparent)]
    Price(#[from] PriceError),
}
