//! Transaction Classifier
//!
//! Decides whether a transaction is a fungible-token transfer by decoding its
//! call data against the contract's interface. Only `transfer` and
//! `transferFrom` count; everything else, including any decoding failure,
//! is reported as not applicable rather than as an error.

use std::fmt;
use std::sync::Arc;

use alloy::dyn_abi::{DynSolValue, JsonAbiExt};
use alloy::json_abi::JsonAbi;
use alloy::primitives::{Address, U256};
use tracing::{debug, trace};

use crate::chain::ChainClient;
use crate::decoder::{extract_method_id, TransactionView};
use crate::filter::TransferMethod;
use crate::metadata::ContractMetadata;

/// Recognised shape of a decoded call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallShape {
    Transfer { amount: U256 },
    TransferFrom { amount: U256 },
    /// Decoded against the interface but not a transfer
    Other(String),
}

/// A transaction identified as a token movement, before USD valuation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferCandidate {
    pub contract: Address,
    pub raw_amount: U256,
    pub method: TransferMethod,
}

impl TransferCandidate {
    pub fn function_name(&self) -> &'static str {
        self.method.name()
    }
}

/// Why a transaction does not count as transfer activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    ContractCreation,
    Unverifiable,
    NoCalldata,
    UnknownSelector([u8; 4]),
    Undecodable(String),
    NotTransfer(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::ContractCreation => write!(f, "contract creation"),
            SkipReason::Unverifiable => write!(f, "contract unverifiable"),
            SkipReason::NoCalldata => write!(f, "no call data"),
            SkipReason::UnknownSelector(id) => write!(f, "unknown selector 0x{}", hex::encode(id)),
            SkipReason::Undecodable(e) => write!(f, "undecodable call data: {}", e),
            SkipReason::NotTransfer(name) => write!(f, "{} is not a transfer", name),
        }
    }
}

/// Outcome of classifying one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Transfer(TransferCandidate),
    NotApplicable(SkipReason),
}

/// Classify a transaction against its contract's cached metadata
pub fn classify(tx: &TransactionView, metadata: &ContractMetadata) -> Classification {
    let Some(contract) = tx.to else {
        return Classification::NotApplicable(SkipReason::ContractCreation);
    };
    let Some(abi) = metadata.interface() else {
        return Classification::NotApplicable(SkipReason::Unverifiable);
    };

    match decode_call(&tx.input, abi) {
        Ok(CallShape::Transfer { amount }) => Classification::Transfer(TransferCandidate {
            contract,
            raw_amount: amount,
            method: TransferMethod::Transfer,
        }),
        Ok(CallShape::TransferFrom { amount }) => Classification::Transfer(TransferCandidate {
            contract,
            raw_amount: amount,
            method: TransferMethod::TransferFrom,
        }),
        Ok(CallShape::Other(name)) => {
            Classification::NotApplicable(SkipReason::NotTransfer(name))
        }
        Err(reason) => Classification::NotApplicable(reason),
    }
}

/// Decode call data into one of the recognised call shapes
pub fn decode_call(input: &[u8], abi: &JsonAbi) -> Result<CallShape, SkipReason> {
    let selector = extract_method_id(input).ok_or(SkipReason::NoCalldata)?;
    let function = abi
        .functions()
        .find(|f| f.selector().0 == selector)
        .ok_or(SkipReason::UnknownSelector(selector))?;

    let Some(method) = TransferMethod::from_name(&function.name) else {
        return Ok(CallShape::Other(function.name.clone()));
    };

    let values = function
        .abi_decode_input(&input[4..], true)
        .map_err(|e| SkipReason::Undecodable(e.to_string()))?;

    let amount = match values.get(method.amount_index()) {
        Some(DynSolValue::Uint(amount, _)) => *amount,
        other => {
            return Err(SkipReason::Undecodable(format!(
                "{} argument {} is {:?}, expected uint",
                function.name,
                method.amount_index(),
                other
            )))
        }
    };

    Ok(match method {
        TransferMethod::Transfer => CallShape::Transfer { amount },
        TransferMethod::TransferFrom => CallShape::TransferFrom { amount },
    })
}

/// Display metadata needed to value a transfer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenDetails {
    pub decimals: u8,
    /// Lower-cased ticker, if the token answers `symbol()`
    pub symbol: Option<String>,
}

/// Reads token precision and ticker from the chain
pub struct TokenInspector<C> {
    chain: Arc<C>,
    default_decimals: u8,
}

impl<C: ChainClient> TokenInspector<C> {
    pub fn new(chain: Arc<C>, default_decimals: u8) -> Self {
        Self {
            chain,
            default_decimals,
        }
    }

    /// Query `decimals()` and `symbol()`; failures degrade to defaults
    pub async fn details(&self, token: Address) -> TokenDetails {
        let decimals = match self.chain.token_decimals(token).await {
            Ok(decimals) => decimals,
            Err(e) => {
                debug!(contract = %token, error = %e, default = self.default_decimals, "decimals() failed, using default");
                self.default_decimals
            }
        };

        let symbol = match self.chain.token_symbol(token).await {
            Ok(symbol) => Some(symbol.trim().to_lowercase()).filter(|s| !s.is_empty()),
            Err(e) => {
                debug!(contract = %token, error = %e, "symbol() failed");
                None
            }
        };

        trace!(contract = %token, decimals, symbol = ?symbol, "Token details");
        TokenDetails { decimals, symbol }
    }
}
