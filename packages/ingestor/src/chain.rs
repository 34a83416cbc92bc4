//! Chain RPC Client
//!
//! Polls the node for the latest block and its transactions, and reads ERC-20
//! metadata (`decimals()`, `symbol()`) from token contracts.

use alloy::eips::BlockNumberOrTag;
use alloy::primitives::{Address, TxHash};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::BlockTransactionsKind;
use alloy::sol;
use alloy::transports::{BoxTransport, TransportError};
use async_trait::async_trait;
use thiserror::Error;
use tracing::{info, warn};

use crate::decoder::TransactionView;

sol! {
    #[sol(rpc)]
    interface IERC20Metadata {
        function decimals() external view returns (uint8);
        function symbol() external view returns (string);
    }
}

/// Errors that can occur talking to the chain node
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Block {0} not returned by node")]
    MissingBlock(u64),

    #[error("{method}() call on {token:#x} failed: {reason}")]
    Call {
        token: Address,
        method: &'static str,
        reason: String,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Latest block as seen by the node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSnapshot {
    pub number: u64,
    /// Transaction hashes in node order
    pub transactions: Vec<TxHash>,
}

/// Chain node operations the ingestion loop depends on
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Latest block number and its transaction references
    async fn latest_block(&self) -> Result<BlockSnapshot, ChainError>;

    /// Resolve a transaction reference; `None` if the node no longer has it
    async fn transaction(&self, hash: TxHash) -> Result<Option<TransactionView>, ChainError>;

    /// Token precision from `decimals()`
    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    /// Token ticker from `symbol()`
    async fn token_symbol(&self, token: Address) -> Result<String, ChainError>;
}

/// [`ChainClient`] backed by an alloy provider (http, ws or ipc endpoint)
#[derive(Clone)]
pub struct AlloyChainClient {
    provider: RootProvider<BoxTransport>,
}

impl AlloyChainClient {
    pub fn new(provider: RootProvider<BoxTransport>) -> Self {
        Self { provider }
    }

    /// Connect to the endpoint, picking the transport from the URL scheme
    pub async fn connect(url: &str) -> Result<Self, ChainError> {
        info!(url, "Connecting to chain node");
        let provider = ProviderBuilder::new()
            .on_builtin(url)
            .await
            .map_err(|e| ChainError::ConnectionFailed(e.to_string()))?;
        Ok(Self::new(provider))
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    async fn latest_block(&self) -> Result<BlockSnapshot, ChainError> {
        let number = self.provider.get_block_number().await?;
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Number(number), BlockTransactionsKind::Hashes)
            .await?
            .ok_or(ChainError::MissingBlock(number))?;

        let transactions = match block.transactions.as_hashes() {
            Some(hashes) => hashes.to_vec(),
            None => {
                warn!(block = number, "Node returned a block without transaction hashes");
                Vec::new()
            }
        };

        Ok(BlockSnapshot {
            number,
            transactions,
        })
    }

    async fn transaction(&self, hash: TxHash) -> Result<Option<TransactionView>, ChainError> {
        let tx = self.provider.get_transaction_by_hash(hash).await?;
        Ok(tx.map(|tx| TransactionView::from_envelope(&tx.inner)))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        let contract = IERC20Metadata::new(token, self.provider.clone());
        let result = contract.decimals().call().await.map_err(|e| ChainError::Call {
            token,
            method: "decimals",
            reason: e.to_string(),
        })?;
        Ok(result._0)
    }

    async fn token_symbol(&self, token: Address) -> Result<String, ChainError> {
        let contract = IERC20Metadata::new(token, self.provider.clone());
        let result = contract.symbol().call().await.map_err(|e| ChainError::Call {
            token,
            method: "symbol",
            reason: e.to_string(),
        })?;
        Ok(result._0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::sol_types::SolCall;

    #[test]
    fn test_metadata_selectors() {
        // decimals() - 0x313ce567, symbol() - 0x95d89b41
        assert_eq!(IERC20Metadata::decimalsCall::SELECTOR, [0x31, 0x3c, 0xe5, 0x67]);
        assert_eq!(IERC20Metadata::symbolCall::SELECTOR, [0x95, 0xd8, 0x9b, 0x41]);
    }

    #[test]
    fn test_call_error_display() {
        let err = ChainError::Call {
            token: Address::repeat_byte(0x11),
            method: "decimals",
            reason: "execution reverted".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("decimals()"));
        assert!(msg.contains("0x1111111111111111111111111111111111111111"));
        assert!(msg.contains("execution reverted"));
    }

    #[test]
    fn test_missing_block_display() {
        assert!(ChainError::MissingBlock(42).to_string().contains("42"));
    }

    #[tokio::test]
    async fn test_connect_to_unreachable_ws_fails() {
        let result = AlloyChainClient::connect("ws://127.0.0.1:1").await;
        assert!(matches!(result, Err(ChainError::ConnectionFailed(_))));
    }
}
