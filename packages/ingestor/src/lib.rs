//! TokenFlow Ingestor Library
//!
//! This crate provides components for following a chain block by block,
//! recognising ERC-20 `transfer`/`transferFrom` calls through verified
//! contract interfaces, valuing them in USD and accumulating per-token volume
//! in a two-tier SQLite ledger.

pub mod chain;
pub mod classifier;
pub mod coingecko;
pub mod config;
pub mod decoder;
pub mod etherscan;
pub mod filter;
pub mod ingest;
pub mod ledger;
pub mod logging;
pub mod metadata;
pub mod pricing;
pub mod rate_limit;

// Re-export commonly used types
pub use chain::{AlloyChainClient, BlockSnapshot, ChainClient, ChainError};
pub use classifier::{classify, Classification, SkipReason, TokenInspector, TransferCandidate};
pub use coingecko::CoinGeckoClient;
pub use config::{Config, ConfigError};
pub use decoder::TransactionView;
pub use etherscan::EtherscanClient;
pub use filter::{filter_transaction, TransferMethod};
pub use ingest::{BlockStats, IngestError, IngestOptions, Ingestor, TickOutcome, TxError, TxOutcome};
pub use ledger::{LedgerEntry, LedgerError, RecordOutcome, Tier, TokenLedger};
pub use metadata::{AbiError, AbiLookup, AbiSource, ContractMetadata, ContractMetadataCache};
pub use pricing::{
    normalize_quantity, CoinListing, PriceError, PriceSource, SymbolPriceMap, Valuation, ValueNormalizer,
};
pub use rate_limit::{RateLimitExceeded, RateLimitPolicy, RateLimiter};
