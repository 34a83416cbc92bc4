//! Ingestion Loop
//!
//! Polls the chain for new blocks and feeds every transaction through the
//! metadata cache, classifier, normalizer and ledger, then consolidates the
//! ledger once per block. Errors never stop the loop: a failing transaction
//! is logged and skipped, and a failing tick is logged and retried after the
//! poll interval.

use std::sync::Arc;
use std::time::Duration;

use alloy::primitives::{Address, TxHash};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::chain::{ChainClient, ChainError};
use crate::classifier::{classify, Classification, SkipReason, TokenInspector};
use crate::config::{Config, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_TOKEN_DECIMALS};
use crate::ledger::{LedgerError, RecordOutcome, TokenLedger};
use crate::metadata::{AbiError, AbiSource, ContractMetadataCache};
use crate::pricing::{NormalizeFailure, PriceError, PriceSource, Unavailable, Valuation, ValueNormalizer};

/// Errors that abort a whole tick
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to fetch latest block: {0}")]
    Chain(#[from] ChainError),

    #[error("Consolidation failed: {0}")]
    Ledger(#[from] LedgerError),
}

/// Errors that abort a single transaction
#[derive(Error, Debug)]
pub enum TxError {
    #[error("chain: {0}")]
    Chain(#[from] ChainError),

    #[error("contract interface: {0}")]
    Abi(#[from] AbiError),

    #[error("valuation: {0}")]
    Valuation(#[from] NormalizeFailure),

    #[error("ledger: {0}")]
    Ledger(#[from] LedgerError),
}

impl TxError {
    /// Whether an upstream kept answering 429 past the retry budget
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            TxError::Abi(AbiError::RateLimited(_))
                | TxError::Valuation(NormalizeFailure::Price(PriceError::RateLimited(_)))
        )
    }
}

/// What happened to one transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome {
    Recorded {
        contract: Address,
        usd: Decimal,
        outcome: RecordOutcome,
    },
    /// A transfer that could not be valued; not recorded
    Unpriced(Unavailable),
    Skipped(SkipReason),
    /// The node no longer returns the transaction
    Missing,
}

/// Per-block counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockStats {
    pub transactions: usize,
    pub transfers: usize,
    pub recorded: usize,
    pub unpriced: usize,
    pub skipped: usize,
    pub failed: usize,
    pub demoted: usize,
}

impl BlockStats {
    fn count(&mut self, outcome: &TxOutcome) {
        match outcome {
            TxOutcome::Recorded { .. } => {
                self.transfers += 1;
                self.recorded += 1;
            }
            TxOutcome::Unpriced(_) => {
                self.transfers += 1;
                self.unpriced += 1;
            }
            TxOutcome::Skipped(_) | TxOutcome::Missing => self.skipped += 1,
        }
    }
}

/// Result of one poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Latest block already processed
    Idle(u64),
    Processed { block: u64, stats: BlockStats },
}

/// Loop tuning knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestOptions {
    pub poll_interval: Duration,
    pub default_decimals: u8,
    pub metadata_cache_capacity: Option<usize>,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            default_decimals: DEFAULT_TOKEN_DECIMALS,
            metadata_cache_capacity: None,
        }
    }
}

impl From<&Config> for IngestOptions {
    fn from(config: &Config) -> Self {
        Self {
            poll_interval: config.poll_interval,
            default_decimals: config.default_decimals,
            metadata_cache_capacity: config.metadata_cache_capacity,
        }
    }
}

/// Single-worker block ingestion driver
pub struct Ingestor<C, A, P> {
    chain: Arc<C>,
    metadata: ContractMetadataCache<A>,
    inspector: TokenInspector<C>,
    normalizer: ValueNormalizer<P>,
    ledger: TokenLedger,
    poll_interval: Duration,
    last_processed: Option<u64>,
}

impl<C, A, P> Ingestor<C, A, P>
where
    C: ChainClient,
    A: AbiSource,
    P: PriceSource,
{
    pub fn new(
        chain: Arc<C>,
        abi_source: A,
        normalizer: ValueNormalizer<P>,
        ledger: TokenLedger,
        options: IngestOptions,
    ) -> Self {
        Self {
            inspector: TokenInspector::new(chain.clone(), options.default_decimals),
            chain,
            metadata: ContractMetadataCache::with_capacity(abi_source, options.metadata_cache_capacity),
            normalizer,
            ledger,
            poll_interval: options.poll_interval,
            last_processed: None,
        }
    }

    pub fn last_processed(&self) -> Option<u64> {
        self.last_processed
    }

    pub fn ledger(&self) -> &TokenLedger {
        &self.ledger
    }

    pub fn metadata(&self) -> &ContractMetadataCache<A> {
        &self.metadata
    }

    /// Poll until `shutdown` is cancelled
    pub async fn run(&mut self, shutdown: CancellationToken) {
        info!(poll_interval = ?self.poll_interval, "Ingestion loop started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.tick(Utc::now()) => {
                    if let Err(e) = result {
                        error!(error = %e, "Tick failed");
                    }
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!(last_block = ?self.last_processed, "Ingestion loop stopped");
    }

    /// Process the latest block if it has not been processed yet
    ///
    /// `now` stamps new ledger rows and drives consolidation.
    pub async fn tick(&mut self, now: DateTime<Utc>) -> Result<TickOutcome, IngestError> {
        let block = self.chain.latest_block().await?;
        if self.last_processed == Some(block.number) {
            debug!(block = block.number, "No new block");
            return Ok(TickOutcome::Idle(block.number));
        }

        let mut stats = BlockStats {
            transactions: block.transactions.len(),
            ..BlockStats::default()
        };

        for hash in &block.transactions {
            match self.process_transaction(*hash, now).await {
                Ok(outcome) => stats.count(&outcome),
                Err(e) if e.is_rate_limited() => {
                    stats.failed += 1;
                    warn!(block = block.number, tx = %hash, error = %e, "Rate limited, transaction skipped");
                }
                Err(e) => {
                    stats.failed += 1;
                    warn!(block = block.number, tx = %hash, error = %e, "Transaction failed");
                }
            }
        }

        // Marked processed even if consolidation fails; the next block retries it
        let consolidated = self.ledger.consolidate(now).await;
        self.last_processed = Some(block.number);
        stats.demoted = consolidated?;

        info!(
            block = block.number,
            txs = stats.transactions,
            transfers = stats.transfers,
            recorded = stats.recorded,
            unpriced = stats.unpriced,
            failed = stats.failed,
            demoted = stats.demoted,
            "Block processed"
        );

        Ok(TickOutcome::Processed {
            block: block.number,
            stats,
        })
    }

    /// Run one transaction through classification, valuation and recording
    pub async fn process_transaction(
        &self,
        hash: TxHash,
        now: DateTime<Utc>,
    ) -> Result<TxOutcome, TxError> {
        let Some(tx) = self.chain.transaction(hash).await? else {
            debug!(tx = %hash, "Transaction not found");
            return Ok(TxOutcome::Missing);
        };
        let Some(contract) = tx.to else {
            return Ok(TxOutcome::Skipped(SkipReason::ContractCreation));
        };
        if tx.method_id().is_none() {
            return Ok(TxOutcome::Skipped(SkipReason::NoCalldata));
        }

        let metadata = self.metadata.resolve(contract).await?;
        let candidate = match classify(&tx, &metadata) {
            Classification::Transfer(candidate) => candidate,
            Classification::NotApplicable(reason) => {
                if let Some(method) = tx.transfer_hint() {
                    debug!(tx = %hash, contract = %contract, method = method.name(), reason = %reason, "Transfer selector rejected by interface");
                } else {
                    trace!(tx = %hash, method_id = ?tx.method_id_hex(), reason = %reason, "Not a transfer");
                }
                return Ok(TxOutcome::Skipped(reason));
            }
        };

        let details = self.inspector.details(candidate.contract).await;
        let valuation = self
            .normalizer
            .normalize(candidate.raw_amount, details.decimals, details.symbol.as_deref())
            .await?;

        let usd = match valuation {
            Valuation::Usd { value, .. } => value,
            Valuation::Unavailable(reason) => {
                debug!(tx = %hash, contract = %candidate.contract, reason = ?reason, "Transfer not priced, skipping");
                return Ok(TxOutcome::Unpriced(reason));
            }
        };

        let known = self.ledger.was_ever_seen(candidate.contract).await?;
        let outcome = self.ledger.record_activity(candidate.contract, usd, now).await?;
        info!(
            tx = %hash,
            contract = %candidate.contract,
            method = candidate.function_name(),
            symbol = ?details.symbol,
            usd = %usd,
            outcome = ?outcome,
            known,
            "Recorded transfer"
        );

        Ok(TxOutcome::Recorded {
            contract: candidate.contract,
            usd,
            outcome,
        })
    }
}
