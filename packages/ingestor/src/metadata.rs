//! Contract Metadata Cache
//!
//! Memoizes, per contract address, either the contract's decoded interface
//! or the fact that the provider has no verified source for it.
//!
//! Only a definitive "unverified" answer is cached as negative. Transport or
//! parse failures are returned to the caller without touching the cache, so
//! the next reference to the same address fetches again.

use std::sync::Arc;

use alloy::json_abi::JsonAbi;
use alloy::primitives::Address;
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::rate_limit::RateLimitExceeded;

/// Errors that can occur fetching a contract interface
#[derive(Error, Debug)]
pub enum AbiError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("ABI provider returned HTTP {0}")]
    Status(u16),

    #[error("ABI provider error: {0}")]
    Provider(String),

    #[error("Malformed ABI: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),
}

/// Provider answer for one address
#[derive(Debug, Clone, PartialEq)]
pub enum AbiLookup {
    Verified(JsonAbi),
    /// The provider has no verified source for this contract
    Unverified,
}

/// Cached knowledge about one contract
#[derive(Debug, Clone, PartialEq)]
pub enum ContractMetadata {
    Interface(Arc<JsonAbi>),
    Unverifiable,
}

impl ContractMetadata {
    pub fn interface(&self) -> Option<&JsonAbi> {
        match self {
            ContractMetadata::Interface(abi) => Some(abi),
            ContractMetadata::Unverifiable => None,
        }
    }

    pub fn is_unverifiable(&self) -> bool {
        matches!(self, ContractMetadata::Unverifiable)
    }
}

/// External source of contract interfaces
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AbiSource: Send + Sync {
    async fn fetch_interface(&self, address: Address) -> Result<AbiLookup, AbiError>;
}

/// Per-address interface cache in front of an [`AbiSource`]
///
/// Entries are never evicted. With a capacity set, addresses resolved after
/// the cache is full are returned but not remembered.
pub struct ContractMetadataCache<S> {
    source: S,
    entries: DashMap<Address, ContractMetadata>,
    capacity: Option<usize>,
}

impl<S: AbiSource> ContractMetadataCache<S> {
    /// Unbounded cache
    pub fn new(source: S) -> Self {
        Self::with_capacity(source, None)
    }

    pub fn with_capacity(source: S, capacity: Option<usize>) -> Self {
        Self {
            source,
            entries: DashMap::new(),
            capacity,
        }
    }

    /// Resolve the interface for `address`, fetching on a miss
    pub async fn resolve(&self, address: Address) -> Result<ContractMetadata, AbiError> {
        let cached = self.entries.get(&address).map(|entry| entry.value().clone());
        if let Some(metadata) = cached {
            return Ok(metadata);
        }

        let metadata = match self.source.fetch_interface(address).await? {
            AbiLookup::Verified(abi) => {
                debug!(contract = %address, functions = abi.functions.len(), "Fetched contract interface");
                ContractMetadata::Interface(Arc::new(abi))
            }
            AbiLookup::Unverified => {
                info!(contract = %address, "Contract source not verified, marking unverifiable");
                ContractMetadata::Unverifiable
            }
        };

        self.remember(address, metadata.clone());
        Ok(metadata)
    }

    fn remember(&self, address: Address, metadata: ContractMetadata) {
        if let Some(capacity) = self.capacity {
            if self.entries.len() >= capacity {
                debug!(contract = %address, capacity, "Metadata cache full, not memoizing");
                return;
            }
        }
        self.entries.insert(address, metadata);
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.entries.contains_key(address)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}
