//! Transfer Method Filtering
//!
//! The closed set of ERC-20 calls counted as token transfer activity.
//! Anything outside this set is not applicable to the volume ledger.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::decoder::extract_method_id;

/// The two call kinds that move fungible tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferMethod {
    /// transfer(address,uint256) - 0xa9059cbb
    Transfer,
    /// transferFrom(address,address,uint256) - 0x23b872dd
    TransferFrom,
}

impl TransferMethod {
    /// Returns the 4-byte method selector
    pub fn selector(&self) -> [u8; 4] {
        match self {
            TransferMethod::Transfer => [0xa9, 0x05, 0x9c, 0xbb],
            TransferMethod::TransferFrom => [0x23, 0xb8, 0x72, 0xdd],
        }
    }

    /// Returns the ABI function name
    pub fn name(&self) -> &'static str {
        match self {
            TransferMethod::Transfer => "transfer",
            TransferMethod::TransferFrom => "transferFrom",
        }
    }

    /// Position of the amount argument in the decoded inputs
    pub fn amount_index(&self) -> usize {
        match self {
            TransferMethod::Transfer => 1,
            TransferMethod::TransferFrom => 2,
        }
    }

    /// Look up a transfer method by ABI function name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "transfer" => Some(TransferMethod::Transfer),
            "transferFrom" => Some(TransferMethod::TransferFrom),
            _ => None,
        }
    }
}

/// Static lookup table for method IDs
static TRANSFER_METHODS: LazyLock<HashMap<[u8; 4], TransferMethod>> = LazyLock::new(|| {
    let mut map = HashMap::new();
    map.insert([0xa9, 0x05, 0x9c, 0xbb], TransferMethod::Transfer);
    map.insert([0x23, 0xb8, 0x72, 0xdd], TransferMethod::TransferFrom);
    map
});

/// Get the transfer method for a given selector, if it matches
fn get_transfer_method(method_id: &[u8; 4]) -> Option<TransferMethod> {
    TRANSFER_METHODS.get(method_id).copied()
}

/// Filter transaction input by its selector alone
///
/// # Returns
/// `Some(TransferMethod)` if the selector is a standard transfer selector
pub fn filter_transaction(input: &[u8]) -> Option<TransferMethod> {
    extract_method_id(input).and_then(|id| get_transfer_method(&id))
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== get_transfer_method tests ====================

    #[test]
    fn test_filter_transfer() {
        assert_eq!(get_transfer_method(&[0xa9, 0x05, 0x9c, 0xbb]), Some(TransferMethod::Transfer));
    }

    #[test]
    fn test_filter_transfer_from() {
        assert_eq!(
            get_transfer_method(&[0x23, 0xb8, 0x72, 0xdd]),
            Some(TransferMethod::TransferFrom)
        );
    }

    #[test]
    fn test_filter_approve_returns_none() {
        // 0x095ea7b3 - approve(address,uint256)
        assert_eq!(get_transfer_method(&[0x09, 0x5e, 0xa7, 0xb3]), None);
    }

    #[test]
    fn test_filter_swap_returns_none() {
        // 0x38ed1739 - swapExactTokensForTokens
        assert_eq!(get_transfer_method(&[0x38, 0xed, 0x17, 0x39]), None);
    }

    #[test]
    fn test_filter_zero_method_returns_none() {
        assert_eq!(get_transfer_method(&[0x00, 0x00, 0x00, 0x00]), None);
    }

    // ==================== filter_transaction tests ====================

    #[test]
    fn test_filter_transaction_transfer() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(filter_transaction(&input), Some(TransferMethod::Transfer));
    }

    #[test]
    fn test_filter_transaction_short_input() {
        assert_eq!(filter_transaction(&[0xa9, 0x05]), None);
        assert_eq!(filter_transaction(&[]), None);
    }

    // ==================== TransferMethod tests ====================

    #[test]
    fn test_selector_matches_signature_hash() {
        use alloy::primitives::keccak256;

        for (method, signature) in [
            (TransferMethod::Transfer, "transfer(address,uint256)"),
            (TransferMethod::TransferFrom, "transferFrom(address,address,uint256)"),
        ] {
            let hash = keccak256(signature.as_bytes());
            assert_eq!(method.selector(), hash[..4], "selector mismatch for {:?}", method);
        }
    }

    #[test]
    fn test_from_name_round_trips() {
        for method in [TransferMethod::Transfer, TransferMethod::TransferFrom] {
            assert_eq!(TransferMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(TransferMethod::from_name("approve"), None);
        assert_eq!(TransferMethod::from_name("Transfer"), None);
    }

    #[test]
    fn test_amount_index() {
        assert_eq!(TransferMethod::Transfer.amount_index(), 1);
        assert_eq!(TransferMethod::TransferFrom.amount_index(), 2);
    }

    #[test]
    fn test_exactly_two_methods_in_lookup() {
        assert_eq!(TRANSFER_METHODS.len(), 2);
    }
}
