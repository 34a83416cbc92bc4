//! Transaction View Extraction
//!
//! Reduces chain transactions to the fields the transfer pipeline needs.
//! Supports legacy (type 0), EIP-2930 (type 1), EIP-1559 (type 2) and
//! EIP-4844 (type 3) envelopes.

use alloy::consensus::TxEnvelope;
use alloy::primitives::{Address, Bytes, TxHash, U256};

use crate::filter::{filter_transaction, TransferMethod};

/// The slice of a chain transaction the pipeline works with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionView {
    /// Transaction hash
    pub hash: TxHash,
    /// Called contract (None for contract creation)
    pub to: Option<Address>,
    /// Native value attached to the call, in wei
    pub value: U256,
    /// Opaque call data
    pub input: Bytes,
}

impl TransactionView {
    pub fn new(hash: TxHash, to: Option<Address>, value: U256, input: impl Into<Bytes>) -> Self {
        Self {
            hash,
            to,
            value,
            input: input.into(),
        }
    }

    /// Build a view from a signed transaction envelope
    pub fn from_envelope(tx_envelope: &TxEnvelope) -> Self {
        let (input, to, value) = extract_tx_fields(tx_envelope);
        Self {
            hash: *tx_envelope.tx_hash(),
            to,
            value,
            input,
        }
    }

    /// First 4 bytes of the call data, if present
    pub fn method_id(&self) -> Option<[u8; 4]> {
        extract_method_id(&self.input)
    }

    /// Get the method ID as a hex string with 0x prefix
    pub fn method_id_hex(&self) -> Option<String> {
        self.method_id().map(|id| format!("0x{}", hex::encode(id)))
    }

    /// Cheap selector check, without consulting any contract interface
    pub fn transfer_hint(&self) -> Option<TransferMethod> {
        filter_transaction(&self.input)
    }
}

/// Extract (input, to, value) from a TxEnvelope
fn extract_tx_fields(tx_envelope: &TxEnvelope) -> (Bytes, Option<Address>, U256) {
    match tx_envelope {
        TxEnvelope::Legacy(signed) => {
            let tx = signed.tx();
            (tx.input.clone(), tx.to.to().copied(), tx.value)
        }
        TxEnvelope::Eip2930(signed) => {
            let tx = signed.tx();
            (tx.input.clone(), tx.to.to().copied(), tx.value)
        }
        TxEnvelope::Eip1559(signed) => {
            let tx = signed.tx();
            (tx.input.clone(), tx.to.to().copied(), tx.value)
        }
        TxEnvelope::Eip4844(signed) => {
            let tx = signed.tx().tx();
            (tx.input.clone(), Some(tx.to), tx.value)
        }
        _ => (Bytes::new(), None, U256::ZERO),
    }
}

/// Extract method ID from transaction input data
///
/// # Returns
/// `Some([u8; 4])` if input has at least 4 bytes, `None` otherwise
pub fn extract_method_id(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < 4 {
        return None;
    }
    let mut method_id = [0u8; 4];
    method_id.copy_from_slice(&input[..4]);
    Some(method_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== extract_method_id tests ====================

    #[test]
    fn test_extract_method_id_from_transfer_input() {
        let input = vec![0xa9, 0x05, 0x9c, 0xbb, 0x00, 0x00];
        assert_eq!(extract_method_id(&input), Some([0xa9, 0x05, 0x9c, 0xbb]));
    }

    #[test]
    fn test_extract_method_id_from_exact_4_bytes() {
        let input = vec![0x23, 0xb8, 0x72, 0xdd];
        assert_eq!(extract_method_id(&input), Some([0x23, 0xb8, 0x72, 0xdd]));
    }

    #[test]
    fn test_extract_method_id_from_short_input() {
        assert_eq!(extract_method_id(&[0xa9, 0x05, 0x9c]), None);
        assert_eq!(extract_method_id(&[]), None);
    }

    // ==================== TransactionView tests ====================

    #[test]
    fn test_view_method_id_hex() {
        let view = TransactionView::new(
            TxHash::ZERO,
            Some(Address::ZERO),
            U256::ZERO,
            vec![0xa9, 0x05, 0x9c, 0xbb, 0x01],
        );
        assert_eq!(view.method_id_hex(), Some("0xa9059cbb".to_string()));
        assert_eq!(view.transfer_hint(), Some(TransferMethod::Transfer));
    }

    #[test]
    fn test_view_without_calldata() {
        let view = TransactionView::new(TxHash::ZERO, Some(Address::ZERO), U256::from(1u8), Bytes::new());
        assert_eq!(view.method_id(), None);
        assert_eq!(view.transfer_hint(), None);
    }
}
