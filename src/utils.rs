//! # Utility Functions
//!
//! Small helpers shared by the gate: hex prefix handling, Bitcoin address
//! validation and display formatting.

use crate::error::{GateError, GateResult};
use bitcoin::{Address, Network};
use std::str::FromStr;

/// Hex string utilities
pub mod hex_string {
    use super::*;

    /// Remove a leading `0x`/`0X` marker if present
    pub fn strip_prefix(value: &str) -> &str {
        value
            .strip_prefix("0x")
            .or_else(|| value.strip_prefix("0X"))
            .unwrap_or(value)
    }

    /// Decode hex that may carry a `0x` prefix
    pub fn decode(value: &str) -> GateResult<Vec<u8>> {
        Ok(hex::decode(strip_prefix(value.trim()))?)
    }

    /// Decode exactly 32 bytes of hex (digests, txids)
    pub fn decode_32(value: &str) -> GateResult<[u8; 32]> {
        let bytes = decode(value)?;
        bytes.as_slice().try_into().map_err(|_| {
            GateError::serialization(format!("expected 32 bytes, got {}", bytes.len()))
        })
    }
}

/// Address utilities
pub mod address {
    use super::*;
    use sha3::{Digest, Keccak256};

    const DISPLAY_PREFIX: usize = 8;
    const DISPLAY_SUFFIX: usize = 5;

    /// Format an address for display with ellipsis in the middle
    ///
    /// # Returns
    /// Formatted address string like "tb1pfgj6...2hheus"
    pub fn format_short(address: &str) -> String {
        if address.len() <= DISPLAY_PREFIX + DISPLAY_SUFFIX + 3 {
            address.to_string()
        } else {
            format!(
                "{}...{}",
                &address[..DISPLAY_PREFIX],
                &address[address.len() - DISPLAY_SUFFIX..]
            )
        }
    }

    /// Validate and parse a Bitcoin address for the given network
    pub fn validate_and_parse(address_str: &str, network: Network) -> GateResult<Address> {
        let address = Address::from_str(address_str.trim())
            .map_err(|_| GateError::invalid_address(address_str))?;

        address
            .require_network(network)
            .map_err(|_| GateError::invalid_address(address_str))
    }

    /// Normalize an account address on the access-control chain.
    ///
    /// Accepts 40 hex digits with or without a `0x` prefix. Mixed-case input
    /// must carry a valid EIP-55 checksum; all-lowercase and all-uppercase
    /// input is taken as unchecksummed. Returns the `0x`-prefixed form.
    pub fn normalize_account_address(address: &str) -> Option<String> {
        let body = address.strip_prefix("0x").unwrap_or(address);
        if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }

        let has_lower = body.chars().any(|c| c.is_ascii_lowercase());
        let has_upper = body.chars().any(|c| c.is_ascii_uppercase());
        if has_lower && has_upper && !has_valid_checksum(body) {
            return None;
        }
        Some(format!("0x{}", body))
    }

    /// Check if an address is a valid account address on the access-control chain
    pub fn is_account_address(address: &str) -> bool {
        normalize_account_address(address).is_some()
    }

    /// EIP-55: letter `i` is uppercase iff nibble `i` of keccak256(lowercase body) >= 8
    fn has_valid_checksum(body: &str) -> bool {
        let hash = Keccak256::digest(body.to_ascii_lowercase().as_bytes());
        body.chars().enumerate().all(|(i, c)| {
            let shift = if i % 2 == 0 { 4 } else { 0 };
            let nibble = (hash[i / 2] >> shift) & 0x0f;
            !c.is_ascii_alphabetic() || c.is_ascii_uppercase() == (nibble >= 8)
        })
    }
}

/// Transaction ID utilities
pub mod txid {
    use super::*;

    /// Validate transaction ID format (64 hex characters)
    pub fn validate(txid: &str) -> GateResult<()> {
        if txid.len() != 64 {
            return Err(GateError::serialization(format!(
                "Transaction ID must be 64 characters, got {}",
                txid.len()
            )));
        }

        if !txid.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(GateError::serialization(
                "Transaction ID must contain only hexadecimal characters",
            ));
        }

        Ok(())
    }
}
