//! # Taproot Transaction Builder
//!
//! Builds the single-input, single-output key-path spend the gate signs, and
//! computes its BIP341 signature hash from public data only.
//!
//! ## Transaction Structure
//! - **Version**: 2
//! - **Locktime**: 0
//! - **Input**: first UTXO of the sender's Taproot address, sequence `0xffffffff`
//! - **Output**: `amount_to_send - fee` to the destination's output script
//!
//! ## Coin Selection
//! The first UTXO returned for the sender address is always the one spent.
//! There is no fairness, value or age policy; callers that need one must
//! order the UTXO set themselves before handing it over.
//!
//! ## Signature Hash
//! `SIGHASH_DEFAULT` key-path hash over input 0. It commits to version,
//! locktime, every prevout, every spent amount and script, and every output,
//! so any later change to the transaction invalidates the signature.

use crate::address::TaprootAddressDeriver;
use crate::error::{GateError, GateResult};
use crate::services::{BroadcastPort, Utxo};
use crate::utils::{address, hex_string};
use bitcoin::{
    absolute::LockTime,
    consensus::encode::{deserialize, serialize_hex},
    hashes::Hash,
    sighash::{Prevouts, SighashCache},
    transaction::Version,
    Amount, Network, OutPoint, ScriptBuf, Sequence, TapSighashType, Transaction, TxIn, TxOut,
    Witness,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// 32-byte BIP341 signature hash
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignatureHash([u8; 32]);

impl SignatureHash {
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse from hex, with or without a `0x` prefix
    pub fn from_hex(value: &str) -> GateResult<Self> {
        Ok(Self(hex_string::decode_32(value)?))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for SignatureHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignatureHash({})", self.to_hex())
    }
}

impl Serialize for SignatureHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SignatureHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        SignatureHash::from_hex(&value).map_err(serde::de::Error::custom)
    }
}

/// An unsigned transaction together with the hash its input must sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTaprootTransaction {
    pub transaction: Transaction,
    pub sig_hash: SignatureHash,
    /// Output being spent by input 0
    pub spent_output: TxOut,
}

impl UnsignedTaprootTransaction {
    /// Wire hex of the unsigned transaction
    pub fn to_hex(&self) -> String {
        encode_hex(&self.transaction)
    }

    /// Value paid to the destination
    pub fn output_value(&self) -> u64 {
        self.transaction.output[0].value.to_sat()
    }
}

/// Response shape of the build step: `{ "transaction": hex, "sigHash": hex }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildResponse {
    pub transaction: String,
    pub sig_hash: SignatureHash,
}

impl From<&UnsignedTaprootTransaction> for BuildResponse {
    fn from(unsigned: &UnsignedTaprootTransaction) -> Self {
        Self {
            transaction: unsigned.to_hex(),
            sig_hash: unsigned.sig_hash,
        }
    }
}

/// Builds unsigned Taproot key-path spends for one network.
#[derive(Debug, Clone, Copy)]
pub struct TaprootTransactionBuilder {
    deriver: TaprootAddressDeriver,
}

impl TaprootTransactionBuilder {
    pub fn new(network: Network) -> Self {
        Self {
            deriver: TaprootAddressDeriver::new(network),
        }
    }

    pub fn network(&self) -> Network {
        self.deriver.network()
    }

    /// Build the unsigned transaction and its signature hash from public data.
    ///
    /// # Arguments
    /// * `sender_public_key` - hex public key controlling the spent UTXO
    /// * `destination` - address receiving `amount_to_send - fee`
    /// * `amount_to_send` - gross amount in satoshis
    /// * `fee` - fee in satoshis, deducted from `amount_to_send`
    /// * `utxos` - UTXO set of the sender address; only the first is used
    ///
    /// # Errors
    /// - `InvalidPublicKey` if the sender key is not a curve point
    /// - `NoUtxoAvailable` if `utxos` is empty
    /// - `NonPositiveOutput` if `amount_to_send <= fee`
    /// - `InvalidAddress` if the destination does not parse for this network
    pub fn build_unsigned(
        &self,
        sender_public_key: &str,
        destination: &str,
        amount_to_send: u64,
        fee: u64,
        utxos: &[Utxo],
    ) -> GateResult<UnsignedTaprootTransaction> {
        let sender = self.deriver.derive(sender_public_key)?;

        let utxo = utxos.first().ok_or_else(|| GateError::NoUtxoAvailable {
            address: sender.address.to_string(),
        })?;

        let send_amount = amount_to_send
            .checked_sub(fee)
            .filter(|value| *value > 0)
            .ok_or(GateError::NonPositiveOutput {
                amount: amount_to_send,
                fee,
            })?;

        let destination = address::validate_and_parse(destination, self.network())?;

        let transaction = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(utxo.txid, utxo.vout),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::new(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(send_amount),
                script_pubkey: destination.script_pubkey(),
            }],
        };

        let spent_output = TxOut {
            value: Amount::from_sat(utxo.value),
            script_pubkey: sender.script_pubkey,
        };
        let sig_hash = taproot_sighash(&transaction, 0, std::slice::from_ref(&spent_output))?;

        log::debug!(
            "Built transaction spending {}:{} ({} sats) -> {} sats, sighash {}",
            utxo.txid,
            utxo.vout,
            utxo.value,
            send_amount,
            sig_hash
        );

        Ok(UnsignedTaprootTransaction {
            transaction,
            sig_hash,
            spent_output,
        })
    }

    /// Derive the sender address, fetch its UTXOs and build the spend.
    pub async fn create_taproot_txn(
        &self,
        port: &dyn BroadcastPort,
        sender_public_key: &str,
        destination: &str,
        amount_to_send: u64,
        fee: u64,
    ) -> GateResult<UnsignedTaprootTransaction> {
        let sender = self.deriver.derive(sender_public_key)?;
        let sender_address = sender.address.to_string();
        log::info!("Sender Taproot address: {}", sender_address);

        let utxos = port.fetch_utxos(&sender_address).await?;
        self.build_unsigned(sender_public_key, destination, amount_to_send, fee, &utxos)
    }
}

/// BIP341 key-path signature hash (`SIGHASH_DEFAULT`) for `input_index`.
///
/// `spent_outputs` must list the output spent by every input, in input order.
pub fn taproot_sighash(
    transaction: &Transaction,
    input_index: usize,
    spent_outputs: &[TxOut],
) -> GateResult<SignatureHash> {
    let mut cache = SighashCache::new(transaction);
    let hash = cache
        .taproot_key_spend_signature_hash(
            input_index,
            &Prevouts::All(spent_outputs),
            TapSighashType::Default,
        )
        .map_err(|e| GateError::serialization(format!("sighash computation failed: {}", e)))?;

    Ok(SignatureHash(hash.to_byte_array()))
}

/// Place a 64-byte `SIGHASH_DEFAULT` signature as the sole witness element
pub fn attach_key_path_signature(
    transaction: &mut Transaction,
    input_index: usize,
    signature: &[u8; 64],
) -> GateResult<()> {
    let input = transaction.input.get_mut(input_index).ok_or_else(|| {
        GateError::serialization(format!("transaction has no input {}", input_index))
    })?;
    input.witness = Witness::from_slice(&[signature.as_slice()]);
    Ok(())
}

/// Standard wire serialization as hex
pub fn encode_hex(transaction: &Transaction) -> String {
    serialize_hex(transaction)
}

/// Parse wire hex (with or without `0x`) into a transaction
pub fn decode_hex(value: &str) -> GateResult<Transaction> {
    let bytes = hex_string::decode(value)?;
    Ok(deserialize(&bytes)?)
}
