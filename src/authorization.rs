//! # Access Control Authorization
//!
//! The only authorization boundary in the system. A session credential is
//! accepted when its signed message carries a capability issued through the
//! threshold-key delegation path; the address in that capability becomes the
//! sole identity allowed to decrypt the wallet secret.
//!
//! ## Credential Shape
//! ```text
//! SessionCredential {
//!     sig, derivedVia, address,
//!     signedMessage: "{ \"capabilities\": [ { \"algo\": \"LIT_BLS\", \"address\": \"0x..\", .. } ], .. }"
//! }
//! ```
//!
//! ## Condition Shape
//! The condition handed to the key network compares the authenticated caller
//! (`:userAddress`) against the delegated address:
//! ```text
//! { chain: "ethereum", parameters: [":userAddress"],
//!   returnValueTest: { comparator: "=", value: <delegated address> } }
//! ```

use crate::config::authorization::{
    ACCESS_CONTROL_CHAIN, DELEGATION_ALGORITHM, EQUALS_COMPARATOR, USER_ADDRESS_PARAMETER,
};
use crate::error::{GateError, GateResult};
use crate::utils::address::normalize_account_address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One capability entry inside a session's signed message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    #[serde(default)]
    pub sig: String,
    #[serde(default)]
    pub derived_via: String,
    #[serde(default)]
    pub signed_message: String,
    /// Delegated address carried by this entry
    #[serde(default, alias = "delegatedAddress")]
    pub address: Option<String>,
    /// Algorithm tag identifying how the entry was issued
    #[serde(default, alias = "algorithm")]
    pub algo: Option<String>,
}

/// Parsed `signedMessage` payload of a session credential
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSignedMessage {
    #[serde(default)]
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub session_key: Option<String>,
    #[serde(default)]
    pub expiration: Option<String>,
}

/// A session credential produced by the external authentication step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCredential {
    #[serde(default)]
    pub sig: String,
    #[serde(default)]
    pub derived_via: String,
    /// JSON payload that was signed by the session key
    pub signed_message: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub algo: Option<String>,
}

impl SessionCredential {
    /// Build a credential around a signed message with the given capabilities
    pub fn with_capabilities(capabilities: Vec<Capability>) -> GateResult<Self> {
        let message = SessionSignedMessage {
            capabilities,
            ..Default::default()
        };
        Ok(Self {
            sig: String::new(),
            derived_via: "litSessionSignViaNacl".to_string(),
            signed_message: serde_json::to_string(&message)?,
            address: String::new(),
            algo: Some("ed25519".to_string()),
        })
    }

    /// Parse the signed message payload
    pub fn parsed_message(&self) -> GateResult<SessionSignedMessage> {
        serde_json::from_str(&self.signed_message).map_err(|e| {
            GateError::serialization(format!("session signed message is not valid JSON: {}", e))
        })
    }
}

/// Session credentials keyed by issuing node
pub type SessionCredentials = BTreeMap<String, SessionCredential>;

/// The credential of the first node, in key order
pub fn first_session_credential(credentials: &SessionCredentials) -> GateResult<&SessionCredential> {
    credentials
        .values()
        .next()
        .ok_or(GateError::NoSessionCredential)
}

/// Expected result of evaluating the condition's parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnValueTest {
    pub comparator: String,
    pub value: String,
}

/// Predicate under which the key network may decrypt a wallet secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessControlCondition {
    pub contract_address: String,
    pub standard_contract_type: String,
    pub chain: String,
    pub method: String,
    pub parameters: Vec<String>,
    pub return_value_test: ReturnValueTest,
}

impl AccessControlCondition {
    /// Address the caller must authenticate as
    pub fn required_address(&self) -> &str {
        &self.return_value_test.value
    }

    /// Whether an authenticated caller identity satisfies this condition.
    ///
    /// Account addresses compare case-insensitively.
    pub fn is_satisfied_by(&self, identity: &str) -> bool {
        self.parameters.iter().any(|p| p == USER_ADDRESS_PARAMETER)
            && self.return_value_test.comparator == EQUALS_COMPARATOR
            && self.return_value_test.value.eq_ignore_ascii_case(identity)
    }

    /// Canonical bytes of the condition, used to bind ciphertexts to it
    pub fn canonical_bytes(&self) -> GateResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Validates delegated session credentials and builds the matching condition.
#[derive(Debug, Clone)]
pub struct AccessControlAuthorizer {
    delegation_algorithm: String,
}

impl Default for AccessControlAuthorizer {
    fn default() -> Self {
        Self::new(DELEGATION_ALGORITHM)
    }
}

impl AccessControlAuthorizer {
    pub fn new(delegation_algorithm: impl Into<String>) -> Self {
        Self {
            delegation_algorithm: delegation_algorithm.into(),
        }
    }

    pub fn delegation_algorithm(&self) -> &str {
        &self.delegation_algorithm
    }

    /// Address entitled to trigger decryption for this credential.
    ///
    /// The first capability whose tag equals the delegation algorithm wins;
    /// later matching entries are ignored.
    ///
    /// # Errors
    /// - `SerializationError` if the signed message is not valid JSON
    /// - `EmptyCapabilities` if the signed message has no capabilities
    /// - `NotDelegated` if no capability carries the delegation tag
    /// - `InvalidAddress` if the delegated entry has no address
    pub fn derive_authorized_address(&self, credential: &SessionCredential) -> GateResult<String> {
        let message = credential.parsed_message()?;

        if message.capabilities.is_empty() {
            return Err(GateError::EmptyCapabilities);
        }

        let delegation = message
            .capabilities
            .iter()
            .find(|capability| capability.algo.as_deref() == Some(self.delegation_algorithm.as_str()))
            .ok_or_else(|| GateError::NotDelegated {
                algorithm: self.delegation_algorithm.clone(),
            })?;

        let address = delegation
            .address
            .clone()
            .ok_or_else(|| GateError::invalid_address(""))?;
        log::debug!("Delegated address permitted to decrypt: {}", address);
        Ok(address)
    }

    /// Condition "the caller's authenticated identity equals `address`".
    ///
    /// The address may omit its `0x` prefix; the condition always stores the
    /// prefixed form.
    ///
    /// # Errors
    /// `InvalidAddress` unless `address` is 40 hex digits, with a valid EIP-55
    /// checksum when it mixes cases.
    pub fn build_access_control_condition(&self, address: &str) -> GateResult<AccessControlCondition> {
        let value = normalize_account_address(address)
            .ok_or_else(|| GateError::invalid_address(address))?;

        Ok(AccessControlCondition {
            contract_address: String::new(),
            standard_contract_type: String::new(),
            chain: ACCESS_CONTROL_CHAIN.to_string(),
            method: String::new(),
            parameters: vec![USER_ADDRESS_PARAMETER.to_string()],
            return_value_test: ReturnValueTest {
                comparator: EQUALS_COMPARATOR.to_string(),
                value,
            },
        })
    }

    /// Run both steps: credential to delegated address to condition
    pub fn authorize(&self, credential: &SessionCredential) -> GateResult<AccessControlCondition> {
        let address = self.derive_authorized_address(credential)?;
        self.build_access_control_condition(&address)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PKP_ADDRESS: &str = "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed";

    fn capability(algo: &str, address: Option<&str>) -> Capability {
        Capability {
            sig: String::new(),
            derived_via: "lit.bls".to_string(),
            signed_message: String::new(),
            address: address.map(str::to_string),
            algo: Some(algo.to_string()),
        }
    }

    #[test]
    fn test_empty_capabilities() {
        let credential = SessionCredential::with_capabilities(vec![]).unwrap();
        let result = AccessControlAuthorizer::default().derive_authorized_address(&credential);
        assert!(matches!(result, Err(GateError::EmptyCapabilities)));
    }

    #[test]
    fn test_missing_capabilities_field_is_empty() {
        let credential = SessionCredential {
            sig: String::new(),
            derived_via: String::new(),
            signed_message: r#"{"sessionKey":"abc"}"#.to_string(),
            address: String::new(),
            algo: None,
        };
        let result = AccessControlAuthorizer::default().derive_authorized_address(&credential);
        assert!(matches!(result, Err(GateError::EmptyCapabilities)));
    }

    #[test]
    fn test_not_delegated() {
        let credential =
            SessionCredential::with_capabilities(vec![capability("OTHER", Some(PKP_ADDRESS))]).unwrap();
        let result = AccessControlAuthorizer::new("DELEGATION").derive_authorized_address(&credential);
        assert!(matches!(result, Err(GateError::NotDelegated { .. })));
    }

    #[test]
    fn test_delegated_address_returned() {
        let credential = SessionCredential::with_capabilities(vec![capability(
            "DELEGATION",
            Some(PKP_ADDRESS),
        )])
        .unwrap();
        let address = AccessControlAuthorizer::new("DELEGATION")
            .derive_authorized_address(&credential)
            .unwrap();
        assert_eq!(address, PKP_ADDRESS);
    }

    #[test]
    fn test_first_match_wins() {
        let credential = SessionCredential::with_capabilities(vec![
            capability("SIWE", Some("0x1111111111111111111111111111111111111111")),
            capability("LIT_BLS", Some(PKP_ADDRESS)),
            capability("LIT_BLS", Some("0x2222222222222222222222222222222222222222")),
        ])
        .unwrap();
        let address = AccessControlAuthorizer::default()
            .derive_authorized_address(&credential)
            .unwrap();
        assert_eq!(address, PKP_ADDRESS);
    }

    #[test]
    fn test_original_wire_shape() {
        let json = format!(
            r#"{{"sig":"00","derivedVia":"litSessionSignViaNacl","address":"ed25519key","algo":"ed25519",
                "signedMessage":"{{\"capabilities\":[{{\"sig\":\"\",\"derivedVia\":\"lit.bls\",\"signedMessage\":\"\",\"address\":\"{}\",\"algo\":\"LIT_BLS\"}}]}}"}}"#,
            PKP_ADDRESS
        );
        let credential: SessionCredential = serde_json::from_str(&json).unwrap();
        let condition = AccessControlAuthorizer::default().authorize(&credential).unwrap();
        assert_eq!(condition.required_address(), PKP_ADDRESS);
    }

    #[test]
    fn test_field_aliases() {
        let message = r#"{"capabilities":[{"algorithm":"DELEGATION","delegatedAddress":"0xabc0000000000000000000000000000000000123"}]}"#;
        let credential = SessionCredential {
            sig: String::new(),
            derived_via: String::new(),
            signed_message: message.to_string(),
            address: String::new(),
            algo: None,
        };
        let address = AccessControlAuthorizer::new("DELEGATION")
            .derive_authorized_address(&credential)
            .unwrap();
        assert_eq!(address, "0xabc0000000000000000000000000000000000123");
    }

    #[test]
    fn test_malformed_signed_message() {
        let credential = SessionCredential {
            sig: String::new(),
            derived_via: String::new(),
            signed_message: "not json".to_string(),
            address: String::new(),
            algo: None,
        };
        let result = AccessControlAuthorizer::default().derive_authorized_address(&credential);
        assert!(matches!(result, Err(GateError::Serialization { .. })));
    }

    #[test]
    fn test_delegated_entry_without_address() {
        let credential =
            SessionCredential::with_capabilities(vec![capability("LIT_BLS", None)]).unwrap();
        let result = AccessControlAuthorizer::default().authorize(&credential);
        assert!(matches!(result, Err(GateError::InvalidAddress { .. })));
    }

    #[test]
    fn test_condition_shape() {
        let condition = AccessControlAuthorizer::default()
            .build_access_control_condition(PKP_ADDRESS)
            .unwrap();
        let json = serde_json::to_value(&condition).unwrap();

        assert_eq!(json["chain"], "ethereum");
        assert_eq!(json["contractAddress"], "");
        assert_eq!(json["standardContractType"], "");
        assert_eq!(json["method"], "");
        assert_eq!(json["parameters"][0], ":userAddress");
        assert_eq!(json["returnValueTest"]["comparator"], "=");
        assert_eq!(json["returnValueTest"]["value"], PKP_ADDRESS);
    }

    #[test]
    fn test_condition_rejects_invalid_address() {
        let authorizer = AccessControlAuthorizer::default();
        for address in ["", "0xABC", "tb1pfgj62z9zdc3mm4we7lhhq06lgvmyalxfac7q7vk4u6qw4rgx49kq2hheus"] {
            assert!(matches!(
                authorizer.build_access_control_condition(address),
                Err(GateError::InvalidAddress { .. })
            ));
        }
    }

    #[test]
    fn test_condition_rejects_bad_checksum() {
        let result = AccessControlAuthorizer::default()
            .build_access_control_condition("0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAeD");
        assert!(matches!(result, Err(GateError::InvalidAddress { .. })));
    }

    #[test]
    fn test_condition_prefixes_bare_address() {
        let condition = AccessControlAuthorizer::default()
            .build_access_control_condition(&PKP_ADDRESS[2..])
            .unwrap();
        assert_eq!(condition.required_address(), PKP_ADDRESS);
    }

    #[test]
    fn test_condition_satisfaction() {
        let condition = AccessControlAuthorizer::default()
            .build_access_control_condition(PKP_ADDRESS)
            .unwrap();
        assert!(condition.is_satisfied_by(PKP_ADDRESS));
        assert!(condition.is_satisfied_by(&PKP_ADDRESS.to_lowercase()));
        assert!(!condition.is_satisfied_by("0x1111111111111111111111111111111111111111"));
    }

    #[test]
    fn test_first_session_credential() {
        let mut credentials = SessionCredentials::new();
        assert!(matches!(
            first_session_credential(&credentials),
            Err(GateError::NoSessionCredential)
        ));

        let credential = SessionCredential::with_capabilities(vec![]).unwrap();
        credentials.insert("https://node-a".to_string(), credential.clone());
        assert_eq!(first_session_credential(&credentials).unwrap(), &credential);
    }
}
