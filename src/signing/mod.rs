//! Signing gate: the only place a wallet secret is ever decrypted.

pub mod gate;

pub use gate::{GateState, SignRequest, SignedTransaction, SigningGate};
