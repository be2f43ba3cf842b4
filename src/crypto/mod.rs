// SPDX-License-Identifier: MIT OR Apache-2.0

//! Cryptographic primitives and the default provider used by the TreeKEM engine.
//!
//! Following algorithms are used by [`Crypto`]:
//! * ChaCha random number generator with 20 rounds
//! * HPKE with DHKEM-X25519, HKDF SHA256 and ChaCha20Poly1305 AEAD
//! * SHA2-256 for the node secret ratchet and public key fingerprints
//! * SHA2-512 with wide scalar reduction to derive X25519 key pairs from node secrets
pub mod hpke;
mod iota;
mod provider;
mod rng;
mod secret;
pub mod sha2;
pub mod x25519;

pub use iota::iota;
pub use provider::{Crypto, CryptoError};
pub use rng::{Rng, RngError};
pub(crate) use secret::Secret;
