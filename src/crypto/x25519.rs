// SPDX-License-Identifier: MIT OR Apache-2.0

//! X25519 key pairs used as node keys of the ratchet tree.
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::Secret;
use crate::crypto::sha2::{SHA256_DIGEST_SIZE, sha2_256};

/// 256-bit secret key size.
pub const SECRET_KEY_SIZE: usize = 32;

/// 256-bit public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Secret Curve25519 key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretKey(Secret<SECRET_KEY_SIZE>);

impl SecretKey {
    /// Creates a secret key from 32 bytes of key material, clamping it to a valid X25519 scalar.
    pub fn from_bytes(bytes: [u8; SECRET_KEY_SIZE]) -> Self {
        let mut bytes = bytes;
        bytes[0] &= 248u8;
        bytes[31] &= 127u8;
        bytes[31] |= 64u8;
        SecretKey(Secret::from_bytes(bytes))
    }

    pub(crate) fn as_bytes(&self) -> &[u8; SECRET_KEY_SIZE] {
        self.0.as_bytes()
    }

    pub fn public_key(&self) -> PublicKey {
        let static_secret = x25519_dalek::StaticSecret::from(*self.as_bytes());
        PublicKey(x25519_dalek::PublicKey::from(&static_secret).to_bytes())
    }
}

/// Public Curve25519 key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKey(#[serde(with = "serde_bytes")] [u8; PUBLIC_KEY_SIZE]);

impl PublicKey {
    pub fn from_bytes(public_key: [u8; PUBLIC_KEY_SIZE]) -> Self {
        Self(public_key)
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Stable, comparable digest of this key, used to check whether two members hold the same
    /// view of a node.
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(sha2_256(&[self.as_bytes()]))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// SHA2-256 digest of a public key.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint([u8; SHA256_DIGEST_SIZE]);

impl Fingerprint {
    pub fn as_bytes(&self) -> &[u8; SHA256_DIGEST_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough to tell nodes apart in logs and dumps.
        write!(f, "{}", &self.to_hex()[..16])
    }
}
