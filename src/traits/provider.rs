// SPDX-License-Identifier: MIT OR Apache-2.0

use std::error::Error;

use crate::crypto::hpke::HpkeCiphertext;
use crate::crypto::x25519::{PublicKey, SecretKey};

/// Provider for the primitives the tree needs: a ratchet hash, the deterministic mapping from node
/// secrets to key pairs ("iota") and hybrid public-key encryption of path secrets.
///
/// Every engine and group operation takes the provider as an explicit argument. The default
/// implementation is [`Crypto`](crate::crypto::Crypto), tests can swap in instrumented or failing
/// providers.
pub trait CryptoProvider {
    type Error: Error;

    /// Hash used to derive a parent's secret from its child's secret.
    fn hash(&self, bytes: &[u8]) -> Result<Vec<u8>, Self::Error>;

    /// Derives the key pair of a node from its secret. Must be deterministic.
    fn derive_key_pair(&self, secret: &[u8]) -> Result<(SecretKey, PublicKey), Self::Error>;

    fn hpke_seal(
        &self,
        public_key: &PublicKey,
        info: Option<&[u8]>,
        aad: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<HpkeCiphertext, Self::Error>;

    fn hpke_open(
        &self,
        input: &HpkeCiphertext,
        secret_key: &SecretKey,
        info: Option<&[u8]>,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, Self::Error>;
}
