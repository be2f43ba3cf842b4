// SPDX-License-Identifier: MIT OR Apache-2.0

use thiserror::Error;

use crate::crypto::hpke::{self, HpkeCiphertext, HpkeError};
use crate::crypto::iota::iota;
use crate::crypto::sha2::sha2_256;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::traits::CryptoProvider;

/// Default cryptographic provider: SHA2-256 ratchet, X25519 key pairs and HPKE.
#[derive(Clone, Copy, Debug, Default)]
pub struct Crypto;

impl CryptoProvider for Crypto {
    type Error = CryptoError;

    fn hash(&self, bytes: &[u8]) -> Result<Vec<u8>, Self::Error> {
        Ok(sha2_256(&[bytes]).to_vec())
    }

    fn derive_key_pair(&self, secret: &[u8]) -> Result<(SecretKey, PublicKey), Self::Error> {
        Ok(iota(secret))
    }

    fn hpke_seal(
        &self,
        public_key: &PublicKey,
        info: Option<&[u8]>,
        aad: Option<&[u8]>,
        plaintext: &[u8],
    ) -> Result<HpkeCiphertext, Self::Error> {
        let ciphertext = hpke::hpke_seal(public_key, info, aad, plaintext)?;
        Ok(ciphertext)
    }

    fn hpke_open(
        &self,
        input: &HpkeCiphertext,
        secret_key: &SecretKey,
        info: Option<&[u8]>,
        aad: Option<&[u8]>,
    ) -> Result<Vec<u8>, Self::Error> {
        let plaintext = hpke::hpke_open(input, secret_key, info, aad)?;
        Ok(plaintext)
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error(transparent)]
    Hpke(#[from] HpkeError),
}
