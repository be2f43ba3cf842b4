// SPDX-License-Identifier: MIT OR Apache-2.0

use curve25519_dalek::scalar::Scalar;

use crate::crypto::sha2::sha2_512;
use crate::crypto::x25519::{PublicKey, SecretKey};

const IOTA_DOMAIN: &[u8] = b"p2panda-treekem-iota-v1";

/// Deterministically derives an X25519 key pair from arbitrary secret bytes.
///
/// The secret is hashed with a domain separation tag and the 512-bit digest is reduced to a
/// scalar, so every node secret of the ratchet maps to exactly one key pair.
pub fn iota(secret: &[u8]) -> (SecretKey, PublicKey) {
    let digest = sha2_512(&[IOTA_DOMAIN, secret]);
    let scalar = Scalar::from_bytes_mod_order_wide(&digest);
    let secret_key = SecretKey::from_bytes(scalar.to_bytes());
    let public_key = secret_key.public_key();
    (secret_key, public_key)
}
