// SPDX-License-Identifier: MIT OR Apache-2.0

//! `p2panda-treekem` implements a tree-based continuous group key agreement (CGKA): a group of
//! members continuously agrees on a shared group secret while members join, refresh their key
//! material, get removed or move inside the group.
//!
//! ## Ratchet tree
//!
//! Members sit at the leaves of a left-balanced binary tree which is stored as a flat array, see
//! [`tree::math`] for the addressing. Every node carries a secret from which an X25519 key pair is
//! derived. The secret of a parent is the hash of the secret of the child on the path it was last
//! updated from, so knowing a leaf secret means knowing every secret up to the root. The secret of
//! the root is the group secret.
//!
//! Each member only knows the secrets on its own direct path. When a member updates, it chooses a
//! new leaf secret, ratchets it up to the root and encrypts every new secret to the sibling
//! subtree of the level it belongs to. Other members decrypt the one secret at the lowest level
//! they share with the updater and derive the rest themselves.
//!
//! ## Subtree-aware encryption
//!
//! Nodes can be blank, for example after a member was removed. Instead of encrypting to the
//! sibling node only, secrets are encrypted to every populated node heading the sibling subtree,
//! which keeps the protocol working with any number of blanks at the cost of more ciphertexts.
//!
//! ## Usage
//!
//! The [group API](crate::group::TreeKemGroup) produces and processes all payloads members
//! exchange, everything is serializable with [serde](https://serde.rs/) and can be encoded with
//! the helpers in [`codec`]. The cryptographic primitives are injected through the
//! [`CryptoProvider`](traits::CryptoProvider) trait, [`Crypto`](crypto::Crypto) is the default.
//!
//! Ordering of payloads is not handled here. Applications need to deliver payloads to every member
//! exactly once and in the same order, concurrent updates created against the same state can be
//! processed as one round.
//!
//! ## Credits
//!
//! The construction follows "TreeKEM: Asynchronous Decentralized Key Management for Large Dynamic
//! Groups" by Karthikeyan Bhargavan, Richard Barnes and Eric Rescorla (2018).
pub mod codec;
pub mod crypto;
pub mod group;
#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
pub mod traits;
pub mod tree;

pub use crypto::{Crypto, CryptoError, Rng, RngError};
pub use group::{GroupError, GroupState, TreeKemGroup};
pub use tree::{NodeSecret, TreeKem, TreeKemError};
