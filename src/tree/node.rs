// SPDX-License-Identifier: MIT OR Apache-2.0

use std::collections::BTreeMap;
#[cfg(not(test))]
use std::fmt;

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::ZeroizeOnDrop;

use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::traits::CryptoProvider;
use crate::tree::math::NodeIndex;

/// Sparse map of tree positions to node records.
pub type NodeMap<T> = BTreeMap<NodeIndex, T>;

/// Secret of a tree node, all key material of the node is derived from it.
///
/// Leaf secrets are chosen by members and can have any length, all other secrets are outputs of
/// the ratchet hash. The secret of the root is the group secret.
#[derive(Clone, Eq, Serialize, Deserialize, ZeroizeOnDrop)]
#[cfg_attr(test, derive(Debug))]
pub struct NodeSecret(#[serde(with = "serde_bytes")] Vec<u8>);

impl NodeSecret {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Combines two secrets of equal length with XOR, returns `None` if the lengths differ.
    pub fn xor(&self, other: &NodeSecret) -> Option<NodeSecret> {
        if self.0.len() != other.0.len() {
            return None;
        }
        let bytes = self
            .0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a ^ b)
            .collect();
        Some(NodeSecret(bytes))
    }
}

impl From<Vec<u8>> for NodeSecret {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl PartialEq for NodeSecret {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.0.as_slice().ct_eq(other.0.as_slice()))
    }
}

#[cfg(not(test))]
impl fmt::Debug for NodeSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeSecret").field("value", &"***").finish()
    }
}

/// A known node of the tree.
///
/// Members hold the full key material for the nodes on their own direct path and only the public
/// key for everything else they know about. Unknown or blanked positions have no entry at all.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Node {
    Full {
        public_key: PublicKey,
        secret_key: SecretKey,
        secret: NodeSecret,
    },
    PublicOnly {
        public_key: PublicKey,
    },
}

impl Node {
    /// Derives the key pair of a node from its secret.
    pub fn from_secret<P: CryptoProvider>(
        secret: NodeSecret,
        provider: &P,
    ) -> Result<Self, P::Error> {
        let (secret_key, public_key) = provider.derive_key_pair(secret.as_bytes())?;
        Ok(Node::Full {
            public_key,
            secret_key,
            secret,
        })
    }

    pub fn public_key(&self) -> &PublicKey {
        match self {
            Node::Full { public_key, .. } => public_key,
            Node::PublicOnly { public_key } => public_key,
        }
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        match self {
            Node::Full { secret_key, .. } => Some(secret_key),
            Node::PublicOnly { .. } => None,
        }
    }

    pub fn secret(&self) -> Option<&NodeSecret> {
        match self {
            Node::Full { secret, .. } => Some(secret),
            Node::PublicOnly { .. } => None,
        }
    }

    pub fn is_full(&self) -> bool {
        matches!(self, Node::Full { .. })
    }

    /// Public projection of this node, safe to transmit.
    pub fn to_public(&self) -> PublicNode {
        PublicNode {
            public_key: *self.public_key(),
        }
    }

    /// Checks that the key material of a full node is the one derived from its secret.
    ///
    /// Public-only nodes carry nothing to check and are always consistent.
    pub fn verify<P: CryptoProvider>(&self, provider: &P) -> Result<bool, P::Error> {
        match self {
            Node::Full {
                public_key,
                secret_key,
                secret,
            } => {
                let (derived_secret_key, derived_public_key) =
                    provider.derive_key_pair(secret.as_bytes())?;
                Ok(&derived_secret_key == secret_key && &derived_public_key == public_key)
            }
            Node::PublicOnly { .. } => Ok(true),
        }
    }
}

/// Public part of a node, this is what members broadcast about each other's paths.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicNode {
    pub public_key: PublicKey,
}

impl From<PublicNode> for Node {
    fn from(node: PublicNode) -> Self {
        Node::PublicOnly {
            public_key: node.public_key,
        }
    }
}

/// Public projection of a node map.
pub fn to_public(nodes: &NodeMap<Node>) -> NodeMap<PublicNode> {
    nodes
        .iter()
        .map(|(index, node)| (*index, node.to_public()))
        .collect()
}
