// SPDX-License-Identifier: MIT OR Apache-2.0

//! Ratchet tree: array addressing, the node secret ratchet and the TreeKEM engine.
pub mod math;
mod node;
mod ratchet;
mod treekem;

pub use math::{LeafIndex, NodeIndex};
pub use node::{Node, NodeMap, NodeSecret, PublicNode};
pub use ratchet::hash_up;
pub use treekem::{
    DecryptedPath, EncryptedPath, PathCiphertexts, TreeError, TreeKem, TreeKemError,
    TreeKemResult, check_nodes,
};
