// SPDX-License-Identifier: MIT OR Apache-2.0

//! Payloads members exchange to agree on the tree.
use serde::{Deserialize, Serialize};

use crate::codec::Codec;
use crate::crypto::hpke::HpkeCiphertext;
use crate::tree::{LeafIndex, NodeMap, PathCiphertexts, PublicNode};

/// Everything a prospective member needs to know about the tree to join it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupInitKey {
    /// Number of leaves before the join.
    pub size: u32,

    /// Public keys of the populated heads of the maximal complete subtrees, the joiner encrypts
    /// its new path to them.
    pub frontier: NodeMap<PublicNode>,

    /// Public keys of all known nodes, needed later to encrypt around removed or moved members.
    pub tree: NodeMap<PublicNode>,
}

/// Path of a member joining at the right edge, broadcast to the group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAdd {
    pub ciphertexts: PathCiphertexts,
    pub nodes: NodeMap<PublicNode>,
}

/// Part of a [`GroupAdd`] addressed to the new member only.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub size: u32,
    pub frontier: NodeMap<PublicNode>,
    pub tree: NodeMap<PublicNode>,

    /// Leaf secret chosen by the sponsor, encrypted to the init key of the new member.
    pub encrypted_leaf: HpkeCiphertext,
}

impl Welcome {
    pub fn init_key(&self) -> GroupInitKey {
        GroupInitKey {
            size: self.size,
            frontier: self.frontier.clone(),
            tree: self.tree.clone(),
        }
    }
}

/// Addition of a new member by an existing one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupAdd {
    pub for_group: UserAdd,
    pub for_joiner: Welcome,
}

/// Fresh path of a member.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Update {
    pub from: LeafIndex,
    pub ciphertexts: PathCiphertexts,
    pub nodes: NodeMap<PublicNode>,
}

/// Removal of the member at `index`.
///
/// The ciphertexts are produced as if the removed member updated, but with a secret only the
/// remover knows. The new path itself is never published, only the new root is derived by the
/// remaining members.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Remove {
    pub index: LeafIndex,
    pub ciphertexts: PathCiphertexts,

    /// Populated heads of the copath of the removed member, as seen by the remover.
    pub subtree_heads: NodeMap<PublicNode>,
}

/// Move of a member from its leaf into a vacant one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub from: LeafIndex,
    pub to: LeafIndex,
    pub ciphertexts: PathCiphertexts,

    /// New path starting at `to`.
    pub nodes: NodeMap<PublicNode>,

    /// Populated heads of the copath of `to` once `from` is blanked.
    pub subtree_heads: NodeMap<PublicNode>,
}

impl Codec for GroupInitKey {}

impl Codec for UserAdd {}

impl Codec for Welcome {}

impl Codec for GroupAdd {}

impl Codec for Update {}

impl Codec for Remove {}

impl Codec for Move {}
