// SPDX-License-Identifier: MIT OR Apache-2.0

//! One member's view of the ratchet tree and the subtree-aware TreeKEM protocol on top of it.
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

use crate::codec::{DecodeError, EncodeError, decode_cbor, encode_cbor};
use crate::crypto::hpke::HpkeCiphertext;
use crate::traits::CryptoProvider;
use crate::tree::math::{self, LeafIndex, NodeIndex};
use crate::tree::node::{Node, NodeMap, NodeSecret, PublicNode, to_public};
use crate::tree::ratchet::hash_up;

/// HPKE context label for path secrets sent to subtree heads.
const PATH_SECRET_INFO: &[u8] = b"p2panda-treekem-path-secret";

/// Ciphertexts of one path update, one map per copath level ordered from the leaf to the root.
///
/// Each map holds the parent secret of that level encrypted to every populated head of the
/// copath subtree, keyed by the tree index of the head.
pub type PathCiphertexts = Vec<NodeMap<HpkeCiphertext>>;

/// Public output of [`TreeKem::encrypt`] which is sent to the group.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedPath {
    /// Public keys of the freshly ratcheted direct path of the sender.
    pub nodes: NodeMap<PublicNode>,

    pub ciphertexts: PathCiphertexts,
}

/// Output of [`TreeKem::decrypt`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptedPath {
    /// The new root only.
    pub root: NodeMap<Node>,

    /// All nodes we could derive, from the parent of the overlap node up to the root.
    pub nodes: NodeMap<Node>,
}

impl DecryptedPath {
    /// Secret of the new root.
    pub fn root_secret(&self) -> Option<&NodeSecret> {
        self.root.values().next().and_then(Node::secret)
    }
}

/// State of the ratchet tree as seen by one member.
///
/// The tree is stored as a sparse map from tree indices to nodes. The member holds full key
/// material for the known nodes on its own direct path and the root, and public keys for
/// everything else it learned about. Positions without an entry are unknown or blank.
///
/// The shape of the tree changes only through [`TreeKem::merge`], [`TreeKem::remove`] and
/// [`TreeKem::trim`] and when a new member is added at the right edge.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeKem {
    size: u32,
    index: LeafIndex,
    nodes: NodeMap<Node>,
}

// Constructors and accessors.

impl TreeKem {
    /// Bootstraps a tree with one member holding the given leaf secret.
    pub fn one_member_group<P: CryptoProvider>(
        leaf_secret: &[u8],
        provider: &P,
    ) -> TreeKemResult<Self, P> {
        let nodes = hash_up(0, 1, NodeSecret::from_bytes(leaf_secret), provider)
            .map_err(TreeKemError::Provider)?;
        Ok(Self {
            size: 1,
            index: 0,
            nodes,
        })
    }

    /// Extends a tree of `size` leaves, known only through its frontier, by one leaf for us.
    ///
    /// We occupy the new leaf at position `size` and ratchet our secret up to the new root.
    pub fn from_frontier<P: CryptoProvider>(
        size: u32,
        frontier: &NodeMap<PublicNode>,
        leaf_secret: &[u8],
        provider: &P,
    ) -> TreeKemResult<Self, P> {
        if size == 0 {
            return Err(TreeError::EmptyTree.into());
        }
        check_nodes(frontier, size)?;

        let mut tree = Self {
            size: size + 1,
            index: size,
            nodes: NodeMap::new(),
        };
        tree.merge(frontier, false);

        let own_nodes = hash_up(
            math::leaf_node(size),
            tree.size,
            NodeSecret::from_bytes(leaf_secret),
            provider,
        )
        .map_err(TreeKemError::Provider)?;
        tree.merge(&own_nodes, false);

        Ok(tree)
    }

    #[cfg(test)]
    pub(crate) fn from_nodes(size: u32, index: LeafIndex, nodes: NodeMap<Node>) -> Self {
        Self { size, index, nodes }
    }

    /// Number of leaves.
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Our own leaf.
    pub fn index(&self) -> LeafIndex {
        self.index
    }

    pub fn nodes(&self) -> &NodeMap<Node> {
        &self.nodes
    }

    pub fn node(&self, index: NodeIndex) -> Option<&Node> {
        self.nodes.get(&index)
    }

    /// Secret of the root node, recommended as the group secret of the current epoch.
    pub fn group_secret(&self) -> Option<&NodeSecret> {
        self.nodes.get(&math::root(self.size)).and_then(Node::secret)
    }

    /// Returns true if the leaf of the given member is populated.
    pub fn is_occupied(&self, leaf: LeafIndex) -> bool {
        leaf < self.size && self.nodes.contains_key(&math::leaf_node(leaf))
    }

    /// Public keys of all known nodes.
    pub fn public_tree(&self) -> NodeMap<PublicNode> {
        to_public(&self.nodes)
    }

    /// Two views are consistent when they have the same size and agree on the public key of every
    /// node both of them know.
    pub fn equal(&self, other: &TreeKem) -> bool {
        if self.size != other.size {
            return false;
        }
        self.nodes.iter().all(|(index, node)| match other.nodes.get(index) {
            Some(other_node) => {
                node.public_key().fingerprint() == other_node.public_key().fingerprint()
            }
            None => true,
        })
    }

    /// Human-readable listing of the tree, one known node per line.
    pub fn dump(&self) -> String {
        let mut out = format!(
            "size: {}, index: {}, root: {}\n",
            self.size,
            self.index,
            math::root(self.size)
        );
        for (index, node) in &self.nodes {
            let kind = if node.is_full() { "full" } else { "public" };
            out.push_str(&format!(
                "{:>4}: {} ({kind})\n",
                index,
                node.public_key().fingerprint()
            ));
        }
        out
    }
}

// Protocol.

impl TreeKem {
    /// Ratchets `leaf_secret` up from the leaf of `except` and encrypts every new path secret to
    /// the subtrees hanging off that path.
    ///
    /// Everyone except the member at `except` can decrypt the part of the path they share with it.
    /// Returns the private nodes of the new path, to be kept by the sender, next to the public
    /// output for the group.
    pub fn encrypt<P: CryptoProvider>(
        &self,
        leaf_secret: &[u8],
        except: LeafIndex,
        provider: &P,
    ) -> TreeKemResult<(NodeMap<Node>, EncryptedPath), P> {
        self.check_leaf(except)?;
        let leaf = math::leaf_node(except);

        let private_nodes = hash_up(
            leaf,
            self.size,
            NodeSecret::from_bytes(leaf_secret),
            provider,
        )
        .map_err(TreeKemError::Provider)?;

        let mut ciphertexts = PathCiphertexts::new();
        for head in math::copath(leaf, self.size) {
            let parent = math::parent(head, self.size);
            let secret = private_nodes
                .get(&parent)
                .and_then(Node::secret)
                .ok_or(TreeKemError::MissingSecretKey(parent))?;
            ciphertexts.push(self.encrypt_to_subtree(head, secret, provider)?);
        }

        let nodes = to_public(&private_nodes);
        Ok((private_nodes, EncryptedPath { nodes, ciphertexts }))
    }

    /// Recovers the path secrets of an update sent from the leaf of `sender`.
    ///
    /// If `sender` equals our size the update comes from a member joining at the right edge and is
    /// interpreted for a tree grown by one leaf. The tree itself is not changed, callers merge the
    /// output.
    pub fn decrypt<P: CryptoProvider>(
        &self,
        sender: LeafIndex,
        ciphertexts: &[NodeMap<HpkeCiphertext>],
        provider: &P,
    ) -> TreeKemResult<DecryptedPath, P> {
        if sender > self.size {
            return Err(TreeError::InvalidLeaf {
                leaf: sender,
                size: self.size,
            }
            .into());
        }
        let sender_size = if sender == self.size {
            self.size + 1
        } else {
            self.size
        };

        let copath = math::copath(math::leaf_node(sender), sender_size);
        if copath.len() != ciphertexts.len() {
            return Err(TreeKemError::CiphertextCount {
                sender,
                expected: copath.len(),
                actual: ciphertexts.len(),
            });
        }

        let own_leaf = math::leaf_node(self.index);
        let mut dirpath = math::dirpath(own_leaf, self.size);
        dirpath.push(math::root(self.size));

        // Lowest node of our direct path which hangs off the sender's path.
        let (dir_index, co_index) = dirpath
            .iter()
            .enumerate()
            .find_map(|(dir_index, node)| {
                copath
                    .iter()
                    .position(|head| head == node)
                    .map(|co_index| (dir_index, co_index))
            })
            .ok_or(TreeKemError::NoOverlap {
                index: self.index,
                sender,
            })?;
        let overlap = dirpath[dir_index];
        trace!(sender, overlap, level = co_index, "found overlap with sender path");

        let (target, ciphertext) = ciphertexts[co_index]
            .iter()
            .find(|(target, _)| dirpath.contains(*target))
            .ok_or(TreeKemError::NoDecryptableCiphertext(overlap))?;
        let secret_key = self
            .nodes
            .get(target)
            .and_then(Node::secret_key)
            .ok_or(TreeKemError::MissingSecretKey(*target))?;
        let secret = provider
            .hpke_open(
                ciphertext,
                secret_key,
                Some(PATH_SECRET_INFO),
                Some(&target.to_be_bytes()),
            )
            .map_err(TreeKemError::Provider)?;

        let mut new_dirpath = math::dirpath(own_leaf, sender_size);
        new_dirpath.push(math::root(sender_size));
        let start = new_dirpath
            .get(dir_index + 1)
            .copied()
            .ok_or(TreeKemError::NoOverlap {
                index: self.index,
                sender,
            })?;

        let nodes = hash_up(start, sender_size, NodeSecret::from(secret), provider)
            .map_err(TreeKemError::Provider)?;

        let root_index = math::root(sender_size);
        let root = nodes
            .get(&root_index)
            .map(|node| NodeMap::from([(root_index, node.clone())]))
            .unwrap_or_default();

        Ok(DecryptedPath { root, nodes })
    }

    /// Applies `f` to the highest populated nodes below (or at) `head`.
    ///
    /// A populated node stops the descent, absent nodes are replaced by their children.
    pub fn map_subtree<T>(
        &self,
        head: NodeIndex,
        f: &mut impl FnMut(NodeIndex, &Node) -> T,
    ) -> NodeMap<T> {
        let mut out = NodeMap::new();
        self.visit_subtree(head, f, &mut out);
        out
    }

    fn visit_subtree<T>(
        &self,
        head: NodeIndex,
        f: &mut impl FnMut(NodeIndex, &Node) -> T,
        out: &mut NodeMap<T>,
    ) {
        if let Some(node) = self.nodes.get(&head) {
            out.insert(head, f(head, node));
            return;
        }

        let left = math::left(head);
        if left != head {
            self.visit_subtree(left, f, out);
        }

        let right = math::right(head, self.size);
        if right != head {
            self.visit_subtree(right, f, out);
        }
    }

    /// Public keys of the highest populated nodes below (or at) `head`.
    pub fn gather_subtree(&self, head: NodeIndex) -> NodeMap<PublicNode> {
        self.map_subtree(head, &mut |_, node| node.to_public())
    }

    /// Subtree heads covering the whole tree, this is what a joiner needs to know.
    pub fn frontier(&self) -> NodeMap<PublicNode> {
        math::frontier(self.size)
            .into_iter()
            .flat_map(|head| self.gather_subtree(head))
            .collect()
    }

    /// Subtree heads covering everything hanging off the direct path of a member.
    pub fn copath(&self, leaf: LeafIndex) -> Result<NodeMap<PublicNode>, TreeError> {
        self.check_leaf(leaf)?;
        Ok(math::copath(math::leaf_node(leaf), self.size)
            .into_iter()
            .flat_map(|head| self.gather_subtree(head))
            .collect())
    }

    fn encrypt_to_subtree<P: CryptoProvider>(
        &self,
        head: NodeIndex,
        secret: &NodeSecret,
        provider: &P,
    ) -> TreeKemResult<NodeMap<HpkeCiphertext>, P> {
        let mut out = NodeMap::new();
        for (index, node) in self.gather_subtree(head) {
            let ciphertext = provider
                .hpke_seal(
                    &node.public_key,
                    Some(PATH_SECRET_INFO),
                    Some(&index.to_be_bytes()),
                    secret.as_bytes(),
                )
                .map_err(TreeKemError::Provider)?;
            out.insert(index, ciphertext);
        }
        Ok(out)
    }
}

// Mutation.

impl TreeKem {
    /// Inserts the given nodes. With `preserve` set, positions we already know are kept as they
    /// are.
    pub fn merge<N>(&mut self, nodes: &NodeMap<N>, preserve: bool)
    where
        N: Clone + Into<Node>,
    {
        for (index, node) in nodes {
            if preserve && self.nodes.contains_key(index) {
                continue;
            }
            self.nodes.insert(*index, node.clone().into());
        }
    }

    /// Blanks the direct path of a member, the root stays.
    pub fn remove(&mut self, leaf: LeafIndex) -> Result<(), TreeError> {
        self.check_leaf(leaf)?;
        for index in math::dirpath(math::leaf_node(leaf), self.size) {
            self.nodes.remove(&index);
        }
        Ok(())
    }

    /// Shrinks the tree to `size` leaves and drops every node outside of the new width.
    pub fn trim(&mut self, size: u32) -> Result<(), TreeError> {
        if size > self.size || size <= self.index {
            return Err(TreeError::InvalidTrim {
                size: self.size,
                requested: size,
            });
        }
        let width = math::node_width(size);
        self.nodes.retain(|index, _| *index < width);
        self.size = size;
        Ok(())
    }

    /// Trims all vacant leaves at the right edge of the tree.
    pub fn trim_vacant(&mut self) -> Result<(), TreeError> {
        let occupied = (0..self.size)
            .rev()
            .find(|leaf| self.nodes.contains_key(&math::leaf_node(*leaf)));
        if let Some(last) = occupied.filter(|last| last + 1 < self.size) {
            self.trim(last + 1)?;
        }
        Ok(())
    }

    /// Accounts for a member joining at the right edge.
    pub(crate) fn grow(&mut self) {
        self.size += 1;
    }

    /// Moves our own position to another leaf.
    pub(crate) fn set_index(&mut self, leaf: LeafIndex) -> Result<(), TreeError> {
        self.check_leaf(leaf)?;
        self.index = leaf;
        Ok(())
    }

    pub(crate) fn check_leaf(&self, leaf: LeafIndex) -> Result<(), TreeError> {
        if leaf >= self.size {
            return Err(TreeError::InvalidLeaf {
                leaf,
                size: self.size,
            });
        }
        Ok(())
    }
}

// Snapshots.

impl TreeKem {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_cbor(self)
    }

    /// Restores a snapshot and validates its shape and key material.
    pub fn from_bytes<P: CryptoProvider>(bytes: &[u8], provider: &P) -> TreeKemResult<Self, P> {
        let tree: TreeKem = decode_cbor(bytes)?;

        if tree.size == 0 {
            return Err(TreeError::EmptyTree.into());
        }
        tree.check_leaf(tree.index)?;
        check_nodes(&tree.nodes, tree.size)?;

        for (index, node) in &tree.nodes {
            if !node.verify(provider).map_err(TreeKemError::Provider)? {
                return Err(TreeKemError::InconsistentNode(*index));
            }
        }

        Ok(tree)
    }
}

/// Checks that all indices of a node map fit into a tree of `size` leaves.
pub fn check_nodes<N>(nodes: &NodeMap<N>, size: u32) -> Result<(), TreeError> {
    let width = math::node_width(size);
    match nodes.keys().find(|index| **index >= width) {
        Some(index) => Err(TreeError::InvalidNode { node: *index, size }),
        None => Ok(()),
    }
}

pub type TreeKemResult<T, P> = Result<T, TreeKemError<P>>;

/// Structural errors which do not involve any cryptography.
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("leaf {leaf} is out of bounds for a tree of {size} leaves")]
    InvalidLeaf { leaf: LeafIndex, size: u32 },

    #[error("node {node} is out of bounds for a tree of {size} leaves")]
    InvalidNode { node: NodeIndex, size: u32 },

    #[error("can not trim tree of {size} leaves to {requested} leaves")]
    InvalidTrim { size: u32, requested: u32 },

    #[error("tree needs at least one leaf")]
    EmptyTree,
}

#[derive(Debug, Error)]
pub enum TreeKemError<P: CryptoProvider> {
    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error("expected {expected} ciphertext levels from sender {sender}, got {actual}")]
    CiphertextCount {
        sender: LeafIndex,
        expected: usize,
        actual: usize,
    },

    #[error("direct path of leaf {index} does not overlap with the copath of sender {sender}")]
    NoOverlap { index: LeafIndex, sender: LeafIndex },

    #[error("no ciphertext addressed to our direct path below node {0}")]
    NoDecryptableCiphertext(NodeIndex),

    #[error("missing secret key for node {0}")]
    MissingSecretKey(NodeIndex),

    #[error("key pair of node {0} does not match its secret")]
    InconsistentNode(NodeIndex),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("crypto provider failed: {0}")]
    Provider(P::Error),
}
