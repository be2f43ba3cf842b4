// SPDX-License-Identifier: MIT OR Apache-2.0

use crate::traits::CryptoProvider;
use crate::tree::math::{self, NodeIndex};
use crate::tree::node::{Node, NodeMap, NodeSecret};

/// Ratchets a secret from `start` up to the root of a tree with `size` leaves.
///
/// The node at `start` receives `secret`, every ancestor receives the hash of its child's secret.
/// Each node gets the key pair derived from its secret. The result covers exactly the direct path
/// of `start` plus the root, all nodes are full.
pub fn hash_up<P: CryptoProvider>(
    start: NodeIndex,
    size: u32,
    secret: NodeSecret,
    provider: &P,
) -> Result<NodeMap<Node>, P::Error> {
    let root = math::root(size);
    let mut nodes = NodeMap::new();
    let mut index = start;
    let mut secret = secret;

    while index != root {
        let next_secret = NodeSecret::from(provider.hash(secret.as_bytes())?);
        nodes.insert(index, Node::from_secret(secret, provider)?);
        index = math::parent(index, size);
        secret = next_secret;
    }
    nodes.insert(root, Node::from_secret(secret, provider)?);

    Ok(nodes)
}
