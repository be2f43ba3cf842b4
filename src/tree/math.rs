// SPDX-License-Identifier: MIT OR Apache-2.0

//! Arithmetic over the implicit, left-balanced binary tree stored in an array.
//!
//! A tree with `n` leaves occupies the indices `0..2n-1`. Leaves live at even indices (member `i`
//! sits at `2i`), internal nodes at odd indices. The level of a node is the number of trailing one
//! bits of its index, so leaves have level 0 and the shape of the tree is a pure function of `n`.
//!
//! Positions which would exist in the next complete tree but are outside of the width are skipped
//! when walking up or down, this is what makes the tree "left-balanced".
//!
//! All functions are total for `0 <= x < node_width(n)`. Out-of-range inputs are a programming
//! error, payload indices are validated before they reach this module.

/// Index of a node in the array representation of the tree.
pub type NodeIndex = u32;

/// Index of a member, the leaf of member `i` is the node `2i`.
pub type LeafIndex = u32;

/// Tree index of the leaf of a member.
pub fn leaf_node(leaf: LeafIndex) -> NodeIndex {
    2 * leaf
}

fn log2(x: u32) -> u32 {
    if x == 0 {
        return 0;
    }
    u32::BITS - 1 - x.leading_zeros()
}

/// Number of trailing one bits, 0 for leaves.
pub fn level(x: NodeIndex) -> u32 {
    x.trailing_ones()
}

/// Number of array slots needed for a tree with `n` leaves.
pub fn node_width(n: u32) -> u32 {
    if n == 0 { 0 } else { 2 * (n - 1) + 1 }
}

pub fn root(n: u32) -> NodeIndex {
    let width = node_width(n);
    (1 << log2(width)) - 1
}

/// Left child, leaves are their own left child.
pub fn left(x: NodeIndex) -> NodeIndex {
    let k = level(x);
    if k == 0 {
        return x;
    }
    x ^ (1 << (k - 1))
}

/// Right child, leaves are their own right child.
///
/// If the right child of the complete tree is outside of the width we descend to the left until
/// we hit an existing node.
pub fn right(x: NodeIndex, n: u32) -> NodeIndex {
    let k = level(x);
    if k == 0 {
        return x;
    }
    let width = node_width(n);
    let mut r = x ^ (0x03 << (k - 1));
    while r >= width {
        r = left(r);
    }
    r
}

/// Parent in the complete, infinite tree.
fn parent_step(x: NodeIndex) -> NodeIndex {
    let k = level(x);
    (x | (1 << k)) & !(1 << (k + 1))
}

/// Parent, skipping ancestors outside of the width. The root is its own parent.
pub fn parent(x: NodeIndex, n: u32) -> NodeIndex {
    if x == root(n) {
        return x;
    }
    let width = node_width(n);
    let mut p = parent_step(x);
    while p >= width {
        p = parent_step(p);
    }
    p
}

/// The other child of the parent. The root is its own sibling.
pub fn sibling(x: NodeIndex, n: u32) -> NodeIndex {
    let p = parent(x, n);
    if x < p {
        right(p, n)
    } else if x > p {
        left(p)
    } else {
        p
    }
}

/// Path from `x` (inclusive) up to the root (exclusive).
pub fn dirpath(x: NodeIndex, n: u32) -> Vec<NodeIndex> {
    let r = root(n);
    let mut path = Vec::new();
    let mut current = x;
    while current != r {
        path.push(current);
        current = parent(current, n);
    }
    path
}

/// Siblings of every node on the direct path of `x`.
pub fn copath(x: NodeIndex, n: u32) -> Vec<NodeIndex> {
    dirpath(x, n)
        .into_iter()
        .map(|node| sibling(node, n))
        .collect()
}

/// Heads of the maximal complete subtrees covering all leaves, ordered from left to right.
///
/// Every leaf is covered by exactly one head.
pub fn frontier(n: u32) -> Vec<NodeIndex> {
    if n == 0 {
        return Vec::new();
    }

    let last = leaf_node(n - 1);
    let mut heads = copath(last, n);
    heads.reverse();
    if heads.last() != Some(&last) {
        heads.push(last);
    }

    // Collapse the rightmost pair as long as it forms a complete subtree.
    while heads.len() > 1 {
        let rightmost = heads[heads.len() - 1];
        let p = parent(rightmost, n);
        if p != parent_step(rightmost) {
            break;
        }
        heads.truncate(heads.len() - 2);
        heads.push(p);
    }

    heads
}

/// Tree indices of all leaves.
pub fn leaves(n: u32) -> impl Iterator<Item = NodeIndex> {
    (0..n).map(leaf_node)
}

/// All leaves below (or at) `x`.
pub fn subtree_leaves(x: NodeIndex, n: u32) -> Vec<NodeIndex> {
    if level(x) == 0 {
        return vec![x];
    }
    let mut out = subtree_leaves(left(x), n);
    out.extend(subtree_leaves(right(x, n), n));
    out
}
