// SPDX-License-Identifier: MIT OR Apache-2.0

//! Group state machine on top of the TreeKEM engine.
//!
//! ## Joining
//!
//! Members join at the right edge of the tree. A prospective member either joins on its own with
//! a [`GroupInitKey`] published by the group ([`TreeKemGroup::join`], then
//! [`TreeKemGroup::from_user_add`] once the [`UserAdd`] was broadcast) or gets added by a sponsor
//! who knows its init key ([`TreeKemGroup::add`]). In the second case the sponsor chooses the leaf
//! secret and hands it to the new member inside the [`Welcome`] part of the [`GroupAdd`].
//!
//! ## Updates
//!
//! Every member can refresh its leaf secret at any time. The new path is encrypted to the
//! populated heads of all subtrees hanging off it, so a blank node costs one ciphertext per
//! populated node below it instead of breaking the path. Updates created against the same state
//! can be processed as one round with [`TreeKemGroup::handle_concurrent_updates`], the root
//! secrets of the round are combined with XOR.
//!
//! ## Removing and moving
//!
//! A [`Remove`] blanks the direct path of a member and installs a new root the removed member can
//! not derive. The tree keeps its size, vacant leaves can be refilled through a [`Move`] of
//! another member, after which vacant leaves at the right edge are trimmed.
#[allow(clippy::module_inception)]
mod group;
mod message;
#[cfg(test)]
mod tests;

pub use group::{GroupError, GroupResult, GroupState, LEAF_SECRET_SIZE, TreeKemGroup};
pub use message::{GroupAdd, GroupInitKey, Move, Remove, Update, UserAdd, Welcome};
