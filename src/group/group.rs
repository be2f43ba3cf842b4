// SPDX-License-Identifier: MIT OR Apache-2.0

//! API to create groups, produce payloads for all group operations and process them.
use std::marker::PhantomData;

use thiserror::Error;
use tracing::debug;

use crate::codec::EncodeError;
use crate::crypto::x25519::{PublicKey, SecretKey};
use crate::crypto::{Rng, RngError, Secret};
use crate::group::message::{GroupAdd, GroupInitKey, Move, Remove, Update, UserAdd, Welcome};
use crate::traits::CryptoProvider;
use crate::tree::math::{self, LeafIndex, NodeIndex};
use crate::tree::{
    DecryptedPath, Node, NodeMap, NodeSecret, TreeError, TreeKem, TreeKemError, check_nodes,
    hash_up,
};

/// Size of leaf secrets sponsors generate for new members.
pub const LEAF_SECRET_SIZE: usize = 32;

/// HPKE context label for leaf secrets sent to new members.
const WELCOME_INFO: &[u8] = b"p2panda-treekem-welcome";

/// API to manage a TreeKEM group and process payloads of other members.
///
/// All methods are pure functions over a [`GroupState`]: operations which change the state take it
/// by value and return the new state, the input is lost if they fail. Applications persist the
/// returned state only after an operation succeeded.
///
/// Producing a payload never changes the state of the producer. Members apply their own payloads
/// through the `handle_self_*` methods with the secret they used, everything received from others
/// goes through the regular handlers.
pub struct TreeKemGroup<P> {
    _marker: PhantomData<P>,
}

/// Tree of one member.
///
/// Persisted through [`GroupState::to_bytes`] and restored with the checks of
/// [`GroupState::from_bytes`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GroupState {
    pub(crate) tree: TreeKem,
}

impl GroupState {
    /// Our own leaf.
    pub fn index(&self) -> LeafIndex {
        self.tree.index()
    }

    pub fn size(&self) -> u32 {
        self.tree.size()
    }

    pub fn tree(&self) -> &TreeKem {
        &self.tree
    }

    pub fn nodes(&self) -> &NodeMap<Node> {
        self.tree.nodes()
    }

    /// Current group secret, this is the secret of the root.
    pub fn group_secret(&self) -> Option<&NodeSecret> {
        self.tree.group_secret()
    }

    /// Returns true if both members have a consistent view on the tree.
    pub fn equal(&self, other: &GroupState) -> bool {
        self.tree.equal(&other.tree)
    }

    pub fn dump(&self) -> String {
        self.tree.dump()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        self.tree.to_bytes()
    }

    /// Restores persisted state, see [`TreeKem::from_bytes`] for the checks applied.
    pub fn from_bytes<P: CryptoProvider>(bytes: &[u8], provider: &P) -> GroupResult<Self, P> {
        Ok(Self {
            tree: TreeKem::from_bytes(bytes, provider)?,
        })
    }
}

impl<P> TreeKemGroup<P>
where
    P: CryptoProvider,
{
    /// Creates a group with ourselves as the only member.
    pub fn create(leaf_secret: &[u8], provider: &P) -> GroupResult<GroupState, P> {
        let tree = TreeKem::one_member_group(leaf_secret, provider)?;
        debug!("created group");
        Ok(GroupState { tree })
    }

    /// Public description of the current tree, handed to prospective members.
    pub fn group_init_key(y: &GroupState) -> GroupInitKey {
        GroupInitKey {
            size: y.tree.size(),
            frontier: y.tree.frontier(),
            tree: y.tree.public_tree(),
        }
    }

    // Joining a group.

    /// Prepares joining the group described by `init_key` at its right edge.
    ///
    /// The returned payload is broadcast to the group, the joiner then rebuilds its own state with
    /// [`TreeKemGroup::from_user_add`].
    pub fn join(
        leaf_secret: &[u8],
        init_key: &GroupInitKey,
        provider: &P,
    ) -> GroupResult<UserAdd, P> {
        let tree =
            TreeKem::from_frontier(init_key.size, &init_key.frontier, leaf_secret, provider)?;
        let (_, path) = tree.encrypt(leaf_secret, init_key.size, provider)?;
        debug!(size = init_key.size, "prepared user add");
        Ok(UserAdd {
            ciphertexts: path.ciphertexts,
            nodes: path.nodes,
        })
    }

    /// Establishes the state of a new member after its join was broadcast.
    ///
    /// Fails if the broadcast path is not the one derived from our leaf secret.
    pub fn from_user_add(
        leaf_secret: &[u8],
        init_key: &GroupInitKey,
        user_add: &UserAdd,
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        check_nodes(&init_key.tree, init_key.size)?;

        let mut tree =
            TreeKem::from_frontier(init_key.size, &init_key.frontier, leaf_secret, provider)?;

        let own_nodes = tree.nodes().values().filter(|node| node.is_full()).count();
        if own_nodes != user_add.nodes.len() {
            return Err(GroupError::UserAddMismatch(math::root(tree.size())));
        }
        for (index, node) in &user_add.nodes {
            match tree.node(*index) {
                Some(own) if own.is_full() && own.public_key() == &node.public_key => (),
                _ => return Err(GroupError::UserAddMismatch(*index)),
            }
        }

        tree.merge(&init_key.tree, true);
        debug!(index = tree.index(), size = tree.size(), "joined group");

        Ok(GroupState { tree })
    }

    /// Establishes the state of a new member added by someone else.
    ///
    /// The leaf secret chosen by the sponsor is opened with our init key.
    pub fn from_group_add(
        init_secret: &SecretKey,
        group_add: &GroupAdd,
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        let leaf_secret = NodeSecret::from(
            provider
                .hpke_open(
                    &group_add.for_joiner.encrypted_leaf,
                    init_secret,
                    Some(WELCOME_INFO),
                    None,
                )
                .map_err(GroupError::Provider)?,
        );

        Self::from_user_add(
            leaf_secret.as_bytes(),
            &group_add.for_joiner.init_key(),
            &group_add.for_group,
            provider,
        )
    }

    // Adding members.

    /// Adds a new member, known by its init key, to the group.
    ///
    /// The sponsor generates the leaf secret of the new member, joins in its name and encrypts the
    /// secret towards it. Every member, including the sponsor, applies the result with
    /// [`TreeKemGroup::handle_group_add`].
    pub fn add(
        y: &GroupState,
        init_key: &PublicKey,
        provider: &P,
        rng: &Rng,
    ) -> GroupResult<GroupAdd, P> {
        let leaf_secret = Secret::<LEAF_SECRET_SIZE>::from_bytes(rng.random_array()?);
        let group_init_key = Self::group_init_key(y);

        let for_group = Self::join(leaf_secret.as_bytes(), &group_init_key, provider)?;
        let encrypted_leaf = provider
            .hpke_seal(init_key, Some(WELCOME_INFO), None, leaf_secret.as_bytes())
            .map_err(GroupError::Provider)?;

        debug!(
            sponsor = y.index(),
            joiner = %init_key.fingerprint(),
            "prepared group add"
        );

        Ok(GroupAdd {
            for_group,
            for_joiner: Welcome {
                size: group_init_key.size,
                frontier: group_init_key.frontier,
                tree: group_init_key.tree,
                encrypted_leaf,
            },
        })
    }

    /// Processes a member joining at the right edge.
    pub fn handle_user_add(
        mut y: GroupState,
        user_add: &UserAdd,
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        let joiner = y.tree.size();
        check_nodes(&user_add.nodes, joiner + 1)?;

        let decrypted = y.tree.decrypt(joiner, &user_add.ciphertexts, provider)?;

        y.tree.merge(&user_add.nodes, false);
        y.tree.merge(&decrypted.nodes, false);
        y.tree.grow();

        debug!(index = y.index(), joiner, "processed user add");
        Ok(y)
    }

    pub fn handle_group_add(
        y: GroupState,
        group_add: &GroupAdd,
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        Self::handle_user_add(y, &group_add.for_group, provider)
    }

    // Updates.

    /// Refreshes our own path with a new leaf secret.
    pub fn update(y: &GroupState, leaf_secret: &[u8], provider: &P) -> GroupResult<Update, P> {
        let (_, path) = y.tree.encrypt(leaf_secret, y.index(), provider)?;
        debug!(index = y.index(), "prepared update");
        Ok(Update {
            from: y.index(),
            ciphertexts: path.ciphertexts,
            nodes: path.nodes,
        })
    }

    /// Applies our own update, `leaf_secret` is the one the update was created with.
    pub fn handle_self_update(
        mut y: GroupState,
        leaf_secret: &[u8],
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        let nodes = Self::ratchet(&y, y.index(), leaf_secret, provider)?;
        y.tree.merge(&nodes, false);
        debug!(index = y.index(), "processed own update");
        Ok(y)
    }

    pub fn handle_update(
        mut y: GroupState,
        update: &Update,
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        if update.from == y.index() {
            return Err(GroupError::OwnMessage(update.from));
        }
        y.tree.check_leaf(update.from)?;
        check_nodes(&update.nodes, y.size())?;

        let decrypted = y.tree.decrypt(update.from, &update.ciphertexts, provider)?;

        y.tree.merge(&update.nodes, false);
        y.tree.merge(&decrypted.nodes, false);

        debug!(index = y.index(), from = update.from, "processed update");
        Ok(y)
    }

    // Removals.

    /// Removes the member at `victim` from the group.
    ///
    /// The fresh secret is ratcheted from the leaf of the removed member and encrypted to its
    /// copath, everyone except the removed member learns the new root.
    pub fn remove(
        y: &GroupState,
        leaf_secret: &[u8],
        victim: LeafIndex,
        provider: &P,
    ) -> GroupResult<Remove, P> {
        if victim == y.index() {
            return Err(GroupError::RemoveSelf);
        }
        y.tree.check_leaf(victim)?;
        if !y.tree.is_occupied(victim) {
            return Err(GroupError::VacantLeaf(victim));
        }

        let subtree_heads = y.tree.copath(victim)?;
        let (_, path) = y.tree.encrypt(leaf_secret, victim, provider)?;

        debug!(index = y.index(), victim, "prepared remove");
        Ok(Remove {
            index: victim,
            ciphertexts: path.ciphertexts,
            subtree_heads,
        })
    }

    /// Applies a removal we created, `leaf_secret` is the one the removal was created with.
    pub fn handle_self_remove(
        mut y: GroupState,
        remove: &Remove,
        leaf_secret: &[u8],
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        if remove.index == y.index() {
            return Err(GroupError::RemoveSelf);
        }
        y.tree.check_leaf(remove.index)?;
        if !y.tree.is_occupied(remove.index) {
            return Err(GroupError::VacantLeaf(remove.index));
        }
        check_nodes(&remove.subtree_heads, y.size())?;

        let nodes = Self::ratchet(&y, remove.index, leaf_secret, provider)?;
        let root = Self::root_only(&y, nodes);

        y.tree.remove(remove.index)?;
        y.tree.merge(&root, false);
        y.tree.merge(&remove.subtree_heads, true);

        debug!(index = y.index(), victim = remove.index, "processed own remove");
        Ok(y)
    }

    pub fn handle_remove(
        mut y: GroupState,
        remove: &Remove,
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        if remove.index == y.index() {
            return Err(GroupError::RemovedFromGroup);
        }
        y.tree.check_leaf(remove.index)?;
        if !y.tree.is_occupied(remove.index) {
            return Err(GroupError::VacantLeaf(remove.index));
        }
        check_nodes(&remove.subtree_heads, y.size())?;

        let DecryptedPath { root, .. } =
            y.tree.decrypt(remove.index, &remove.ciphertexts, provider)?;

        y.tree.remove(remove.index)?;
        y.tree.merge(&root, false);
        y.tree.merge(&remove.subtree_heads, true);

        debug!(index = y.index(), victim = remove.index, "processed remove");
        Ok(y)
    }

    // Moves.

    /// Moves ourselves into the vacant leaf `to`.
    ///
    /// The path is computed on a copy of the tree where our old path is already blanked, so none
    /// of the ciphertexts target the leaf we leave.
    pub fn move_leaf(
        y: &GroupState,
        leaf_secret: &[u8],
        to: LeafIndex,
        provider: &P,
    ) -> GroupResult<Move, P> {
        y.tree.check_leaf(to)?;
        if to == y.index() || y.tree.is_occupied(to) {
            return Err(GroupError::OccupiedLeaf(to));
        }

        let mut tree = y.tree.clone();
        tree.remove(y.index())?;

        let subtree_heads = tree.copath(to)?;
        let (_, path) = tree.encrypt(leaf_secret, to, provider)?;

        debug!(from = y.index(), to, "prepared move");
        Ok(Move {
            from: y.index(),
            to,
            ciphertexts: path.ciphertexts,
            nodes: path.nodes,
            subtree_heads,
        })
    }

    /// Applies our own move, `leaf_secret` is the one the move was created with.
    pub fn handle_self_move(
        mut y: GroupState,
        mv: &Move,
        leaf_secret: &[u8],
        provider: &P,
    ) -> GroupResult<GroupState, P> {
        if mv.from != y.index() {
            return Err(GroupError::ForeignMessage(mv.from));
        }
        y.tree.check_leaf(mv.to)?;
        if y.tree.is_occupied(mv.to) {
            return Err(GroupError::OccupiedLeaf(mv.to));
        }
        check_nodes(&mv.subtree_heads, y.size())?;

        let nodes = Self::ratchet(&y, mv.to, leaf_secret, provider)?;

        y.tree.remove(mv.from)?;
        y.tree.merge(&nodes, false);
        y.tree.merge(&mv.subtree_heads, true);
        y.tree.set_index(mv.to)?;
        y.tree.trim_vacant()?;

        debug!(from = mv.from, to = mv.to, size = y.size(), "processed own move");
        Ok(y)
    }

    pub fn handle_move(mut y: GroupState, mv: &Move, provider: &P) -> GroupResult<GroupState, P> {
        if mv.from == y.index() {
            return Err(GroupError::OwnMessage(mv.from));
        }
        y.tree.check_leaf(mv.from)?;
        y.tree.check_leaf(mv.to)?;
        if !y.tree.is_occupied(mv.from) {
            return Err(GroupError::VacantLeaf(mv.from));
        }
        // Includes our own leaf.
        if y.tree.is_occupied(mv.to) {
            return Err(GroupError::OccupiedLeaf(mv.to));
        }
        check_nodes(&mv.nodes, y.size())?;
        check_nodes(&mv.subtree_heads, y.size())?;

        let decrypted = y.tree.decrypt(mv.to, &mv.ciphertexts, provider)?;

        y.tree.remove(mv.from)?;
        y.tree.merge(&mv.nodes, false);
        y.tree.merge(&decrypted.nodes, false);
        y.tree.merge(&mv.subtree_heads, true);
        y.tree.trim_vacant()?;

        debug!(
            index = y.index(),
            from = mv.from,
            to = mv.to,
            size = y.size(),
            "processed move"
        );
        Ok(y)
    }

    // Concurrent updates.

    /// Processes a round of updates which were all created against the same state.
    ///
    /// Every update is decrypted before anything is merged. The updates are then merged in the
    /// given order, which needs to be the same for all members, and the root secrets of all of them
    /// are combined with XOR into the group secret of the round, which is returned next to the new
    /// state.
    ///
    /// If one of the updates is our own, `own_leaf_secret` needs to be the secret it was created
    /// with.
    pub fn handle_concurrent_updates(
        mut y: GroupState,
        own_leaf_secret: Option<&[u8]>,
        updates: &[Update],
        provider: &P,
    ) -> GroupResult<(GroupState, NodeSecret), P> {
        let root = math::root(y.size());

        let mut steps = Vec::with_capacity(updates.len());
        for update in updates {
            if update.from == y.index() {
                let leaf_secret = own_leaf_secret.ok_or(GroupError::MissingOwnSecret)?;
                let nodes = Self::ratchet(&y, y.index(), leaf_secret, provider)?;
                steps.push(RoundStep::Own(nodes));
            } else {
                y.tree.check_leaf(update.from)?;
                check_nodes(&update.nodes, y.size())?;
                let decrypted = y.tree.decrypt(update.from, &update.ciphertexts, provider)?;
                steps.push(RoundStep::Remote(update, decrypted.nodes));
            }
        }

        let mut group_secret: Option<NodeSecret> = None;
        for step in &steps {
            let root_secret = step
                .nodes()
                .get(&root)
                .and_then(Node::secret)
                .ok_or(TreeKemError::<P>::MissingSecretKey(root))?;
            group_secret = Some(match group_secret {
                None => root_secret.clone(),
                Some(secret) => secret
                    .xor(root_secret)
                    .ok_or(GroupError::SecretLengthMismatch)?,
            });
        }
        let group_secret = group_secret.ok_or(GroupError::EmptyRound)?;

        for step in &steps {
            match step {
                RoundStep::Own(nodes) => y.tree.merge(nodes, false),
                RoundStep::Remote(update, nodes) => {
                    y.tree.merge(&update.nodes, false);
                    y.tree.merge(nodes, false);
                }
            }
        }

        debug!(
            index = y.index(),
            updates = updates.len(),
            "processed concurrent updates"
        );
        Ok((y, group_secret))
    }

    /// Full path of the given leaf derived from a fresh leaf secret.
    fn ratchet(
        y: &GroupState,
        leaf: LeafIndex,
        leaf_secret: &[u8],
        provider: &P,
    ) -> GroupResult<NodeMap<Node>, P> {
        y.tree.check_leaf(leaf)?;
        hash_up(
            math::leaf_node(leaf),
            y.size(),
            NodeSecret::from_bytes(leaf_secret),
            provider,
        )
        .map_err(GroupError::Provider)
    }

    fn root_only(y: &GroupState, nodes: NodeMap<Node>) -> NodeMap<Node> {
        let root = math::root(y.size());
        nodes
            .into_iter()
            .filter(|(index, _)| *index == root)
            .collect()
    }
}

/// Secrets of one update of a concurrent round, recovered before anything is merged.
enum RoundStep<'a> {
    Own(NodeMap<Node>),
    Remote(&'a Update, NodeMap<Node>),
}

impl RoundStep<'_> {
    fn nodes(&self) -> &NodeMap<Node> {
        match self {
            RoundStep::Own(nodes) => nodes,
            RoundStep::Remote(_, nodes) => nodes,
        }
    }
}

pub type GroupResult<T, P> = Result<T, GroupError<P>>;

#[derive(Debug, Error)]
pub enum GroupError<P: CryptoProvider> {
    #[error(transparent)]
    TreeKem(#[from] TreeKemError<P>),

    #[error(transparent)]
    Tree(#[from] TreeError),

    #[error(transparent)]
    Rng(#[from] RngError),

    #[error("crypto provider failed: {0}")]
    Provider(P::Error),

    #[error("payload from our own leaf {0} can't be processed as a remote one")]
    OwnMessage(LeafIndex),

    #[error("payload from leaf {0} was not created by us")]
    ForeignMessage(LeafIndex),

    #[error("can not remove ourselves from the group")]
    RemoveSelf,

    #[error("we have been removed from the group")]
    RemovedFromGroup,

    #[error("leaf {0} is vacant")]
    VacantLeaf(LeafIndex),

    #[error("leaf {0} is occupied")]
    OccupiedLeaf(LeafIndex),

    #[error("broadcast path of new member does not match at node {0}")]
    UserAddMismatch(NodeIndex),

    #[error("leaf secret of our own update is missing")]
    MissingOwnSecret,

    #[error("root secrets of concurrent updates have different lengths")]
    SecretLengthMismatch,

    #[error("no updates given")]
    EmptyRound,
}
