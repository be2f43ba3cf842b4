// SPDX-License-Identifier: MIT OR Apache-2.0

use assert_matches::assert_matches;

use crate::codec::Codec;
use crate::crypto::x25519::SecretKey;
use crate::crypto::{Crypto, Rng};
use crate::group::{
    GroupAdd, GroupError, GroupInitKey, GroupState, Move, Remove, TreeKemGroup, Update,
};
use crate::test_utils::{assert_converged, create_group, setup_logging};
use crate::tree::math;
use crate::tree::{NodeSecret, TreeError, hash_up};

type Group = TreeKemGroup<Crypto>;

fn update_all(members: Vec<GroupState>, from: usize, leaf_secret: &[u8]) -> Vec<GroupState> {
    let update = Group::update(&members[from], leaf_secret, &Crypto).unwrap();
    members
        .into_iter()
        .enumerate()
        .map(|(i, y)| {
            if i == from {
                Group::handle_self_update(y, leaf_secret, &Crypto).unwrap()
            } else {
                Group::handle_update(y, &update, &Crypto).unwrap()
            }
        })
        .collect()
}

#[test]
fn two_members() {
    setup_logging();
    let rng = Rng::from_seed([1; 32]);

    let alice = Group::create(&[0], &Crypto).unwrap();
    assert_eq!(alice.group_secret(), Some(&NodeSecret::from_bytes(&[0])));

    let bob_secret: [u8; 32] = rng.random_array().unwrap();
    let init_key = Group::group_init_key(&alice);
    assert_eq!(init_key.size, 1);

    let user_add = Group::join(&bob_secret, &init_key, &Crypto).unwrap();
    let alice = Group::handle_user_add(alice, &user_add, &Crypto).unwrap();
    let bob = Group::from_user_add(&bob_secret, &init_key, &user_add, &Crypto).unwrap();

    assert_eq!(alice.size(), 2);
    assert_eq!(bob.size(), 2);
    assert_eq!(bob.index(), 1);

    for member in [&alice, &bob] {
        assert!(member.nodes().contains_key(&0));
        assert!(member.nodes().contains_key(&2));
    }
    assert_eq!(
        alice.nodes()[&1].public_key().fingerprint(),
        bob.nodes()[&1].public_key().fingerprint()
    );
    assert_converged(&[alice, bob]);
}

#[test]
fn user_adds() {
    let rng = Rng::from_seed([2; 32]);
    let members = create_group(5, &Crypto, &rng).unwrap();

    for (index, member) in members.iter().enumerate() {
        assert_eq!(member.index() as usize, index);
        assert_eq!(member.size(), 5);
    }
    assert_converged(&members);
}

#[test]
fn group_adds() {
    let rng = Rng::from_seed([3; 32]);
    let mut members = vec![Group::create(&rng.random_array::<32>().unwrap(), &Crypto).unwrap()];

    for _ in 1..5 {
        let init_secret = SecretKey::from_bytes(rng.random_array().unwrap());

        // The newest member sponsors the next one.
        let sponsor = members.last().unwrap();
        let group_add = Group::add(sponsor, &init_secret.public_key(), &Crypto, &rng).unwrap();

        members = members
            .into_iter()
            .map(|y| Group::handle_group_add(y, &group_add, &Crypto).unwrap())
            .collect();
        members.push(Group::from_group_add(&init_secret, &group_add, &Crypto).unwrap());
    }

    assert_eq!(members[4].index(), 4);
    assert_converged(&members);

    // Only the invited member can open the welcome.
    let sponsor = &members[0];
    let init_secret = SecretKey::from_bytes(rng.random_array().unwrap());
    let group_add = Group::add(sponsor, &init_secret.public_key(), &Crypto, &rng).unwrap();
    let stranger = SecretKey::from_bytes(rng.random_array().unwrap());
    assert_matches!(
        Group::from_group_add(&stranger, &group_add, &Crypto),
        Err(GroupError::Provider(_))
    );
}

#[test]
fn updates() {
    let rng = Rng::from_seed([4; 32]);
    let mut members = create_group(5, &Crypto, &rng).unwrap();

    for from in [2, 0, 4, 4, 1, 3] {
        let before = members[0].group_secret().cloned();
        let leaf_secret: [u8; 32] = rng.random_array().unwrap();
        members = update_all(members, from, &leaf_secret);

        assert_converged(&members);
        assert_ne!(members[0].group_secret().cloned(), before);
    }
}

#[test]
fn concurrent_updates() {
    let rng = Rng::from_seed([5; 32]);
    let members = create_group(4, &Crypto, &rng).unwrap();
    let size = members[0].size();
    let root = math::root(size);

    let updaters = [0, 2, 3];
    let leaf_secrets: Vec<[u8; 32]> = updaters
        .iter()
        .map(|_| rng.random_array().unwrap())
        .collect();
    let updates: Vec<Update> = updaters
        .iter()
        .zip(&leaf_secrets)
        .map(|(from, leaf_secret)| Group::update(&members[*from], leaf_secret, &Crypto).unwrap())
        .collect();

    let mut secrets = Vec::new();
    let members: Vec<GroupState> = members
        .into_iter()
        .map(|y| {
            let own_secret = updaters
                .iter()
                .position(|from| *from == y.index() as usize)
                .map(|i| &leaf_secrets[i][..]);
            let (y, secret) =
                Group::handle_concurrent_updates(y, own_secret, &updates, &Crypto).unwrap();
            secrets.push(secret);
            y
        })
        .collect();

    assert_converged(&members);
    assert!(secrets.iter().all(|secret| secret == &secrets[0]));

    // The round secret is the XOR of all fresh roots.
    let roots: Vec<NodeSecret> = updaters
        .iter()
        .zip(&leaf_secrets)
        .map(|(from, leaf_secret)| {
            let nodes = hash_up(
                math::leaf_node(*from as u32),
                size,
                NodeSecret::from_bytes(leaf_secret),
                &Crypto,
            )
            .unwrap();
            nodes[&root].secret().unwrap().clone()
        })
        .collect();
    let expected = roots[0].xor(&roots[1]).unwrap().xor(&roots[2]).unwrap();
    assert_eq!(secrets[0], expected);

    // Sequential operation continues after the round.
    let members = update_all(members, 1, &rng.random_array::<32>().unwrap());
    assert_converged(&members);
}

#[test]
fn concurrent_update_errors() {
    let rng = Rng::from_seed([6; 32]);
    let members = create_group(3, &Crypto, &rng).unwrap();
    let update = Group::update(&members[1], &[1; 32], &Crypto).unwrap();

    assert_matches!(
        Group::handle_concurrent_updates(members[1].clone(), None, &[update], &Crypto),
        Err(GroupError::MissingOwnSecret)
    );
    assert_matches!(
        Group::handle_concurrent_updates(members[0].clone(), None, &[], &Crypto),
        Err(GroupError::EmptyRound)
    );
}

#[test]
fn remove_and_move() {
    setup_logging();
    let rng = Rng::from_seed([7; 32]);
    let members = create_group(5, &Crypto, &rng).unwrap();
    let before = members[0].group_secret().cloned();

    // Member 0 removes member 1.
    let remove_secret: [u8; 32] = rng.random_array().unwrap();
    let remove = Group::remove(&members[0], &remove_secret, 1, &Crypto).unwrap();

    let mut removed = None;
    let mut members: Vec<GroupState> = members
        .into_iter()
        .filter_map(|y| match y.index() {
            0 => Some(Group::handle_self_remove(y, &remove, &remove_secret, &Crypto).unwrap()),
            1 => {
                removed = Some(y);
                None
            }
            _ => Some(Group::handle_remove(y, &remove, &Crypto).unwrap()),
        })
        .collect();
    let removed = removed.unwrap();

    assert_converged(&members);
    assert_eq!(members[0].size(), 5);
    assert!(!members[0].tree().is_occupied(1));
    assert_ne!(members[0].group_secret().cloned(), before);
    assert_ne!(members[0].group_secret(), removed.group_secret());

    assert_matches!(
        Group::handle_remove(removed, &remove, &Crypto),
        Err(GroupError::RemovedFromGroup)
    );
    assert_matches!(
        Group::remove(&members[1], &remove_secret, 1, &Crypto),
        Err(GroupError::VacantLeaf(1))
    );

    // Member 4 moves into the vacant leaf, the tree shrinks to four leaves.
    let move_secret: [u8; 32] = rng.random_array().unwrap();
    let mover = members.iter().position(|y| y.index() == 4).unwrap();
    let mv = Group::move_leaf(&members[mover], &move_secret, 1, &Crypto).unwrap();
    assert_eq!((mv.from, mv.to), (4, 1));

    members = members
        .into_iter()
        .map(|y| {
            if y.index() == 4 {
                Group::handle_self_move(y, &mv, &move_secret, &Crypto).unwrap()
            } else {
                Group::handle_move(y, &mv, &Crypto).unwrap()
            }
        })
        .collect();

    assert_converged(&members);
    assert_eq!(members[mover].index(), 1);
    assert_eq!(members[0].size(), 4);
    assert!(members[0].nodes().keys().all(|index| *index < 7));

    // Moved member keeps operating from its new leaf.
    let members = update_all(members, mover, &rng.random_array::<32>().unwrap());
    assert_converged(&members);

    // New members join at the new right edge.
    let leaf_secret: [u8; 32] = rng.random_array().unwrap();
    let init_key = Group::group_init_key(&members[0]);
    let user_add = Group::join(&leaf_secret, &init_key, &Crypto).unwrap();
    let mut members: Vec<GroupState> = members
        .into_iter()
        .map(|y| Group::handle_user_add(y, &user_add, &Crypto).unwrap())
        .collect();
    members.push(Group::from_user_add(&leaf_secret, &init_key, &user_add, &Crypto).unwrap());

    assert_eq!(members[4].index(), 4);
    assert_converged(&members);
}

#[test]
fn removal_by_new_member() {
    let rng = Rng::from_seed([8; 32]);
    let mut members = create_group(3, &Crypto, &rng).unwrap();

    let init_secret = SecretKey::from_bytes(rng.random_array().unwrap());
    let group_add = Group::add(&members[2], &init_secret.public_key(), &Crypto, &rng).unwrap();
    members = members
        .into_iter()
        .map(|y| Group::handle_group_add(y, &group_add, &Crypto).unwrap())
        .collect();
    let joiner = Group::from_group_add(&init_secret, &group_add, &Crypto).unwrap();

    // Joiner learned about the whole tree and can encrypt around the removed path.
    let remove_secret: [u8; 32] = rng.random_array().unwrap();
    let remove = Group::remove(&joiner, &remove_secret, 1, &Crypto).unwrap();

    let mut remaining =
        vec![Group::handle_self_remove(joiner, &remove, &remove_secret, &Crypto).unwrap()];
    for y in members {
        if y.index() != 1 {
            remaining.push(Group::handle_remove(y, &remove, &Crypto).unwrap());
        }
    }
    assert_converged(&remaining);
}

#[test]
fn invalid_operations() {
    let rng = Rng::from_seed([9; 32]);
    let members = create_group(5, &Crypto, &rng).unwrap();

    assert_matches!(
        Group::remove(&members[2], &[1; 32], 2, &Crypto),
        Err(GroupError::RemoveSelf)
    );
    assert_matches!(
        Group::remove(&members[2], &[1; 32], 7, &Crypto),
        Err(GroupError::Tree(TreeError::InvalidLeaf { leaf: 7, size: 5 }))
    );
    assert_matches!(
        Group::move_leaf(&members[2], &[1; 32], 3, &Crypto),
        Err(GroupError::OccupiedLeaf(3))
    );
    assert_matches!(
        Group::move_leaf(&members[2], &[1; 32], 2, &Crypto),
        Err(GroupError::OccupiedLeaf(2))
    );

    // Own payloads don't go through the remote handlers.
    let update = Group::update(&members[3], &[1; 32], &Crypto).unwrap();
    assert_matches!(
        Group::handle_update(members[3].clone(), &update, &Crypto),
        Err(GroupError::OwnMessage(3))
    );

    let forged = Update {
        from: 9,
        ..update.clone()
    };
    assert_matches!(
        Group::handle_update(members[0].clone(), &forged, &Crypto),
        Err(GroupError::Tree(TreeError::InvalidLeaf { leaf: 9, size: 5 }))
    );

    let mut forged = update.clone();
    let public = forged.nodes[&6];
    forged.nodes.insert(40, public);
    assert_matches!(
        Group::handle_update(members[0].clone(), &forged, &Crypto),
        Err(GroupError::Tree(TreeError::InvalidNode { node: 40, size: 5 }))
    );

    // Moves of others can't be applied as our own.
    let remove = Group::remove(&members[0], &[2; 32], 1, &Crypto).unwrap();
    let y = Group::handle_self_remove(members[0].clone(), &remove, &[2; 32], &Crypto).unwrap();
    let mv = Group::move_leaf(&y, &[3; 32], 1, &Crypto).unwrap();
    assert_matches!(
        Group::handle_self_move(members[4].clone(), &mv, &[3; 32], &Crypto),
        Err(GroupError::ForeignMessage(0))
    );
}

#[test]
fn tampered_user_add() {
    let rng = Rng::from_seed([10; 32]);
    let members = create_group(3, &Crypto, &rng).unwrap();

    let leaf_secret: [u8; 32] = rng.random_array().unwrap();
    let init_key = Group::group_init_key(&members[0]);
    let mut user_add = Group::join(&leaf_secret, &init_key, &Crypto).unwrap();

    let leaf = math::leaf_node(3);
    let other = members[0].nodes()[&0].to_public();
    user_add.nodes.insert(leaf, other);

    assert_matches!(
        Group::from_user_add(&leaf_secret, &init_key, &user_add, &Crypto),
        Err(GroupError::UserAddMismatch(6))
    );
}

#[test]
fn payload_encoding() {
    let rng = Rng::from_seed([11; 32]);
    let members = create_group(4, &Crypto, &rng).unwrap();

    let init_key = Group::group_init_key(&members[1]);
    assert_eq!(
        GroupInitKey::from_text(&init_key.to_text().unwrap()).unwrap(),
        init_key
    );

    let update = Group::update(&members[1], &[1; 32], &Crypto).unwrap();
    assert_eq!(Update::from_text(&update.to_text().unwrap()).unwrap(), update);

    let remove = Group::remove(&members[1], &[2; 32], 2, &Crypto).unwrap();
    assert_eq!(
        Remove::from_bytes(&remove.to_bytes().unwrap()).unwrap(),
        remove
    );

    let y = Group::handle_self_remove(members[1].clone(), &remove, &[2; 32], &Crypto).unwrap();
    let mv = Group::move_leaf(&y, &[3; 32], 2, &Crypto).unwrap();
    assert_eq!(Move::from_text(&mv.to_text().unwrap()).unwrap(), mv);

    let init_secret = SecretKey::from_bytes(rng.random_array().unwrap());
    let group_add = Group::add(&members[0], &init_secret.public_key(), &Crypto, &rng).unwrap();
    let group_add_again = GroupAdd::from_text(&group_add.to_text().unwrap()).unwrap();
    assert_eq!(group_add_again, group_add);
    assert!(Group::from_group_add(&init_secret, &group_add_again, &Crypto).is_ok());

    // Persisted state.
    let state = GroupState::from_bytes(&members[2].to_bytes().unwrap(), &Crypto).unwrap();
    assert_eq!(state, members[2]);
}

#[test]
fn receivers_reject_wrong_leaves() {
    let rng = Rng::from_seed([12; 32]);
    let members = create_group(5, &Crypto, &rng).unwrap();

    // Member 3 aims a move at the occupied leaf 1, built the same way as a regular move.
    let move_secret: [u8; 32] = rng.random_array().unwrap();
    let mut tree = members[3].tree().clone();
    tree.remove(3).unwrap();
    let subtree_heads = tree.copath(1).unwrap();
    let (_, path) = tree.encrypt(&move_secret, 1, &Crypto).unwrap();
    let onto_occupied = Move {
        from: 3,
        to: 1,
        ciphertexts: path.ciphertexts,
        nodes: path.nodes,
        subtree_heads,
    };

    for y in &members {
        if y.index() == 3 {
            assert_matches!(
                Group::handle_self_move(y.clone(), &onto_occupied, &move_secret, &Crypto),
                Err(GroupError::OccupiedLeaf(1))
            );
        } else {
            assert_matches!(
                Group::handle_move(y.clone(), &onto_occupied, &Crypto),
                Err(GroupError::OccupiedLeaf(1))
            );
        }
    }

    // Member 0 removes member 1, leaf 1 is vacant afterwards.
    let remove_secret: [u8; 32] = rng.random_array().unwrap();
    let remove = Group::remove(&members[0], &remove_secret, 1, &Crypto).unwrap();
    let members: Vec<GroupState> = members
        .into_iter()
        .filter(|y| y.index() != 1)
        .map(|y| {
            if y.index() == 0 {
                Group::handle_self_remove(y, &remove, &remove_secret, &Crypto).unwrap()
            } else {
                Group::handle_remove(y, &remove, &Crypto).unwrap()
            }
        })
        .collect();
    assert_converged(&members);

    // Replaying the removal fails for everyone.
    for y in &members {
        if y.index() == 0 {
            assert_matches!(
                Group::handle_self_remove(y.clone(), &remove, &remove_secret, &Crypto),
                Err(GroupError::VacantLeaf(1))
            );
        } else {
            assert_matches!(
                Group::handle_remove(y.clone(), &remove, &Crypto),
                Err(GroupError::VacantLeaf(1))
            );
        }
    }

    // Nobody can move out of a vacant leaf.
    let from_vacant = Move {
        from: 1,
        ..onto_occupied
    };
    for y in &members {
        assert_matches!(
            Group::handle_move(y.clone(), &from_vacant, &Crypto),
            Err(GroupError::VacantLeaf(1))
        );
    }
}

fn restore_all(members: Vec<GroupState>) -> Vec<GroupState> {
    members
        .into_iter()
        .map(|y| {
            let restored = GroupState::from_bytes(&y.to_bytes().unwrap(), &Crypto).unwrap();
            assert!(restored.equal(&y));
            assert_eq!(restored, y);
            restored
        })
        .collect()
}

#[test]
fn persisted_state_after_changes() {
    let rng = Rng::from_seed([13; 32]);

    let single = restore_all(vec![Group::create(&[1; 32], &Crypto).unwrap()]);
    assert_eq!(single[0].size(), 1);

    let members = restore_all(create_group(5, &Crypto, &rng).unwrap());

    let members = restore_all(update_all(members, 2, &rng.random_array::<32>().unwrap()));
    assert_converged(&members);

    // Removal leaves blank nodes behind.
    let remove_secret: [u8; 32] = rng.random_array().unwrap();
    let remove = Group::remove(&members[0], &remove_secret, 1, &Crypto).unwrap();
    let members: Vec<GroupState> = members
        .into_iter()
        .filter(|y| y.index() != 1)
        .map(|y| {
            if y.index() == 0 {
                Group::handle_self_remove(y, &remove, &remove_secret, &Crypto).unwrap()
            } else {
                Group::handle_remove(y, &remove, &Crypto).unwrap()
            }
        })
        .collect();
    let members = restore_all(members);
    assert_converged(&members);
    assert!(!members[0].tree().is_occupied(1));

    // Member 4 moves into the vacant leaf and the tree shrinks.
    let move_secret: [u8; 32] = rng.random_array().unwrap();
    let mover = members.iter().position(|y| y.index() == 4).unwrap();
    let mv = Group::move_leaf(&members[mover], &move_secret, 1, &Crypto).unwrap();
    let members: Vec<GroupState> = members
        .into_iter()
        .map(|y| {
            if y.index() == 4 {
                Group::handle_self_move(y, &mv, &move_secret, &Crypto).unwrap()
            } else {
                Group::handle_move(y, &mv, &Crypto).unwrap()
            }
        })
        .collect();
    let members = restore_all(members);
    assert_converged(&members);
    assert_eq!(members[0].size(), 4);

    // Restored members keep processing updates.
    let before = members[0].group_secret().cloned();
    let members = update_all(members, 0, &rng.random_array::<32>().unwrap());
    assert_converged(&members);
    assert_ne!(members[0].group_secret().cloned(), before);
}
