// SPDX-License-Identifier: MIT OR Apache-2.0

//! Helpers to set up groups and logging in tests.
use crate::crypto::Rng;
use crate::group::{GroupError, GroupState, TreeKemGroup};
use crate::traits::CryptoProvider;

/// Enables log output when `RUST_LOG` is set.
pub fn setup_logging() {
    if std::env::var("RUST_LOG").is_ok() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    }
}

/// Grows a group to `count` members, one user add at a time.
///
/// The first member creates the group and hands out the init keys, every other member processes
/// all joins after its own. Leaf secrets are taken from `rng`.
pub fn create_group<P: CryptoProvider>(
    count: usize,
    provider: &P,
    rng: &Rng,
) -> Result<Vec<GroupState>, GroupError<P>> {
    let leaf_secret: [u8; 32] = rng.random_array()?;
    let mut members = vec![TreeKemGroup::create(&leaf_secret, provider)?];

    for _ in 1..count {
        let leaf_secret: [u8; 32] = rng.random_array()?;
        let init_key = TreeKemGroup::<P>::group_init_key(&members[0]);
        let user_add = TreeKemGroup::join(&leaf_secret, &init_key, provider)?;

        members = members
            .into_iter()
            .map(|y| TreeKemGroup::handle_user_add(y, &user_add, provider))
            .collect::<Result<_, _>>()?;
        members.push(TreeKemGroup::from_user_add(
            &leaf_secret,
            &init_key,
            &user_add,
            provider,
        )?);
    }

    Ok(members)
}

/// Panics if any two members disagree on the tree or the group secret.
pub fn assert_converged(members: &[GroupState]) {
    for member in members {
        for other in members {
            assert!(
                member.equal(other),
                "{} and {} diverged:\n{}\n{}",
                member.index(),
                other.index(),
                member.dump(),
                other.dump()
            );
        }
        assert_eq!(member.size(), members[0].size());
        assert!(member.group_secret() == members[0].group_secret());
    }
}
