//! Pending-grant registry.
//!
//! Correlates a guild with the one outstanding hand-off waiting on it. The
//! event that satisfies a grant claims it by removing it, so however many
//! times that event is delivered, only one delivery gets the grant.
//!
//! Entries are only ever reclaimed by a claim. A waiter that gives up does
//! not remove its entry, and a late event will still claim it and run the
//! hand-off with nobody listening.

use std::collections::HashMap;

use parking_lot::Mutex;
use soundboard_sdk::model::{GuildId, UserId};
use tokio::sync::oneshot;

use crate::grant::{Completion, GrantHandle, HandOff};

struct Entry {
    expected_user: UserId,
    hand_off: HandOff,
    completion: Completion,
}

/// A grant that has been claimed. Whoever holds it owes the waiter exactly
/// one signal.
#[derive(Debug)]
pub struct PendingGrant {
    pub guild: GuildId,
    pub expected_user: UserId,
    pub hand_off: HandOff,
    pub completion: Completion,
}

/// Outstanding grants of one kind, keyed by guild.
pub struct PendingGrants {
    kind: &'static str,
    entries: Mutex<HashMap<GuildId, Entry>>,
}

impl PendingGrants {
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// Register a grant for `guild`, replacing any previous one. A replaced
    /// grant's waiter observes [`GrantError::Abandoned`](crate::grant::GrantError::Abandoned).
    pub fn put(&self, guild: GuildId, expected_user: UserId, hand_off: HandOff) -> GrantHandle {
        let (tx, rx) = oneshot::channel();
        let entry = Entry {
            expected_user,
            hand_off,
            completion: Completion::new(tx),
        };
        if self.entries.lock().insert(guild, entry).is_some() {
            tracing::warn!(kind = self.kind, %guild, "replaced an unclaimed grant");
        }
        GrantHandle::new(rx)
    }

    /// The user an outstanding grant for `guild` is waiting on.
    pub fn expected_user(&self, guild: GuildId) -> Option<UserId> {
        self.entries.lock().get(&guild).map(|e| e.expected_user)
    }

    /// Claim the grant for `guild` if `user` is the one it expects.
    pub fn claim(&self, guild: GuildId, user: UserId) -> Option<PendingGrant> {
        self.claim_if(guild, |expected| expected == user)
    }

    /// Claim the grant for `guild` if `accept` approves its expected user.
    ///
    /// Check and removal happen under one lock: of any number of concurrent
    /// callers, at most one receives the grant.
    pub fn claim_if(
        &self,
        guild: GuildId,
        accept: impl FnOnce(UserId) -> bool,
    ) -> Option<PendingGrant> {
        let mut entries = self.entries.lock();
        let expected = entries.get(&guild)?.expected_user;
        if !accept(expected) {
            return None;
        }
        let entry = entries.remove(&guild)?;
        Some(PendingGrant {
            guild,
            expected_user: entry.expected_user,
            hand_off: entry.hand_off,
            completion: entry.completion,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Every registry the bots share: user joins as seen by each identity, and
/// ownership transfers awaiting the manager's arrival.
pub struct Grants {
    pub creator_joins: PendingGrants,
    pub manager_joins: PendingGrants,
    pub transfers: PendingGrants,
}

impl Grants {
    pub fn new() -> Self {
        Self {
            creator_joins: PendingGrants::new("creator-join"),
            manager_joins: PendingGrants::new("manager-join"),
            transfers: PendingGrants::new("transfer"),
        }
    }
}

impl Default for Grants {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use proptest::prelude::*;

    use super::*;

    const GUILD: GuildId = GuildId::new(10);
    const ALICE: UserId = UserId::new(1);
    const BOB: UserId = UserId::new(2);

    #[test]
    fn claim_requires_expected_user() {
        let grants = PendingGrants::new("test");
        let _handle = grants.put(GUILD, ALICE, HandOff::Autoroles);

        assert!(grants.claim(GUILD, BOB).is_none());
        assert_eq!(grants.len(), 1, "a mismatched user must not consume the grant");

        let grant = grants.claim(GUILD, ALICE).expect("expected user claims");
        assert_eq!(grant.expected_user, ALICE);
        assert_eq!(grant.guild, GUILD);
        assert!(grants.is_empty());
    }

    #[test]
    fn second_claim_observes_nothing() {
        let grants = PendingGrants::new("test");
        let _handle = grants.put(GUILD, ALICE, HandOff::Autoroles);
        assert!(grants.claim(GUILD, ALICE).is_some());
        assert!(grants.claim(GUILD, ALICE).is_none());
    }

    #[test]
    fn unknown_guild_is_absent() {
        let grants = PendingGrants::new("test");
        assert!(grants.claim(GUILD, ALICE).is_none());
        assert!(grants.claim_if(GUILD, |_| true).is_none());
        assert_eq!(grants.expected_user(GUILD), None);
    }

    #[test]
    fn keys_are_independent() {
        let grants = PendingGrants::new("test");
        let _a = grants.put(GuildId::new(1), ALICE, HandOff::Autoroles);
        let _b = grants.put(GuildId::new(2), BOB, HandOff::Autoroles);
        assert!(grants.claim(GuildId::new(2), BOB).is_some());
        assert_eq!(grants.expected_user(GuildId::new(1)), Some(ALICE));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn concurrent_claimants_yield_one_winner(claimants in 2usize..16, guilds in 1u64..4) {
            let grants = Arc::new(PendingGrants::new("test"));
            let mut handles = Vec::new();
            for g in 0..guilds {
                handles.push(grants.put(GuildId::new(g), ALICE, HandOff::Autoroles));
            }
            let winners: Arc<Vec<AtomicUsize>> =
                Arc::new((0..guilds).map(|_| AtomicUsize::new(0)).collect());

            let threads: Vec<_> = (0..claimants)
                .map(|_| {
                    let grants = Arc::clone(&grants);
                    let winners = Arc::clone(&winners);
                    std::thread::spawn(move || {
                        for g in 0..guilds {
                            if grants.claim(GuildId::new(g), ALICE).is_some() {
                                winners[g as usize].fetch_add(1, Ordering::SeqCst);
                            }
                        }
                    })
                })
                .collect();
            for t in threads {
                t.join().unwrap();
            }

            for w in winners.iter() {
                prop_assert_eq!(w.load(Ordering::SeqCst), 1);
            }
            prop_assert!(grants.is_empty());
        }
    }
}
