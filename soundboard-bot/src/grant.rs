//! Invite/grant protocol.
//!
//! A workflow step that needs someone to show up in a guild registers a
//! grant, hands out an invite, and then suspends on the returned
//! [`GrantHandle`] until the event correlator signals it or the deadline
//! passes. The wait holds no lock.

use soundboard_sdk::model::{Guild, Invite, UserId};
use soundboard_sdk::platform::Platform;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{BotError, PlatformContext, Result};
use crate::registry::PendingGrants;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GrantError {
    #[error("context was cancelled before event triggered")]
    Cancelled,
    #[error("grant was dropped before it was completed")]
    Abandoned,
    #[error("{0}")]
    Failed(String),
}

pub type Outcome = std::result::Result<(), GrantError>;

/// What the correlator does once the expected user has joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandOff {
    /// Grant the user's autoroles.
    Autoroles,
    /// Grant autoroles, make the user owner, and leave the guild.
    TransferOwnership,
}

/// Write side of a grant. Consumed by signalling, so a grant completes at
/// most once.
#[derive(Debug)]
pub struct Completion(oneshot::Sender<Outcome>);

impl Completion {
    pub(crate) fn new(tx: oneshot::Sender<Outcome>) -> Self {
        Self(tx)
    }

    pub fn signal(self, outcome: Outcome) {
        if self.0.send(outcome).is_err() {
            tracing::debug!("grant completed with no waiter listening");
        }
    }
}

/// Read side of a grant.
#[derive(Debug)]
pub struct GrantHandle(oneshot::Receiver<Outcome>);

impl GrantHandle {
    pub(crate) fn new(rx: oneshot::Receiver<Outcome>) -> Self {
        Self(rx)
    }

    /// Wait for the grant to be completed, giving up at `deadline`.
    ///
    /// Giving up does not withdraw the grant from its registry.
    pub async fn wait(self, deadline: Instant) -> Outcome {
        if Instant::now() >= deadline {
            return Err(GrantError::Cancelled);
        }
        match tokio::time::timeout_at(deadline, self.0).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(GrantError::Abandoned),
            Err(_) => Err(GrantError::Cancelled),
        }
    }
}

/// Register a grant for `user` joining `guild` and create the invite that
/// lets them do so. The grant is registered first so a quick join cannot
/// slip past it.
pub async fn begin_grant(
    platform: &dyn Platform,
    registry: &PendingGrants,
    guild: &Guild,
    user: UserId,
    hand_off: HandOff,
) -> Result<(Invite, GrantHandle)> {
    let channel = guild
        .system_channel_id
        .ok_or(BotError::NoSystemChannel(guild.id))?;
    let handle = registry.put(guild.id, user, hand_off);
    match platform.create_invite(channel).await {
        Ok(invite) => {
            tracing::info!(kind = registry.kind(), guild = %guild.id, %user, code = %invite.code, "invite issued");
            Ok((invite, handle))
        }
        Err(e) => {
            // Nobody can join through an invite that was never created.
            registry.claim_if(guild.id, |expected| expected == user);
            Err(e).with_context(|| format!("create invite for {}", guild.id))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use soundboard_sdk::fake::{Failure, FakeWorld};
    use soundboard_sdk::model::GuildId;

    use super::*;

    const GUILD: GuildId = GuildId::new(5);
    const USER: UserId = UserId::new(6);

    fn soon() -> Instant {
        Instant::now() + Duration::from_secs(5)
    }

    #[tokio::test]
    async fn elapsed_deadline_cancels_without_blocking() {
        let grants = PendingGrants::new("test");
        let handle = grants.put(GUILD, USER, HandOff::Autoroles);
        let started = std::time::Instant::now();
        let outcome = handle.wait(Instant::now()).await;
        assert_eq!(outcome, Err(GrantError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(grants.len(), 1, "timing out leaves the entry behind");
    }

    #[tokio::test]
    async fn signalled_outcome_reaches_waiter() {
        let grants = Arc::new(PendingGrants::new("test"));
        let handle = grants.put(GUILD, USER, HandOff::Autoroles);
        let g = Arc::clone(&grants);
        tokio::spawn(async move {
            let grant = g.claim(GUILD, USER).unwrap();
            grant.completion.signal(Err(GrantError::Failed("no roles".into())));
        });
        assert_eq!(handle.wait(soon()).await, Err(GrantError::Failed("no roles".into())));
    }

    #[tokio::test]
    async fn short_deadline_times_out() {
        let grants = PendingGrants::new("test");
        let handle = grants.put(GUILD, USER, HandOff::Autoroles);
        let outcome = handle.wait(Instant::now() + Duration::from_millis(20)).await;
        assert_eq!(outcome, Err(GrantError::Cancelled));
    }

    #[tokio::test]
    async fn replaced_grant_is_abandoned() {
        let grants = PendingGrants::new("test");
        let first = grants.put(GUILD, USER, HandOff::Autoroles);
        let _second = grants.put(GUILD, USER, HandOff::Autoroles);
        assert_eq!(first.wait(soon()).await, Err(GrantError::Abandoned));
    }

    #[tokio::test]
    async fn late_claim_after_timeout_still_succeeds() {
        let grants = PendingGrants::new("test");
        let handle = grants.put(GUILD, USER, HandOff::Autoroles);
        assert_eq!(handle.wait(Instant::now()).await, Err(GrantError::Cancelled));
        let grant = grants.claim(GUILD, USER).expect("entry outlives its waiter");
        grant.completion.signal(Ok(()));
    }

    #[tokio::test]
    async fn begin_grant_registers_and_invites() {
        let world = FakeWorld::new();
        let bot = world.add_user("creator");
        let user = world.add_user("alice");
        let guild = world.add_guild("g", &bot, &[]);
        let platform = world.platform(&bot);
        let grants = PendingGrants::new("test");

        let (invite, _handle) = begin_grant(&platform, &grants, &guild, user.id, HandOff::Autoroles)
            .await
            .unwrap();
        assert!(invite.url().starts_with("https://discord.gg/"));
        assert_eq!(grants.expected_user(guild.id), Some(user.id));
    }

    #[tokio::test]
    async fn failed_invite_withdraws_grant() {
        let world = FakeWorld::new();
        let bot = world.add_user("creator");
        let user = world.add_user("alice");
        let guild = world.add_guild("g", &bot, &[]);
        world.fail("create_invite", Failure::Api { code: 50013, message: "Missing Permissions".into() });
        let grants = PendingGrants::new("test");

        let err = begin_grant(&world.platform(&bot), &grants, &guild, user.id, HandOff::Autoroles)
            .await
            .unwrap_err();
        assert!(matches!(err, BotError::Platform { .. }));
        assert!(grants.is_empty());
    }
}
