//! Event correlator.
//!
//! Matches gateway events against outstanding grants. Whatever the event
//! triggers runs only after the grant has been claimed, and the claim is
//! the removal, so a duplicated event finds nothing the second time.
//! A claimed grant is always signalled, whatever happens in between.

use std::sync::Arc;

use soundboard_sdk::event::Event;
use soundboard_sdk::model::{Guild, GuildId, RolePosition, User, UserId};

use crate::bot::Actor;
use crate::error::{BotError, PlatformContext, Result};
use crate::grant::{GrantError, HandOff};
use crate::reconcile::{Reconciler, grant_roles};
use crate::registry::{Grants, PendingGrants};

/// Which identity observed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Creator,
    Manager,
}

pub struct Correlator {
    creator: Actor,
    manager: Actor,
    grants: Arc<Grants>,
    reconciler: Reconciler,
}

impl Correlator {
    pub fn new(creator: Actor, manager: Actor, grants: Arc<Grants>, reconciler: Reconciler) -> Self {
        Self {
            creator,
            manager,
            grants,
            reconciler,
        }
    }

    /// Route one event observed by `side`. Returns whether it completed a grant.
    pub async fn handle(&self, side: Side, event: &Event) -> bool {
        match (side, event) {
            (_, Event::MemberJoined { guild_id, user, .. }) => {
                self.member_joined(side, *guild_id, user).await
            }
            (Side::Manager, Event::GuildCreated { guild }) => self.guild_created(guild).await,
            _ => false,
        }
    }

    fn joins(&self, side: Side) -> (&Actor, &PendingGrants) {
        match side {
            Side::Creator => (&self.creator, &self.grants.creator_joins),
            Side::Manager => (&self.manager, &self.grants.manager_joins),
        }
    }

    /// `user` joined `guild`, as seen by `side`.
    pub async fn member_joined(&self, side: Side, guild: GuildId, user: &User) -> bool {
        let (actor, registry) = self.joins(side);
        let Some(grant) = registry.claim(guild, user.id) else {
            if let Some(expected) = registry.expected_user(guild) {
                tracing::debug!(%guild, joined = %user, %expected, "join by someone else, ignoring");
            }
            return false;
        };
        tracing::info!(?side, %guild, user = %user, "expected user joined, granting autoroles");

        let outcome = self
            .complete_join(actor, guild, grant.expected_user, grant.hand_off)
            .await;
        match &outcome {
            Ok(()) => tracing::info!(%guild, user = %user, "join hand-off complete"),
            Err(e) => tracing::error!(%guild, user = %user, error = %e, "join hand-off failed"),
        }
        grant
            .completion
            .signal(outcome.map_err(|e| GrantError::Failed(e.to_string())));
        true
    }

    async fn complete_join(
        &self,
        actor: &Actor,
        guild: GuildId,
        user: UserId,
        hand_off: HandOff,
    ) -> Result<()> {
        let required = self.reconciler.required_roles(user, guild).await?;
        grant_roles(actor.platform.as_ref(), user, guild, &required).await?;
        if hand_off == HandOff::TransferOwnership {
            tracing::info!(%guild, %user, "granting ownership");
            actor
                .platform
                .set_guild_owner(guild, user)
                .await
                .context("change guild owner")?;
            actor
                .platform
                .leave_guild(guild)
                .await
                .context("leave guild")?;
        }
        Ok(())
    }

    /// The manager identity became available in `guild`.
    pub async fn guild_created(&self, guild: &Guild) -> bool {
        // Guilds stream in on every session start; only a guild the creator
        // still owns can be the one awaiting hand-off.
        if guild.owner_id != self.creator.id() {
            return false;
        }
        let Some(grant) = self.grants.transfers.claim_if(guild.id, |_| true) else {
            return false;
        };
        tracing::info!(guild = %guild.id, "manager has joined");

        let outcome = self.complete_transfer(guild, grant.expected_user).await;
        match &outcome {
            Ok(()) => tracing::info!(guild = %guild.id, owner = %grant.expected_user, "ownership transferred"),
            Err(e) => tracing::error!(guild = %guild.id, error = %e, "ownership transfer failed"),
        }
        grant
            .completion
            .signal(outcome.map_err(|e| GrantError::Failed(e.to_string())));
        true
    }

    async fn complete_transfer(&self, guild: &Guild, owner: UserId) -> Result<()> {
        let creator = &self.creator.platform;

        // The manager must outrank every role it will later hand out.
        let role = guild
            .role_named(&self.manager.application_name)
            .ok_or_else(|| BotError::ManagerRoleMissing {
                role: self.manager.application_name.clone(),
                guild: guild.id,
            })?;
        let top = guild.top_role().map_or(0, |r| r.position);
        tracing::info!(guild = %guild.id, role = %role.id, position = top + 1, "moving manager role to top");
        creator
            .reorder_roles(guild.id, &[RolePosition { id: role.id, position: top + 1 }])
            .await
            .context("reorder roles")?;

        tracing::info!(guild = %guild.id, %owner, "granting ownership");
        creator
            .set_guild_owner(guild.id, owner)
            .await
            .context("change guild owner")?;
        creator.leave_guild(guild.id).await.context("leave guild")?;
        Ok(())
    }
}
