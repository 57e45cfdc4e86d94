//! Soundboard provisioning.
//!
//! `create-soundboard` walks a new guild from template clone to its final
//! owner:
//!
//! 1. the creator clones the template and the role mapping is recorded
//! 2. the caller gets an invite and the creator waits for them to join
//! 3. the caller is DMed an authorisation link for the manager identity
//! 4. once the manager arrives, the correlator moves its role to the top,
//!    hands ownership to the caller and the creator leaves
//!
//! Any failed step ends the workflow; nothing is retried.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use soundboard_sdk::model::{ApplicationId, Guild, GuildId, RoleId};

use crate::bot::Bot;
use crate::commands::{Invocation, OPTION_SERVER_SUFFIX, integer_option};
use crate::error::{BotError, PlatformContext, Result};
use crate::grant::{HandOff, begin_grant};

pub const GUILD_NAME: &str = "soundboardhost";

/// Permissions requested for the manager identity: administrator only.
pub const MANAGER_PERMISSIONS: u64 = 1 << 3;

/// Workflow position, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Cloning,
    Recording,
    Inviting,
    AwaitingJoin,
    Authorizing,
    AwaitingManager,
    CleaningUp,
    Complete,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Cloning => write!(f, "cloning"),
            Stage::Recording => write!(f, "recording"),
            Stage::Inviting => write!(f, "inviting"),
            Stage::AwaitingJoin => write!(f, "awaiting join"),
            Stage::Authorizing => write!(f, "authorizing"),
            Stage::AwaitingManager => write!(f, "awaiting manager"),
            Stage::CleaningUp => write!(f, "cleaning up"),
            Stage::Complete => write!(f, "complete"),
        }
    }
}

/// `42` becomes `" 4 2"`. Zero, negatives and no value give no suffix.
pub fn guild_suffix(n: Option<i64>) -> String {
    match n {
        Some(n) if n > 0 => n
            .to_string()
            .chars()
            .fold(String::new(), |mut acc, digit| {
                acc.push(' ');
                acc.push(digit);
                acc
            }),
        _ => String::new(),
    }
}

/// Link that adds the manager identity to exactly `guild`.
pub fn authorization_url(application: ApplicationId, guild: GuildId) -> String {
    format!(
        "https://discord.com/oauth2/authorize?client_id={application}&permissions={MANAGER_PERMISSIONS}&scope=bot&disable_guild_select=true&guild_id={guild}"
    )
}

/// The guild's roles that realise a template role, by template role name.
pub fn realized_roles(guild: &Guild, template_roles: &BTreeSet<String>) -> BTreeMap<String, RoleId> {
    guild
        .roles
        .iter()
        .filter(|r| template_roles.contains(&r.name))
        .map(|r| (r.name.clone(), r.id))
        .collect()
}

impl Bot {
    /// Persist `guild`'s role mapping.
    pub(crate) fn record_soundboard(&self, guild: &Guild) -> Result<()> {
        let roles = realized_roles(guild, &self.template_roles);
        tracing::debug!(guild = %guild.id, roles = roles.len(), "recording soundboard roles");
        self.db.upsert_soundboard(guild.id, &roles)?;
        Ok(())
    }

    fn enter(&self, guild: Option<GuildId>, stage: Stage) {
        match guild {
            Some(guild) => tracing::info!(%guild, %stage, "provisioning"),
            None => tracing::info!(%stage, "provisioning"),
        }
    }

    pub(crate) async fn create_soundboard(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        self.authorize(user, inv.command.name())?;
        tracing::info!(user = %user, "create guild request received");

        self.enter(None, Stage::Cloning);
        let name = format!(
            "{GUILD_NAME}{}",
            guild_suffix(integer_option(inv.interaction(), OPTION_SERVER_SUFFIX))
        );
        let guild = self
            .creator
            .platform
            .create_guild_from_template(&self.config.template, &name)
            .await
            .with_context(|| format!("create guild {name:?}"))?;
        tracing::info!(guild = %guild.id, channel = ?guild.system_channel_id, "created guild");

        self.enter(Some(guild.id), Stage::Recording);
        self.record_soundboard(&guild)?;

        self.enter(Some(guild.id), Stage::Inviting);
        let hand_off = if self.config.single_identity {
            HandOff::TransferOwnership
        } else {
            HandOff::Autoroles
        };
        let (invite, joined) = begin_grant(
            self.creator.platform.as_ref(),
            &self.grants.creator_joins,
            &guild,
            user.id,
            hand_off,
        )
        .await?;
        inv.followup.say(&invite.url()).await?;

        self.enter(Some(guild.id), Stage::AwaitingJoin);
        joined
            .wait(inv.deadline)
            .await
            .map_err(|source| BotError::Grant {
                context: format!("{user} to join {}", guild.id),
                source,
            })?;

        if !self.config.single_identity {
            self.hand_to_manager(inv, &guild).await?;
        }

        self.enter(Some(guild.id), Stage::Complete);
        inv.followup
            .say(&format!("{:?} ({}) is yours.", guild.name, guild.id))
            .await
    }

    /// DM the caller the manager's authorisation link and wait for the
    /// correlator to finish the transfer once the manager arrives.
    async fn hand_to_manager(&self, inv: &Invocation, guild: &Guild) -> Result<()> {
        let user = &inv.interaction().user;
        self.enter(Some(guild.id), Stage::Authorizing);
        // Registered before the link goes out, so the manager cannot beat it.
        let transferred = self.grants.transfers.put(guild.id, user.id, HandOff::Autoroles);
        let manager = &self.manager.platform;
        let dm = manager
            .create_dm(user.id)
            .await
            .with_context(|| format!("open dm with {user}"))?;
        let auth = manager
            .send_message(dm, &authorization_url(self.manager.application_id, guild.id))
            .await
            .with_context(|| format!("send dm to {user}"))?;

        self.enter(Some(guild.id), Stage::AwaitingManager);
        transferred
            .wait(inv.deadline)
            .await
            .map_err(|source| BotError::Grant {
                context: format!("{user} to authorize manager in {}", guild.id),
                source,
            })?;

        self.enter(Some(guild.id), Stage::CleaningUp);
        manager
            .delete_message(dm, auth.id)
            .await
            .with_context(|| format!("delete dm to {user}"))
    }
}
