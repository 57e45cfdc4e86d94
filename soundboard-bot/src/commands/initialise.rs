//! `initialise-db`: rebuild soundboard role mappings from what the manager
//! identity can see.

use std::collections::BTreeSet;

use soundboard_sdk::model::Guild;
use soundboard_sdk::platform::all_user_guilds;

use crate::bot::Bot;
use crate::commands::{Invocation, SUBCOMMAND_ALL, SUBCOMMAND_CURRENT, subcommand};
use crate::error::{BotError, PlatformContext, Result};

/// Whether `manager`'s role sits above every other role in `guild`.
pub fn manager_on_top(guild: &Guild, manager: &str) -> bool {
    guild.top_role().is_some_and(|r| r.name == manager)
}

impl Bot {
    pub(crate) async fn initialise_db(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        self.authorize(user, inv.command.name())?;
        tracing::info!(%user, "initialise db request received");

        let needs_reorder = match subcommand(inv.interaction()) {
            Some(SUBCOMMAND_ALL) => self.initialise_all().await?,
            Some(SUBCOMMAND_CURRENT) => {
                let guild = inv.interaction().guild_id.ok_or(BotError::NotInGuild)?;
                tracing::info!(%guild, "initialising db for invoking guild only");
                let guild = self
                    .manager
                    .platform
                    .guild(guild)
                    .await
                    .with_context(|| format!("look up guild {guild}"))?;
                self.initialise_one(&guild)?
                    .into_iter()
                    .collect()
            }
            _ => return Err(BotError::MissingOption(SUBCOMMAND_ALL)),
        };

        let listed: Vec<String> = needs_reorder.into_iter().collect();
        inv.followup
            .say(&format!(
                "db has been initialised\nThe following guilds need manual role reordering:\n\t{}",
                listed.join("\n\t")
            ))
            .await?;
        tracing::info!(%user, "db has been initialised");
        Ok(())
    }

    /// Re-record every soundboard the manager is in and drop rows for the
    /// ones it is not. Returns names of guilds whose roles need reordering.
    async fn initialise_all(&self) -> Result<BTreeSet<String>> {
        tracing::info!("initialising db for all guilds");
        let main_guilds = self.db.list_guilds()?;
        let mut stale = self.db.list_soundboards()?;
        let listed = all_user_guilds(self.manager.platform.as_ref())
            .await
            .context("list manager guilds")?;

        let mut needs_reorder = BTreeSet::new();
        for entry in listed {
            if main_guilds.contains(&entry.id) {
                continue;
            }
            let guild = self
                .manager
                .platform
                .guild(entry.id)
                .await
                .with_context(|| format!("look up guild {}", entry.id))?;
            stale.remove(&guild.id);
            needs_reorder.extend(self.initialise_one(&guild)?);
        }
        for guild in stale {
            tracing::info!(%guild, "deleting stale db entry");
            self.db.delete_soundboard(guild)?;
        }
        Ok(needs_reorder)
    }

    /// Record `guild`'s role mapping; returns its name if the manager's role
    /// is not on top.
    fn initialise_one(&self, guild: &Guild) -> Result<Option<String>> {
        tracing::info!(guild = %guild.id, name = %guild.name, "initialising db");
        self.record_soundboard(guild)?;
        if manager_on_top(guild, self.manager.name()) {
            Ok(None)
        } else {
            tracing::warn!(guild = %guild.id, "manager role is not the highest role");
            Ok(Some(guild.name.clone()))
        }
    }
}
