//! `list-servers` and `delete-server`.

use soundboard_sdk::model::{GuildId, UserGuild};
use soundboard_sdk::platform::{PlatformError, all_user_guilds};

use crate::bot::Bot;
use crate::commands::{Invocation, OPTION_SERVER_ID, string_option};
use crate::error::{BotError, PlatformContext, Result};
use crate::output::guild_lines;

impl Bot {
    /// Guilds the creator identity currently owns.
    async fn owned_guilds(&self) -> Result<Vec<UserGuild>> {
        let guilds = all_user_guilds(self.creator.platform.as_ref())
            .await
            .context("list creator guilds")?;
        Ok(guilds.into_iter().filter(|g| g.owner).collect())
    }

    pub(crate) async fn list_servers(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        self.authorize(user, inv.command.name())?;
        tracing::info!(%user, "list guilds request received");

        let owned = self.owned_guilds().await?;
        let content = guild_lines(
            owned.iter().map(|g| (g.name.as_str(), g.id.to_string())),
            "I do not own any servers.",
        );
        inv.followup.say(&content).await?;
        tracing::info!(%user, count = owned.len(), "sent guild list");
        Ok(())
    }

    pub(crate) async fn delete_server(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        self.authorize(user, inv.command.name())?;

        let raw = string_option(inv.interaction(), OPTION_SERVER_ID)?;
        let guild: GuildId = raw
            .trim()
            .parse()
            .map_err(|_| BotError::InvalidServerId(raw.to_string()))?;
        tracing::info!(%guild, %user, "delete guild request received");

        if !self.owned_guilds().await?.iter().any(|g| g.id == guild) {
            return Err(BotError::ServerNotOwned(guild));
        }
        match self.creator.platform.delete_guild(guild).await {
            Ok(()) => {}
            // The delete answers 204 with no body; a decode failure here
            // means the guild is already gone.
            Err(PlatformError::Decode(detail)) => {
                tracing::debug!(%guild, %detail, "ignoring undecodable delete response");
            }
            Err(e) => return Err(e).with_context(|| format!("delete guild {guild}")),
        }
        self.db.delete_soundboard(guild)?;

        inv.followup
            .say(&format!("{:?} has been deleted.", guild.to_string()))
            .await?;
        tracing::info!(%guild, %user, "guild has been deleted");
        Ok(())
    }
}
