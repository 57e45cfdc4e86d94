//! `invite-me`: bring the caller into every soundboard they are missing from.

use crate::bot::Bot;
use crate::commands::Invocation;
use crate::error::{BotError, PlatformContext, Result};
use crate::grant::{HandOff, begin_grant};

impl Bot {
    pub(crate) async fn invite_me(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        tracing::info!(%user, "invite requested");
        let manager = self.manager.platform.as_ref();

        let mut soundboards: Vec<_> = self.db.list_soundboards()?.into_iter().collect();
        soundboards.sort();
        for guild in soundboards {
            match manager.guild_member(guild, user.id).await {
                Ok(_) => continue,
                Err(e) if e.is_unknown_member() => {}
                Err(e) => {
                    return Err(e).with_context(|| format!("look up membership of {user} in {guild}"));
                }
            }
            let guild = manager
                .guild(guild)
                .await
                .with_context(|| format!("look up guild {guild}"))?;
            let (invite, joined) = begin_grant(
                manager,
                &self.grants.manager_joins,
                &guild,
                user.id,
                HandOff::Autoroles,
            )
            .await?;
            inv.followup.say(&invite.url()).await?;

            tracing::info!(%user, guild = %guild.id, "waiting for user to join");
            joined
                .wait(inv.deadline)
                .await
                .map_err(|source| BotError::Grant {
                    context: format!("{user} to join {}", guild.id),
                    source,
                })?;
        }

        inv.followup.say("done").await?;
        tracing::info!(%user, "invite completed");
        Ok(())
    }
}
