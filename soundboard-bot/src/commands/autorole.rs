//! `add-autorole` and `fix-roles`.

use std::fmt::Write;

use crate::bot::Bot;
use crate::commands::{Invocation, OPTION_ROLE, OPTION_TEMPLATE_ROLE_NAME, role_option, string_option};
use crate::error::{BotError, Result};

impl Bot {
    pub(crate) async fn add_autorole(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        self.authorize(user, inv.command.name())?;

        let guild = inv.interaction().guild_id.ok_or(BotError::NotInGuild)?;
        let role = role_option(inv.interaction(), OPTION_ROLE)?;
        let template_role = string_option(inv.interaction(), OPTION_TEMPLATE_ROLE_NAME)?;
        tracing::info!(%guild, %role, template_role, %user, "add autorole requested");

        self.db.insert_autorole(guild, role, template_role)?;

        inv.followup
            .say(&format!(
                "autorole for \"{role}\" in \"{guild}\" will assign role {template_role:?}"
            ))
            .await?;
        tracing::info!(%guild, %role, template_role, %user, "autorole added");
        Ok(())
    }

    pub(crate) async fn fix_roles(&self, inv: &Invocation) -> Result<()> {
        let user = &inv.interaction().user;
        tracing::info!(%user, "fix roles requested");

        let granted = self.reconciler.fix_roles(user.id).await?;
        let content = if granted.is_empty() {
            format!("{user} is not missing any roles")
        } else {
            let mut out = format!("{user} was granted:");
            for (guild, roles) in &granted {
                let roles: Vec<String> = roles.iter().map(ToString::to_string).collect();
                let _ = write!(out, "\n\t{guild}: {}", roles.join(", "));
            }
            out
        };
        inv.followup.say(&content).await?;
        tracing::info!(%user, guilds = granted.len(), "fix roles completed");
        Ok(())
    }
}
