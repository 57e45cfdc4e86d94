//! Replies to command invocations.
//!
//! Every command is acknowledged with a deferred, ephemeral reply and a
//! single follow-up message that is then edited as the command progresses.

use std::sync::Arc;

use soundboard_sdk::model::{Interaction, MessageId};
use soundboard_sdk::platform::Platform;

use crate::error::{PlatformContext, Result};

pub const WORKING: &str = "Working...";

pub struct Followup {
    platform: Arc<dyn Platform>,
    interaction: Interaction,
    message: MessageId,
}

impl Followup {
    /// Acknowledge `interaction` and post the placeholder follow-up.
    pub async fn start(platform: Arc<dyn Platform>, interaction: Interaction) -> Result<Self> {
        platform
            .defer_reply(&interaction)
            .await
            .context("respond to interaction request")?;
        let message = platform
            .create_followup(&interaction, WORKING)
            .await
            .context("send follow-up message")?
            .id;
        Ok(Self {
            platform,
            interaction,
            message,
        })
    }

    pub fn interaction(&self) -> &Interaction {
        &self.interaction
    }

    /// Replace the follow-up's content.
    pub async fn say(&self, content: &str) -> Result<()> {
        self.platform
            .edit_followup(&self.interaction, self.message, content)
            .await
            .with_context(|| format!("notify {}", self.interaction.user))
    }
}

/// Render guilds as `"name" (id)` lines, or `empty` when there are none.
pub fn guild_lines<'a>(
    guilds: impl IntoIterator<Item = (&'a str, String)>,
    empty: &str,
) -> String {
    let lines: Vec<String> = guilds
        .into_iter()
        .map(|(name, id)| format!("{name:?} ({id})"))
        .collect();
    if lines.is_empty() {
        empty.to_string()
    } else {
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guild_lines_quote_names() {
        let out = guild_lines([("soundboardhost 4 2", "17".to_string())], "none");
        assert_eq!(out, "\"soundboardhost 4 2\" (17)");
        assert_eq!(guild_lines(std::iter::empty(), "none"), "none");
    }
}
