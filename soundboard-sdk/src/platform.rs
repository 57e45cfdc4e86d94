//! The outbound surface of a bot identity.
//!
//! Everything the bots ask of the platform goes through [`Platform`], so the
//! REST client and the in-memory fake are interchangeable behind an
//! `Arc<dyn Platform>`.

use async_trait::async_trait;

use crate::model::{
    Application, ApplicationId, ChannelId, CurrentUser, Guild, GuildId, GuildTemplate,
    Interaction, Invite, Member, Message, MessageId, RoleId, RolePosition, UserGuild, UserId,
};

/// Platform error code for "Unknown Member".
pub const UNKNOWN_MEMBER: u64 = 10007;

/// Largest page the guild listing endpoint hands out.
pub const USER_GUILDS_PAGE: u16 = 200;

#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("platform returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<u64>,
        message: String,
    },
    /// The call succeeded but its response body could not be decoded.
    #[error("failed to decode response: {0}")]
    Decode(String),
}

impl PlatformError {
    pub fn is_unknown_member(&self) -> bool {
        matches!(self, PlatformError::Api { code: Some(UNKNOWN_MEMBER), .. })
    }
}

pub type Result<T, E = PlatformError> = std::result::Result<T, E>;

#[async_trait]
pub trait Platform: Send + Sync {
    /// The user behind this identity's token.
    async fn current_user(&self) -> Result<CurrentUser>;

    async fn application(&self) -> Result<Application>;

    async fn guild_template(&self, code: &str) -> Result<GuildTemplate>;

    async fn create_guild_from_template(&self, code: &str, name: &str) -> Result<Guild>;

    async fn create_invite(&self, channel: ChannelId) -> Result<Invite>;

    /// Open (or reuse) the direct-message channel with `user`.
    async fn create_dm(&self, user: UserId) -> Result<ChannelId>;

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<Message>;

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()>;

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()>;

    async fn set_guild_owner(&self, guild: GuildId, owner: UserId) -> Result<()>;

    async fn reorder_roles(&self, guild: GuildId, positions: &[RolePosition]) -> Result<()>;

    async fn leave_guild(&self, guild: GuildId) -> Result<()>;

    /// Delete a guild this identity owns. Implementations may report
    /// [`PlatformError::Decode`] even though the guild is gone.
    async fn delete_guild(&self, guild: GuildId) -> Result<()>;

    async fn guild_member(&self, guild: GuildId, user: UserId) -> Result<Member>;

    async fn guild(&self, guild: GuildId) -> Result<Guild>;

    /// One page of the guilds this identity is in, ordered by id, starting
    /// strictly after `after`.
    async fn user_guilds(&self, after: Option<GuildId>, limit: u16) -> Result<Vec<UserGuild>>;

    /// Replace the global command set of `application`.
    async fn register_commands(
        &self,
        application: ApplicationId,
        commands: &[serde_json::Value],
    ) -> Result<()>;

    /// Acknowledge an interaction with a deferred, ephemeral reply.
    async fn defer_reply(&self, interaction: &Interaction) -> Result<()>;

    async fn create_followup(&self, interaction: &Interaction, content: &str) -> Result<Message>;

    async fn edit_followup(
        &self,
        interaction: &Interaction,
        message: MessageId,
        content: &str,
    ) -> Result<()>;
}

/// Walk every page of [`Platform::user_guilds`].
pub async fn all_user_guilds(platform: &dyn Platform) -> Result<Vec<UserGuild>> {
    let mut all = Vec::new();
    let mut after = None;
    loop {
        let page = platform.user_guilds(after, USER_GUILDS_PAGE).await?;
        match page.last() {
            Some(last) => after = Some(last.id),
            None => break,
        }
        all.extend(page);
    }
    Ok(all)
}
