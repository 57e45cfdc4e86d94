use soundboard_sdk::model::{GuildId, RoleId, UserId};
use soundboard_sdk::platform::PlatformError;

use crate::grant::GrantError;

/// Failure of a command or event handler.
#[derive(Debug, thiserror::Error)]
pub enum BotError {
    #[error("permission denied: {user:?} cannot call {command:?}")]
    PermissionDenied { user: String, command: String },

    #[error("creator bot does not own server {0}")]
    ServerNotOwned(GuildId),

    #[error("failed to {context}: {source}")]
    Platform {
        context: String,
        #[source]
        source: PlatformError,
    },

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("failed to wait for {context}: {source}")]
    Grant {
        context: String,
        #[source]
        source: GrantError,
    },

    #[error("failed to grant {user} role {role} ({role_name}) in {guild} ({guild_name}): {source}")]
    RoleGrant {
        user: UserId,
        role: RoleId,
        role_name: String,
        guild: GuildId,
        guild_name: String,
        #[source]
        source: PlatformError,
    },

    #[error("guild {0} has no system channel to invite into")]
    NoSystemChannel(GuildId),

    #[error("role {role:?} not found in guild {guild}")]
    ManagerRoleMissing { role: String, guild: GuildId },

    #[error("{0:?} is not a server id")]
    InvalidServerId(String),

    #[error("missing option {0:?}")]
    MissingOption(&'static str),

    #[error("this command must be used inside a server")]
    NotInGuild,
}

pub type Result<T, E = BotError> = std::result::Result<T, E>;

/// Attach operation context to platform errors, in the manner of
/// `anyhow::Context`.
pub trait PlatformContext<T> {
    fn context(self, context: impl Into<String>) -> Result<T>;

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T> PlatformContext<T> for std::result::Result<T, PlatformError> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|source| BotError::Platform {
            context: context.into(),
            source,
        })
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|source| BotError::Platform {
            context: f(),
            source,
        })
    }
}
