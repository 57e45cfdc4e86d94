//! Events a bot identity receives from the gateway.

use crate::model::{Guild, GuildId, Interaction, RoleId, User};

#[derive(Debug, Clone)]
pub enum Event {
    /// Session established. `user` is the identity behind the token.
    Ready { user: User },

    /// A user joined a guild this identity is in.
    MemberJoined {
        guild_id: GuildId,
        user: User,
        roles: Vec<RoleId>,
    },

    /// This identity has become available in a guild: sent for every guild
    /// on session start and whenever the identity joins a new one.
    GuildCreated { guild: Guild },

    /// An application command was invoked.
    Command(Interaction),

    /// The gateway session ended.
    Disconnected { reason: String },
}
