//! Platform data model.
//!
//! Snowflake ids travel as decimal strings on the wire; the newtypes here
//! keep guild, user and role ids from being mixed up once parsed.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

macro_rules! snowflake {
    ($($(#[$meta:meta])* $name:ident),* $(,)?) => {$(
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub u64);

        impl $name {
            pub const fn new(id: u64) -> Self {
                Self(id)
            }

            pub const fn get(self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = std::num::ParseIntError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(&self.0)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                raw.parse().map_err(serde::de::Error::custom)
            }
        }
    )*};
}

snowflake!(
    /// A guild (server).
    GuildId,
    /// A user account, human or bot.
    UserId,
    /// A guild-local role.
    RoleId,
    ChannelId,
    MessageId,
    /// The application a bot identity belongs to.
    ApplicationId,
    InteractionId,
);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
}

impl fmt::Display for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.username, self.id)
    }
}

/// The user behind a bot token.
pub type CurrentUser = User;

/// The application a bot token belongs to. The role the platform creates
/// for a bot joining a guild carries the application's name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: ApplicationId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: RoleId,
    pub name: String,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Guild {
    pub id: GuildId,
    pub name: String,
    pub owner_id: UserId,
    #[serde(default)]
    pub roles: Vec<Role>,
    #[serde(default)]
    pub system_channel_id: Option<ChannelId>,
}

impl Guild {
    pub fn role(&self, id: RoleId) -> Option<&Role> {
        self.roles.iter().find(|r| r.id == id)
    }

    pub fn role_named(&self, name: &str) -> Option<&Role> {
        self.roles.iter().find(|r| r.name == name)
    }

    /// The role with the highest position, if the guild has any roles.
    pub fn top_role(&self) -> Option<&Role> {
        self.roles.iter().max_by_key(|r| r.position)
    }
}

impl fmt::Display for Guild {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self.name, self.id)
    }
}

/// Entry of the current user's guild listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGuild {
    pub id: GuildId,
    pub name: String,
    #[serde(default)]
    pub owner: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub user: User,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invite {
    pub code: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl Invite {
    pub fn url(&self) -> String {
        format!("https://discord.gg/{}", self.code)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub channel_id: ChannelId,
}

/// Target position of a single role in a reorder request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolePosition {
    pub id: RoleId,
    pub position: i64,
}

/// A guild blueprint. Only role names matter to the bots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuildTemplate {
    pub code: String,
    pub name: String,
    pub role_names: Vec<String>,
}

/// An application command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Interaction {
    pub id: InteractionId,
    pub application_id: ApplicationId,
    pub token: String,
    pub guild_id: Option<GuildId>,
    pub user: User,
    pub command: String,
    pub options: Vec<CommandOption>,
}

impl Interaction {
    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.iter().find(|o| o.name == name).map(|o| &o.value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CommandOption {
    pub name: String,
    pub value: OptionValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Integer(i64),
    String(String),
    Role(RoleId),
    SubCommand(Vec<CommandOption>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snowflakes_round_trip_as_strings() {
        let id: GuildId = serde_json::from_str("\"81384788765712384\"").unwrap();
        assert_eq!(id, GuildId::new(81384788765712384));
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"81384788765712384\"");
        assert!(serde_json::from_str::<GuildId>("\"not-a-number\"").is_err());
    }

    #[test]
    fn guild_decodes_platform_payload() {
        let guild: Guild = serde_json::from_value(serde_json::json!({
            "id": "1",
            "name": "soundboardhost 4 2",
            "owner_id": "7",
            "system_channel_id": "9",
            "roles": [
                {"id": "1", "name": "@everyone", "position": 0},
                {"id": "2", "name": "DJ", "position": 3},
                {"id": "3", "name": "Listener", "position": 1}
            ],
            "features": []
        }))
        .unwrap();
        assert_eq!(guild.owner_id, UserId::new(7));
        assert_eq!(guild.system_channel_id, Some(ChannelId::new(9)));
        assert_eq!(guild.top_role().map(|r| r.name.as_str()), Some("DJ"));
        assert_eq!(guild.role_named("Listener").map(|r| r.id), Some(RoleId::new(3)));
    }

    #[test]
    fn invite_url() {
        let invite = Invite { code: "abc123".into(), expires_at: None };
        assert_eq!(invite.url(), "https://discord.gg/abc123");
    }
}
