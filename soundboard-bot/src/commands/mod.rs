//! Application commands.
//!
//! Every interaction is acknowledged with a deferred ephemeral reply and a
//! "Working..." follow-up, then handled in its own task with a deadline.
//! Whatever the handler ends with, success text or error, lands in that
//! follow-up.

mod autorole;
mod initialise;
mod invite;
mod servers;

use std::collections::BTreeSet;
use std::sync::Arc;

use serde_json::{Value, json};
use soundboard_sdk::model::{Interaction, OptionValue, RoleId};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::bot::Bot;
use crate::error::{BotError, Result};
use crate::output::Followup;

pub const OPTION_SERVER_SUFFIX: &str = "server_suffix";
pub const OPTION_SERVER_ID: &str = "server_id";
pub const OPTION_ROLE: &str = "role";
pub const OPTION_TEMPLATE_ROLE_NAME: &str = "template_role_name";
pub const SUBCOMMAND_ALL: &str = "all";
pub const SUBCOMMAND_CURRENT: &str = "current";

// Application command option types.
const SUB_COMMAND: u8 = 1;
const STRING: u8 = 3;
const INTEGER: u8 = 4;
const ROLE: u8 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    CreateSoundboard,
    DeleteServer,
    ListServers,
    AddAutorole,
    FixRoles,
    InitialiseDb,
    InviteMe,
}

impl Command {
    pub const ALL: [Command; 7] = [
        Command::CreateSoundboard,
        Command::DeleteServer,
        Command::ListServers,
        Command::AddAutorole,
        Command::FixRoles,
        Command::InitialiseDb,
        Command::InviteMe,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::CreateSoundboard => "create-soundboard",
            Command::DeleteServer => "delete-server",
            Command::ListServers => "list-servers",
            Command::AddAutorole => "add-autorole",
            Command::FixRoles => "fix-roles",
            Command::InitialiseDb => "initialise-db",
            Command::InviteMe => "invite-me",
        }
    }

    fn description(self) -> &'static str {
        match self {
            Command::CreateSoundboard => "Creates a new soundboard server",
            Command::DeleteServer => "Deletes a borked server",
            Command::ListServers => "Lists all servers that the bot owns",
            Command::AddAutorole => "Adds an autorole for this server",
            Command::FixRoles => "Fix AutoRoles for calling user",
            Command::InitialiseDb => "Initialises the bot's DB entries for soundboard servers",
            Command::InviteMe => "Invite to all soundboards",
        }
    }

    fn options(self, template_roles: &BTreeSet<String>) -> Vec<Value> {
        match self {
            Command::CreateSoundboard => vec![json!({
                "type": INTEGER,
                "name": OPTION_SERVER_SUFFIX,
                "description": "Number appended to the new server's name",
                "required": false,
                "min_value": 1,
            })],
            Command::DeleteServer => vec![json!({
                "type": STRING,
                "name": OPTION_SERVER_ID,
                "description": "The server to be deleted",
                "required": true,
            })],
            Command::AddAutorole => {
                let choices: Vec<Value> = template_roles
                    .iter()
                    .map(|r| json!({ "name": r, "value": r }))
                    .collect();
                vec![
                    json!({
                        "type": ROLE,
                        "name": OPTION_ROLE,
                        "description": "The Role which will become an AutoRole",
                        "required": true,
                    }),
                    json!({
                        "type": STRING,
                        "name": OPTION_TEMPLATE_ROLE_NAME,
                        "description": "The Name of the Role in the Soundboard Template which members in this AutoRole will be assigned to",
                        "required": true,
                        "choices": choices,
                    }),
                ]
            }
            Command::InitialiseDb => vec![
                json!({
                    "type": SUB_COMMAND,
                    "name": SUBCOMMAND_ALL,
                    "description": "Reinitialise all servers that the bot is a member of",
                }),
                json!({
                    "type": SUB_COMMAND,
                    "name": SUBCOMMAND_CURRENT,
                    "description": "Reinitialise the server that this command is executing in",
                }),
            ],
            Command::ListServers | Command::FixRoles | Command::InviteMe => vec![],
        }
    }
}

/// Application command definitions for the bulk overwrite at startup.
pub fn definitions(template_roles: &BTreeSet<String>) -> Vec<Value> {
    Command::ALL
        .into_iter()
        .map(|c| {
            json!({
                "name": c.name(),
                "description": c.description(),
                "options": c.options(template_roles),
            })
        })
        .collect()
}

pub(crate) fn integer_option(interaction: &Interaction, name: &str) -> Option<i64> {
    match interaction.option(name) {
        Some(OptionValue::Integer(n)) => Some(*n),
        _ => None,
    }
}

pub(crate) fn string_option<'a>(interaction: &'a Interaction, name: &'static str) -> Result<&'a str> {
    match interaction.option(name) {
        Some(OptionValue::String(s)) => Ok(s.as_str()),
        _ => Err(BotError::MissingOption(name)),
    }
}

pub(crate) fn role_option(interaction: &Interaction, name: &'static str) -> Result<RoleId> {
    match interaction.option(name) {
        Some(OptionValue::Role(id)) => Ok(*id),
        _ => Err(BotError::MissingOption(name)),
    }
}

/// Name of the subcommand an interaction was invoked with.
pub(crate) fn subcommand(interaction: &Interaction) -> Option<&str> {
    interaction.options.iter().find_map(|o| match o.value {
        OptionValue::SubCommand(_) => Some(o.name.as_str()),
        _ => None,
    })
}

/// One running command.
pub struct Invocation {
    pub command: Command,
    pub followup: Followup,
    /// Every grant wait of this invocation gives up here.
    pub deadline: Instant,
}

impl Invocation {
    pub fn interaction(&self) -> &Interaction {
        self.followup.interaction()
    }
}

impl Bot {
    /// Acknowledge `interaction` and handle it on its own task.
    ///
    /// Returns `None` for command names this bot does not know.
    pub fn dispatch(self: &Arc<Self>, interaction: Interaction) -> Option<JoinHandle<()>> {
        let Some(command) = Command::from_name(&interaction.command) else {
            tracing::warn!(command = %interaction.command, user = %interaction.user, "unknown command");
            return None;
        };
        let bot = Arc::clone(self);
        Some(tokio::spawn(async move {
            let user = interaction.user.clone();
            let followup = match Followup::start(Arc::clone(&bot.manager.platform), interaction).await {
                Ok(followup) => followup,
                Err(e) => {
                    tracing::error!(command = command.name(), %user, error = %e, "failed to acknowledge command");
                    return;
                }
            };
            let inv = Invocation {
                command,
                followup,
                deadline: Instant::now() + bot.config.command_timeout,
            };
            if let Err(e) = bot.run(&inv).await {
                tracing::error!(command = command.name(), %user, error = %e, "command failed");
                if let Err(e) = inv.followup.say(&e.to_string()).await {
                    tracing::error!(command = command.name(), %user, error = %e, "failed to report command error");
                }
            }
        }))
    }

    async fn run(&self, inv: &Invocation) -> Result<()> {
        match inv.command {
            Command::CreateSoundboard => self.create_soundboard(inv).await,
            Command::DeleteServer => self.delete_server(inv).await,
            Command::ListServers => self.list_servers(inv).await,
            Command::AddAutorole => self.add_autorole(inv).await,
            Command::FixRoles => self.fix_roles(inv).await,
            Command::InitialiseDb => self.initialise_db(inv).await,
            Command::InviteMe => self.invite_me(inv).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip() {
        for command in Command::ALL {
            assert_eq!(Command::from_name(command.name()), Some(command));
        }
        assert_eq!(Command::from_name("make-coffee"), None);
    }

    #[test]
    fn autorole_choices_come_from_template() {
        let roles: BTreeSet<String> = ["DJ".to_string(), "Listener".to_string()].into();
        let defs = definitions(&roles);
        assert_eq!(defs.len(), Command::ALL.len());
        let autorole = defs
            .iter()
            .find(|d| d["name"] == "add-autorole")
            .unwrap();
        let choices = &autorole["options"][1]["choices"];
        assert_eq!(choices[0]["value"], "DJ");
        assert_eq!(choices[1]["value"], "Listener");
    }

    #[test]
    fn initialise_db_has_two_subcommands() {
        let defs = definitions(&BTreeSet::new());
        let init = defs.iter().find(|d| d["name"] == "initialise-db").unwrap();
        let names: Vec<&str> = init["options"]
            .as_array()
            .unwrap()
            .iter()
            .map(|o| o["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, [SUBCOMMAND_ALL, SUBCOMMAND_CURRENT]);
    }
}
