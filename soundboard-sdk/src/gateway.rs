//! Gateway session for one bot identity.
//!
//! The session itself is run by serenity's client; this module only
//! translates the handful of dispatches the bots care about into [`Event`]s
//! on a bounded channel, the same shape the REST side of the SDK uses.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use serenity::all::{
    Client, CommandDataOption, CommandDataOptionValue, CommandInteraction, Context,
    EventHandler, GatewayIntents, Guild as GatewayGuild, Interaction as GatewayInteraction,
    Member as GatewayMember, Ready, ShardManager,
};
use tokio::sync::mpsc;

use crate::event::Event;
use crate::model::{
    ApplicationId, ChannelId, CommandOption, Guild, GuildId, Interaction, InteractionId,
    OptionValue, Role, RoleId, User, UserId,
};

const EVENT_BUFFER: usize = 256;

/// Handle to a running gateway session.
#[derive(Clone)]
pub struct GatewayHandle {
    shards: Arc<ShardManager>,
}

impl GatewayHandle {
    pub async fn shutdown(&self) {
        self.shards.shutdown_all().await;
    }
}

/// Start a gateway session and return its event stream.
///
/// The stream ends with [`Event::Disconnected`] once the session stops.
pub async fn connect(token: &str) -> Result<(GatewayHandle, mpsc::Receiver<Event>)> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let intents = GatewayIntents::GUILDS | GatewayIntents::GUILD_MEMBERS;
    let mut client = Client::builder(token, intents)
        .event_handler(Forwarder { tx: tx.clone() })
        .await
        .context("Failed to build gateway client")?;
    let handle = GatewayHandle {
        shards: client.shard_manager.clone(),
    };

    tokio::spawn(async move {
        let reason = match client.start().await {
            Ok(()) => "session closed".to_string(),
            Err(e) => e.to_string(),
        };
        tracing::warn!(%reason, "gateway session ended");
        let _ = tx.send(Event::Disconnected { reason }).await;
    });

    Ok((handle, rx))
}

struct Forwarder {
    tx: mpsc::Sender<Event>,
}

impl Forwarder {
    async fn forward(&self, event: Event) {
        if self.tx.send(event).await.is_err() {
            tracing::debug!("event receiver dropped");
        }
    }
}

#[serenity::async_trait]
impl EventHandler for Forwarder {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let user = User {
            id: UserId::new(ready.user.id.get()),
            username: ready.user.name.clone(),
        };
        self.forward(Event::Ready { user }).await;
    }

    async fn guild_create(&self, _ctx: Context, guild: GatewayGuild, _is_new: Option<bool>) {
        self.forward(Event::GuildCreated {
            guild: convert_guild(&guild),
        })
        .await;
    }

    async fn guild_member_addition(&self, _ctx: Context, member: GatewayMember) {
        self.forward(Event::MemberJoined {
            guild_id: GuildId::new(member.guild_id.get()),
            user: User {
                id: UserId::new(member.user.id.get()),
                username: member.user.name.clone(),
            },
            roles: member.roles.iter().map(|r| RoleId::new(r.get())).collect(),
        })
        .await;
    }

    async fn interaction_create(&self, _ctx: Context, interaction: GatewayInteraction) {
        if let GatewayInteraction::Command(command) = interaction {
            self.forward(Event::Command(convert_command(&command))).await;
        }
    }
}

fn convert_guild(guild: &GatewayGuild) -> Guild {
    let mut roles: Vec<Role> = guild
        .roles
        .values()
        .map(|r| Role {
            id: RoleId::new(r.id.get()),
            name: r.name.clone(),
            position: i64::from(r.position),
        })
        .collect();
    roles.sort_by_key(|r| (r.position, r.id));
    Guild {
        id: GuildId::new(guild.id.get()),
        name: guild.name.clone(),
        owner_id: UserId::new(guild.owner_id.get()),
        roles,
        system_channel_id: guild.system_channel_id.map(|c| ChannelId::new(c.get())),
    }
}

fn convert_command(command: &CommandInteraction) -> Interaction {
    Interaction {
        id: InteractionId::new(command.id.get()),
        application_id: ApplicationId::new(command.application_id.get()),
        token: command.token.clone(),
        guild_id: command.guild_id.map(|g| GuildId::new(g.get())),
        user: User {
            id: UserId::new(command.user.id.get()),
            username: command.user.name.clone(),
        },
        command: command.data.name.clone(),
        options: convert_options(&command.data.options),
    }
}

fn convert_options(options: &[CommandDataOption]) -> Vec<CommandOption> {
    options
        .iter()
        .filter_map(|option| {
            let value = match &option.value {
                CommandDataOptionValue::Integer(n) => OptionValue::Integer(*n),
                CommandDataOptionValue::String(s) => OptionValue::String(s.clone()),
                CommandDataOptionValue::Role(r) => OptionValue::Role(RoleId::new(r.get())),
                CommandDataOptionValue::SubCommand(nested) => {
                    OptionValue::SubCommand(convert_options(nested))
                }
                other => {
                    tracing::debug!(option = %option.name, ?other, "ignoring unsupported option type");
                    return None;
                }
            };
            Some(CommandOption {
                name: option.name.clone(),
                value,
            })
        })
        .collect()
}
