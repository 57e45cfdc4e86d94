//! In-memory platform for tests.
//!
//! A [`FakeWorld`] holds guilds, members and templates shared by any number
//! of bot identities. Each [`FakePlatform`] acts as one identity and records
//! every call it makes, so tests can assert on side effects.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::event::Event;
use crate::model::{
    Application, ApplicationId, ChannelId, CurrentUser, Guild, GuildId, GuildTemplate,
    Interaction, Invite, Member, Message, MessageId, Role, RoleId, RolePosition, User, UserGuild, UserId,
};
use crate::platform::{Platform, PlatformError, Result, UNKNOWN_MEMBER};

const UNKNOWN_GUILD: u64 = 10004;
const MISSING_ACCESS: u64 = 50001;

/// An outbound call made by one identity.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    CreateGuild { name: String },
    CreateInvite { channel: ChannelId },
    CreateDm { user: UserId },
    SendMessage { channel: ChannelId, content: String },
    DeleteMessage { channel: ChannelId, message: MessageId },
    AddMemberRole { guild: GuildId, user: UserId, role: RoleId },
    SetGuildOwner { guild: GuildId, owner: UserId },
    ReorderRoles { guild: GuildId, positions: Vec<RolePosition> },
    LeaveGuild { guild: GuildId },
    DeleteGuild { guild: GuildId },
    RegisterCommands { count: usize },
    DeferReply,
    CreateFollowup { content: String },
    EditFollowup { message: MessageId, content: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recorded {
    pub actor: UserId,
    pub call: Call,
}

/// A canned failure for one operation, keyed by the trait method name.
#[derive(Debug, Clone)]
pub enum Failure {
    Api { code: u64, message: String },
    /// Apply the operation, then report an undecodable response.
    Decode,
}

impl Failure {
    fn to_error(&self) -> PlatformError {
        match self {
            Failure::Api { code, message } => PlatformError::Api {
                status: 400,
                code: Some(*code),
                message: message.clone(),
            },
            Failure::Decode => PlatformError::Decode("EOF while parsing a value".into()),
        }
    }
}

struct FakeGuild {
    guild: Guild,
    members: BTreeMap<UserId, Member>,
}

#[derive(Default)]
struct WorldState {
    next_id: u64,
    users: HashMap<UserId, User>,
    applications: HashMap<UserId, String>,
    templates: HashMap<String, Vec<String>>,
    guilds: BTreeMap<GuildId, FakeGuild>,
    failures: HashMap<&'static str, Failure>,
    calls: Vec<Recorded>,
}

impl WorldState {
    fn id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn application_name(&self, bot: &User) -> String {
        self.applications
            .get(&bot.id)
            .cloned()
            .unwrap_or_else(|| bot.username.clone())
    }

    fn guild_mut(&mut self, id: GuildId) -> Result<&mut FakeGuild> {
        self.guilds.get_mut(&id).ok_or_else(|| api(404, UNKNOWN_GUILD, "Unknown Guild"))
    }
}

fn api(status: u16, code: u64, message: &str) -> PlatformError {
    PlatformError::Api {
        status,
        code: Some(code),
        message: message.to_string(),
    }
}

/// Shared state behind every fake identity.
#[derive(Default)]
pub struct FakeWorld {
    state: Mutex<WorldState>,
}

impl FakeWorld {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_user(&self, username: &str) -> User {
        let mut state = self.state.lock();
        let user = User {
            id: UserId::new(state.id()),
            username: username.to_string(),
        };
        state.users.insert(user.id, user.clone());
        user
    }

    /// Name the application behind `bot`. Defaults to the bot's username.
    pub fn set_application_name(&self, bot: &User, name: &str) {
        self.state.lock().applications.insert(bot.id, name.to_string());
    }

    pub fn add_template(&self, code: &str, role_names: &[&str]) {
        self.state.lock().templates.insert(
            code.to_string(),
            role_names.iter().map(|r| r.to_string()).collect(),
        );
    }

    /// Create a guild owned by `owner` with `role_names` stacked above
    /// `@everyone` in the order given.
    pub fn add_guild(&self, name: &str, owner: &User, role_names: &[&str]) -> Guild {
        let mut state = self.state.lock();
        let guild = new_guild(&mut state, name, owner.id, role_names);
        let members = BTreeMap::from([(owner.id, Member { user: owner.clone(), roles: vec![] })]);
        state.guilds.insert(guild.id, FakeGuild { guild: guild.clone(), members });
        guild
    }

    pub fn add_member(&self, guild: GuildId, user: &User, roles: &[RoleId]) {
        let mut state = self.state.lock();
        if let Some(g) = state.guilds.get_mut(&guild) {
            g.members.insert(user.id, Member { user: user.clone(), roles: roles.to_vec() });
        }
    }

    /// `user` accepts an invite: adds the member and returns the event the
    /// joined guild's bots would observe.
    pub fn join(&self, guild: GuildId, user: &User) -> Event {
        self.add_member(guild, user, &[]);
        Event::MemberJoined {
            guild_id: guild,
            user: user.clone(),
            roles: vec![],
        }
    }

    /// A bot identity is authorised into `guild`: it becomes a member with a
    /// managed role named after its application, and the event it would
    /// observe is returned.
    pub fn bot_joins(&self, guild: GuildId, bot: &User) -> Option<Event> {
        let mut state = self.state.lock();
        let name = state.application_name(bot);
        let role = Role {
            id: RoleId::new(state.id()),
            name,
            position: 1,
        };
        let g = state.guilds.get_mut(&guild)?;
        g.guild.roles.push(role.clone());
        g.members.insert(bot.id, Member { user: bot.clone(), roles: vec![role.id] });
        Some(Event::GuildCreated { guild: g.guild.clone() })
    }

    pub fn guild(&self, id: GuildId) -> Option<Guild> {
        self.state.lock().guilds.get(&id).map(|g| g.guild.clone())
    }

    /// Every guild currently owned by `owner`.
    pub fn guilds_owned_by(&self, owner: UserId) -> Vec<Guild> {
        self.state
            .lock()
            .guilds
            .values()
            .filter(|g| g.guild.owner_id == owner)
            .map(|g| g.guild.clone())
            .collect()
    }

    pub fn is_member(&self, guild: GuildId, user: UserId) -> bool {
        self.state
            .lock()
            .guilds
            .get(&guild)
            .is_some_and(|g| g.members.contains_key(&user))
    }

    pub fn member_roles(&self, guild: GuildId, user: UserId) -> Vec<RoleId> {
        self.state
            .lock()
            .guilds
            .get(&guild)
            .and_then(|g| g.members.get(&user))
            .map(|m| m.roles.clone())
            .unwrap_or_default()
    }

    /// Make every later call of `operation` fail.
    pub fn fail(&self, operation: &'static str, failure: Failure) {
        self.state.lock().failures.insert(operation, failure);
    }

    pub fn calls(&self) -> Vec<Recorded> {
        self.state.lock().calls.clone()
    }

    /// Calls made by `actor`, in order.
    pub fn calls_by(&self, actor: UserId) -> Vec<Call> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|r| r.actor == actor)
            .map(|r| r.call.clone())
            .collect()
    }

    /// Content of the most recent follow-up created or edited by anyone.
    pub fn last_followup(&self) -> Option<String> {
        self.state.lock().calls.iter().rev().find_map(|r| match &r.call {
            Call::CreateFollowup { content } | Call::EditFollowup { content, .. } => {
                Some(content.clone())
            }
            _ => None,
        })
    }

    pub fn platform(self: &Arc<Self>, identity: &User) -> FakePlatform {
        FakePlatform {
            world: Arc::clone(self),
            me: identity.clone(),
        }
    }
}

fn new_guild(state: &mut WorldState, name: &str, owner: UserId, role_names: &[&str]) -> Guild {
    let id = GuildId::new(state.id());
    let mut roles = vec![Role {
        id: RoleId::new(state.id()),
        name: "@everyone".to_string(),
        position: 0,
    }];
    for (i, role_name) in role_names.iter().filter(|n| **n != "@everyone").enumerate() {
        roles.push(Role {
            id: RoleId::new(state.id()),
            name: role_name.to_string(),
            position: i as i64 + 1,
        });
    }
    Guild {
        id,
        name: name.to_string(),
        owner_id: owner,
        roles,
        system_channel_id: Some(ChannelId::new(state.id())),
    }
}

/// One bot identity acting on a [`FakeWorld`].
pub struct FakePlatform {
    world: Arc<FakeWorld>,
    me: User,
}

impl FakePlatform {
    fn begin(&self, operation: &'static str) -> Result<parking_lot::MutexGuard<'_, WorldState>> {
        let state = self.world.state.lock();
        if let Some(f @ Failure::Api { .. }) = state.failures.get(operation) {
            return Err(f.to_error());
        }
        Ok(state)
    }

    fn decode_failure(state: &WorldState, operation: &'static str) -> Result<()> {
        match state.failures.get(operation) {
            Some(f @ Failure::Decode) => Err(f.to_error()),
            _ => Ok(()),
        }
    }

    fn record(&self, state: &mut WorldState, call: Call) {
        state.calls.push(Recorded { actor: self.me.id, call });
    }
}

#[async_trait]
impl Platform for FakePlatform {
    async fn current_user(&self) -> Result<CurrentUser> {
        Ok(self.me.clone())
    }

    async fn application(&self) -> Result<Application> {
        let state = self.world.state.lock();
        Ok(Application {
            id: ApplicationId::new(self.me.id.get()),
            name: state.application_name(&self.me),
        })
    }

    async fn guild_template(&self, code: &str) -> Result<GuildTemplate> {
        let state = self.begin("guild_template")?;
        let roles = state
            .templates
            .get(code)
            .ok_or_else(|| api(404, 10057, "Unknown Guild Template"))?;
        Ok(GuildTemplate {
            code: code.to_string(),
            name: code.to_string(),
            role_names: roles.clone(),
        })
    }

    async fn create_guild_from_template(&self, code: &str, name: &str) -> Result<Guild> {
        let mut state = self.begin("create_guild_from_template")?;
        let roles = state
            .templates
            .get(code)
            .cloned()
            .ok_or_else(|| api(404, 10057, "Unknown Guild Template"))?;
        let role_refs: Vec<&str> = roles.iter().map(String::as_str).collect();
        let guild = new_guild(&mut state, name, self.me.id, &role_refs);
        let members = BTreeMap::from([(self.me.id, Member { user: self.me.clone(), roles: vec![] })]);
        state.guilds.insert(guild.id, FakeGuild { guild: guild.clone(), members });
        self.record(&mut state, Call::CreateGuild { name: name.to_string() });
        Ok(guild)
    }

    async fn create_invite(&self, channel: ChannelId) -> Result<Invite> {
        let mut state = self.begin("create_invite")?;
        let code = format!("invite{}", state.id());
        self.record(&mut state, Call::CreateInvite { channel });
        Ok(Invite { code, expires_at: None })
    }

    async fn create_dm(&self, user: UserId) -> Result<ChannelId> {
        let mut state = self.begin("create_dm")?;
        let channel = ChannelId::new(state.id());
        self.record(&mut state, Call::CreateDm { user });
        Ok(channel)
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<Message> {
        let mut state = self.begin("send_message")?;
        let id = MessageId::new(state.id());
        self.record(&mut state, Call::SendMessage { channel, content: content.to_string() });
        Ok(Message { id, channel_id: channel })
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        let mut state = self.begin("delete_message")?;
        self.record(&mut state, Call::DeleteMessage { channel, message });
        Ok(())
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        let mut state = self.begin("add_member_role")?;
        let member = state
            .guild_mut(guild)?
            .members
            .get_mut(&user)
            .ok_or_else(|| api(404, UNKNOWN_MEMBER, "Unknown Member"))?;
        if !member.roles.contains(&role) {
            member.roles.push(role);
        }
        self.record(&mut state, Call::AddMemberRole { guild, user, role });
        Ok(())
    }

    async fn set_guild_owner(&self, guild: GuildId, owner: UserId) -> Result<()> {
        let mut state = self.begin("set_guild_owner")?;
        let me = self.me.id;
        let g = state.guild_mut(guild)?;
        if g.guild.owner_id != me {
            return Err(api(403, MISSING_ACCESS, "Missing Access"));
        }
        g.guild.owner_id = owner;
        self.record(&mut state, Call::SetGuildOwner { guild, owner });
        Ok(())
    }

    async fn reorder_roles(&self, guild: GuildId, positions: &[RolePosition]) -> Result<()> {
        let mut state = self.begin("reorder_roles")?;
        let g = state.guild_mut(guild)?;
        for p in positions {
            if let Some(role) = g.guild.roles.iter_mut().find(|r| r.id == p.id) {
                role.position = p.position;
            }
        }
        self.record(&mut state, Call::ReorderRoles { guild, positions: positions.to_vec() });
        Ok(())
    }

    async fn leave_guild(&self, guild: GuildId) -> Result<()> {
        let mut state = self.begin("leave_guild")?;
        let me = self.me.id;
        state.guild_mut(guild)?.members.remove(&me);
        self.record(&mut state, Call::LeaveGuild { guild });
        Ok(())
    }

    async fn delete_guild(&self, guild: GuildId) -> Result<()> {
        let mut state = self.begin("delete_guild")?;
        if state.guild_mut(guild)?.guild.owner_id != self.me.id {
            return Err(api(403, MISSING_ACCESS, "Missing Access"));
        }
        state.guilds.remove(&guild);
        self.record(&mut state, Call::DeleteGuild { guild });
        Self::decode_failure(&state, "delete_guild")
    }

    async fn guild_member(&self, guild: GuildId, user: UserId) -> Result<Member> {
        let mut state = self.begin("guild_member")?;
        state
            .guild_mut(guild)?
            .members
            .get(&user)
            .cloned()
            .ok_or_else(|| api(404, UNKNOWN_MEMBER, "Unknown Member"))
    }

    async fn guild(&self, guild: GuildId) -> Result<Guild> {
        let mut state = self.begin("guild")?;
        let me = self.me.id;
        let g = state.guild_mut(guild)?;
        if !g.members.contains_key(&me) {
            return Err(api(404, UNKNOWN_GUILD, "Unknown Guild"));
        }
        Ok(g.guild.clone())
    }

    async fn user_guilds(&self, after: Option<GuildId>, limit: u16) -> Result<Vec<UserGuild>> {
        let state = self.begin("user_guilds")?;
        Ok(state
            .guilds
            .values()
            .filter(|g| g.members.contains_key(&self.me.id))
            .filter(|g| after.is_none_or(|after| g.guild.id > after))
            .take(usize::from(limit))
            .map(|g| UserGuild {
                id: g.guild.id,
                name: g.guild.name.clone(),
                owner: g.guild.owner_id == self.me.id,
            })
            .collect())
    }

    async fn register_commands(
        &self,
        _application: ApplicationId,
        commands: &[serde_json::Value],
    ) -> Result<()> {
        let mut state = self.begin("register_commands")?;
        self.record(&mut state, Call::RegisterCommands { count: commands.len() });
        Ok(())
    }

    async fn defer_reply(&self, _interaction: &Interaction) -> Result<()> {
        let mut state = self.begin("defer_reply")?;
        self.record(&mut state, Call::DeferReply);
        Ok(())
    }

    async fn create_followup(&self, _interaction: &Interaction, content: &str) -> Result<Message> {
        let mut state = self.begin("create_followup")?;
        let id = MessageId::new(state.id());
        let channel_id = ChannelId::new(state.id());
        self.record(&mut state, Call::CreateFollowup { content: content.to_string() });
        Ok(Message { id, channel_id })
    }

    async fn edit_followup(
        &self,
        _interaction: &Interaction,
        message: MessageId,
        content: &str,
    ) -> Result<()> {
        let mut state = self.begin("edit_followup")?;
        self.record(&mut state, Call::EditFollowup { message, content: content.to_string() });
        Ok(())
    }
}
