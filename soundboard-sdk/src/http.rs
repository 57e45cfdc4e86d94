//! REST implementation of [`Platform`].

use async_trait::async_trait;
use reqwest::Method;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

use crate::model::{
    Application, ApplicationId, ChannelId, CurrentUser, Guild, GuildId, GuildTemplate,
    Interaction, Invite, Member, Message, MessageId, RoleId, RolePosition, UserGuild, UserId,
};
use crate::platform::{Platform, PlatformError, Result};

const API_BASE: &str = "https://discord.com/api/v10";

/// Interaction callback type for "deferred channel message with source".
const DEFERRED_CHANNEL_MESSAGE: u8 = 5;
/// Message flag marking a reply as visible only to the invoking user.
const EPHEMERAL: u64 = 1 << 6;

/// Error body returned by the platform on non-2xx responses.
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    code: Option<u64>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TemplateBody {
    code: String,
    name: String,
    serialized_source_guild: TemplateGuild,
}

#[derive(Debug, Deserialize)]
struct TemplateGuild {
    #[serde(default)]
    roles: Vec<TemplateRole>,
}

#[derive(Debug, Deserialize)]
struct TemplateRole {
    name: String,
}

#[derive(Debug, Deserialize)]
struct IdBody<T> {
    id: T,
}

/// Bot-token authenticated REST client.
pub struct RestClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl RestClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: API_BASE.to_string(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, base: &str) -> Self {
        self.base = base.trim_end_matches('/').to_string();
        self
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Response> {
        let mut req = self
            .http
            .request(method.clone(), format!("{}{path}", self.base))
            .header("Authorization", format!("Bot {}", self.token));
        if let Some(body) = body {
            req = req.json(body);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let text = resp.text().await.unwrap_or_default();
        let parsed: Option<ApiErrorBody> = serde_json::from_str(&text).ok();
        tracing::debug!(%method, path, %status, body = %text, "platform call failed");
        Err(PlatformError::Api {
            status: status.as_u16(),
            code: parsed.as_ref().and_then(|b| b.code),
            message: parsed.and_then(|b| b.message).unwrap_or(text),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let bytes = self.send(method, path, body).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| PlatformError::Decode(e.to_string()))
    }

    async fn call_empty(&self, method: Method, path: &str, body: Option<&Value>) -> Result<()> {
        self.send(method, path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl Platform for RestClient {
    async fn current_user(&self) -> Result<CurrentUser> {
        self.call(Method::GET, "/users/@me", None).await
    }

    async fn application(&self) -> Result<Application> {
        self.call(Method::GET, "/oauth2/applications/@me", None).await
    }

    async fn guild_template(&self, code: &str) -> Result<GuildTemplate> {
        let body: TemplateBody = self
            .call(Method::GET, &format!("/guilds/templates/{code}"), None)
            .await?;
        Ok(GuildTemplate {
            code: body.code,
            name: body.name,
            role_names: body
                .serialized_source_guild
                .roles
                .into_iter()
                .map(|r| r.name)
                .collect(),
        })
    }

    async fn create_guild_from_template(&self, code: &str, name: &str) -> Result<Guild> {
        self.call(
            Method::POST,
            &format!("/guilds/templates/{code}"),
            Some(&json!({ "name": name })),
        )
        .await
    }

    async fn create_invite(&self, channel: ChannelId) -> Result<Invite> {
        self.call(
            Method::POST,
            &format!("/channels/{channel}/invites"),
            Some(&json!({})),
        )
        .await
    }

    async fn create_dm(&self, user: UserId) -> Result<ChannelId> {
        let channel: IdBody<ChannelId> = self
            .call(
                Method::POST,
                "/users/@me/channels",
                Some(&json!({ "recipient_id": user })),
            )
            .await?;
        Ok(channel.id)
    }

    async fn send_message(&self, channel: ChannelId, content: &str) -> Result<Message> {
        self.call(
            Method::POST,
            &format!("/channels/{channel}/messages"),
            Some(&json!({ "content": content })),
        )
        .await
    }

    async fn delete_message(&self, channel: ChannelId, message: MessageId) -> Result<()> {
        self.call_empty(
            Method::DELETE,
            &format!("/channels/{channel}/messages/{message}"),
            None,
        )
        .await
    }

    async fn add_member_role(&self, guild: GuildId, user: UserId, role: RoleId) -> Result<()> {
        self.call_empty(
            Method::PUT,
            &format!("/guilds/{guild}/members/{user}/roles/{role}"),
            None,
        )
        .await
    }

    async fn set_guild_owner(&self, guild: GuildId, owner: UserId) -> Result<()> {
        self.call_empty(
            Method::PATCH,
            &format!("/guilds/{guild}"),
            Some(&json!({ "owner_id": owner })),
        )
        .await
    }

    async fn reorder_roles(&self, guild: GuildId, positions: &[RolePosition]) -> Result<()> {
        let body = serde_json::to_value(positions).map_err(|e| PlatformError::Decode(e.to_string()))?;
        self.call_empty(Method::PATCH, &format!("/guilds/{guild}/roles"), Some(&body))
            .await
    }

    async fn leave_guild(&self, guild: GuildId) -> Result<()> {
        self.call_empty(Method::DELETE, &format!("/users/@me/guilds/{guild}"), None)
            .await
    }

    async fn delete_guild(&self, guild: GuildId) -> Result<()> {
        self.call_empty(Method::DELETE, &format!("/guilds/{guild}"), None)
            .await
    }

    async fn guild_member(&self, guild: GuildId, user: UserId) -> Result<Member> {
        self.call(Method::GET, &format!("/guilds/{guild}/members/{user}"), None)
            .await
    }

    async fn guild(&self, guild: GuildId) -> Result<Guild> {
        self.call(Method::GET, &format!("/guilds/{guild}"), None).await
    }

    async fn user_guilds(&self, after: Option<GuildId>, limit: u16) -> Result<Vec<UserGuild>> {
        let path = match after {
            Some(after) => format!("/users/@me/guilds?limit={limit}&after={after}"),
            None => format!("/users/@me/guilds?limit={limit}"),
        };
        self.call(Method::GET, &path, None).await
    }

    async fn register_commands(
        &self,
        application: ApplicationId,
        commands: &[serde_json::Value],
    ) -> Result<()> {
        self.call_empty(
            Method::PUT,
            &format!("/applications/{application}/commands"),
            Some(&Value::Array(commands.to_vec())),
        )
        .await
    }

    async fn defer_reply(&self, interaction: &Interaction) -> Result<()> {
        self.call_empty(
            Method::POST,
            &format!("/interactions/{}/{}/callback", interaction.id, interaction.token),
            Some(&json!({
                "type": DEFERRED_CHANNEL_MESSAGE,
                "data": { "flags": EPHEMERAL },
            })),
        )
        .await
    }

    async fn create_followup(&self, interaction: &Interaction, content: &str) -> Result<Message> {
        self.call(
            Method::POST,
            &format!("/webhooks/{}/{}", interaction.application_id, interaction.token),
            Some(&json!({ "content": content, "flags": EPHEMERAL })),
        )
        .await
    }

    async fn edit_followup(
        &self,
        interaction: &Interaction,
        message: MessageId,
        content: &str,
    ) -> Result<()> {
        self.call_empty(
            Method::PATCH,
            &format!(
                "/webhooks/{}/{}/messages/{message}",
                interaction.application_id, interaction.token
            ),
            Some(&json!({ "content": content })),
        )
        .await
    }
}
