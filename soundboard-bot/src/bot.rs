//! The bot pair and the state every command shares.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use soundboard_sdk::model::{ApplicationId, User, UserId};
use soundboard_sdk::platform::Platform;

use crate::commands;
use crate::db::Db;
use crate::error::{BotError, PlatformContext, Result};
use crate::reconcile::Reconciler;
use crate::registry::Grants;

/// How long a single command invocation may take, grant waits included.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// One bot identity: how to reach the platform as it, and who it is.
#[derive(Clone)]
pub struct Actor {
    pub platform: Arc<dyn Platform>,
    pub user: User,
    pub application_id: ApplicationId,
    /// Name of the application, which is also the name of the role the
    /// platform gives this identity in every guild it joins.
    pub application_name: String,
}

impl Actor {
    /// Ask the platform who is behind `platform`'s token.
    pub async fn resolve(platform: Arc<dyn Platform>) -> Result<Self> {
        let user = platform.current_user().await.context("look up bot user")?;
        let application = platform
            .application()
            .await
            .with_context(|| format!("look up application of {user}"))?;
        Ok(Self {
            platform,
            user,
            application_id: application.id,
            application_name: application.name,
        })
    }

    pub fn id(&self) -> UserId {
        self.user.id
    }

    pub fn name(&self) -> &str {
        &self.user.username
    }
}

/// Bot configuration.
#[derive(Debug, Clone)]
pub struct BotConfig {
    /// Usernames allowed to run administrative commands.
    pub admins: HashSet<String>,
    /// Code of the template soundboards are cloned from.
    pub template: String,
    /// Hand new soundboards straight to the user from the creator, without
    /// the manager identity.
    pub single_identity: bool,
    pub command_timeout: Duration,
}

impl BotConfig {
    pub fn new(admins: impl IntoIterator<Item = String>, template: impl Into<String>) -> Self {
        Self {
            admins: admins.into_iter().collect(),
            template: template.into(),
            single_identity: false,
            command_timeout: COMMAND_TIMEOUT,
        }
    }
}

/// Command side of the bot pair.
///
/// The creator identity clones and hands off soundboards; the manager
/// identity hosts the commands, sits in the main guilds and stays in every
/// soundboard afterwards.
pub struct Bot {
    pub(crate) config: BotConfig,
    pub(crate) creator: Actor,
    pub(crate) manager: Actor,
    pub(crate) db: Arc<Db>,
    pub(crate) grants: Arc<Grants>,
    pub(crate) reconciler: Reconciler,
    /// Role names of the template, `@everyone` excluded.
    pub(crate) template_roles: BTreeSet<String>,
}

impl Bot {
    /// Load the template's role names and assemble the bot.
    pub async fn new(
        config: BotConfig,
        creator: Actor,
        manager: Actor,
        db: Arc<Db>,
        grants: Arc<Grants>,
    ) -> Result<Self> {
        let template = manager
            .platform
            .guild_template(&config.template)
            .await
            .with_context(|| format!("load template {:?}", config.template))?;
        let template_roles = template
            .role_names
            .into_iter()
            .filter(|name| name != "@everyone")
            .collect();
        let reconciler = Reconciler::new(Arc::clone(&manager.platform), Arc::clone(&db));
        Ok(Self {
            config,
            creator,
            manager,
            db,
            grants,
            reconciler,
            template_roles,
        })
    }

    pub fn template_roles(&self) -> &BTreeSet<String> {
        &self.template_roles
    }

    /// Register the command set with the manager's application.
    pub async fn register_commands(&self) -> Result<()> {
        let definitions = commands::definitions(&self.template_roles);
        self.manager
            .platform
            .register_commands(self.manager.application_id, &definitions)
            .await
            .context("register application commands")?;
        tracing::info!(count = definitions.len(), "registered application commands");
        Ok(())
    }

    pub(crate) fn authorize(&self, user: &User, command: &str) -> Result<()> {
        if self.config.admins.contains(&user.username) {
            return Ok(());
        }
        Err(BotError::PermissionDenied {
            user: user.username.clone(),
            command: command.to_string(),
        })
    }
}
