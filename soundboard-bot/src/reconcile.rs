//! Role reconciliation.
//!
//! A user's roles in the main guilds decide which soundboard roles they
//! should hold. The mapping goes through the template role name: main role
//! → template role name (autorole rule) → guild-local role (role mapping).

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use soundboard_sdk::model::{GuildId, RoleId, UserId};
use soundboard_sdk::platform::Platform;

use crate::db::Db;
use crate::error::{BotError, Result};

/// Roles in `required` that `holder` lacks. Guild owners need nothing.
pub fn missing(
    required: &HashSet<RoleId>,
    held: &[RoleId],
    owner: UserId,
    holder: UserId,
) -> HashSet<RoleId> {
    if owner == holder {
        return HashSet::new();
    }
    required
        .iter()
        .filter(|r| !held.contains(r))
        .copied()
        .collect()
}

/// Looks up main-guild memberships through one identity (the one that sits
/// in the main guilds) and computes what is owed.
#[derive(Clone)]
pub struct Reconciler {
    platform: Arc<dyn Platform>,
    db: Arc<Db>,
}

impl Reconciler {
    pub fn new(platform: Arc<dyn Platform>, db: Arc<Db>) -> Self {
        Self { platform, db }
    }

    /// Every role `user` holds across the main guilds. Guilds the user is
    /// not in are skipped.
    pub async fn main_roles(&self, user: UserId) -> Result<HashSet<RoleId>> {
        let mut roles = HashSet::new();
        for guild in self.db.list_guilds()? {
            match self.platform.guild_member(guild, user).await {
                Ok(member) => roles.extend(member.roles),
                Err(e) => {
                    // Treat any lookup failure as "not a member here".
                    tracing::warn!(%guild, %user, error = %e, "failed to look up main guild membership");
                }
            }
        }
        Ok(roles)
    }

    /// Soundboard roles `user` is entitled to in `guild`.
    pub async fn required_roles(&self, user: UserId, guild: GuildId) -> Result<HashSet<RoleId>> {
        let main_roles = self.main_roles(user).await?;
        Ok(self.db.find_soundboard_roles(guild, &main_roles)?)
    }

    /// Soundboard roles `user` is entitled to in `guild` but does not hold.
    pub async fn missing_roles(&self, user: UserId, guild: GuildId) -> Result<HashSet<RoleId>> {
        let required = self.required_roles(user, guild).await?;
        self.missing_in(user, guild, &required).await
    }

    async fn missing_in(
        &self,
        user: UserId,
        guild: GuildId,
        required: &HashSet<RoleId>,
    ) -> Result<HashSet<RoleId>> {
        if required.is_empty() {
            return Ok(HashSet::new());
        }
        let owner = match self.platform.guild(guild).await {
            Ok(g) => g.owner_id,
            Err(e) => {
                tracing::warn!(%guild, error = %e, "failed to look up guild");
                return Ok(HashSet::new());
            }
        };
        let member = match self.platform.guild_member(guild, user).await {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(%guild, %user, error = %e, "failed to look up membership");
                return Ok(HashSet::new());
            }
        };
        Ok(missing(required, &member.roles, owner, user))
    }

    /// Grant every missing autorole to `user` across all soundboards.
    /// Returns what was granted, per guild.
    pub async fn fix_roles(&self, user: UserId) -> Result<BTreeMap<GuildId, BTreeSet<RoleId>>> {
        let main_roles = self.main_roles(user).await?;
        let required = self.db.find_all_soundboard_roles(&main_roles)?;
        let mut granted = BTreeMap::new();
        for (guild, roles) in required {
            let missing = self.missing_in(user, guild, &roles).await?;
            if missing.is_empty() {
                continue;
            }
            grant_roles(self.platform.as_ref(), user, guild, &missing).await?;
            granted.insert(guild, missing.into_iter().collect());
        }
        Ok(granted)
    }
}

/// Grant `roles` one at a time. The first failure stops the rest and names
/// the role and guild it failed on.
pub async fn grant_roles(
    platform: &dyn Platform,
    user: UserId,
    guild: GuildId,
    roles: &HashSet<RoleId>,
) -> Result<()> {
    let ordered: BTreeSet<RoleId> = roles.iter().copied().collect();
    for role in ordered {
        if let Err(source) = platform.add_member_role(guild, user, role).await {
            let looked_up = platform.guild(guild).await.ok();
            let role_name = looked_up
                .as_ref()
                .and_then(|g| g.role(role))
                .map(|r| r.name.clone())
                .unwrap_or_default();
            let guild_name = looked_up.map(|g| g.name).unwrap_or_default();
            return Err(BotError::RoleGrant {
                user,
                role,
                role_name,
                guild,
                guild_name,
                source,
            });
        }
        tracing::debug!(%guild, %user, %role, "granted autorole");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use soundboard_sdk::fake::{Call, Failure, FakeWorld};

    use super::*;

    struct Fixture {
        world: Arc<FakeWorld>,
        reconciler: Reconciler,
        db: Arc<Db>,
        manager: soundboard_sdk::model::User,
        user: soundboard_sdk::model::User,
        soundboard: soundboard_sdk::model::Guild,
    }

    /// Main guild roles A, B map to soundboard roles X ("DJ"), Y ("Listener").
    fn fixture() -> Fixture {
        let world = FakeWorld::new();
        let manager = world.add_user("manager");
        let user = world.add_user("alice");
        let main = world.add_guild("main", &manager, &["A", "B"]);
        let a = main.role_named("A").unwrap().id;
        let b = main.role_named("B").unwrap().id;
        world.add_member(main.id, &user, &[a, b]);

        let soundboard = world.add_guild("soundboardhost", &manager, &["DJ", "Listener"]);
        let x = soundboard.role_named("DJ").unwrap().id;
        let y = soundboard.role_named("Listener").unwrap().id;

        let db = Arc::new(Db::open_memory().unwrap());
        db.insert_autorole(main.id, a, "DJ").unwrap();
        db.insert_autorole(main.id, b, "Listener").unwrap();
        db.upsert_soundboard(
            soundboard.id,
            &BTreeMap::from([("DJ".to_string(), x), ("Listener".to_string(), y)]),
        )
        .unwrap();

        let reconciler = Reconciler::new(Arc::new(world.platform(&manager)), Arc::clone(&db));
        Fixture { world, reconciler, db, manager, user, soundboard }
    }

    #[test]
    fn owners_are_exempt() {
        let required: HashSet<_> = [RoleId::new(1)].into();
        assert!(missing(&required, &[], UserId::new(9), UserId::new(9)).is_empty());
        assert_eq!(missing(&required, &[], UserId::new(8), UserId::new(9)), required);
    }

    #[tokio::test]
    async fn only_unheld_roles_are_missing() {
        let f = fixture();
        let x = f.soundboard.role_named("DJ").unwrap().id;
        let y = f.soundboard.role_named("Listener").unwrap().id;
        f.world.add_member(f.soundboard.id, &f.user, &[x]);

        let missing = f.reconciler.missing_roles(f.user.id, f.soundboard.id).await.unwrap();
        assert_eq!(missing, HashSet::from([y]));
    }

    #[tokio::test]
    async fn owner_is_missing_nothing() {
        let f = fixture();
        let owner = f.manager.clone();
        let main = f.db.list_guilds().unwrap().into_iter().next().unwrap();
        let a = f.world.guild(main).unwrap().role_named("A").unwrap().id;
        f.world.add_member(main, &owner, &[a]);

        let missing = f.reconciler.missing_roles(owner.id, f.soundboard.id).await.unwrap();
        assert!(missing.is_empty());
    }

    #[tokio::test]
    async fn absence_from_a_main_guild_is_not_fatal() {
        let f = fixture();
        let stranger = f.world.add_user("stranger");
        let roles = f.reconciler.main_roles(stranger.id).await.unwrap();
        assert!(roles.is_empty());
    }

    #[tokio::test]
    async fn fix_roles_grants_what_is_missing() {
        let f = fixture();
        let x = f.soundboard.role_named("DJ").unwrap().id;
        let y = f.soundboard.role_named("Listener").unwrap().id;
        f.world.add_member(f.soundboard.id, &f.user, &[x]);

        let granted = f.reconciler.fix_roles(f.user.id).await.unwrap();
        assert_eq!(granted[&f.soundboard.id], BTreeSet::from([y]));
        assert!(f.world.member_roles(f.soundboard.id, f.user.id).contains(&y));
        assert_eq!(
            f.world.calls_by(f.manager.id),
            vec![Call::AddMemberRole { guild: f.soundboard.id, user: f.user.id, role: y }]
        );
    }

    #[tokio::test]
    async fn first_grant_failure_names_role_and_guild() {
        let f = fixture();
        f.world.add_member(f.soundboard.id, &f.user, &[]);
        f.world.fail("add_member_role", Failure::Api { code: 50013, message: "Missing Permissions".into() });

        let err = f.reconciler.fix_roles(f.user.id).await.unwrap_err();
        match err {
            BotError::RoleGrant { guild, guild_name, role_name, .. } => {
                assert_eq!(guild, f.soundboard.id);
                assert_eq!(guild_name, "soundboardhost");
                assert!(role_name == "DJ" || role_name == "Listener");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(f.world.calls_by(f.manager.id).is_empty(), "no grant went through");
    }
}
