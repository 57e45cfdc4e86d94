//! SQLite persistence layer.
//!
//! Stores which guilds are "main" guilds (sources of autoroles), the
//! autorole rules themselves, and for every soundboard the guild-local id of
//! each template role it realises.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, Result as SqlResult, params, params_from_iter};
use soundboard_sdk::model::{GuildId, RoleId};

/// Database handle wrapping a SQLite connection.
pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> SqlResult<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open(path)?),
        };
        db.init()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> SqlResult<Self> {
        let db = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        db.init()?;
        Ok(db)
    }

    fn init(&self) -> SqlResult<()> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS Guilds (
                GuildID TEXT NOT NULL,
                PRIMARY KEY (GuildID)
            ) STRICT;

            CREATE TABLE IF NOT EXISTS AutoRoles (
                GuildID          TEXT NOT NULL,
                RoleID           TEXT NOT NULL,
                TemplateRoleName TEXT NOT NULL,
                PRIMARY KEY (GuildID, RoleID, TemplateRoleName),
                FOREIGN KEY (GuildID) REFERENCES Guilds ON DELETE CASCADE
            ) STRICT;

            CREATE TABLE IF NOT EXISTS Soundboards (
                GuildID TEXT NOT NULL,
                PRIMARY KEY (GuildID)
            ) STRICT;

            CREATE TABLE IF NOT EXISTS SoundboardRoles (
                GuildID          TEXT NOT NULL,
                TemplateRoleName TEXT NOT NULL,
                RoleID           TEXT NOT NULL,
                PRIMARY KEY (GuildID, TemplateRoleName, RoleID),
                FOREIGN KEY (GuildID) REFERENCES Soundboards ON DELETE CASCADE
            ) STRICT;
            ",
        )?;
        Ok(())
    }

    /// Record a soundboard and the guild-local id of each template role it
    /// realises, replacing any previous mapping.
    pub fn upsert_soundboard(
        &self,
        guild: GuildId,
        roles: &BTreeMap<String, RoleId>,
    ) -> SqlResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO Soundboards (GuildID) VALUES (?1)",
            params![guild.to_string()],
        )?;
        tx.execute(
            "DELETE FROM SoundboardRoles WHERE GuildID = ?1",
            params![guild.to_string()],
        )?;
        for (name, role) in roles {
            tx.execute(
                "INSERT OR REPLACE INTO SoundboardRoles (GuildID, TemplateRoleName, RoleID)
                 VALUES (?1, ?2, ?3)",
                params![guild.to_string(), name, role.to_string()],
            )?;
        }
        tx.commit()
    }

    pub fn delete_soundboard(&self, guild: GuildId) -> SqlResult<()> {
        self.conn.lock().execute(
            "DELETE FROM Soundboards WHERE GuildID = ?1",
            params![guild.to_string()],
        )?;
        Ok(())
    }

    /// Main guilds: every guild that has at least one autorole rule.
    pub fn list_guilds(&self) -> SqlResult<HashSet<GuildId>> {
        self.list_ids("SELECT GuildID FROM Guilds")
    }

    pub fn list_soundboards(&self) -> SqlResult<HashSet<GuildId>> {
        self.list_ids("SELECT GuildID FROM Soundboards")
    }

    fn list_ids(&self, sql: &str) -> SqlResult<HashSet<GuildId>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(sql)?;
        let ids = stmt
            .query_map([], |row| snowflake(row, 0))?
            .collect::<SqlResult<HashSet<_>>>()?;
        Ok(ids)
    }

    /// Members holding `role` in main guild `guild` should hold the
    /// soundboard role called `template_role_name` everywhere.
    pub fn insert_autorole(
        &self,
        guild: GuildId,
        role: RoleId,
        template_role_name: &str,
    ) -> SqlResult<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO Guilds (GuildID) VALUES (?1)",
            params![guild.to_string()],
        )?;
        tx.execute(
            "INSERT OR IGNORE INTO AutoRoles (GuildID, RoleID, TemplateRoleName)
             VALUES (?1, ?2, ?3)",
            params![guild.to_string(), role.to_string(), template_role_name],
        )?;
        tx.commit()
    }

    /// Soundboard roles in `guild` that any of `main_roles` entitles to.
    pub fn find_soundboard_roles(
        &self,
        guild: GuildId,
        main_roles: &HashSet<RoleId>,
    ) -> SqlResult<HashSet<RoleId>> {
        if main_roles.is_empty() {
            return Ok(HashSet::new());
        }
        let sql = format!(
            "SELECT s.RoleID
             FROM AutoRoles AS a
                 INNER JOIN SoundboardRoles AS s USING (TemplateRoleName)
             WHERE s.GuildID = ? AND a.RoleID IN ({})",
            placeholders(main_roles.len())
        );
        let args = std::iter::once(guild.to_string()).chain(main_roles.iter().map(|r| r.to_string()));
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let roles = stmt
            .query_map(params_from_iter(args), |row| snowflake(row, 0))?
            .collect::<SqlResult<HashSet<_>>>()?;
        Ok(roles)
    }

    /// Soundboard roles across every soundboard that any of `main_roles`
    /// entitles to, grouped by guild.
    pub fn find_all_soundboard_roles(
        &self,
        main_roles: &HashSet<RoleId>,
    ) -> SqlResult<HashMap<GuildId, HashSet<RoleId>>> {
        if main_roles.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT s.GuildID, s.RoleID
             FROM AutoRoles AS a
                 INNER JOIN SoundboardRoles AS s USING (TemplateRoleName)
             WHERE a.RoleID IN ({})",
            placeholders(main_roles.len())
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(main_roles.iter().map(|r| r.to_string())), |row| {
            Ok((snowflake::<GuildId>(row, 0)?, snowflake::<RoleId>(row, 1)?))
        })?;
        let mut out: HashMap<GuildId, HashSet<RoleId>> = HashMap::new();
        for row in rows {
            let (guild, role) = row?;
            out.entry(guild).or_default().insert(role);
        }
        Ok(out)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(",")
}

fn snowflake<T>(row: &rusqlite::Row<'_>, idx: usize) -> SqlResult<T>
where
    T: FromStr<Err = std::num::ParseIntError>,
{
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(pairs: &[(&str, u64)]) -> BTreeMap<String, RoleId> {
        pairs
            .iter()
            .map(|(n, id)| (n.to_string(), RoleId::new(*id)))
            .collect()
    }

    fn set(ids: &[u64]) -> HashSet<RoleId> {
        ids.iter().copied().map(RoleId::new).collect()
    }

    #[test]
    fn autoroles_join_soundboard_roles_by_template_name() {
        let db = Db::open_memory().unwrap();
        let main = GuildId::new(1);
        db.insert_autorole(main, RoleId::new(100), "DJ").unwrap();
        db.insert_autorole(main, RoleId::new(101), "Listener").unwrap();
        db.upsert_soundboard(GuildId::new(2), &roles(&[("DJ", 20), ("Listener", 21)])).unwrap();
        db.upsert_soundboard(GuildId::new(3), &roles(&[("DJ", 30)])).unwrap();

        let found = db.find_soundboard_roles(GuildId::new(2), &set(&[100])).unwrap();
        assert_eq!(found, set(&[20]));

        let all = db.find_all_soundboard_roles(&set(&[100, 101])).unwrap();
        assert_eq!(all[&GuildId::new(2)], set(&[20, 21]));
        assert_eq!(all[&GuildId::new(3)], set(&[30]));
    }

    #[test]
    fn empty_filters_find_nothing() {
        let db = Db::open_memory().unwrap();
        db.insert_autorole(GuildId::new(1), RoleId::new(100), "DJ").unwrap();
        db.upsert_soundboard(GuildId::new(2), &roles(&[("DJ", 20)])).unwrap();
        assert!(db.find_soundboard_roles(GuildId::new(2), &HashSet::new()).unwrap().is_empty());
        assert!(db.find_all_soundboard_roles(&HashSet::new()).unwrap().is_empty());
    }

    #[test]
    fn deleting_a_soundboard_cascades_to_its_roles() {
        let db = Db::open_memory().unwrap();
        db.insert_autorole(GuildId::new(1), RoleId::new(100), "DJ").unwrap();
        db.upsert_soundboard(GuildId::new(2), &roles(&[("DJ", 20)])).unwrap();
        db.delete_soundboard(GuildId::new(2)).unwrap();

        assert!(db.list_soundboards().unwrap().is_empty());
        assert!(db.find_all_soundboard_roles(&set(&[100])).unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_stale_role_rows() {
        let db = Db::open_memory().unwrap();
        db.insert_autorole(GuildId::new(1), RoleId::new(100), "DJ").unwrap();
        db.upsert_soundboard(GuildId::new(2), &roles(&[("DJ", 20)])).unwrap();
        db.upsert_soundboard(GuildId::new(2), &roles(&[("DJ", 22)])).unwrap();
        let found = db.find_soundboard_roles(GuildId::new(2), &set(&[100])).unwrap();
        assert_eq!(found, set(&[22]));
    }

    #[test]
    fn main_guilds_are_listed_once() {
        let db = Db::open_memory().unwrap();
        db.insert_autorole(GuildId::new(1), RoleId::new(100), "DJ").unwrap();
        db.insert_autorole(GuildId::new(1), RoleId::new(101), "DJ").unwrap();
        db.insert_autorole(GuildId::new(1), RoleId::new(101), "DJ").unwrap();
        assert_eq!(db.list_guilds().unwrap(), HashSet::from([GuildId::new(1)]));
    }
}
