use rusqlite::{params, OptionalExtension};

use super::{Database, WriteOutcome};
use crate::error::{Error, Result};
use crate::event::{Event, EventKind};
use crate::models::{CachedProfile, Profile};

impl Database {
    /// Store a profile, keeping whichever metadata event is newest. A write
    /// that is not strictly newer than the stored one is ignored.
    pub fn upsert_profile(
        &self,
        pubkey: &str,
        profile: &Profile,
        created_at: u64,
    ) -> Result<WriteOutcome> {
        let created_at = i64::try_from(created_at).map_err(|_| Error::InvalidData {
            message: format!("profile timestamp {created_at} out of range"),
        })?;
        let json = profile.to_json()?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let stored: Option<i64> = tx
            .query_row(
                "SELECT createdAt FROM ndk_users WHERE pubkey = ?1",
                params![pubkey],
                |row| row.get(0),
            )
            .optional()?;

        let outcome = match stored {
            None => {
                tx.execute(
                    "INSERT INTO ndk_users (pubkey, profile, createdAt) VALUES (?1, ?2, ?3)",
                    params![pubkey, json, created_at],
                )?;
                WriteOutcome::Inserted
            }
            Some(stored_at) if created_at > stored_at => {
                tx.execute(
                    "UPDATE ndk_users SET profile = ?2, createdAt = ?3 WHERE pubkey = ?1",
                    params![pubkey, json, created_at],
                )?;
                WriteOutcome::Updated
            }
            Some(_) => WriteOutcome::AlreadyExists,
        };
        tx.commit()?;
        Ok(outcome)
    }

    /// Store the profile carried by a kind-0 event. Other kinds are ignored.
    pub fn upsert_profile_event(&self, event: &Event) -> Result<WriteOutcome> {
        if event.event_kind() != EventKind::Metadata {
            return Ok(WriteOutcome::AlreadyExists);
        }
        self.upsert_profile(&event.pubkey, &Profile::from_event(event), event.created_at)
    }

    pub fn profile(&self, pubkey: &str) -> Result<Option<CachedProfile>> {
        let conn = self.conn()?;
        let row: Option<(String, String, i64)> = conn
            .query_row(
                "SELECT pubkey, profile, createdAt FROM ndk_users WHERE pubkey = ?1",
                params![pubkey],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .optional()?;
        row.map(|(pubkey, json, created_at)| -> Result<CachedProfile> {
            Ok(CachedProfile {
                pubkey,
                profile: Profile::from_json(&json)?,
                created_at: created_at as u64,
            })
        })
        .transpose()
    }

    /// Every cached profile, most recently updated first.
    pub fn profiles(&self) -> Result<Vec<CachedProfile>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT pubkey, profile, createdAt FROM ndk_users ORDER BY createdAt DESC, pubkey",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter()
            .map(|(pubkey, json, created_at)| -> Result<CachedProfile> {
                Ok(CachedProfile {
                    pubkey,
                    profile: Profile::from_json(&json)?,
                    created_at: created_at as u64,
                })
            })
            .collect()
    }

    pub fn clear_profile(&self, pubkey: &str) -> Result<usize> {
        let conn = self.conn()?;
        Ok(conn.execute("DELETE FROM ndk_users WHERE pubkey = ?1", params![pubkey])?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn named(name: &str) -> Profile {
        Profile {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_profile_last_write_wins_by_created_at() {
        let db = Database::in_memory().unwrap();

        assert_eq!(
            db.upsert_profile("pk", &named("v2"), 200).unwrap(),
            WriteOutcome::Inserted
        );
        // Older metadata arriving late must not clobber the newer one.
        assert_eq!(
            db.upsert_profile("pk", &named("v1"), 100).unwrap(),
            WriteOutcome::AlreadyExists
        );
        assert_eq!(
            db.upsert_profile("pk", &named("same"), 200).unwrap(),
            WriteOutcome::AlreadyExists
        );
        assert_eq!(
            db.upsert_profile("pk", &named("v3"), 300).unwrap(),
            WriteOutcome::Updated
        );

        let cached = db.profile("pk").unwrap().unwrap();
        assert_eq!(cached.profile.name.as_deref(), Some("v3"));
        assert_eq!(cached.created_at, 300);
    }

    #[test]
    fn test_profile_timestamp_out_of_range_is_rejected() {
        let db = Database::in_memory().unwrap();
        db.upsert_profile("pk", &named("v1"), 100).unwrap();

        assert!(matches!(
            db.upsert_profile("pk", &named("far"), u64::MAX),
            Err(Error::InvalidData { .. })
        ));
        let cached = db.profile("pk").unwrap().unwrap();
        assert_eq!(cached.profile.name.as_deref(), Some("v1"));
        assert_eq!(cached.created_at, 100);
    }

    #[test]
    fn test_profile_from_metadata_event() {
        let db = Database::in_memory().unwrap();
        let mut ev = crate::event::test_support::event("m", 50, &[]);
        ev.kind = 0;
        ev.content = r#"{"name":"alice","about":"hi"}"#.into();

        assert!(db.upsert_profile_event(&ev).unwrap().changed());
        let cached = db.profile("author").unwrap().unwrap();
        assert_eq!(cached.profile.about.as_deref(), Some("hi"));

        let note = crate::event::test_support::event("n", 60, &[]);
        assert_eq!(
            db.upsert_profile_event(&note).unwrap(),
            WriteOutcome::AlreadyExists
        );
    }

    #[test]
    fn test_list_and_clear_profiles() {
        let db = Database::in_memory().unwrap();
        db.upsert_profile("a", &named("a"), 1).unwrap();
        db.upsert_profile("b", &named("b"), 2).unwrap();

        let all: Vec<_> = db.profiles().unwrap().into_iter().map(|p| p.pubkey).collect();
        assert_eq!(all, vec!["b", "a"]);

        assert_eq!(db.clear_profile("a").unwrap(), 1);
        assert_eq!(db.clear_profile("a").unwrap(), 0);
        assert!(db.profile("a").unwrap().is_none());
    }
}
