use rusqlite::{params, OptionalExtension};

use super::{Database, WriteOutcome};
use crate::error::Result;
use crate::models::settings::{encode_bool, Interests, SettingKey, Settings};

impl Database {
    pub fn setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;
        Ok(conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    /// Insert or update in place.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<WriteOutcome> {
        let conn = self.conn()?;
        let updated = conn.execute(
            "UPDATE settings SET value = ?2 WHERE key = ?1",
            params![key, value],
        )?;
        if updated > 0 {
            return Ok(WriteOutcome::Updated);
        }
        conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(WriteOutcome::Inserted)
    }

    pub fn set_bool_setting(&self, key: SettingKey, value: bool) -> Result<WriteOutcome> {
        self.set_setting(key.as_str(), &encode_bool(value))
    }

    /// Raw `(key, value)` rows, newest first.
    pub fn setting_rows(&self) -> Result<Vec<(String, String)>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT key, value FROM settings ORDER BY id DESC")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn settings(&self) -> Result<Settings> {
        Ok(Settings::from_rows(self.setting_rows()?))
    }

    pub fn interests(&self) -> Result<Option<Interests>> {
        Ok(self
            .setting(SettingKey::Interests.as_str())?
            .filter(|raw| !raw.is_empty())
            .and_then(|raw| serde_json::from_str(&raw).ok()))
    }

    pub fn set_interests(&self, interests: &Interests) -> Result<WriteOutcome> {
        self.set_setting(
            SettingKey::Interests.as_str(),
            &serde_json::to_string(interests)?,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_update_in_place() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.setting("media").unwrap(), None);

        assert_eq!(
            db.set_bool_setting(SettingKey::Media, false).unwrap(),
            WriteOutcome::Inserted
        );
        assert_eq!(
            db.set_bool_setting(SettingKey::Media, true).unwrap(),
            WriteOutcome::Updated
        );
        assert_eq!(db.setting("media").unwrap().as_deref(), Some("1"));
        assert_eq!(db.setting_rows().unwrap().len(), 1);
    }

    #[test]
    fn test_typed_settings_view() {
        let db = Database::in_memory().unwrap();
        db.set_setting("tunnelUrl", "1").unwrap();
        db.set_bool_setting(SettingKey::Nsecbunker, true).unwrap();

        let settings = db.settings().unwrap();
        assert_eq!(settings.tunnel_url, "1");
        assert!(settings.nsecbunker);
        assert!(settings.media);
    }

    #[test]
    fn test_interests_roundtrip() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.interests().unwrap(), None);

        let interests = Interests {
            hashtags: vec!["nostr".into()],
            users: vec!["pk".into()],
        };
        db.set_interests(&interests).unwrap();
        assert_eq!(db.interests().unwrap(), Some(interests));
    }
}
