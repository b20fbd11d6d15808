//! Cached events and their tag index.
//!
//! Events are content-addressed, so two rows with one id are identical and
//! the first write always wins.

use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, OptionalExtension, Row};
use tracing::debug;

use super::{Database, WriteOutcome};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::filter::EventFilter;

/// One row of the tag index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagRow {
    pub id: String,
    pub event_id: String,
    pub tag: String,
    pub value: String,
    /// `"{tag}:{value}"`, the lookup key.
    pub tag_value: String,
}

impl TagRow {
    pub fn tag_value_key(tag: &str, value: &str) -> String {
        format!("{tag}:{value}")
    }

    /// Index rows for an event. Tags without a value are not indexed and a
    /// repeated tag yields one row.
    pub fn for_event(event: &Event) -> Vec<TagRow> {
        let mut rows: Vec<TagRow> = Vec::new();
        for tag in &event.tags {
            let (Some(name), Some(value)) = (tag.first(), tag.get(1)) else {
                continue;
            };
            let tag_value = Self::tag_value_key(name, value);
            let id = format!("{}:{tag_value}", event.id);
            if rows.iter().any(|row| row.id == id) {
                continue;
            }
            rows.push(TagRow {
                id,
                event_id: event.id.clone(),
                tag: name.clone(),
                value: value.clone(),
                tag_value,
            });
        }
        rows
    }
}

const EVENT_COLUMNS: &str = "event";

fn decode_event(row: &Row<'_>) -> rusqlite::Result<String> {
    row.get(0)
}

fn parse_events(raw: Vec<String>) -> Result<Vec<Event>> {
    raw.iter()
        .map(|json| serde_json::from_str(json).map_err(Error::from))
        .collect()
}

impl Database {
    /// Insert an event and its tag index. A repeat insert is a no-op.
    pub fn insert_event(&self, event: &Event, relay: Option<&str>) -> Result<WriteOutcome> {
        let json = serde_json::to_string(event)?;
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let inserted = tx.execute(
            "INSERT OR IGNORE INTO ndk_events (id, pubkey, content, kind, createdAt, relay, event) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.id,
                event.pubkey,
                event.content,
                event.kind as i64,
                event.created_at as i64,
                relay,
                json
            ],
        )?;

        if inserted > 0 {
            let mut stmt = tx.prepare(
                "INSERT OR IGNORE INTO ndk_eventtags (id, eventId, tag, value, tagValue) \
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for row in TagRow::for_event(event) {
                stmt.execute(params![row.id, row.event_id, row.tag, row.value, row.tag_value])?;
            }
        }
        tx.commit()?;

        Ok(if inserted > 0 {
            WriteOutcome::Inserted
        } else {
            WriteOutcome::AlreadyExists
        })
    }

    /// Insert many events, returning how many were new.
    pub fn insert_events(&self, events: &[Event], relay: Option<&str>) -> Result<usize> {
        let mut inserted = 0;
        for event in events {
            if self.insert_event(event, relay)? == WriteOutcome::Inserted {
                inserted += 1;
            }
        }
        if inserted > 0 {
            debug!(target: "ark::store", "cached {inserted} of {} events", events.len());
        }
        Ok(inserted)
    }

    pub fn event(&self, id: &str) -> Result<Option<Event>> {
        let conn = self.conn()?;
        let raw: Option<String> = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM ndk_events WHERE id = ?1"),
                params![id],
                decode_event,
            )
            .optional()?;
        raw.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    /// Events for the given ids that are cached, ordered by id.
    pub fn events(&self, ids: &[String]) -> Result<Vec<Event>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "SELECT {EVENT_COLUMNS} FROM ndk_events WHERE id IN ({placeholders}) ORDER BY id"
        );
        self.select_events(&sql, params_from_iter(ids.iter()))
    }

    /// Newest first.
    pub fn events_by_pubkey(&self, pubkey: &str) -> Result<Vec<Event>> {
        self.select_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM ndk_events WHERE pubkey = ?1 \
                 ORDER BY createdAt DESC, id"
            ),
            params![pubkey],
        )
    }

    pub fn events_by_kind(&self, kind: u16) -> Result<Vec<Event>> {
        self.select_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM ndk_events WHERE kind = ?1 \
                 ORDER BY createdAt DESC, id"
            ),
            params![kind as i64],
        )
    }

    pub fn events_by_kind_and_author(&self, kind: u16, pubkey: &str) -> Result<Vec<Event>> {
        self.select_events(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM ndk_events WHERE kind = ?1 AND pubkey = ?2 \
                 ORDER BY createdAt DESC, id"
            ),
            params![kind as i64, pubkey],
        )
    }

    /// Newest cached event of a kind by an author, e.g. a contact list.
    pub fn latest_event_by_kind_and_author(&self, kind: u16, pubkey: &str) -> Result<Option<Event>> {
        Ok(self
            .events_by_kind_and_author(kind, pubkey)?
            .into_iter()
            .next())
    }

    /// All cached events carrying tag `tag` with value `value`, newest first.
    pub fn events_by_tag(&self, tag: &str, value: &str) -> Result<Vec<Event>> {
        self.select_events(
            &format!(
                "SELECT e.{EVENT_COLUMNS} FROM ndk_events e \
                 JOIN ndk_eventtags t ON t.eventId = e.id \
                 WHERE t.tagValue = ?1 ORDER BY e.createdAt DESC, e.id"
            ),
            params![TagRow::tag_value_key(tag, value)],
        )
    }

    /// Cached events matching `filter`, newest first, at most `filter.limit`.
    ///
    /// Ids, authors, kinds and the time bounds narrow the SQL scan; tag
    /// constraints are checked on the decoded events.
    pub fn query_events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let mut clauses: Vec<String> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        let mut any_of = |column: &str, items: Vec<Value>| {
            if items.is_empty() {
                return;
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            clauses.push(format!("{column} IN ({placeholders})"));
            values.extend(items);
        };
        any_of("id", filter.ids.iter().cloned().map(Value::Text).collect());
        any_of("pubkey", filter.authors.iter().cloned().map(Value::Text).collect());
        any_of(
            "kind",
            filter.kinds.iter().map(|&k| Value::Integer(k.into())).collect(),
        );
        if let Some(since) = filter.since {
            clauses.push("createdAt >= ?".to_string());
            values.push(Value::Integer(i64::try_from(since).unwrap_or(i64::MAX)));
        }
        if let Some(until) = filter.until {
            clauses.push("createdAt <= ?".to_string());
            values.push(Value::Integer(i64::try_from(until).unwrap_or(i64::MAX)));
        }

        let mut sql = format!("SELECT {EVENT_COLUMNS} FROM ndk_events");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY createdAt DESC, id");

        let mut events: Vec<Event> = self
            .select_events(&sql, params_from_iter(values))?
            .into_iter()
            .filter(|event| filter.matches(event))
            .collect();
        if let Some(limit) = filter.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    pub fn tags_for_event(&self, event_id: &str) -> Result<Vec<TagRow>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, eventId, tag, value, tagValue FROM ndk_eventtags \
             WHERE eventId = ?1 ORDER BY rowid",
        )?;
        let rows = stmt
            .query_map(params![event_id], |row| {
                Ok(TagRow {
                    id: row.get(0)?,
                    event_id: row.get(1)?,
                    tag: row.get(2)?,
                    value: row.get(3)?,
                    tag_value: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn delete_events_by_pubkey(&self, pubkey: &str) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM ndk_eventtags WHERE eventId IN \
             (SELECT id FROM ndk_events WHERE pubkey = ?1)",
            params![pubkey],
        )?;
        let deleted = tx.execute("DELETE FROM ndk_events WHERE pubkey = ?1", params![pubkey])?;
        tx.commit()?;
        Ok(deleted)
    }

    /// Drop every cached event, tag and profile. Accounts, columns and
    /// settings stay.
    pub fn clear_cache(&self) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut deleted = tx.execute("DELETE FROM ndk_events", [])?;
        tx.execute("DELETE FROM ndk_eventtags", [])?;
        deleted += tx.execute("DELETE FROM ndk_users", [])?;
        tx.commit()?;
        debug!(target: "ark::store", "cleared {deleted} cached rows");
        Ok(deleted)
    }

    fn select_events<P: rusqlite::Params>(&self, sql: &str, params: P) -> Result<Vec<Event>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let raw = stmt
            .query_map(params, decode_event)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        parse_events(raw)
    }
}
