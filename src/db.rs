use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::config::Config;
use crate::models::{Booking, Event, EventDraft};
use crate::similar::{SimilarityPolicy, TagOverlap};
use crate::validate::{self, ValidationError};

const EVENT_BY_ID: &str = "SELECT payload FROM events WHERE id = ?1";
const EVENT_BY_SLUG: &str = "SELECT payload FROM events WHERE slug = ?1";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("unable to open database at {path}: {source}")]
    Connection {
        path: String,
        source: rusqlite::Error,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("booking references a non-existent event: {0}")]
    DanglingReference(String),
    #[error("event not found: {0}")]
    EventNotFound(String),
    #[error("an event with slug {0:?} already exists")]
    DuplicateSlug(String),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("document payload error: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("connection mutex poisoned")]
    Poisoned,
}

/// The persistence service: one lazily opened, cached connection plus the
/// write paths that run validation immediately before commit. Constructed once
/// at startup and passed down; there is no global instance.
pub struct Database {
    path: String,
    conn: OnceCell<Mutex<Connection>>,
    opens: AtomicUsize,
    policy: Box<dyn SimilarityPolicy>,
}

impl Database {
    pub fn new(config: Config) -> Self {
        Self::with_policy(config, Box::new(TagOverlap))
    }

    pub fn with_policy(config: Config, policy: Box<dyn SimilarityPolicy>) -> Self {
        Self {
            path: config.db_path,
            conn: OnceCell::new(),
            opens: AtomicUsize::new(0),
            policy,
        }
    }

    /// Returns the cached connection, opening it on first use. Concurrent
    /// callers join the same in-flight open, so at most one attempt runs; the
    /// handle then lives for the rest of the process.
    async fn connection(&self) -> Result<&Mutex<Connection>, StoreError> {
        self.conn
            .get_or_try_init(|| async {
                self.opens.fetch_add(1, Ordering::SeqCst);
                let conn = Connection::open(&self.path).map_err(|source| StoreError::Connection {
                    path: self.path.clone(),
                    source,
                })?;
                init_schema(&conn)?;
                Ok(Mutex::new(conn))
            })
            .await
    }

    pub async fn create_event(&self, draft: &EventDraft) -> Result<Event, StoreError> {
        let normalized = validate::normalize_event(draft, None)?;
        let now = now_utc();
        let event = normalized.into_event(Uuid::new_v4().to_string(), now.clone(), now.clone());
        let payload = serde_json::to_string(&event)?;

        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
        guard
            .execute(
                "INSERT INTO events (id, slug, payload, created_at_utc, updated_at_utc)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                params![event.id, event.slug, payload, now],
            )
            .map_err(|err| map_slug_conflict(err, &event.slug))?;
        Ok(event)
    }

    /// Re-runs the full normalizer against the stored record; the slug is
    /// regenerated only when the title actually changed.
    pub async fn update_event(&self, id: &str, draft: &EventDraft) -> Result<Event, StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;

        let existing = query_event(&guard, EVENT_BY_ID, id)?
            .ok_or_else(|| StoreError::EventNotFound(id.to_string()))?;
        let normalized = validate::normalize_event(draft, Some(&existing))?;
        let now = now_utc();
        let event = normalized.into_event(existing.id, existing.created_at, now.clone());
        let payload = serde_json::to_string(&event)?;

        guard
            .execute(
                "UPDATE events SET slug = ?2, payload = ?3, updated_at_utc = ?4 WHERE id = ?1",
                params![event.id, event.slug, payload, now],
            )
            .map_err(|err| map_slug_conflict(err, &event.slug))?;
        Ok(event)
    }

    /// Explicit removal only. Bookings referencing the event are left
    /// standing; the reference check applies at booking-commit time.
    pub async fn delete_event(&self, id: &str) -> Result<(), StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
        let deleted = guard.execute("DELETE FROM events WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(StoreError::EventNotFound(id.to_string()));
        }
        Ok(())
    }

    pub async fn get_event(&self, id: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
        query_event(&guard, EVENT_BY_ID, id)
    }

    pub async fn get_event_by_slug(&self, slug: &str) -> Result<Option<Event>, StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
        query_event(&guard, EVENT_BY_SLUG, slug)
    }

    /// All events, soonest first. Backs the listing page.
    pub async fn list_events(&self) -> Result<Vec<Event>, StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;

        let mut stmt = guard.prepare("SELECT payload FROM events")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut events: Vec<Event> = Vec::new();
        for row in rows {
            events.push(serde_json::from_str(&row?)?);
        }
        events.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(events)
    }

    /// A bounded list of events similar to the one behind `slug`, per the
    /// injected policy. The queried event itself is never included.
    pub async fn similar_events(&self, slug: &str, limit: usize) -> Result<Vec<Event>, StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;

        let current = query_event(&guard, EVENT_BY_SLUG, slug)?
            .ok_or_else(|| StoreError::EventNotFound(slug.to_string()))?;

        let mut stmt = guard.prepare("SELECT payload FROM events WHERE slug != ?1")?;
        let rows = stmt.query_map(params![slug], |row| row.get::<_, String>(0))?;
        let mut candidates: Vec<Event> = Vec::new();
        for row in rows {
            candidates.push(serde_json::from_str(&row?)?);
        }

        Ok(self.policy.rank(&current, candidates, limit))
    }

    /// Commits a booking after the email format check and the referential
    /// check against `events`. Both run inside the insert transaction, so a
    /// rejected booking leaves no document behind.
    pub async fn create_booking(&self, event_id: &str, email: &str) -> Result<Booking, StoreError> {
        let email = validate::normalize_email(email)?;

        let conn = self.connection().await?;
        let mut guard = conn.lock().map_err(|_| StoreError::Poisoned)?;
        let tx = guard.transaction()?;

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM events WHERE id = ?1",
                params![event_id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_none() {
            return Err(StoreError::DanglingReference(event_id.to_string()));
        }

        let now = now_utc();
        let booking = Booking {
            id: Uuid::new_v4().to_string(),
            event_id: event_id.to_string(),
            email,
            created_at: now.clone(),
            updated_at: now.clone(),
        };
        let payload = serde_json::to_string(&booking)?;
        tx.execute(
            "INSERT INTO bookings (id, event_id, payload, created_at_utc, updated_at_utc)
             VALUES (?1, ?2, ?3, ?4, ?4)",
            params![booking.id, booking.event_id, payload, now],
        )?;
        tx.commit()?;
        Ok(booking)
    }

    /// Bookings for one event, oldest first; served by the `event_id` index.
    pub async fn bookings_for_event(&self, event_id: &str) -> Result<Vec<Booking>, StoreError> {
        let conn = self.connection().await?;
        let guard = conn.lock().map_err(|_| StoreError::Poisoned)?;

        let mut stmt = guard.prepare(
            "SELECT payload FROM bookings WHERE event_id = ?1 ORDER BY created_at_utc",
        )?;
        let rows = stmt.query_map(params![event_id], |row| row.get::<_, String>(0))?;
        let mut bookings: Vec<Booking> = Vec::new();
        for row in rows {
            bookings.push(serde_json::from_str(&row?)?);
        }
        Ok(bookings)
    }

    #[cfg(test)]
    pub(crate) fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS events(
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL,
            created_at_utc TEXT NOT NULL,
            updated_at_utc TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS bookings(
            id TEXT PRIMARY KEY,
            event_id TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at_utc TEXT NOT NULL,
            updated_at_utc TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS bookings_event_id ON bookings(event_id);",
    )?;
    Ok(())
}

fn query_event(conn: &Connection, sql: &str, key: &str) -> Result<Option<Event>, StoreError> {
    let payload: Option<String> = conn
        .query_row(sql, params![key], |row| row.get(0))
        .optional()?;
    match payload {
        Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
        None => Ok(None),
    }
}

fn map_slug_conflict(err: rusqlite::Error, slug: &str) -> StoreError {
    match &err {
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            StoreError::DuplicateSlug(slug.to_string())
        }
        _ => StoreError::Database(err),
    }
}

fn now_utc() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
