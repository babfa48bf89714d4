//! SQLite-backed note storage, scoped per owner.
//!
//! Tables:
//! - `notes`: id, user_id, title, content, created_at, updated_at
//!
//! Every query filters on `user_id`; a note owned by someone else behaves
//! exactly like a note that does not exist.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::path::Path;

/// Maximum title length in characters.
const MAX_TITLE_CHARS: usize = 200;

/// Maximum content size in bytes (64KB).
const MAX_CONTENT_BYTES: usize = 65_536;

/// Rejected note input (empty title, oversized content, ...).
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct InvalidNote(String);

/// A stored note.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default)]
pub struct NoteUpdate {
    pub title: Option<String>,
    pub content: Option<String>,
}

pub struct NoteStore {
    conn: Mutex<Connection>,
}

impl NoteStore {
    /// Open (or create) the notes database at the given path.
    pub fn new(db_path: &Path) -> Result<Self> {
        Self::init(Connection::open(db_path)?)
    }

    pub fn in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;",
        )?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS notes (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_notes_user ON notes(user_id, updated_at);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create a note for `user_id`.
    pub fn create(&self, user_id: &str, title: &str, content: &str) -> Result<Note> {
        let title = validate_title(title)?;
        validate_content(content)?;

        let now = Utc::now();
        let note = Note {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            title,
            content: content.to_string(),
            created_at: now,
            updated_at: now,
        };

        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO notes (id, user_id, title, content, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                note.id,
                note.user_id,
                note.title,
                note.content,
                format_timestamp(&note.created_at),
                format_timestamp(&note.updated_at),
            ],
        )?;
        Ok(note)
    }

    /// All notes of `user_id`, most recently updated first.
    pub fn list(&self, user_id: &str) -> Result<Vec<Note>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, user_id, title, content, created_at, updated_at
             FROM notes WHERE user_id = ?1
             ORDER BY updated_at DESC, created_at DESC",
        )?;
        let rows = stmt
            .query_map(params![user_id], row_to_raw)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawNote::into_note).collect()
    }

    /// Fetch one note owned by `user_id`.
    pub fn get(&self, user_id: &str, note_id: &str) -> Result<Option<Note>> {
        let conn = self.conn.lock();
        let raw = conn
            .query_row(
                "SELECT id, user_id, title, content, created_at, updated_at
                 FROM notes WHERE id = ?1 AND user_id = ?2",
                params![note_id, user_id],
                row_to_raw,
            )
            .optional()?;
        raw.map(RawNote::into_note).transpose()
    }

    /// Apply `update` to a note owned by `user_id`. `None` if not found.
    pub fn update(&self, user_id: &str, note_id: &str, update: NoteUpdate) -> Result<Option<Note>> {
        let title = update.title.as_deref().map(validate_title).transpose()?;
        if let Some(content) = update.content.as_deref() {
            validate_content(content)?;
        }

        let Some(mut note) = self.get(user_id, note_id)? else {
            return Ok(None);
        };
        if let Some(title) = title {
            note.title = title;
        }
        if let Some(content) = update.content {
            note.content = content;
        }
        note.updated_at = Utc::now();

        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE notes SET title = ?1, content = ?2, updated_at = ?3
             WHERE id = ?4 AND user_id = ?5",
            params![
                note.title,
                note.content,
                format_timestamp(&note.updated_at),
                note.id,
                user_id
            ],
        )?;
        // Deleted between the read and the write.
        Ok((changed > 0).then_some(note))
    }

    /// Delete a note owned by `user_id`. Returns whether a row was removed.
    pub fn delete(&self, user_id: &str, note_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        let deleted = conn.execute(
            "DELETE FROM notes WHERE id = ?1 AND user_id = ?2",
            params![note_id, user_id],
        )?;
        Ok(deleted > 0)
    }
}

fn validate_title(title: &str) -> Result<String, InvalidNote> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(InvalidNote("Title cannot be empty".into()));
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        return Err(InvalidNote(format!(
            "Title too long (max {MAX_TITLE_CHARS} characters)"
        )));
    }
    Ok(trimmed.to_string())
}

fn validate_content(content: &str) -> Result<(), InvalidNote> {
    if content.len() > MAX_CONTENT_BYTES {
        return Err(InvalidNote(format!(
            "Content too large (max {MAX_CONTENT_BYTES} bytes)"
        )));
    }
    Ok(())
}

/// Row as stored, timestamps still text.
struct RawNote {
    id: String,
    user_id: String,
    title: String,
    content: String,
    created_at: String,
    updated_at: String,
}

impl RawNote {
    fn into_note(self) -> Result<Note> {
        Ok(Note {
            id: self.id,
            user_id: self.user_id,
            title: self.title,
            content: self.content,
            created_at: parse_timestamp(&self.created_at)?,
            updated_at: parse_timestamp(&self.updated_at)?,
        })
    }
}

fn row_to_raw(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawNote> {
    Ok(RawNote {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

/// Fixed-width UTC so text ordering matches time ordering.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}
