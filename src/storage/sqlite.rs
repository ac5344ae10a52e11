//! SQLite storage backend

use super::traits::{OpenStore, StateStore, StorageError, StorageResult};
use crate::book::{Book, Chapter};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

const KEY_CHAPTERS: &str = "chapters";
const KEY_CURRENT_CHAPTER: &str = "current_chapter";
const KEY_STYLE_PROMPT: &str = "style_prompt";
const KEY_NEXT_ORDER: &str = "next_chapter_order";
const KEY_SAVED_AT: &str = "saved_at";

/// SQLite-backed state store
///
/// A single key/value table; every value is a JSON document. A save writes
/// all keys inside one transaction so a crash never leaves the chapter list
/// and the pointer out of step. Thread-safe via internal mutex on the
/// connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    fn init_schema(conn: &Connection) -> StorageResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            PRAGMA journal_mode = WAL;
            "#,
        )?;
        Ok(())
    }

    fn read_value<T: serde::de::DeserializeOwned>(
        conn: &Connection,
        key: &str,
    ) -> StorageResult<Option<T>> {
        let raw: Option<String> = conn
            .query_row("SELECT value FROM state WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        match raw {
            Some(json) => serde_json::from_str(&json).map(Some).map_err(|e| StorageError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            }),
            None => Ok(None),
        }
    }
}

impl OpenStore for SqliteStore {
    fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl StateStore for SqliteStore {
    fn save_book(&self, book: &Book) -> StorageResult<()> {
        let entries = [
            (KEY_CHAPTERS, serde_json::to_string(book.chapters())?),
            (KEY_CURRENT_CHAPTER, serde_json::to_string(&book.current_index())?),
            (KEY_STYLE_PROMPT, serde_json::to_string(&book.style_prompt)?),
            (KEY_NEXT_ORDER, serde_json::to_string(&book.next_order())?),
            (KEY_SAVED_AT, serde_json::to_string(&Utc::now())?),
        ];

        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        for (key, value) in &entries {
            tx.execute(
                "INSERT INTO state (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }
        tx.commit()?;

        tracing::debug!(chapters = book.len(), "book saved");
        Ok(())
    }

    fn load_book(&self) -> StorageResult<Option<Book>> {
        let conn = self.conn.lock().unwrap();
        let Some(chapters) = Self::read_value::<Vec<Chapter>>(&conn, KEY_CHAPTERS)? else {
            return Ok(None);
        };
        let current = Self::read_value::<Option<usize>>(&conn, KEY_CURRENT_CHAPTER)?.flatten();
        let style_prompt = Self::read_value::<String>(&conn, KEY_STYLE_PROMPT)?.unwrap_or_default();
        let next_order = Self::read_value::<u32>(&conn, KEY_NEXT_ORDER)?.unwrap_or(0);

        Ok(Some(Book::from_parts(chapters, current, next_order, style_prompt)))
    }

    fn last_saved(&self) -> StorageResult<Option<DateTime<Utc>>> {
        let conn = self.conn.lock().unwrap();
        Self::read_value(&conn, KEY_SAVED_AT)
    }

    fn clear(&self) -> StorageResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute("DELETE FROM state", [])?;
        Ok(())
    }
}
