//! SQLite-backed RAG entry store.
//!
//! The pipeline only reads; writes happen through seeding/admin tooling using
//! the dedupe-key upsert.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::Result;

use super::types::{compute_dedupe_key, RagEntry};

/// Repository over the `rag_entries` table.
pub struct RagStore {
    conn: Mutex<Connection>,
}

impl RagStore {
    /// Open (and migrate) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS rag_entries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                category TEXT NOT NULL,
                content TEXT NOT NULL,
                original_text TEXT,
                alternative TEXT,
                trigger_phrases TEXT,
                dedupe_key TEXT UNIQUE,
                personas TEXT,
                contexts TEXT,
                tone_levels TEXT,
                sections TEXT,
                yellow_labels TEXT,
                embedding_blob TEXT,
                enabled INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_rag_entries_category ON rag_entries(category);",
        )?;
        Ok(())
    }

    /// All enabled entries.
    pub fn find_all_enabled(&self) -> Result<Vec<RagEntry>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, category, content, original_text, alternative, trigger_phrases,
                    dedupe_key, personas, contexts, tone_levels, sections, yellow_labels,
                    embedding_blob, enabled
             FROM rag_entries WHERE enabled = 1",
        )?;
        let rows = stmt.query_map([], row_to_entry)?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Enabled entry counts per category.
    pub fn count_by_category(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(id) FROM rag_entries WHERE enabled = 1 GROUP BY category",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
        })?;
        Ok(rows.collect::<std::result::Result<Vec<_>, _>>()?)
    }

    /// Insert or update by the SHA-256 dedupe key; returns the entry id.
    pub fn upsert(&self, mut entry: RagEntry) -> Result<i64> {
        let dedupe_key = entry.dedupe_key.take().unwrap_or_else(|| {
            compute_dedupe_key(
                &entry.category,
                &entry.content,
                entry.personas.as_deref(),
                entry.contexts.as_deref(),
            )
        });

        let conn = self.conn.lock().unwrap();
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM rag_entries WHERE dedupe_key = ?1",
                [&dedupe_key],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE rag_entries SET
                        content = ?1, original_text = ?2, alternative = ?3,
                        trigger_phrases = ?4, personas = ?5, contexts = ?6,
                        tone_levels = ?7, sections = ?8, yellow_labels = ?9,
                        embedding_blob = ?10, enabled = ?11
                     WHERE id = ?12",
                    params![
                        entry.content,
                        entry.original_text,
                        entry.alternative,
                        entry.trigger_phrases,
                        entry.personas,
                        entry.contexts,
                        entry.tone_levels,
                        entry.sections,
                        entry.yellow_labels,
                        entry.embedding_blob,
                        entry.enabled,
                        id,
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO rag_entries
                        (category, content, original_text, alternative, trigger_phrases,
                         dedupe_key, personas, contexts, tone_levels, sections,
                         yellow_labels, embedding_blob, enabled)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
                    params![
                        entry.category,
                        entry.content,
                        entry.original_text,
                        entry.alternative,
                        entry.trigger_phrases,
                        dedupe_key,
                        entry.personas,
                        entry.contexts,
                        entry.tone_levels,
                        entry.sections,
                        entry.yellow_labels,
                        entry.embedding_blob,
                        entry.enabled,
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    }

    pub fn delete_all(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM rag_entries", [])?)
    }

    pub fn delete_by_category(&self, category: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        Ok(conn.execute("DELETE FROM rag_entries WHERE category = ?1", [category])?)
    }
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RagEntry> {
    Ok(RagEntry {
        id: row.get(0)?,
        category: row.get(1)?,
        content: row.get(2)?,
        original_text: row.get(3)?,
        alternative: row.get(4)?,
        trigger_phrases: row.get(5)?,
        dedupe_key: row.get(6)?,
        personas: row.get(7)?,
        contexts: row.get(8)?,
        tone_levels: row.get(9)?,
        sections: row.get(10)?,
        yellow_labels: row.get(11)?,
        embedding_blob: row.get(12)?,
        enabled: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::embedding_to_json;
    use pretty_assertions::assert_eq;

    fn entry(category: &str, content: &str) -> RagEntry {
        RagEntry {
            category: category.to_string(),
            content: content.to_string(),
            embedding_blob: Some(embedding_to_json(&[1.0, 0.0])),
            enabled: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_upsert_is_idempotent_by_dedupe_key() {
        let store = RagStore::open_in_memory().unwrap();
        let id1 = store.upsert(entry("cushion", "확인해 보니")).unwrap();
        let id2 = store.upsert(entry("cushion", "확인해 보니")).unwrap();
        assert_eq!(id1, id2);
        assert_eq!(store.find_all_enabled().unwrap().len(), 1);
    }

    #[test]
    fn test_disabled_entries_excluded() {
        let store = RagStore::open_in_memory().unwrap();
        let mut disabled = entry("policy", "규정상 불가");
        disabled.enabled = false;
        store.upsert(disabled).unwrap();
        store.upsert(entry("policy", "정책 안내")).unwrap();

        let found = store.find_all_enabled().unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].content, "정책 안내");
    }

    #[test]
    fn test_count_by_category() {
        let store = RagStore::open_in_memory().unwrap();
        store.upsert(entry("cushion", "a")).unwrap();
        store.upsert(entry("cushion", "b")).unwrap();
        store.upsert(entry("example", "c")).unwrap();

        let mut counts = store.count_by_category().unwrap();
        counts.sort();
        assert_eq!(counts, vec![("cushion".to_string(), 2), ("example".to_string(), 1)]);
    }

    #[test]
    fn test_delete_by_category() {
        let store = RagStore::open_in_memory().unwrap();
        store.upsert(entry("cushion", "a")).unwrap();
        store.upsert(entry("example", "b")).unwrap();
        assert_eq!(store.delete_by_category("cushion").unwrap(), 1);
        assert_eq!(store.find_all_enabled().unwrap().len(), 1);
    }

    #[test]
    fn test_open_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rag.db");
        let store = RagStore::open(&path).unwrap();
        store.upsert(entry("cushion", "a")).unwrap();
        drop(store);

        let reopened = RagStore::open(&path).unwrap();
        assert_eq!(reopened.find_all_enabled().unwrap().len(), 1);
    }
}
