//! SQLite backend: sqlite-vec for nearest-neighbor search over chunk
//! embeddings, plain tables for conversations, profiles, and contents.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::Once;

use async_trait::async_trait;
use serde_json::Value;
use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::instrument;

use super::{ContentRow, KnowledgeStore, LearningStore, ScoredChunk};
use crate::types::{Turn, TutorError};

/// Both store seams over one SQLite database file.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens (or creates) the database at `path` with an embedding table of
    /// the given dimension, registering the sqlite-vec extension first.
    #[instrument(skip(path))]
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self, TutorError> {
        Self::register_sqlite_vec()?;
        let conn = Connection::open(path)
            .await
            .map_err(|err| TutorError::Storage(err.to_string()))?;

        conn.call(move |conn| {
            conn.query_row("select vec_version()", [], |row| row.get::<_, String>(0))
                ?;
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS documents (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     content TEXT NOT NULL,
                     metadata TEXT NOT NULL,
                     created_at TEXT NOT NULL DEFAULT (datetime('now'))
                 );
                 CREATE VIRTUAL TABLE IF NOT EXISTS documents_vec USING vec0(
                     embedding float[{dimension}]
                 );
                 CREATE TABLE IF NOT EXISTS conversation (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     history TEXT NOT NULL DEFAULT '[]',
                     created_at TEXT NOT NULL DEFAULT (datetime('now'))
                 );
                 CREATE TABLE IF NOT EXISTS profile_information (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     conversation_id INTEGER REFERENCES conversation(id) ON DELETE CASCADE,
                     preferred_format TEXT,
                     raw_history TEXT,
                     assessments TEXT,
                     created_at TEXT NOT NULL DEFAULT (datetime('now'))
                 );
                 CREATE TABLE IF NOT EXISTS personalized_learning_contents (
                     id INTEGER PRIMARY KEY AUTOINCREMENT,
                     conversation_id INTEGER REFERENCES conversation(id) ON DELETE CASCADE,
                     analysis_id INTEGER REFERENCES profile_information(id) ON DELETE CASCADE,
                     subtopic TEXT,
                     level TEXT,
                     content_format TEXT,
                     title TEXT,
                     script TEXT,
                     extra_metadata TEXT,
                     created_at TEXT NOT NULL DEFAULT (datetime('now'))
                 );"
            ))
            ?;
            Ok(())
        })
        .await
        .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))?;

        Ok(Self { conn })
    }

    fn register_sqlite_vec() -> Result<(), TutorError> {
        use std::sync::Mutex;

        static INIT: Once = Once::new();
        static INIT_RESULT: Mutex<Option<Result<(), String>>> = Mutex::new(None);

        INIT.call_once(|| {
            let result = unsafe {
                type SqliteExtensionInit = unsafe extern "C" fn(
                    *mut ffi::sqlite3,
                    *mut *mut c_char,
                    *const ffi::sqlite3_api_routines,
                ) -> i32;

                let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
                let init_fn: SqliteExtensionInit =
                    transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
                let rc = ffi::sqlite3_auto_extension(Some(init_fn));
                if rc != 0 {
                    Err(format!(
                        "failed to register sqlite-vec extension (code {rc})"
                    ))
                } else {
                    Ok(())
                }
            };
            *INIT_RESULT.lock().expect("init result mutex poisoned") = Some(result);
        });

        INIT_RESULT
            .lock()
            .expect("init result mutex poisoned")
            .clone()
            .expect("init was called but result not set")
            .map_err(TutorError::Storage)
    }
}

#[async_trait]
impl KnowledgeStore for SqliteStore {
    async fn insert_chunk(
        &self,
        content: &str,
        metadata: &Value,
        embedding: &[f32],
    ) -> Result<i64, TutorError> {
        let content = content.to_string();
        let metadata = metadata.to_string();
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|err| TutorError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO documents (content, metadata) VALUES (?1, ?2)",
                    (&content, &metadata),
                )
                ?;
                let id = conn.last_insert_rowid();
                conn.execute(
                    "INSERT INTO documents_vec (rowid, embedding) VALUES (?1, vec_f32(?2))",
                    (id, &embedding_json),
                )
                ?;
                Ok(id)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }

    async fn has_source(&self, source: &str, doc_type: &str) -> Result<bool, TutorError> {
        let source = source.to_string();
        let doc_type = doc_type.to_string();

        self.conn
            .call(move |conn| {
                let found = conn
                    .query_row(
                        "SELECT 1 FROM documents
                         WHERE json_extract(metadata, '$.source') = ?1
                           AND json_extract(metadata, '$.type') = ?2
                         LIMIT 1",
                        (&source, &doc_type),
                        |_| Ok(()),
                    )
                    .optional()
                    ?;
                Ok(found.is_some())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }

    async fn search_similar(
        &self,
        embedding: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, TutorError> {
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|err| TutorError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(&format!(
                        "SELECT d.id, d.content, d.metadata, \
                         vec_distance_L2(v.embedding, vec_f32(?1)) AS distance \
                         FROM documents d \
                         JOIN documents_vec v ON d.id = v.rowid \
                         ORDER BY distance ASC \
                         LIMIT {k}"
                    ))
                    ?;

                let rows = stmt
                    .query_map([&embedding_json], |row| {
                        let metadata: String = row.get(2)?;
                        Ok(ScoredChunk {
                            id: row.get(0)?,
                            content: row.get(1)?,
                            metadata: serde_json::from_str(&metadata).unwrap_or_default(),
                            distance: row.get(3)?,
                        })
                    })
                    ?;

                let mut results = Vec::new();
                for row in rows {
                    results.push(row?);
                }
                Ok(results)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }

    async fn count(&self) -> Result<usize, TutorError> {
        self.conn
            .call(|conn| {
                let count: i64 = conn
                    .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
                    ?;
                Ok(count as usize)
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }
}

#[async_trait]
impl LearningStore for SqliteStore {
    async fn create_conversation(&self) -> Result<i64, TutorError> {
        self.conn
            .call(|conn| {
                conn.execute("INSERT INTO conversation (history) VALUES ('[]')", [])
                    ?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }

    async fn load_history(&self, conversation_id: i64) -> Result<Option<Vec<Turn>>, TutorError> {
        let raw: Option<String> = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT history FROM conversation WHERE id = ?1",
                    [conversation_id],
                    |row| row.get(0),
                )
                .optional()
                            })
            .await
            .map_err(|err| TutorError::Storage(err.to_string()))?;

        match raw {
            None => Ok(None),
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|err| TutorError::Storage(format!("corrupt history: {err}"))),
        }
    }

    async fn save_history(&self, conversation_id: i64, history: &[Turn]) -> Result<(), TutorError> {
        let json = serde_json::to_string(history)
            .map_err(|err| TutorError::Storage(err.to_string()))?;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE conversation SET history = ?1 WHERE id = ?2",
                    (&json, conversation_id),
                )
                ?;
                Ok(())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }

    async fn insert_profile(
        &self,
        conversation_id: i64,
        preferred_format: Option<&str>,
        raw_history: &Value,
        assessments: &Value,
    ) -> Result<i64, TutorError> {
        let preferred_format = preferred_format.map(str::to_string);
        let raw_history = raw_history.to_string();
        let assessments = assessments.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO profile_information
                         (conversation_id, preferred_format, raw_history, assessments)
                     VALUES (?1, ?2, ?3, ?4)",
                    (conversation_id, &preferred_format, &raw_history, &assessments),
                )
                ?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }

    async fn insert_content(&self, row: &ContentRow) -> Result<i64, TutorError> {
        let row = row.clone();
        let extra_metadata = row.extra_metadata.to_string();

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO personalized_learning_contents
                         (conversation_id, analysis_id, subtopic, level,
                          content_format, title, script, extra_metadata)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    (
                        row.conversation_id,
                        row.analysis_id,
                        &row.subtopic,
                        &row.level,
                        &row.content_format,
                        &row.title,
                        &row.script,
                        &extra_metadata,
                    ),
                )
                ?;
                Ok(conn.last_insert_rowid())
            })
            .await
            .map_err(|err: tokio_rusqlite::Error| TutorError::Storage(err.to_string()))
    }
}
