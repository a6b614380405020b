//! SQLite persistence for enrolled templates.
//!
//! The in-memory [`TemplateStore`](turnstile_core::TemplateStore) is the
//! source of truth while running; this database mirrors it (via the
//! [`TemplateSink`] impl) and rehydrates it at startup.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::params;
use thiserror::Error;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use turnstile_core::templates::SinkError;
use turnstile_core::{Embedding, EnrollMode, Template, TemplateSink};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),
    #[error("cannot create database directory {path}: {source}")]
    CreateDir { path: PathBuf, source: std::io::Error },
    #[error("corrupt template row {id}: {message}")]
    CorruptRow { id: String, message: String },
}

#[derive(Clone)]
pub struct Database {
    conn: Connection,
}

impl Database {
    pub async fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| DbError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let conn = Connection::open(path).await?;
        conn.call(|c| {
            c.execute_batch(
                "CREATE TABLE IF NOT EXISTS templates (
                    id TEXT PRIMARY KEY,
                    identity TEXT NOT NULL,
                    embedding TEXT NOT NULL,
                    created_at TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_templates_identity
                    ON templates (identity);",
            )?;
            Ok(())
        })
        .await?;

        tracing::info!(path = %path.display(), "template database opened");
        Ok(Database { conn })
    }

    /// Every persisted template, for hydrating the in-memory store.
    pub async fn load_templates(&self) -> Result<Vec<Template>, DbError> {
        let rows = self
            .conn
            .call(|c| {
                let mut stmt = c.prepare(
                    "SELECT id, identity, embedding, created_at
                     FROM templates ORDER BY created_at, id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, String>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, identity, embedding, created_at)| {
                let parsed_id = Uuid::parse_str(&id).map_err(|e| DbError::CorruptRow {
                    id: id.clone(),
                    message: format!("bad uuid: {e}"),
                })?;
                let embedding: Embedding =
                    serde_json::from_str(&embedding).map_err(|e| DbError::CorruptRow {
                        id: id.clone(),
                        message: format!("bad embedding json: {e}"),
                    })?;
                let created_at = DateTime::parse_from_rfc3339(&created_at)
                    .map_err(|e| DbError::CorruptRow {
                        id: id.clone(),
                        message: format!("bad timestamp: {e}"),
                    })?
                    .with_timezone(&Utc);
                Ok(Template { id: parsed_id, identity, embedding, created_at })
            })
            .collect()
    }
}

impl TemplateSink for Database {
    async fn persist(
        &self,
        identity: &str,
        templates: &[Template],
        mode: EnrollMode,
    ) -> Result<(), SinkError> {
        let identity = identity.to_string();
        let rows = templates
            .iter()
            .map(|t| {
                Ok((
                    t.id.to_string(),
                    t.identity.clone(),
                    serde_json::to_string(&t.embedding)?,
                    t.created_at.to_rfc3339(),
                ))
            })
            .collect::<Result<Vec<_>, serde_json::Error>>()
            .map_err(|e| Box::new(e) as SinkError)?;

        self.conn
            .call(move |c| {
                let tx = c.transaction()?;
                if mode == EnrollMode::ReplaceAll {
                    tx.execute("DELETE FROM templates WHERE identity = ?1", params![identity])?;
                }
                {
                    let mut stmt = tx.prepare(
                        "INSERT INTO templates (id, identity, embedding, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                    )?;
                    for (id, identity, embedding, created_at) in &rows {
                        stmt.execute(params![id, identity, embedding, created_at])?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(|e| Box::new(e) as SinkError)
    }

    async fn clear(&self) -> Result<(), SinkError> {
        self.conn
            .call(|c| {
                c.execute("DELETE FROM templates", [])?;
                Ok(())
            })
            .await
            .map_err(|e| Box::new(e) as SinkError)
    }
}
