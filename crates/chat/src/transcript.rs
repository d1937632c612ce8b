//! The persisted conversation transcript.
//!
//! An append-only log of every exchanged message, keyed by conversation id,
//! used for audit and history display. Independent of the in-memory context:
//! the transcript is unbounded and never trimmed.

use async_trait::async_trait;
use lorebook_core::error::TranscriptError;
use lorebook_core::message::{ConversationId, Message};

/// Append-only conversation log.
#[async_trait]
pub trait TranscriptLog: Send + Sync {
    /// Append one message to a conversation's transcript.
    async fn append(
        &self,
        id: &ConversationId,
        message: &Message,
    ) -> Result<(), TranscriptError>;

    /// The full transcript of one conversation, oldest first.
    async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, TranscriptError>;

    /// All conversation ids with at least one logged message.
    async fn conversations(&self) -> Result<Vec<String>, TranscriptError>;
}

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteTranscript;

#[cfg(feature = "sqlite")]
mod sqlite {
    use super::*;
    use chrono::{DateTime, Utc};
    use lorebook_core::message::Role;
    use sqlx::sqlite::{
        SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
    };
    use sqlx::{Row, SqlitePool};
    use std::str::FromStr;
    use tracing::info;

    /// SQLite-backed transcript log.
    pub struct SqliteTranscript {
        pool: SqlitePool,
    }

    impl SqliteTranscript {
        /// Open (or create) the transcript database at `path`.
        ///
        /// Pass `":memory:"` for an in-process ephemeral database (useful
        /// for tests).
        pub async fn new(path: &str) -> Result<Self, TranscriptError> {
            let options = SqliteConnectOptions::from_str(path)
                .map_err(|e| TranscriptError::Storage(format!("Invalid SQLite path: {e}")))?
                .create_if_missing(true)
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);

            let pool = SqlitePoolOptions::new()
                .max_connections(4)
                .connect_with(options)
                .await
                .map_err(|e| TranscriptError::Storage(format!("Failed to open SQLite: {e}")))?;

            let log = Self { pool };
            log.run_migrations().await?;
            info!("SQLite transcript log initialized at {path}");
            Ok(log)
        }

        async fn run_migrations(&self) -> Result<(), TranscriptError> {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS transcript (
                    iid             INTEGER PRIMARY KEY AUTOINCREMENT,
                    conversation_id TEXT NOT NULL,
                    message_id      TEXT NOT NULL,
                    role            TEXT NOT NULL,
                    content         TEXT NOT NULL,
                    created_at      TEXT NOT NULL
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map_err(|e| TranscriptError::Storage(format!("transcript table: {e}")))?;

            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_transcript_conversation
                 ON transcript(conversation_id, iid)",
            )
            .execute(&self.pool)
            .await
            .map_err(|e| TranscriptError::Storage(format!("transcript index: {e}")))?;

            Ok(())
        }

        fn role_to_str(role: Role) -> &'static str {
            match role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            }
        }

        fn role_from_str(s: &str) -> Result<Role, TranscriptError> {
            match s {
                "system" => Ok(Role::System),
                "user" => Ok(Role::User),
                "assistant" => Ok(Role::Assistant),
                other => Err(TranscriptError::QueryFailed(format!(
                    "unknown role in transcript: {other}"
                ))),
            }
        }
    }

    #[async_trait]
    impl TranscriptLog for SqliteTranscript {
        async fn append(
            &self,
            id: &ConversationId,
            message: &Message,
        ) -> Result<(), TranscriptError> {
            sqlx::query(
                "INSERT INTO transcript (conversation_id, message_id, role, content, created_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(id.as_str())
            .bind(&message.id)
            .bind(Self::role_to_str(message.role))
            .bind(&message.content)
            .bind(message.timestamp.to_rfc3339())
            .execute(&self.pool)
            .await
            .map_err(|e| TranscriptError::Storage(e.to_string()))?;

            Ok(())
        }

        async fn messages(&self, id: &ConversationId) -> Result<Vec<Message>, TranscriptError> {
            let rows = sqlx::query(
                "SELECT message_id, role, content, created_at FROM transcript
                 WHERE conversation_id = ? ORDER BY iid ASC",
            )
            .bind(id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TranscriptError::QueryFailed(e.to_string()))?;

            rows.into_iter()
                .map(|row| {
                    let timestamp: String = row.get("created_at");
                    Ok(Message {
                        id: row.get("message_id"),
                        role: Self::role_from_str(row.get("role"))?,
                        content: row.get("content"),
                        timestamp: DateTime::parse_from_rfc3339(&timestamp)
                            .map(|t| t.with_timezone(&Utc))
                            .map_err(|e| TranscriptError::QueryFailed(e.to_string()))?,
                    })
                })
                .collect()
        }

        async fn conversations(&self) -> Result<Vec<String>, TranscriptError> {
            let rows = sqlx::query(
                "SELECT DISTINCT conversation_id FROM transcript ORDER BY conversation_id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(|e| TranscriptError::QueryFailed(e.to_string()))?;

            Ok(rows.into_iter().map(|row| row.get("conversation_id")).collect())
        }
    }

}
