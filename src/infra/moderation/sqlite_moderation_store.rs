// SQLite-backed persistence for the moderation engine.
//
// Tables:
// - moderation_config: per-guild config overrides as JSON
// - blacklist_words: one row per (guild, word)
// - active_mutes: durable mute records, removed when a mute is lifted
// - warning_events: violation audit trail used to rebuild escalation state
//
// Timestamps are stored as unix milliseconds so range queries compare numbers.

use crate::core::moderation::{
    BlacklistRepository, ConfigRepository, GroupConfig, MemberKey, ModerationError, MuteRecord,
    MuteRepository, WarningLedger,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Pool, Row, Sqlite};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;

pub struct SqliteModerationStore {
    pool: Pool<Sqlite>,
}

fn storage_error(e: impl std::fmt::Display) -> ModerationError {
    ModerationError::Persistence(e.to_string())
}

fn from_millis(millis: i64) -> Result<DateTime<Utc>, ModerationError> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| storage_error(format!("timestamp out of range: {}", millis)))
}

impl SqliteModerationStore {
    /// Open (creating if needed) the database file and run migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let path_str = database_url.trim_start_matches("sqlite://");
        if !database_url.contains(":memory:") && !Path::new(path_str).exists() {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::File::create(path_str)?;
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Create the moderation tables if they do not exist yet.
    pub async fn migrate(&self) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS moderation_config (
                guild_id INTEGER PRIMARY KEY,
                config_json TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS blacklist_words (
                guild_id INTEGER NOT NULL,
                word TEXT NOT NULL,
                PRIMARY KEY (guild_id, word)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS active_mutes (
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (guild_id, user_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS warning_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                guild_id INTEGER NOT NULL,
                user_id INTEGER NOT NULL,
                occurred_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_warning_events_time
                ON warning_events(occurred_at);
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;

        Ok(())
    }
}

#[async_trait]
impl ConfigRepository for SqliteModerationStore {
    async fn load_overrides(&self) -> Result<Vec<(u64, String)>, ModerationError> {
        let rows = sqlx::query("SELECT guild_id, config_json FROM moderation_config")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let guild_id: i64 = row.get("guild_id");
                let raw: String = row.get("config_json");
                (guild_id as u64, raw)
            })
            .collect())
    }

    async fn save_override(
        &self,
        group_id: u64,
        config: &GroupConfig,
    ) -> Result<(), ModerationError> {
        let raw = serde_json::to_string(config).map_err(storage_error)?;
        sqlx::query(
            r#"
            INSERT INTO moderation_config (guild_id, config_json)
            VALUES (?, ?)
            ON CONFLICT(guild_id) DO UPDATE SET
                config_json = excluded.config_json
            "#,
        )
        .bind(group_id as i64)
        .bind(raw)
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl BlacklistRepository for SqliteModerationStore {
    async fn load_all(&self) -> Result<HashMap<u64, BTreeSet<String>>, ModerationError> {
        let rows = sqlx::query("SELECT guild_id, word FROM blacklist_words")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut sets: HashMap<u64, BTreeSet<String>> = HashMap::new();
        for row in rows {
            let guild_id: i64 = row.get("guild_id");
            let word: String = row.get("word");
            sets.entry(guild_id as u64).or_default().insert(word);
        }
        Ok(sets)
    }

    async fn save_words(
        &self,
        group_id: u64,
        words: &BTreeSet<String>,
    ) -> Result<(), ModerationError> {
        // Replace the whole set atomically so a crash never leaves half a list
        let mut tx = self.pool.begin().await.map_err(storage_error)?;

        sqlx::query("DELETE FROM blacklist_words WHERE guild_id = ?")
            .bind(group_id as i64)
            .execute(&mut *tx)
            .await
            .map_err(storage_error)?;

        for word in words {
            sqlx::query("INSERT INTO blacklist_words (guild_id, word) VALUES (?, ?)")
                .bind(group_id as i64)
                .bind(word)
                .execute(&mut *tx)
                .await
                .map_err(storage_error)?;
        }

        tx.commit().await.map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl MuteRepository for SqliteModerationStore {
    async fn load_all(&self) -> Result<Vec<MuteRecord>, ModerationError> {
        let rows = sqlx::query("SELECT guild_id, user_id, expires_at FROM active_mutes")
            .fetch_all(&self.pool)
            .await
            .map_err(storage_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let guild_id: i64 = row.get("guild_id");
            let user_id: i64 = row.get("user_id");
            let expires_at: i64 = row.get("expires_at");
            records.push(MuteRecord {
                group_id: guild_id as u64,
                user_id: user_id as u64,
                expires_at: from_millis(expires_at)?,
            });
        }
        Ok(records)
    }

    async fn save(&self, record: &MuteRecord) -> Result<(), ModerationError> {
        sqlx::query(
            r#"
            INSERT INTO active_mutes (guild_id, user_id, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT(guild_id, user_id) DO UPDATE SET
                expires_at = excluded.expires_at
            "#,
        )
        .bind(record.group_id as i64)
        .bind(record.user_id as i64)
        .bind(record.expires_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(storage_error)?;
        Ok(())
    }

    async fn delete(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError> {
        sqlx::query("DELETE FROM active_mutes WHERE guild_id = ? AND user_id = ?")
            .bind(group_id as i64)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }
}

#[async_trait]
impl WarningLedger for SqliteModerationStore {
    async fn append(
        &self,
        group_id: u64,
        user_id: u64,
        at: DateTime<Utc>,
    ) -> Result<(), ModerationError> {
        sqlx::query("INSERT INTO warning_events (guild_id, user_id, occurred_at) VALUES (?, ?, ?)")
            .bind(group_id as i64)
            .bind(user_id as i64)
            .bind(at.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn clear(&self, group_id: u64, user_id: u64) -> Result<(), ModerationError> {
        sqlx::query("DELETE FROM warning_events WHERE guild_id = ? AND user_id = ?")
            .bind(group_id as i64)
            .bind(user_id as i64)
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;
        Ok(())
    }

    async fn load_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<(MemberKey, DateTime<Utc>)>, ModerationError> {
        // Older events can never count again; drop them while we are here
        sqlx::query("DELETE FROM warning_events WHERE occurred_at < ?")
            .bind(since.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(storage_error)?;

        let rows = sqlx::query(
            r#"
            SELECT guild_id, user_id, occurred_at
            FROM warning_events
            WHERE occurred_at >= ?
            ORDER BY occurred_at ASC, id ASC
            "#,
        )
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_error)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in rows {
            let guild_id: i64 = row.get("guild_id");
            let user_id: i64 = row.get("user_id");
            let occurred_at: i64 = row.get("occurred_at");
            events.push(((guild_id as u64, user_id as u64), from_millis(occurred_at)?));
        }
        Ok(events)
    }
}
