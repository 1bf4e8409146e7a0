//! Database pool construction and schema setup.

use std::str::FromStr as _;

use anyhow::Context as _;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode},
    SqlitePool,
};

/// Open (creating if missing) the sqlite database behind `url` in WAL mode.
pub async fn establish_pool(url: &str) -> anyhow::Result<SqlitePool> {
    let opts = SqliteConnectOptions::from_str(url)
        .context("failed to parse database options")?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal);

    SqlitePool::connect_with(opts)
        .await
        .context("failed to connect to database")
}

/// Create any missing tables and indexes. Ran once on startup; every
/// statement is idempotent.
pub async fn init_schema(db: &SqlitePool) -> anyhow::Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS submissions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            task_id TEXT NOT NULL,
            status TEXT NOT NULL,
            submitted_at TEXT NOT NULL,
            reviewed_at TEXT,
            reviewed_by TEXT,
            rejection_reason TEXT,
            moderator_note TEXT,
            proof_file_key TEXT,
            proof_file_type TEXT,
            user_note TEXT,
            reward_tx_hash TEXT,
            reward_paid_at TEXT,
            submission_hash TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_submissions_user_task ON submissions (user_id, task_id)",
        "CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions (status)",
        r#"
        CREATE TABLE IF NOT EXISTS moderation_actions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            submission_id TEXT NOT NULL,
            admin_id TEXT NOT NULL,
            action TEXT NOT NULL,
            previous_status TEXT NOT NULL,
            new_status TEXT NOT NULL,
            reason TEXT,
            internal_note TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_actions_submission ON moderation_actions (submission_id, created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS platform_users (
            id TEXT PRIMARY KEY,
            wallet_address TEXT NOT NULL UNIQUE,
            total_approved INTEGER NOT NULL DEFAULT 0,
            total_rejected INTEGER NOT NULL DEFAULT 0,
            total_pending INTEGER NOT NULL DEFAULT 0,
            is_suspended INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS tasks (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            reward_amount TEXT NOT NULL,
            reward_token TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS webhook_events (
            id TEXT PRIMARY KEY,
            event_type TEXT NOT NULL,
            payload TEXT NOT NULL,
            target_url TEXT NOT NULL,
            status TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_attempt_at TEXT,
            last_error TEXT,
            delivered_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_webhook_events_status ON webhook_events (status, created_at)",
        r#"
        CREATE TABLE IF NOT EXISTS admins (
            id TEXT PRIMARY KEY,
            username TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            role TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            token TEXT PRIMARY KEY,
            admin_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        )
        "#,
    ];

    for statement in statements {
        sqlx::query(statement)
            .execute(db)
            .await
            .context("failed to initialize schema")?;
    }

    Ok(())
}

/// An isolated in-memory database with the full schema applied.
#[cfg(test)]
pub(crate) async fn test_pool() -> anyhow::Result<SqlitePool> {
    // A single connection keeps every handle on the same in-memory database.
    let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let db = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(opts)
        .await?;
    init_schema(&db).await?;
    Ok(db)
}
