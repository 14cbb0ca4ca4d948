//! Base schema: shared tables and the partitioned parents.
//!
//! Per-board partitions and caches are created by the board lifecycle
//! (see [`crate::boards`]); this only makes sure the parents exist.
//! Every statement is idempotent.

use anyhow::Context;
use rb_core::Result;
use sqlx::PgPool;

const TABLES: &[(&str, &str)] = &[
    (
        "boards",
        r#"
        CREATE TABLE IF NOT EXISTS boards (
            short_name TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            last_activity_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "board_permissions",
        r#"
        CREATE TABLE IF NOT EXISTS board_permissions (
            board_short_name TEXT NOT NULL REFERENCES boards(short_name) ON DELETE CASCADE,
            allowed_email_domain TEXT NOT NULL,
            PRIMARY KEY (board_short_name, allowed_email_domain)
        )
        "#,
    ),
    (
        "files",
        r#"
        CREATE TABLE IF NOT EXISTS files (
            id BIGSERIAL PRIMARY KEY,
            file_path TEXT NOT NULL,
            filename TEXT NOT NULL,
            original_filename TEXT NOT NULL,
            file_size_bytes BIGINT NOT NULL,
            mime_type TEXT NOT NULL,
            image_width INTEGER,
            image_height INTEGER,
            thumbnail_path TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    ),
    (
        "threads",
        r#"
        CREATE TABLE IF NOT EXISTS threads (
            id BIGSERIAL NOT NULL,
            title TEXT NOT NULL,
            board TEXT NOT NULL REFERENCES boards(short_name) ON DELETE CASCADE,
            message_count INTEGER NOT NULL DEFAULT 0,
            last_bumped_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            is_pinned BOOLEAN NOT NULL DEFAULT FALSE,
            PRIMARY KEY (board, id)
        ) PARTITION BY LIST (board)
        "#,
    ),
    (
        "messages",
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id BIGSERIAL NOT NULL,
            author_id BIGINT NOT NULL,
            text TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL,
            updated_at TIMESTAMPTZ NOT NULL,
            thread_id BIGINT NOT NULL,
            ordinal INTEGER NOT NULL,
            is_opening_message BOOLEAN NOT NULL DEFAULT FALSE,
            board TEXT NOT NULL,
            PRIMARY KEY (board, id),
            UNIQUE (board, thread_id, ordinal),
            CHECK (is_opening_message = (ordinal = 1))
        ) PARTITION BY LIST (board)
        "#,
    ),
    (
        "attachments",
        r#"
        CREATE TABLE IF NOT EXISTS attachments (
            id BIGSERIAL NOT NULL,
            board TEXT NOT NULL,
            thread_id BIGINT NOT NULL,
            message_id BIGINT NOT NULL,
            file_id BIGINT NOT NULL REFERENCES files(id) ON DELETE CASCADE,
            PRIMARY KEY (board, id)
        ) PARTITION BY LIST (board)
        "#,
    ),
    (
        "message_replies",
        r#"
        CREATE TABLE IF NOT EXISTS message_replies (
            board TEXT NOT NULL,
            sender_message_id BIGINT NOT NULL,
            sender_thread_id BIGINT NOT NULL,
            receiver_message_id BIGINT NOT NULL,
            receiver_thread_id BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            PRIMARY KEY (board, sender_message_id, receiver_message_id)
        ) PARTITION BY LIST (board)
        "#,
    ),
];

// Indexes on partitioned parents cascade to every partition, present and future.
const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS boards_last_activity_idx ON boards (last_activity_at)",
    "CREATE INDEX IF NOT EXISTS board_permissions_domain_idx ON board_permissions (allowed_email_domain)",
    "CREATE INDEX IF NOT EXISTS threads_bump_order_idx ON threads (board, is_pinned DESC, last_bumped_at DESC, id)",
    "CREATE INDEX IF NOT EXISTS attachments_thread_idx ON attachments (board, thread_id)",
    "CREATE INDEX IF NOT EXISTS attachments_message_idx ON attachments (board, message_id)",
    "CREATE INDEX IF NOT EXISTS message_replies_receiver_idx ON message_replies (board, receiver_thread_id, receiver_message_id)",
];

/// Serializes concurrent bootstraps; `CREATE ... IF NOT EXISTS` alone
/// races on the catalog.
const BOOTSTRAP_LOCK_KEY: i64 = 0x7262_5f73_6368_656d;

/// Creates the shared tables, partitioned parents and their indexes.
pub async fn bootstrap(pool: &PgPool) -> Result<()> {
    tracing::info!("Bootstrapping storage schema...");

    let mut tx = pool.begin().await.context("failed to begin schema bootstrap")?;
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(BOOTSTRAP_LOCK_KEY)
        .execute(&mut *tx)
        .await
        .context("failed to take schema bootstrap lock")?;
    for (table, ddl) in TABLES {
        sqlx::query(ddl)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to create table {}", table))?;
    }
    for ddl in INDEXES {
        sqlx::query(ddl)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to run {}", ddl))?;
    }
    tx.commit().await.context("failed to commit schema bootstrap")?;

    tracing::info!("Storage schema ready");
    Ok(())
}
