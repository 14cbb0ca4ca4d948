//! # Preview Cache
//!
//! One materialized view per board holding, for every thread, the opening
//! message plus the most recent `n_last_msg` messages, pre-ranked by
//! (pinned desc, last bumped desc, thread id).
//!
//! The view is rebuilt with `REFRESH MATERIALIZED VIEW CONCURRENTLY`, which
//! builds a new copy and diffs it in without taking a lock that blocks
//! readers. That mode requires the unique index on `(thread_id, message_id)`.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rb_core::{AppError, Message, Result, Thread};
use sqlx::FromRow;

use crate::naming::BoardTables;
use crate::querier::{board_error, Querier};

/// A flat row of the preview cache.
#[derive(Debug, Clone, FromRow)]
pub struct PreviewRow {
    pub thread_id: i64,
    pub title: String,
    pub message_count: i32,
    pub last_bumped_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub message_id: i64,
    pub author_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub ordinal: i32,
    pub is_opening_message: bool,
    pub thread_rank: i64,
}

pub(crate) fn create_view_sql(tables: &BoardTables, n_last_msg: i32) -> String {
    format!(
        r#"
        CREATE MATERIALIZED VIEW {cache} AS
        SELECT t.id AS thread_id, t.title, t.message_count, t.last_bumped_at, t.is_pinned,
               m.id AS message_id, m.author_id, m.text, m.created_at, m.updated_at,
               m.ordinal, m.is_opening_message,
               DENSE_RANK() OVER (ORDER BY t.is_pinned DESC, t.last_bumped_at DESC, t.id) AS thread_rank
        FROM {threads} t
        JOIN (
            SELECT msg.*, ROW_NUMBER() OVER (PARTITION BY msg.thread_id ORDER BY msg.ordinal DESC) AS recency
            FROM {messages} msg
        ) m ON m.thread_id = t.id
        WHERE m.is_opening_message OR m.recency <= {n_last_msg}
        WITH DATA
        "#,
        cache = tables.cache(),
        threads = tables.threads(),
        messages = tables.messages(),
        n_last_msg = n_last_msg,
    )
}

/// Creates the board's preview cache and its indexes. Runs inside the
/// board-creation transaction, while the partitions are still empty.
pub async fn create_preview_cache(
    q: &mut dyn Querier,
    tables: &BoardTables,
    n_last_msg: i32,
) -> Result<()> {
    if n_last_msg < 1 {
        return Err(AppError::ValidationError(format!(
            "n_last_msg must be at least 1, got {}",
            n_last_msg
        )));
    }

    let view = create_view_sql(tables, n_last_msg);
    q.execute(sqlx::query(&view))
        .await
        .with_context(|| format!("failed to create preview cache for board {}", tables.board()))?;

    let key_index = format!(
        "CREATE UNIQUE INDEX {} ON {} (thread_id, message_id)",
        tables.cache_key_index(),
        tables.cache()
    );
    q.execute(sqlx::query(&key_index))
        .await
        .context("failed to create preview cache key index")?;

    let rank_index = format!(
        "CREATE INDEX {} ON {} (thread_rank, ordinal)",
        tables.cache_rank_index(),
        tables.cache()
    );
    q.execute(sqlx::query(&rank_index))
        .await
        .context("failed to create preview cache rank index")?;

    Ok(())
}

/// Rebuilds the board's preview cache without blocking its readers.
pub async fn refresh_preview_cache(q: &mut dyn Querier, tables: &BoardTables) -> Result<()> {
    let sql = format!("REFRESH MATERIALIZED VIEW CONCURRENTLY {}", tables.cache());
    q.execute(sqlx::query(&sql))
        .await
        .map_err(|err| board_error(err, tables.board(), "failed to refresh preview cache"))?;
    Ok(())
}

/// Cache rows of threads ranked within `[first_rank, last_rank]`, ordered by
/// rank then ordinal.
pub async fn fetch_preview_window(
    q: &mut dyn Querier,
    tables: &BoardTables,
    first_rank: i64,
    last_rank: i64,
) -> Result<Vec<PreviewRow>> {
    let sql = format!(
        r#"
        SELECT thread_id, title, message_count, last_bumped_at, is_pinned,
               message_id, author_id, text, created_at, updated_at,
               ordinal, is_opening_message, thread_rank
        FROM {}
        WHERE thread_rank BETWEEN $1 AND $2
        ORDER BY thread_rank, ordinal
        "#,
        tables.cache()
    );
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(first_rank).bind(last_rank))
        .await
        .with_context(|| format!("failed to read preview cache of board {}", tables.board()))?;

    rows.iter()
        .map(|row| PreviewRow::from_row(row).context("malformed preview cache row"))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(AppError::from)
}

/// Folds flat cache rows into threads. A new thread starts whenever the
/// thread id changes between consecutive rows.
pub fn group_preview_rows(board: &str, rows: Vec<PreviewRow>) -> Vec<Thread> {
    let mut threads: Vec<Thread> = Vec::new();
    for row in rows {
        let message = Message {
            id: row.message_id,
            author_id: row.author_id,
            text: row.text,
            created_at: row.created_at,
            updated_at: row.updated_at,
            thread_id: row.thread_id,
            board: board.to_string(),
            ordinal: row.ordinal,
            is_opening_message: row.is_opening_message,
            replies: Vec::new(),
            attachments: Vec::new(),
        };

        match threads.last_mut() {
            Some(thread) if thread.id == row.thread_id => thread.messages.push(message),
            _ => threads.push(Thread {
                id: row.thread_id,
                title: row.title,
                board: board.to_string(),
                message_count: row.message_count,
                last_bumped_at: row.last_bumped_at,
                is_pinned: row.is_pinned,
                messages: vec![message],
            }),
        }
    }
    threads
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rb_core::ShortName;

    fn row(thread_id: i64, rank: i64, message_id: i64, ordinal: i32) -> PreviewRow {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        PreviewRow {
            thread_id,
            title: format!("thread {}", thread_id),
            message_count: 4,
            last_bumped_at: at,
            is_pinned: false,
            message_id,
            author_id: 7,
            text: format!("message {}", message_id),
            created_at: at,
            updated_at: at,
            ordinal,
            is_opening_message: ordinal == 1,
            thread_rank: rank,
        }
    }

    #[test]
    fn grouping_splits_on_thread_change() {
        let rows = vec![
            row(10, 1, 100, 1),
            row(10, 1, 102, 3),
            row(10, 1, 103, 4),
            row(4, 2, 40, 1),
            row(9, 3, 90, 1),
            row(9, 3, 91, 2),
        ];

        let threads = group_preview_rows("b", rows);

        let shape: Vec<(i64, Vec<i32>)> = threads
            .iter()
            .map(|t| (t.id, t.messages.iter().map(|m| m.ordinal).collect()))
            .collect();
        assert_eq!(
            shape,
            vec![(10, vec![1, 3, 4]), (4, vec![1]), (9, vec![1, 2])]
        );
        assert!(threads.iter().all(|t| t.board == "b"));
        assert!(threads[0].messages[0].is_opening_message);
    }

    #[test]
    fn grouping_empty_window() {
        assert!(group_preview_rows("b", Vec::new()).is_empty());
    }

    #[test]
    fn view_keeps_opener_and_recent_messages() {
        let tables = BoardTables::new(&ShortName::parse("b1").unwrap());
        let sql = create_view_sql(&tables, 3);
        assert!(sql.contains("CREATE MATERIALIZED VIEW \"board_preview_b1\""));
        assert!(sql.contains("FROM \"threads_b1\" t"));
        assert!(sql.contains("FROM \"messages_b1\" msg"));
        assert!(sql.contains("m.recency <= 3"));
        assert!(sql.contains("ORDER BY t.is_pinned DESC, t.last_bumped_at DESC, t.id"));
    }
}
