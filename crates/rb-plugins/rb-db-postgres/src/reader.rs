//! # Pagination Reader
//!
//! Board pages come from the preview cache; thread pages and single
//! messages come from the partitions directly. Small threads are read
//! whole with three flat queries, large ones through a window that always
//! carries the opening message.

use anyhow::Context;
use chrono::{DateTime, Utc};
use rb_core::pagination::{check_page, limit_offset, rank_window, total_pages};
use rb_core::{AppError, BoardPage, Message, Result, Thread, ThreadPage};
use sqlx::postgres::PgRow;
use sqlx::FromRow;
use tracing::debug;

use crate::boards;
use crate::cache::{fetch_preview_window, group_preview_rows};
use crate::enrich::{
    distribute_attachments, distribute_replies, enrich_with_attachments, enrich_with_replies,
    fetch_thread_attachments, fetch_thread_replies,
};
use crate::naming::BoardTables;
use crate::querier::{board_error, Querier};

#[derive(Debug, FromRow)]
struct ThreadRow {
    id: i64,
    title: String,
    message_count: i32,
    last_bumped_at: DateTime<Utc>,
    is_pinned: bool,
}

#[derive(Debug, FromRow)]
struct MessageRow {
    id: i64,
    author_id: i64,
    text: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    thread_id: i64,
    ordinal: i32,
    is_opening_message: bool,
}

impl MessageRow {
    fn into_message(self, board: &str) -> Message {
        Message {
            id: self.id,
            author_id: self.author_id,
            text: self.text,
            created_at: self.created_at,
            updated_at: self.updated_at,
            thread_id: self.thread_id,
            board: board.to_string(),
            ordinal: self.ordinal,
            is_opening_message: self.is_opening_message,
            replies: Vec::new(),
            attachments: Vec::new(),
        }
    }
}

const MESSAGE_COLUMNS: &str =
    "id, author_id, text, created_at, updated_at, thread_id, ordinal, is_opening_message";

fn decode_messages(rows: Vec<PgRow>, board: &str) -> Result<Vec<Message>> {
    rows.iter()
        .map(|row| {
            MessageRow::from_row(row)
                .map(|m| m.into_message(board))
                .context("malformed message row")
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(AppError::from)
}

async fn fetch_thread(q: &mut dyn Querier, tables: &BoardTables, thread_id: i64) -> Result<Thread> {
    let sql = format!(
        "SELECT id, title, message_count, last_bumped_at, is_pinned FROM {} WHERE id = $1",
        tables.threads()
    );
    let row = q
        .fetch_optional(sqlx::query(&sql).bind(thread_id))
        .await
        .map_err(|err| board_error(err, tables.board(), "failed to fetch thread"))?
        .ok_or_else(|| AppError::not_found("Thread", thread_id))?;
    let row = ThreadRow::from_row(&row).context("malformed thread row")?;

    Ok(Thread {
        id: row.id,
        title: row.title,
        board: tables.board().to_string(),
        message_count: row.message_count,
        last_bumped_at: row.last_bumped_at,
        is_pinned: row.is_pinned,
        messages: Vec::new(),
    })
}

/// One page of a board, read from its preview cache and enriched.
///
/// The cache may lag writes by up to one refresh interval.
pub async fn get_board_page(
    q: &mut dyn Querier,
    tables: &BoardTables,
    page: i64,
    threads_per_page: i64,
    messages_per_page: i64,
) -> Result<BoardPage> {
    check_page(page, threads_per_page)?;
    let board = boards::get_board(q, tables.board()).await?;

    let (first_rank, last_rank) = rank_window(page, threads_per_page)?;
    let rows = fetch_preview_window(q, tables, first_rank, last_rank).await?;
    let mut threads = group_preview_rows(tables.board().as_str(), rows);

    let mut batch: Vec<&mut Message> = threads
        .iter_mut()
        .flat_map(|thread| thread.messages.iter_mut())
        .collect();
    enrich_with_replies(q, tables, &mut batch, messages_per_page).await?;
    enrich_with_attachments(q, tables, &mut batch).await?;

    Ok(BoardPage {
        board,
        threads,
        page,
    })
}

/// One page of a thread.
///
/// Threads with at most `single_page_threshold` messages are always served
/// whole as page 1 of 1. Longer threads are windowed `per_page` messages at
/// a time, and every page starts with the opening message.
pub async fn get_thread_page(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
    page: i64,
    per_page: i64,
    single_page_threshold: i32,
) -> Result<ThreadPage> {
    check_page(page, per_page)?;
    let mut thread = fetch_thread(q, tables, thread_id).await?;
    let total_count = i64::from(thread.message_count);
    let board = tables.board().as_str();

    if thread.message_count <= single_page_threshold {
        let sql = format!(
            "SELECT {} FROM {} WHERE thread_id = $1 ORDER BY ordinal",
            MESSAGE_COLUMNS,
            tables.messages()
        );
        let rows = q
            .fetch_all(sqlx::query(&sql).bind(thread_id))
            .await
            .context("failed to fetch thread messages")?;
        thread.messages = decode_messages(rows, board)?;

        let replies = fetch_thread_replies(q, tables, thread_id).await?;
        let attachments = fetch_thread_attachments(q, tables, thread_id).await?;
        let mut batch: Vec<&mut Message> = thread.messages.iter_mut().collect();
        distribute_replies(board, &mut batch, replies, per_page);
        distribute_attachments(board, &mut batch, attachments);

        debug!(board = %board, thread_id, messages = thread.messages.len(), "served whole thread");
        return Ok(ThreadPage {
            thread,
            page: 1,
            total_pages: 1,
            total_count,
        });
    }

    let (limit, offset) = limit_offset(page, per_page)?;
    let sql = format!(
        "SELECT {columns} FROM {messages} \
         WHERE thread_id = $1 AND (is_opening_message OR id IN ( \
             SELECT id FROM {messages} WHERE thread_id = $1 ORDER BY ordinal LIMIT $2 OFFSET $3 \
         )) \
         ORDER BY ordinal",
        columns = MESSAGE_COLUMNS,
        messages = tables.messages()
    );
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(thread_id).bind(limit).bind(offset))
        .await
        .context("failed to fetch thread window")?;
    thread.messages = decode_messages(rows, board)?;

    let mut batch: Vec<&mut Message> = thread.messages.iter_mut().collect();
    enrich_with_replies(q, tables, &mut batch, per_page).await?;
    enrich_with_attachments(q, tables, &mut batch).await?;

    debug!(board = %board, thread_id, page, "served thread window");
    Ok(ThreadPage {
        thread,
        page,
        total_pages: total_pages(total_count, per_page),
        total_count,
    })
}

/// A single message with its replies and attachments.
pub async fn get_message(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
    message_id: i64,
    per_page: i64,
) -> Result<Message> {
    let sql = format!(
        "SELECT {} FROM {} WHERE id = $1 AND thread_id = $2",
        MESSAGE_COLUMNS,
        tables.messages()
    );
    let row = q
        .fetch_optional(sqlx::query(&sql).bind(message_id).bind(thread_id))
        .await
        .map_err(|err| board_error(err, tables.board(), "failed to fetch message"))?
        .ok_or_else(|| AppError::not_found("Message", message_id))?;
    let mut message = MessageRow::from_row(&row)
        .context("malformed message row")?
        .into_message(tables.board().as_str());

    let mut batch = [&mut message];
    enrich_with_replies(q, tables, &mut batch, per_page).await?;
    enrich_with_attachments(q, tables, &mut batch).await?;
    Ok(message)
}
