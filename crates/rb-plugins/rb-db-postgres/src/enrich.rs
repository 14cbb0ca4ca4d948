//! # Reply/Attachment Enricher
//!
//! Bulk-loads the reply and attachment graphs for a batch of messages that
//! were already fetched, two queries per batch regardless of its size.
//!
//! Storage is partitioned per board, so a batch must come from a single
//! board. Mixed batches are rejected rather than silently half-enriched.

use std::collections::HashMap;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rb_core::pagination::page_of_ordinal;
use rb_core::{AppError, Attachment, File, Message, Reply, Result};
use sqlx::postgres::PgRow;
use sqlx::FromRow;

use crate::naming::BoardTables;
use crate::querier::Querier;

#[derive(Debug, Clone, FromRow)]
pub(crate) struct ReplyRow {
    pub sender_message_id: i64,
    pub sender_thread_id: i64,
    pub receiver_message_id: i64,
    pub receiver_thread_id: i64,
    pub created_at: DateTime<Utc>,
    pub sender_ordinal: i32,
}

#[derive(Debug, Clone, FromRow)]
pub(crate) struct AttachmentRow {
    pub id: i64,
    pub thread_id: i64,
    pub message_id: i64,
    pub file_id: i64,
    pub file_path: String,
    pub filename: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub mime_type: String,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub thumbnail_path: Option<String>,
    pub file_created_at: DateTime<Utc>,
}

/// `batch` optionally joins `r`, the reply partition; `condition` is an
/// optional trailing `WHERE`.
fn replies_sql(tables: &BoardTables, batch: &str, condition: &str) -> String {
    format!(
        "SELECT r.sender_message_id, r.sender_thread_id, r.receiver_message_id, \
                r.receiver_thread_id, r.created_at, s.ordinal AS sender_ordinal \
         FROM {replies} r {batch} \
         JOIN {messages} s ON s.id = r.sender_message_id {condition} \
         ORDER BY r.created_at, r.sender_message_id",
        replies = tables.replies(),
        messages = tables.messages(),
        batch = batch,
        condition = condition,
    )
}

/// Same shape as [`replies_sql`], over `a`, the attachment partition.
fn attachments_sql(tables: &BoardTables, batch: &str, condition: &str) -> String {
    format!(
        "SELECT a.id, a.thread_id, a.message_id, f.id AS file_id, f.file_path, f.filename, \
                f.original_filename, f.file_size_bytes, f.mime_type, f.image_width, \
                f.image_height, f.thumbnail_path, f.created_at AS file_created_at \
         FROM {attachments} a {batch} \
         JOIN files f ON f.id = a.file_id {condition} \
         ORDER BY a.id",
        attachments = tables.attachments(),
        batch = batch,
        condition = condition,
    )
}

const BATCH_JOIN_REPLIES: &str = "JOIN UNNEST($1::bigint[], $2::bigint[]) AS batch(thread_id, message_id) \
     ON r.receiver_thread_id = batch.thread_id AND r.receiver_message_id = batch.message_id";

const BATCH_JOIN_ATTACHMENTS: &str = "JOIN UNNEST($1::bigint[], $2::bigint[]) AS batch(thread_id, message_id) \
     ON a.thread_id = batch.thread_id AND a.message_id = batch.message_id";

fn decode<T>(rows: Vec<PgRow>, what: &'static str) -> Result<Vec<T>>
where
    T: for<'r> FromRow<'r, PgRow>,
{
    rows.iter()
        .map(|row| T::from_row(row).context(what))
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(AppError::from)
}

fn check_batch(tables: &BoardTables, messages: &[&mut Message]) -> Result<()> {
    let board = tables.board().as_str();
    if let Some(stray) = messages.iter().find(|m| m.board != board) {
        return Err(AppError::ValidationError(format!(
            "message {} belongs to board '{}', not '{}'; enrich one board at a time",
            stray.id, stray.board, board
        )));
    }
    Ok(())
}

fn batch_keys(messages: &[&mut Message]) -> (Vec<i64>, Vec<i64>) {
    messages.iter().map(|m| (m.thread_id, m.id)).unzip()
}

fn index_by_key(messages: &[&mut Message]) -> HashMap<(i64, i64), usize> {
    messages
        .iter()
        .enumerate()
        .map(|(i, m)| ((m.thread_id, m.id), i))
        .collect()
}

/// Appends each reply to its receiver, keeping row order.
pub(crate) fn distribute_replies(
    board: &str,
    messages: &mut [&mut Message],
    rows: Vec<ReplyRow>,
    per_page: i64,
) {
    let index = index_by_key(messages);
    for row in rows {
        if let Some(&i) = index.get(&(row.receiver_thread_id, row.receiver_message_id)) {
            messages[i].replies.push(Reply {
                board: board.to_string(),
                from_message_id: row.sender_message_id,
                from_thread_id: row.sender_thread_id,
                from_page: page_of_ordinal(row.sender_ordinal, per_page),
                to_message_id: row.receiver_message_id,
                to_thread_id: row.receiver_thread_id,
                created_at: row.created_at,
            });
        }
    }
}

/// Appends each attachment to its message, keeping row order.
pub(crate) fn distribute_attachments(
    board: &str,
    messages: &mut [&mut Message],
    rows: Vec<AttachmentRow>,
) {
    let index = index_by_key(messages);
    for row in rows {
        if let Some(&i) = index.get(&(row.thread_id, row.message_id)) {
            messages[i].attachments.push(Attachment {
                id: row.id,
                board: board.to_string(),
                thread_id: row.thread_id,
                message_id: row.message_id,
                file: File {
                    id: row.file_id,
                    file_path: row.file_path,
                    filename: row.filename,
                    original_filename: row.original_filename,
                    file_size_bytes: row.file_size_bytes,
                    mime_type: row.mime_type,
                    image_width: row.image_width,
                    image_height: row.image_height,
                    thumbnail_path: row.thumbnail_path,
                    created_at: row.file_created_at,
                },
            });
        }
    }
}

/// Attaches inbound replies, oldest first, to every message of the batch.
/// `per_page` is the thread page size used to compute each sender's page.
pub async fn enrich_with_replies(
    q: &mut dyn Querier,
    tables: &BoardTables,
    messages: &mut [&mut Message],
    per_page: i64,
) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    check_batch(tables, messages)?;

    let (thread_ids, message_ids) = batch_keys(messages);
    let sql = replies_sql(tables, BATCH_JOIN_REPLIES, "");
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(&thread_ids).bind(&message_ids))
        .await
        .context("failed to fetch replies")?;

    distribute_replies(
        tables.board().as_str(),
        messages,
        decode(rows, "malformed reply row")?,
        per_page,
    );
    Ok(())
}

/// Attaches files, in attachment order, to every message of the batch.
pub async fn enrich_with_attachments(
    q: &mut dyn Querier,
    tables: &BoardTables,
    messages: &mut [&mut Message],
) -> Result<()> {
    if messages.is_empty() {
        return Ok(());
    }
    check_batch(tables, messages)?;

    let (thread_ids, message_ids) = batch_keys(messages);
    let sql = attachments_sql(tables, BATCH_JOIN_ATTACHMENTS, "");
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(&thread_ids).bind(&message_ids))
        .await
        .context("failed to fetch attachments")?;

    distribute_attachments(
        tables.board().as_str(),
        messages,
        decode(rows, "malformed attachment row")?,
    );
    Ok(())
}

/// Every reply received by any message of one thread.
pub(crate) async fn fetch_thread_replies(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
) -> Result<Vec<ReplyRow>> {
    let sql = replies_sql(tables, "", "WHERE r.receiver_thread_id = $1");
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(thread_id))
        .await
        .context("failed to fetch thread replies")?;
    decode(rows, "malformed reply row")
}

/// Every attachment of any message of one thread.
pub(crate) async fn fetch_thread_attachments(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
) -> Result<Vec<AttachmentRow>> {
    let sql = attachments_sql(tables, "", "WHERE a.thread_id = $1");
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(thread_id))
        .await
        .context("failed to fetch thread attachments")?;
    decode(rows, "malformed attachment row")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rb_core::ShortName;

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn message(board: &str, thread_id: i64, id: i64, ordinal: i32) -> Message {
        Message {
            id,
            author_id: 1,
            text: String::new(),
            created_at: at(0),
            updated_at: at(0),
            thread_id,
            board: board.to_string(),
            ordinal,
            is_opening_message: ordinal == 1,
            replies: Vec::new(),
            attachments: Vec::new(),
        }
    }

    fn reply(sender: (i64, i64), sender_ordinal: i32, receiver: (i64, i64), minute: u32) -> ReplyRow {
        ReplyRow {
            sender_thread_id: sender.0,
            sender_message_id: sender.1,
            receiver_thread_id: receiver.0,
            receiver_message_id: receiver.1,
            created_at: at(minute),
            sender_ordinal,
        }
    }

    #[test]
    fn replies_land_on_their_receivers_in_order() {
        let mut op = message("b", 1, 100, 1);
        let mut second = message("b", 1, 101, 2);
        let mut batch = vec![&mut op, &mut second];

        let rows = vec![
            reply((1, 101), 2, (1, 100), 1),
            reply((1, 250), 150, (1, 100), 2),
            reply((2, 300), 1, (1, 101), 3),
            reply((1, 999), 5, (7, 7), 4),
        ];
        distribute_replies("b", &mut batch, rows, 100);

        assert_eq!(op.replies.len(), 2);
        assert_eq!(op.replies[0].from_message_id, 101);
        assert_eq!(op.replies[0].from_page, 1);
        assert_eq!(op.replies[1].from_message_id, 250);
        assert_eq!(op.replies[1].from_page, 2);
        assert_eq!(second.replies.len(), 1);
        assert_eq!(second.replies[0].from_thread_id, 2);
        assert_eq!(second.replies[0].to_message_id, 101);
    }

    #[test]
    fn message_ids_are_scoped_by_thread() {
        let mut a = message("b", 1, 5, 1);
        let mut b = message("b", 2, 6, 1);
        let mut batch = vec![&mut a, &mut b];

        // Same message id, wrong thread: must not match.
        let rows = vec![reply((2, 6), 1, (2, 5), 1)];
        distribute_replies("b", &mut batch, rows, 100);
        assert!(a.replies.is_empty());
        assert!(b.replies.is_empty());
    }

    #[test]
    fn attachments_land_on_their_messages() {
        let mut m = message("b", 3, 30, 1);
        let mut batch = vec![&mut m];
        let row = |id: i64| AttachmentRow {
            id,
            thread_id: 3,
            message_id: 30,
            file_id: id * 10,
            file_path: format!("/media/{}.png", id),
            filename: format!("{}.png", id),
            original_filename: "cat.png".to_string(),
            file_size_bytes: 1024,
            mime_type: "image/png".to_string(),
            image_width: Some(64),
            image_height: Some(48),
            thumbnail_path: None,
            file_created_at: at(0),
        };
        distribute_attachments("b", &mut batch, vec![row(1), row(2)]);

        let ids: Vec<i64> = m.attachments.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(m.attachments[1].file.id, 20);
        assert_eq!(m.attachments[0].board, "b");
    }

    #[test]
    fn mixed_board_batches_are_rejected() {
        let tables = BoardTables::new(&ShortName::parse("b").unwrap());
        let mut ours = message("b", 1, 1, 1);
        let mut theirs = message("tech", 1, 2, 1);
        let batch = vec![&mut ours, &mut theirs];
        assert!(matches!(
            check_batch(&tables, &batch),
            Err(AppError::ValidationError(_))
        ));
    }

    #[test]
    fn thread_scoped_queries_filter_after_joins() {
        let tables = BoardTables::new(&ShortName::parse("b").unwrap());
        let sql = replies_sql(&tables, BATCH_JOIN_REPLIES, "");
        assert!(sql.contains("FROM \"message_replies_b\" r JOIN UNNEST"));
        assert!(sql.contains("JOIN \"messages_b\" s ON s.id = r.sender_message_id"));

        let scoped = replies_sql(&tables, "", "WHERE r.receiver_thread_id = $1");
        assert!(scoped.contains("r.sender_message_id WHERE r.receiver_thread_id = $1 ORDER BY"));

        let scoped = attachments_sql(&tables, "", "WHERE a.thread_id = $1");
        assert!(scoped.contains("f.id = a.file_id WHERE a.thread_id = $1 ORDER BY a.id"));
    }
}
