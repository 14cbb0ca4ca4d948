//! # Thread/Message Writer
//!
//! Every function here is one step of a mutation and expects to run on a
//! transaction handed out by [`crate::querier::with_transaction`]. Each
//! mutation also advances the board's `last_activity_at`, which is what
//! puts the board on the cache scheduler's list.

use std::collections::HashSet;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rb_core::{
    AppError, Attachment, File, NewFile, NewMessage, ReplyTarget, Result, ShortName,
};
use sqlx::Row;
use tracing::debug;

use crate::naming::BoardTables;
use crate::querier::{is_foreign_key_violation, Querier};

/// Advances the board's last activity to `max(current, at)`; `None` means now.
pub async fn touch_board(
    q: &mut dyn Querier,
    board: &ShortName,
    at: Option<DateTime<Utc>>,
) -> Result<()> {
    let touched = q
        .execute(
            sqlx::query(
                "UPDATE boards SET last_activity_at = GREATEST(last_activity_at, COALESCE($2, NOW())) \
                 WHERE short_name = $1",
            )
            .bind(board.as_str())
            .bind(at),
        )
        .await
        .context("failed to update board activity")?;
    if touched.rows_affected() == 0 {
        return Err(AppError::not_found("Board", board));
    }
    Ok(())
}

/// The transaction's start timestamp. Stable across every statement of the
/// same transaction.
pub async fn transaction_now(q: &mut dyn Querier) -> Result<DateTime<Utc>> {
    let row = q
        .fetch_one(sqlx::query("SELECT NOW() AS now"))
        .await
        .context("failed to read transaction clock")?;
    Ok(row.try_get("now").context("malformed clock row")?)
}

/// Inserts an empty thread and returns its id and creation timestamp.
///
/// The opening message is not created here: the caller inserts it in the
/// same transaction through [`create_message`], using the returned
/// timestamp, so imports can choose where timestamps come from.
pub async fn create_thread(
    q: &mut dyn Querier,
    tables: &BoardTables,
    title: &str,
    is_pinned: bool,
    created_at: Option<DateTime<Utc>>,
) -> Result<(i64, DateTime<Utc>)> {
    let board = tables.board();

    // Takes the board row's update lock before anything else, the same lock
    // the opener's activity touch needs, so concurrent writers queue on it
    // instead of upgrading a shared lock. A concurrent delete waits for us.
    touch_board(q, board, created_at).await?;

    let sql = format!(
        "INSERT INTO {} (title, board, message_count, last_bumped_at, is_pinned) \
         VALUES ($1, $2, 0, COALESCE($3, NOW()), $4) \
         RETURNING id, last_bumped_at",
        tables.threads()
    );
    let row = q
        .fetch_one(
            sqlx::query(&sql)
                .bind(title)
                .bind(board.as_str())
                .bind(created_at)
                .bind(is_pinned),
        )
        .await
        .context("failed to insert thread")?;

    let id: i64 = row.try_get("id").context("malformed thread row")?;
    let created: DateTime<Utc> = row.try_get("last_bumped_at").context("malformed thread row")?;
    debug!(board = %board, thread_id = id, "thread inserted");
    Ok((id, created))
}

/// Posts a message into a thread and returns its id.
///
/// The thread's counter is incremented and its bump time advanced in one
/// statement, so concurrent posters are serialized on the thread row. A
/// message bumps only while the count observed before it is below
/// `bump_limit`, so a limit of N gives exactly N bumping messages. A bump
/// never moves the thread back in time, even for an imported message older
/// than the last bump. Its ordinal is the count after the increment.
pub async fn create_message(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
    draft: &NewMessage,
    bump_limit: i32,
) -> Result<i64> {
    let board = tables.board();
    touch_board(q, board, draft.created_at).await?;

    let created_at = match draft.created_at {
        Some(at) => at,
        None => transaction_now(q).await?,
    };

    let bump_sql = format!(
        "UPDATE {} SET message_count = message_count + 1, \
         last_bumped_at = CASE WHEN message_count < $2 THEN GREATEST(last_bumped_at, $3) ELSE last_bumped_at END \
         WHERE id = $1 \
         RETURNING message_count",
        tables.threads()
    );
    let ordinal: i32 = q
        .fetch_optional(
            sqlx::query(&bump_sql)
                .bind(thread_id)
                .bind(bump_limit)
                .bind(created_at),
        )
        .await
        .context("failed to bump thread")?
        .ok_or_else(|| AppError::not_found("Thread", thread_id))?
        .try_get("message_count")
        .context("malformed thread counter")?;

    let insert_sql = format!(
        "INSERT INTO {} (author_id, text, created_at, updated_at, thread_id, ordinal, is_opening_message, board) \
         VALUES ($1, $2, $3, $3, $4, $5, $6, $7) \
         RETURNING id",
        tables.messages()
    );
    let message_id: i64 = q
        .fetch_one(
            sqlx::query(&insert_sql)
                .bind(draft.author_id)
                .bind(&draft.text)
                .bind(created_at)
                .bind(thread_id)
                .bind(ordinal)
                .bind(ordinal == 1)
                .bind(board.as_str()),
        )
        .await
        .context("failed to insert message")?
        .try_get("id")
        .context("malformed message row")?;

    insert_replies(q, tables, thread_id, message_id, created_at, &draft.reply_to).await?;

    debug!(board = %board, thread_id, message_id, ordinal, "message inserted");
    Ok(message_id)
}

/// Drops repeated targets, keeping first-seen order.
pub(crate) fn dedup_targets(targets: &[ReplyTarget]) -> Vec<ReplyTarget> {
    let mut seen = HashSet::with_capacity(targets.len());
    targets
        .iter()
        .copied()
        .filter(|t| seen.insert((t.thread_id, t.message_id)))
        .collect()
}

/// Records reply edges from a sender message to each target. Every target
/// must be an existing message of the same board, otherwise nothing is
/// inserted and `NotFound` is returned.
pub async fn insert_replies(
    q: &mut dyn Querier,
    tables: &BoardTables,
    sender_thread_id: i64,
    sender_message_id: i64,
    created_at: DateTime<Utc>,
    targets: &[ReplyTarget],
) -> Result<()> {
    let targets = dedup_targets(targets);
    if targets.is_empty() {
        return Ok(());
    }
    let message_ids: Vec<i64> = targets.iter().map(|t| t.message_id).collect();
    let thread_ids: Vec<i64> = targets.iter().map(|t| t.thread_id).collect();

    let sql = format!(
        "INSERT INTO {replies} \
         (board, sender_message_id, sender_thread_id, receiver_message_id, receiver_thread_id, created_at) \
         SELECT $1, $2, $3, m.id, m.thread_id, $4 \
         FROM UNNEST($5::bigint[], $6::bigint[]) AS target(message_id, thread_id) \
         JOIN {messages} m ON m.id = target.message_id AND m.thread_id = target.thread_id",
        replies = tables.replies(),
        messages = tables.messages(),
    );
    let inserted = q
        .execute(
            sqlx::query(&sql)
                .bind(tables.board().as_str())
                .bind(sender_message_id)
                .bind(sender_thread_id)
                .bind(created_at)
                .bind(&message_ids)
                .bind(&thread_ids),
        )
        .await
        .context("failed to insert replies")?;

    if (inserted.rows_affected() as usize) < targets.len() {
        let wanted = targets
            .iter()
            .map(|t| format!("{}/{}", t.thread_id, t.message_id))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(AppError::not_found("Reply target", wanted));
    }
    Ok(())
}

/// Which attachments [`delete_attached_files`] removes the files of.
#[derive(Debug, Clone, Copy)]
pub enum FileScope {
    Message { thread_id: i64, message_id: i64 },
    Thread(i64),
    Board,
}

/// Deletes the `files` rows behind a message's, thread's or board's
/// attachments. Every file backs exactly one attachment, and the attachment
/// row goes with its file. Returns how many files were removed.
///
/// Reads through the `attachments` parent, so a board whose partition is
/// already gone simply has no files left.
pub async fn delete_attached_files(
    q: &mut dyn Querier,
    board: &ShortName,
    scope: FileScope,
) -> Result<u64> {
    let query = match scope {
        FileScope::Message { thread_id, message_id } => sqlx::query(concat!(
            "DELETE FROM files WHERE id IN (SELECT file_id FROM attachments ",
            "WHERE board = $1 AND message_id = $2 AND thread_id = $3)"
        ))
        .bind(board.as_str())
        .bind(message_id)
        .bind(thread_id),
        FileScope::Thread(thread_id) => sqlx::query(concat!(
            "DELETE FROM files WHERE id IN (SELECT file_id FROM attachments ",
            "WHERE board = $1 AND thread_id = $2)"
        ))
        .bind(board.as_str())
        .bind(thread_id),
        FileScope::Board => sqlx::query(concat!(
            "DELETE FROM files WHERE id IN (SELECT file_id FROM attachments ",
            "WHERE board = $1)"
        ))
        .bind(board.as_str()),
    };
    let deleted = q.execute(query).await.context("failed to delete attached files")?;
    if deleted.rows_affected() > 0 {
        debug!(board = %board, ?scope, files = deleted.rows_affected(), "attached files deleted");
    }
    Ok(deleted.rows_affected())
}

/// Deletes a message; its replies, attachments and their files go with it.
/// The thread's `message_count` is left alone, so ordinals are never reused.
pub async fn delete_message(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
    message_id: i64,
) -> Result<()> {
    touch_board(q, tables.board(), None).await?;
    delete_attached_files(
        q,
        tables.board(),
        FileScope::Message {
            thread_id,
            message_id,
        },
    )
    .await?;
    let sql = format!(
        "DELETE FROM {} WHERE id = $1 AND thread_id = $2",
        tables.messages()
    );
    let deleted = q
        .execute(sqlx::query(&sql).bind(message_id).bind(thread_id))
        .await
        .context("failed to delete message")?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Message", message_id));
    }
    Ok(())
}

/// Deletes a thread with all of its messages, replies, attachments and files.
pub async fn delete_thread(q: &mut dyn Querier, tables: &BoardTables, thread_id: i64) -> Result<()> {
    touch_board(q, tables.board(), None).await?;
    delete_attached_files(q, tables.board(), FileScope::Thread(thread_id)).await?;
    let sql = format!("DELETE FROM {} WHERE id = $1", tables.threads());
    let deleted = q
        .execute(sqlx::query(&sql).bind(thread_id))
        .await
        .context("failed to delete thread")?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Thread", thread_id));
    }
    Ok(())
}

/// Flips the pinned flag and returns its new value.
pub async fn toggle_pinned(q: &mut dyn Querier, tables: &BoardTables, thread_id: i64) -> Result<bool> {
    touch_board(q, tables.board(), None).await?;
    let sql = format!(
        "UPDATE {} SET is_pinned = NOT is_pinned WHERE id = $1 RETURNING is_pinned",
        tables.threads()
    );
    let pinned = q
        .fetch_optional(sqlx::query(&sql).bind(thread_id))
        .await
        .context("failed to toggle pinned flag")?
        .ok_or_else(|| AppError::not_found("Thread", thread_id))?
        .try_get("is_pinned")
        .context("malformed thread row")?;
    Ok(pinned)
}

pub async fn edit_message(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
    message_id: i64,
    text: &str,
) -> Result<()> {
    touch_board(q, tables.board(), None).await?;
    let sql = format!(
        "UPDATE {} SET text = $1, updated_at = NOW() WHERE id = $2 AND thread_id = $3",
        tables.messages()
    );
    let updated = q
        .execute(sqlx::query(&sql).bind(text).bind(message_id).bind(thread_id))
        .await
        .context("failed to edit message")?;
    if updated.rows_affected() == 0 {
        return Err(AppError::not_found("Message", message_id));
    }
    Ok(())
}

/// Stores an already-sanitized file and links it to a message.
pub async fn attach_file(
    q: &mut dyn Querier,
    tables: &BoardTables,
    thread_id: i64,
    message_id: i64,
    file: &NewFile,
) -> Result<Attachment> {
    touch_board(q, tables.board(), None).await?;

    let file_row = q
        .fetch_one(
            sqlx::query(
                "INSERT INTO files (file_path, filename, original_filename, file_size_bytes, \
                 mime_type, image_width, image_height, thumbnail_path) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
                 RETURNING id, created_at",
            )
            .bind(&file.file_path)
            .bind(&file.filename)
            .bind(&file.original_filename)
            .bind(file.file_size_bytes)
            .bind(&file.mime_type)
            .bind(file.image_width)
            .bind(file.image_height)
            .bind(&file.thumbnail_path),
        )
        .await
        .context("failed to insert file")?;
    let file_id: i64 = file_row.try_get("id").context("malformed file row")?;
    let file_created_at: DateTime<Utc> =
        file_row.try_get("created_at").context("malformed file row")?;

    let sql = format!(
        "INSERT INTO {} (board, thread_id, message_id, file_id) \
         SELECT $1, m.thread_id, m.id, $4 FROM {} m WHERE m.id = $3 AND m.thread_id = $2 \
         RETURNING id",
        tables.attachments(),
        tables.messages()
    );
    let inserted = q
        .fetch_optional(
            sqlx::query(&sql)
                .bind(tables.board().as_str())
                .bind(thread_id)
                .bind(message_id)
                .bind(file_id),
        )
        .await;
    let attachment_id: i64 = match inserted {
        Ok(Some(row)) => row.try_get("id").context("malformed attachment row")?,
        Ok(None) => return Err(AppError::not_found("Message", message_id)),
        Err(err) if is_foreign_key_violation(&err) => {
            return Err(AppError::not_found("Message", message_id))
        }
        Err(err) => return Err(anyhow::Error::new(err).context("failed to insert attachment").into()),
    };

    Ok(Attachment {
        id: attachment_id,
        board: tables.board().to_string(),
        thread_id,
        message_id,
        file: File {
            id: file_id,
            file_path: file.file_path.clone(),
            filename: file.filename.clone(),
            original_filename: file.original_filename.clone(),
            file_size_bytes: file.file_size_bytes,
            mime_type: file.mime_type.clone(),
            image_width: file.image_width,
            image_height: file.image_height,
            thumbnail_path: file.thumbnail_path.clone(),
            created_at: file_created_at,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(thread_id: i64, message_id: i64) -> ReplyTarget {
        ReplyTarget {
            thread_id,
            message_id,
        }
    }

    #[test]
    fn duplicate_reply_targets_collapse() {
        let targets = [target(1, 10), target(1, 11), target(1, 10), target(2, 10)];
        assert_eq!(
            dedup_targets(&targets),
            vec![target(1, 10), target(1, 11), target(2, 10)]
        );
    }

    #[test]
    fn no_targets() {
        assert!(dedup_targets(&[]).is_empty());
    }
}
