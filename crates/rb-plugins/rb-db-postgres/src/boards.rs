//! # Board Lifecycle
//!
//! A board's physical footprint is its metadata row, its permission rows,
//! one partition per [`PartitionedTable`] and its preview cache. Creation
//! and deletion each run inside a single transaction, so a failed DDL
//! statement leaves nothing behind.

use std::collections::BTreeSet;
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use rb_core::{AppError, Board, NewBoard, Result, ShortName, User};
use sqlx::FromRow;

use crate::cache;
use crate::naming::{partition_name, quote_ident, BoardTables, PartitionedTable};
use crate::querier::{is_unique_violation, Querier};
use crate::writer::{self, FileScope};

#[derive(Debug, FromRow)]
struct BoardRow {
    short_name: String,
    name: String,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    allowed_emails: Option<Vec<String>>,
}

impl From<BoardRow> for Board {
    fn from(row: BoardRow) -> Self {
        Board {
            short_name: row.short_name,
            name: row.name,
            allowed_emails: row.allowed_emails,
            created_at: row.created_at,
            last_activity_at: row.last_activity_at,
        }
    }
}

const BOARD_SELECT: &str = r#"
    SELECT b.short_name, b.name, b.created_at, b.last_activity_at,
           ARRAY_AGG(p.allowed_email_domain ORDER BY p.allowed_email_domain)
               FILTER (WHERE p.allowed_email_domain IS NOT NULL) AS allowed_emails
    FROM boards b
    LEFT JOIN board_permissions p ON p.board_short_name = b.short_name
"#;

fn decode_boards(rows: Vec<sqlx::postgres::PgRow>) -> Result<Vec<Board>> {
    rows.iter()
        .map(|row| {
            BoardRow::from_row(row)
                .map(Board::from)
                .context("malformed board row")
        })
        .collect::<anyhow::Result<Vec<_>>>()
        .map_err(AppError::from)
}

/// Trims, lowercases and de-duplicates allowed email domains.
///
/// `None` means a public board. An explicitly empty list is ambiguous
/// between "public" and "nobody" and is rejected, as is a blank domain.
pub fn normalize_allowed_emails(allowed: Option<&[String]>) -> Result<Option<Vec<String>>> {
    let Some(domains) = allowed else {
        return Ok(None);
    };
    if domains.is_empty() {
        return Err(AppError::ValidationError(
            "allowed email domains must be omitted for a public board, not empty".into(),
        ));
    }

    let mut normalized = BTreeSet::new();
    for domain in domains {
        let domain = domain.trim().trim_start_matches('@').to_lowercase();
        if domain.is_empty() {
            return Err(AppError::ValidationError(
                "allowed email domain cannot be blank".into(),
            ));
        }
        normalized.insert(domain);
    }
    Ok(Some(normalized.into_iter().collect()))
}

fn constraint_name(table: PartitionedTable, board: &ShortName, column: &str) -> String {
    quote_ident(&format!("{}_{}_fk", partition_name(board, table), column))
}

/// DDL for every partition and its foreign keys, in dependency order.
pub(crate) fn partition_ddl(tables: &BoardTables) -> Vec<String> {
    let board = tables.board();
    let mut statements: Vec<String> = PartitionedTable::ALL
        .iter()
        .map(|&table| {
            format!(
                "CREATE TABLE {} PARTITION OF {} FOR VALUES IN ({})",
                tables.partition(table),
                table.parent(),
                tables.board_literal()
            )
        })
        .collect();

    statements.push(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY (board, thread_id) \
         REFERENCES {} (board, id) ON DELETE CASCADE",
        tables.messages(),
        constraint_name(PartitionedTable::Messages, board, "thread"),
        tables.threads()
    ));
    statements.push(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY (board, message_id) \
         REFERENCES {} (board, id) ON DELETE CASCADE",
        tables.attachments(),
        constraint_name(PartitionedTable::Attachments, board, "message"),
        tables.messages()
    ));
    for (column, side) in [("sender_message_id", "sender"), ("receiver_message_id", "receiver")] {
        statements.push(format!(
            "ALTER TABLE {} ADD CONSTRAINT {} FOREIGN KEY (board, {}) \
             REFERENCES {} (board, id) ON DELETE CASCADE",
            tables.replies(),
            constraint_name(PartitionedTable::Replies, board, side),
            column,
            tables.messages()
        ));
    }
    statements
}

/// Drop statements, cache first, then partitions in creation order.
pub(crate) fn drop_ddl(tables: &BoardTables) -> Vec<String> {
    let mut statements = vec![format!(
        "DROP MATERIALIZED VIEW IF EXISTS {} CASCADE",
        tables.cache()
    )];
    statements.extend(
        PartitionedTable::ALL
            .iter()
            .map(|&table| format!("DROP TABLE IF EXISTS {} CASCADE", tables.partition(table))),
    );
    statements
}

/// Creates a board with its permissions, partitions and preview cache.
///
/// Must run inside a transaction: any failing step aborts the whole board.
pub async fn create_board(q: &mut dyn Querier, draft: &NewBoard, n_last_msg: i32) -> Result<Board> {
    let allowed_emails = normalize_allowed_emails(draft.allowed_emails.as_deref())?;
    let short_name = &draft.short_name;

    let inserted = q
        .fetch_optional(
            sqlx::query(
                "INSERT INTO boards (short_name, name) VALUES ($1, $2) \
                 ON CONFLICT (short_name) DO NOTHING \
                 RETURNING created_at, last_activity_at",
            )
            .bind(short_name.as_str())
            .bind(&draft.name),
        )
        .await;

    let row = match inserted {
        Ok(Some(row)) => row,
        Ok(None) => {
            return Err(AppError::Conflict(format!(
                "board '{}' already exists",
                short_name
            )))
        }
        Err(err) if is_unique_violation(&err) => {
            return Err(AppError::Conflict(format!(
                "board '{}' already exists",
                short_name
            )))
        }
        Err(err) => return Err(anyhow::Error::new(err).context("failed to insert board").into()),
    };

    #[derive(FromRow)]
    struct Stamps {
        created_at: DateTime<Utc>,
        last_activity_at: DateTime<Utc>,
    }
    let stamps = Stamps::from_row(&row).context("malformed board insert result")?;

    if let Some(domains) = &allowed_emails {
        q.execute(
            sqlx::query(
                "INSERT INTO board_permissions (board_short_name, allowed_email_domain) \
                 SELECT $1, domain FROM UNNEST($2::text[]) AS domain",
            )
            .bind(short_name.as_str())
            .bind(domains),
        )
        .await
        .context("failed to insert board permissions")?;
    }

    let tables = BoardTables::new(short_name);
    for ddl in partition_ddl(&tables) {
        q.execute(sqlx::query(&ddl))
            .await
            .with_context(|| format!("failed to create partitions for board {}", short_name))?;
    }
    cache::create_preview_cache(q, &tables, n_last_msg).await?;

    Ok(Board {
        short_name: short_name.to_string(),
        name: draft.name.clone(),
        allowed_emails,
        created_at: stamps.created_at,
        last_activity_at: stamps.last_activity_at,
    })
}

/// Drops the board's files, cache and partitions, then its metadata row.
///
/// Every drop is `IF EXISTS`, so a board whose physical objects were only
/// partially created can still be removed.
pub async fn delete_board(q: &mut dyn Querier, short_name: &ShortName) -> Result<()> {
    // Board row first, partitions second: the order every writer locks in.
    q.execute(
        sqlx::query("SELECT 1 FROM boards WHERE short_name = $1 FOR UPDATE")
            .bind(short_name.as_str()),
    )
    .await
    .context("failed to lock board")?;
    writer::delete_attached_files(q, short_name, FileScope::Board).await?;

    let tables = BoardTables::new(short_name);
    for ddl in drop_ddl(&tables) {
        q.execute(sqlx::query(&ddl))
            .await
            .with_context(|| format!("failed to drop storage of board {}", short_name))?;
    }

    let deleted = q
        .execute(sqlx::query("DELETE FROM boards WHERE short_name = $1").bind(short_name.as_str()))
        .await
        .context("failed to delete board")?;
    if deleted.rows_affected() == 0 {
        return Err(AppError::not_found("Board", short_name));
    }
    Ok(())
}

pub async fn get_board(q: &mut dyn Querier, short_name: &ShortName) -> Result<Board> {
    let sql = format!("{} WHERE b.short_name = $1 GROUP BY b.short_name", BOARD_SELECT);
    let row = q
        .fetch_optional(sqlx::query(&sql).bind(short_name.as_str()))
        .await
        .context("failed to fetch board")?
        .ok_or_else(|| AppError::not_found("Board", short_name))?;
    let board = BoardRow::from_row(&row).context("malformed board row")?;
    Ok(board.into())
}

pub async fn list_boards(q: &mut dyn Querier) -> Result<Vec<Board>> {
    let sql = format!("{} GROUP BY b.short_name ORDER BY b.short_name", BOARD_SELECT);
    let rows = q
        .fetch_all(sqlx::query(&sql))
        .await
        .context("failed to list boards")?;
    decode_boards(rows)
}

/// Boards visible to `user`: everything for admins, otherwise public boards
/// plus boards that allow the user's email domain.
pub async fn list_boards_for_user(q: &mut dyn Querier, user: &User) -> Result<Vec<Board>> {
    if user.is_admin {
        return list_boards(q).await;
    }
    let domain = user
        .email_domain()
        .map(str::to_lowercase)
        .ok_or_else(|| {
            AppError::ValidationError(format!(
                "cannot determine email domain of user {}",
                user.id
            ))
        })?;

    let sql = format!(
        "{} GROUP BY b.short_name \
         HAVING COUNT(p.allowed_email_domain) = 0 OR BOOL_OR(p.allowed_email_domain = $1) \
         ORDER BY b.short_name",
        BOARD_SELECT
    );
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(domain))
        .await
        .context("failed to list boards for user")?;
    decode_boards(rows)
}

/// Boards whose last activity falls within `within` of now.
pub async fn list_active_boards(q: &mut dyn Querier, within: Duration) -> Result<Vec<Board>> {
    let sql = format!(
        "{} WHERE b.last_activity_at >= NOW() - make_interval(secs => $1) \
         GROUP BY b.short_name ORDER BY b.short_name",
        BOARD_SELECT
    );
    let rows = q
        .fetch_all(sqlx::query(&sql).bind(within.as_secs_f64()))
        .await
        .context("failed to list active boards")?;
    decode_boards(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables(name: &str) -> BoardTables {
        BoardTables::new(&ShortName::parse(name).unwrap())
    }

    #[test]
    fn partitions_are_created_before_foreign_keys() {
        let ddl = partition_ddl(&tables("b1"));
        assert_eq!(ddl.len(), 8);
        assert_eq!(
            ddl[0],
            "CREATE TABLE \"threads_b1\" PARTITION OF threads FOR VALUES IN ('b1')"
        );
        assert_eq!(
            ddl[3],
            "CREATE TABLE \"message_replies_b1\" PARTITION OF message_replies FOR VALUES IN ('b1')"
        );
        assert!(ddl[4].starts_with("ALTER TABLE \"messages_b1\" ADD CONSTRAINT \"messages_b1_thread_fk\""));
        assert!(ddl[4].contains("REFERENCES \"threads_b1\" (board, id) ON DELETE CASCADE"));
        assert!(ddl[7].contains("\"message_replies_b1_receiver_fk\""));
    }

    #[test]
    fn drops_start_with_the_cache_and_tolerate_missing_objects() {
        let ddl = drop_ddl(&tables("b1"));
        assert_eq!(ddl[0], "DROP MATERIALIZED VIEW IF EXISTS \"board_preview_b1\" CASCADE");
        assert_eq!(ddl[1], "DROP TABLE IF EXISTS \"threads_b1\" CASCADE");
        assert_eq!(ddl.len(), 1 + PartitionedTable::ALL.len());
        assert!(ddl.iter().all(|s| s.contains("IF EXISTS")));
    }

    #[test]
    fn constraint_names_fit_identifier_limit() {
        let name = ShortName::parse(&"z".repeat(32)).unwrap();
        let longest = constraint_name(PartitionedTable::Replies, &name, "receiver");
        assert!(longest.len() - 2 <= 63);
    }

    #[test]
    fn public_board_has_no_permissions() {
        assert_eq!(normalize_allowed_emails(None).unwrap(), None);
    }

    #[test]
    fn empty_permission_list_is_rejected() {
        let empty: Vec<String> = Vec::new();
        let err = normalize_allowed_emails(Some(empty.as_slice())).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));

        let blank = vec!["  ".to_string()];
        let err = normalize_allowed_emails(Some(blank.as_slice())).unwrap_err();
        assert!(matches!(err, AppError::ValidationError(_)));
    }

    #[test]
    fn domains_are_normalized_and_deduplicated() {
        let domains = vec![
            " Example.ORG ".to_string(),
            "@example.org".to_string(),
            "corp.test".to_string(),
        ];
        assert_eq!(
            normalize_allowed_emails(Some(domains.as_slice())).unwrap(),
            Some(vec!["corp.test".to_string(), "example.org".to_string()])
        );
    }
}
