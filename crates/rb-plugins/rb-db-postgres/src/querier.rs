//! # Transaction Coordinator
//!
//! [`Querier`] is the one interface every repository function is written
//! against. It is implemented by the pool (independent statements, used by
//! read paths) and by an open transaction (used by every mutation), so the
//! same function runs live or inside a test transaction that is rolled back.
//!
//! [`with_transaction`] is the only way mutations reach the database:
//! begin → run → commit, or roll back on any error or timeout.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use futures::future::BoxFuture;
use rb_core::{AppError, Result, ShortName};
use sqlx::postgres::{PgArguments, PgQueryResult, PgRow};
use sqlx::query::Query;
use sqlx::{PgConnection, PgPool, Postgres, Transaction};
use tracing::warn;

/// A prepared statement with its bound arguments.
pub type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

/// Work run inside [`with_transaction`], borrowing the open transaction.
pub type TxFuture<'t, T> = BoxFuture<'t, Result<T>>;

/// Applies read/write operations either on the pool or inside a transaction.
#[async_trait]
pub trait Querier: Send {
    async fn execute(&mut self, query: PgQuery<'_>) -> std::result::Result<PgQueryResult, sqlx::Error>;

    async fn fetch_all(&mut self, query: PgQuery<'_>) -> std::result::Result<Vec<PgRow>, sqlx::Error>;

    async fn fetch_optional(
        &mut self,
        query: PgQuery<'_>,
    ) -> std::result::Result<Option<PgRow>, sqlx::Error>;

    async fn fetch_one(&mut self, query: PgQuery<'_>) -> std::result::Result<PgRow, sqlx::Error>;
}

#[async_trait]
impl Querier for PgPool {
    async fn execute(&mut self, query: PgQuery<'_>) -> std::result::Result<PgQueryResult, sqlx::Error> {
        query.execute(&*self).await
    }

    async fn fetch_all(&mut self, query: PgQuery<'_>) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
        query.fetch_all(&*self).await
    }

    async fn fetch_optional(
        &mut self,
        query: PgQuery<'_>,
    ) -> std::result::Result<Option<PgRow>, sqlx::Error> {
        query.fetch_optional(&*self).await
    }

    async fn fetch_one(&mut self, query: PgQuery<'_>) -> std::result::Result<PgRow, sqlx::Error> {
        query.fetch_one(&*self).await
    }
}

#[async_trait]
impl Querier for PgConnection {
    async fn execute(&mut self, query: PgQuery<'_>) -> std::result::Result<PgQueryResult, sqlx::Error> {
        query.execute(self).await
    }

    async fn fetch_all(&mut self, query: PgQuery<'_>) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
        query.fetch_all(self).await
    }

    async fn fetch_optional(
        &mut self,
        query: PgQuery<'_>,
    ) -> std::result::Result<Option<PgRow>, sqlx::Error> {
        query.fetch_optional(self).await
    }

    async fn fetch_one(&mut self, query: PgQuery<'_>) -> std::result::Result<PgRow, sqlx::Error> {
        query.fetch_one(self).await
    }
}

#[async_trait]
impl Querier for Transaction<'static, Postgres> {
    async fn execute(&mut self, query: PgQuery<'_>) -> std::result::Result<PgQueryResult, sqlx::Error> {
        query.execute(&mut **self).await
    }

    async fn fetch_all(&mut self, query: PgQuery<'_>) -> std::result::Result<Vec<PgRow>, sqlx::Error> {
        query.fetch_all(&mut **self).await
    }

    async fn fetch_optional(
        &mut self,
        query: PgQuery<'_>,
    ) -> std::result::Result<Option<PgRow>, sqlx::Error> {
        query.fetch_optional(&mut **self).await
    }

    async fn fetch_one(&mut self, query: PgQuery<'_>) -> std::result::Result<PgRow, sqlx::Error> {
        query.fetch_one(&mut **self).await
    }
}

/// Runs `work` inside one transaction bounded by `timeout`.
///
/// Commits when `work` succeeds. On an error the transaction is rolled back
/// explicitly; on a timeout or a failed commit the dropped transaction rolls
/// back on its own. No partial state is ever committed.
pub async fn with_transaction<T, F>(pool: &PgPool, timeout: Duration, work: F) -> Result<T>
where
    T: Send,
    F: for<'t> FnOnce(&'t mut Transaction<'static, Postgres>) -> TxFuture<'t, T> + Send,
{
    let run = async move {
        let mut tx = pool.begin().await.context("failed to begin transaction")?;
        match work(&mut tx).await {
            Ok(value) => {
                tx.commit().await.context("failed to commit transaction")?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "rollback failed after error: {}", err);
                }
                Err(err)
            }
        }
    };

    match tokio::time::timeout(timeout, run).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Internal(anyhow!(
            "transaction timed out after {:?}",
            timeout
        ))),
    }
}

/// `23505`
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).map(|code| code == "23505").unwrap_or(false)
}

/// `23503`
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    sqlstate(err).map(|code| code == "23503").unwrap_or(false)
}

/// `42P01`, e.g. a board whose partitions were already dropped.
pub(crate) fn is_undefined_table(err: &sqlx::Error) -> bool {
    sqlstate(err).map(|code| code == "42P01").unwrap_or(false)
}

/// Wraps a failed statement against a board's partitions. A missing
/// partition means the board is gone, which callers see as `NotFound`.
pub(crate) fn board_error(err: sqlx::Error, board: &ShortName, context: &'static str) -> AppError {
    if is_undefined_table(&err) {
        return AppError::not_found("Board", board);
    }
    AppError::Internal(anyhow::Error::new(err).context(context))
}

fn sqlstate(err: &sqlx::Error) -> Option<String> {
    if let sqlx::Error::Database(db_err) = err {
        return db_err.code().map(|code| code.into_owned());
    }
    None
}
