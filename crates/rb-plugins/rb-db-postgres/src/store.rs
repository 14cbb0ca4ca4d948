//! # PgBoardStore
//!
//! Binds the storage functions to the `rb-core` ports. Every mutation is
//! one call to [`with_transaction`]; reads go straight to the pool.

use std::time::Duration;

use async_trait::async_trait;
use rb_core::traits::{ActiveBoardLister, BoardCacheRefresher, BoardRepo};
use rb_core::{
    Attachment, Board, BoardPage, Message, NewBoard, NewFile, NewMessage, NewThread, Result,
    ShortName, ThreadPage, User,
};
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::naming::BoardTables;
use crate::querier::with_transaction;
use crate::{boards, cache, reader, writer};

/// Tunables the store applies to every board.
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub bump_limit: i32,
    pub n_last_msg: i32,
    pub threads_per_page: i64,
    pub messages_per_page: i64,
    pub single_page_threshold: i32,
    /// Upper bound of each mutation's transaction.
    pub operation_timeout: Duration,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            bump_limit: 500,
            n_last_msg: 3,
            threads_per_page: 10,
            messages_per_page: 100,
            single_page_threshold: 1000,
            operation_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct PgBoardStore {
    pool: PgPool,
    settings: StoreSettings,
}

impl PgBoardStore {
    pub fn new(pool: PgPool, settings: StoreSettings) -> Self {
        Self { pool, settings }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Rebuilds one board's preview cache now.
    pub async fn refresh_board_cache(&self, short_name: &ShortName) -> Result<()> {
        let mut pool = self.pool.clone();
        cache::refresh_preview_cache(&mut pool, &BoardTables::new(short_name)).await
    }
}

#[async_trait]
impl BoardRepo for PgBoardStore {
    async fn create_board(&self, board: NewBoard) -> Result<Board> {
        let n_last_msg = self.settings.n_last_msg;
        let created = with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move { boards::create_board(&mut *tx, &board, n_last_msg).await })
        })
        .await?;
        info!(board = %created.short_name, "Board created");
        Ok(created)
    }

    async fn delete_board(&self, short_name: &ShortName) -> Result<()> {
        let board = short_name.clone();
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move { boards::delete_board(&mut *tx, &board).await })
        })
        .await?;
        info!(board = %short_name, "Board deleted");
        Ok(())
    }

    async fn get_board(&self, short_name: &ShortName, page: i64) -> Result<BoardPage> {
        let mut pool = self.pool.clone();
        reader::get_board_page(
            &mut pool,
            &BoardTables::new(short_name),
            page,
            self.settings.threads_per_page,
            self.settings.messages_per_page,
        )
        .await
    }

    async fn list_boards(&self) -> Result<Vec<Board>> {
        let mut pool = self.pool.clone();
        boards::list_boards(&mut pool).await
    }

    async fn list_boards_for_user(&self, user: &User) -> Result<Vec<Board>> {
        let mut pool = self.pool.clone();
        boards::list_boards_for_user(&mut pool, user).await
    }

    async fn list_active_boards(&self, within: Duration) -> Result<Vec<Board>> {
        let mut pool = self.pool.clone();
        boards::list_active_boards(&mut pool, within).await
    }

    async fn create_thread(&self, short_name: &ShortName, thread: NewThread) -> Result<i64> {
        let tables = BoardTables::new(short_name);
        let bump_limit = self.settings.bump_limit;
        let thread_id = with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move {
                let NewThread {
                    title,
                    is_pinned,
                    opening_message,
                } = thread;
                let (thread_id, created_at) = writer::create_thread(
                    &mut *tx,
                    &tables,
                    &title,
                    is_pinned,
                    opening_message.created_at,
                )
                .await?;
                let opener = NewMessage {
                    created_at: Some(created_at),
                    ..opening_message
                };
                writer::create_message(&mut *tx, &tables, thread_id, &opener, bump_limit).await?;
                Ok(thread_id)
            })
        })
        .await?;
        debug!(board = %short_name, thread_id, "Thread created");
        Ok(thread_id)
    }

    async fn get_thread(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        page: i64,
    ) -> Result<ThreadPage> {
        let mut pool = self.pool.clone();
        reader::get_thread_page(
            &mut pool,
            &BoardTables::new(short_name),
            thread_id,
            page,
            self.settings.messages_per_page,
            self.settings.single_page_threshold,
        )
        .await
    }

    async fn delete_thread(&self, short_name: &ShortName, thread_id: i64) -> Result<()> {
        let tables = BoardTables::new(short_name);
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move { writer::delete_thread(&mut *tx, &tables, thread_id).await })
        })
        .await?;
        debug!(board = %short_name, thread_id, "Thread deleted");
        Ok(())
    }

    async fn toggle_pinned(&self, short_name: &ShortName, thread_id: i64) -> Result<bool> {
        let tables = BoardTables::new(short_name);
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move { writer::toggle_pinned(&mut *tx, &tables, thread_id).await })
        })
        .await
    }

    async fn create_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message: NewMessage,
    ) -> Result<i64> {
        let tables = BoardTables::new(short_name);
        let bump_limit = self.settings.bump_limit;
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move {
                writer::create_message(&mut *tx, &tables, thread_id, &message, bump_limit).await
            })
        })
        .await
    }

    async fn get_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
    ) -> Result<Message> {
        let mut pool = self.pool.clone();
        reader::get_message(
            &mut pool,
            &BoardTables::new(short_name),
            thread_id,
            message_id,
            self.settings.messages_per_page,
        )
        .await
    }

    async fn edit_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
        text: String,
    ) -> Result<()> {
        let tables = BoardTables::new(short_name);
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move {
                writer::edit_message(&mut *tx, &tables, thread_id, message_id, &text).await
            })
        })
        .await
    }

    async fn delete_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
    ) -> Result<()> {
        let tables = BoardTables::new(short_name);
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move {
                writer::delete_message(&mut *tx, &tables, thread_id, message_id).await
            })
        })
        .await?;
        debug!(board = %short_name, thread_id, message_id, "Message deleted");
        Ok(())
    }

    async fn attach_file(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
        file: NewFile,
    ) -> Result<Attachment> {
        let tables = BoardTables::new(short_name);
        with_transaction(&self.pool, self.settings.operation_timeout, move |tx| {
            Box::pin(async move {
                writer::attach_file(&mut *tx, &tables, thread_id, message_id, &file).await
            })
        })
        .await
    }
}

#[async_trait]
impl ActiveBoardLister for PgBoardStore {
    async fn active_boards(&self, within: Duration) -> Result<Vec<ShortName>> {
        let mut pool = self.pool.clone();
        let boards = boards::list_active_boards(&mut pool, within).await?;
        Ok(boards
            .into_iter()
            .filter_map(|board| match ShortName::parse(&board.short_name) {
                Ok(name) => Some(name),
                Err(err) => {
                    warn!(board = %board.short_name, error = %err, "skipping board with invalid short name");
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl BoardCacheRefresher for PgBoardStore {
    async fn refresh_board(&self, short_name: &ShortName) -> Result<()> {
        self.refresh_board_cache(short_name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_match_board_defaults() {
        let settings = StoreSettings::default();
        assert_eq!(settings.bump_limit, 500);
        assert_eq!(settings.n_last_msg, 3);
        assert_eq!(settings.threads_per_page, 10);
        assert_eq!(settings.messages_per_page, 100);
        assert_eq!(settings.single_page_threshold, 1000);
        assert_eq!(settings.operation_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn store_is_usable_behind_the_ports() {
        fn assert_ports<T: BoardRepo + ActiveBoardLister + BoardCacheRefresher + Clone>() {}
        assert_ports::<PgBoardStore>();

        // Lazy pools never connect until first use.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/unused")
            .expect("lazy pool");
        let store = PgBoardStore::new(pool, StoreSettings::default());
        assert_eq!(store.settings().messages_per_page, 100);
    }
}
