//! # Core Traits (Ports)
//!
//! Any storage plugin must implement these traits to be used by the binary
//! and by the HTTP layer that sits on top of this engine.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    Attachment, Board, BoardPage, Message, NewBoard, NewFile, NewMessage, NewThread, ThreadPage,
    User,
};
use crate::short_name::ShortName;

/// Data persistence contract for boards, threads, and messages.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoardRepo: Send + Sync {
    // Board Operations
    async fn create_board(&self, board: NewBoard) -> Result<Board>;
    async fn delete_board(&self, short_name: &ShortName) -> Result<()>;
    async fn get_board(&self, short_name: &ShortName, page: i64) -> Result<BoardPage>;
    async fn list_boards(&self) -> Result<Vec<Board>>;
    async fn list_boards_for_user(&self, user: &User) -> Result<Vec<Board>>;
    async fn list_active_boards(&self, within: Duration) -> Result<Vec<Board>>;

    // Thread Operations
    /// Creates the thread and its opening message atomically; returns the thread id.
    async fn create_thread(&self, short_name: &ShortName, thread: NewThread) -> Result<i64>;
    async fn get_thread(&self, short_name: &ShortName, thread_id: i64, page: i64)
        -> Result<ThreadPage>;
    async fn delete_thread(&self, short_name: &ShortName, thread_id: i64) -> Result<()>;
    /// Flips the pinned flag and returns its new value.
    async fn toggle_pinned(&self, short_name: &ShortName, thread_id: i64) -> Result<bool>;

    // Message Operations
    async fn create_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message: NewMessage,
    ) -> Result<i64>;
    async fn get_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
    ) -> Result<Message>;
    async fn edit_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
        text: String,
    ) -> Result<()>;
    async fn delete_message(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
    ) -> Result<()>;
    async fn attach_file(
        &self,
        short_name: &ShortName,
        thread_id: i64,
        message_id: i64,
        file: NewFile,
    ) -> Result<Attachment>;
}

/// Tells the cache scheduler which boards saw writes recently.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ActiveBoardLister: Send + Sync {
    async fn active_boards(&self, within: Duration) -> Result<Vec<ShortName>>;
}

/// Rebuilds one board's preview cache without blocking its readers.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoardCacheRefresher: Send + Sync {
    async fn refresh_board(&self, short_name: &ShortName) -> Result<()>;
}
