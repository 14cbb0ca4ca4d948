//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Board.
//! Thread, message, reply and attachment identities are scoped to their
//! board, because every board's rows live in their own partition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::short_name::ShortName;

/// Represents a single Imageboard (e.g., /b/, /tech/)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Board {
    /// The URL slug and partition key (e.g., "b" for /b/)
    pub short_name: String,
    pub name: String,
    /// Email domains allowed to see the board. `None` means public.
    pub allowed_emails: Option<Vec<String>>,
    pub created_at: DateTime<Utc>,
    /// Advanced by every write that touches the board; drives cache refresh.
    pub last_activity_at: DateTime<Utc>,
}

/// A Thread contains a collection of Messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thread {
    pub id: i64,
    pub title: String,
    pub board: String,
    /// Messages ever posted, opener included. Never decremented by deletes.
    pub message_count: i32,
    /// The timestamp used for sorting threads by activity
    pub last_bumped_at: DateTime<Utc>,
    pub is_pinned: bool,
    pub messages: Vec<Message>,
}

/// The fundamental unit of conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: i64,
    pub author_id: i64,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub thread_id: i64,
    pub board: String,
    /// 1-based position in the thread at insert time; stable across deletes.
    pub ordinal: i32,
    pub is_opening_message: bool,
    /// Inbound reply edges, oldest first.
    pub replies: Vec<Reply>,
    pub attachments: Vec<Attachment>,
}

/// A directed "quote/reply-to" edge between two messages of one board.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub board: String,
    pub from_message_id: i64,
    pub from_thread_id: i64,
    /// Thread page on which the sender message is rendered.
    pub from_page: i64,
    pub to_message_id: i64,
    pub to_thread_id: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: i64,
    pub board: String,
    pub thread_id: i64,
    pub message_id: i64,
    pub file: File,
}

/// An already-sanitized upload, as handed over by the media pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct File {
    pub id: i64,
    pub file_path: String,
    pub filename: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub mime_type: String,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub thumbnail_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// The caller as seen by the access-control layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub is_admin: bool,
}

impl User {
    /// The part after the last `@`, if there is a non-empty one.
    pub fn email_domain(&self) -> Option<&str> {
        self.email
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

// ── Drafts ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBoard {
    pub name: String,
    pub short_name: ShortName,
    /// `None` creates a public board; `Some(vec![])` is rejected.
    pub allowed_emails: Option<Vec<String>>,
}

/// Identity of a message a new message replies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyTarget {
    pub thread_id: i64,
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMessage {
    pub author_id: i64,
    pub text: String,
    /// Explicit creation time (imports). `None` uses the transaction clock.
    pub created_at: Option<DateTime<Utc>>,
    pub reply_to: Vec<ReplyTarget>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewThread {
    pub title: String,
    pub is_pinned: bool,
    pub opening_message: NewMessage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFile {
    pub file_path: String,
    pub filename: String,
    pub original_filename: String,
    pub file_size_bytes: i64,
    pub mime_type: String,
    pub image_width: Option<i32>,
    pub image_height: Option<i32>,
    pub thumbnail_path: Option<String>,
}

// ── Read results ────────────────────────────────────────────────────────────

/// One page of a board: threads with their preview messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoardPage {
    pub board: Board,
    pub threads: Vec<Thread>,
    pub page: i64,
}

/// One page of a thread plus pagination metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadPage {
    pub thread: Thread,
    pub page: i64,
    pub total_pages: i64,
    pub total_count: i64,
}
