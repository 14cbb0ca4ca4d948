//! Shared setup for the database tests.
//!
//! Run with: DATABASE_URL=postgres://... cargo test -p rb-db-postgres -- --ignored

#![allow(dead_code)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Duration, TimeZone, Utc};
use rb_core::{BoardPage, NewBoard, NewFile, NewMessage, NewThread, ReplyTarget, ShortName};
use rb_db_postgres::{bootstrap, create_pool, PgBoardStore, StoreSettings};
use sqlx::PgPool;

static COUNTER: AtomicU32 = AtomicU32::new(0);

pub async fn pool() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL required");
    let pool = create_pool(&url, 5).await.expect("pool creation failed");
    bootstrap(&pool).await.expect("schema bootstrap failed");
    pool
}

pub async fn store() -> PgBoardStore {
    store_with(StoreSettings::default()).await
}

pub async fn store_with(settings: StoreSettings) -> PgBoardStore {
    PgBoardStore::new(pool().await, settings)
}

/// A board name no other test (or test process) is using.
pub fn unique_board() -> ShortName {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .subsec_nanos();
    let n = COUNTER.fetch_add(1, Ordering::SeqCst);
    ShortName::parse(&format!("it_{}_{}_{}", std::process::id(), nanos, n))
        .expect("generated name is valid")
}

pub fn public_board(short_name: &ShortName) -> NewBoard {
    NewBoard {
        name: format!("Board {}", short_name),
        short_name: short_name.clone(),
        allowed_emails: None,
    }
}

pub fn message(text: &str) -> NewMessage {
    NewMessage {
        author_id: 1,
        text: text.to_string(),
        created_at: None,
        reply_to: Vec::new(),
    }
}

pub fn message_at(text: &str, at: DateTime<Utc>) -> NewMessage {
    NewMessage {
        created_at: Some(at),
        ..message(text)
    }
}

pub fn reply(text: &str, thread_id: i64, message_id: i64) -> NewMessage {
    NewMessage {
        reply_to: vec![ReplyTarget {
            thread_id,
            message_id,
        }],
        ..message(text)
    }
}

pub fn thread(title: &str, opener: NewMessage) -> NewThread {
    NewThread {
        title: title.to_string(),
        is_pinned: false,
        opening_message: opener,
    }
}

/// A fixed base instant plus `minutes`, for deterministic bump ordering.
pub fn minute(minutes: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minutes)
}

/// `(thread title, message texts)` per thread, in page order.
pub fn page_shape(page: &BoardPage) -> Vec<(String, Vec<String>)> {
    page.threads
        .iter()
        .map(|t| {
            (
                t.title.clone(),
                t.messages.iter().map(|m| m.text.clone()).collect(),
            )
        })
        .collect()
}

pub fn png(name: &str) -> NewFile {
    NewFile {
        file_path: format!("/media/{}.png", name),
        filename: format!("{}.png", name),
        original_filename: "upload.png".to_string(),
        file_size_bytes: 1024,
        mime_type: "image/png".to_string(),
        image_width: Some(320),
        image_height: Some(240),
        thumbnail_path: None,
    }
}

/// How many of `ids` still have a row in `files`.
pub async fn surviving_files(pool: &PgPool, ids: &[i64]) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM files WHERE id = ANY($1)")
        .bind(ids)
        .fetch_one(pool)
        .await
        .expect("files count failed")
}
