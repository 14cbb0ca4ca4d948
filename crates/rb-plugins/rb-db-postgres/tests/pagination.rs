mod common;

use rb_core::{AppError, BoardRepo, NewThread};
use rb_db_postgres::StoreSettings;

use common::*;

fn paging(threshold: i32, per_page: i64) -> StoreSettings {
    StoreSettings {
        single_page_threshold: threshold,
        messages_per_page: per_page,
        threads_per_page: 2,
        ..StoreSettings::default()
    }
}

#[tokio::test]
#[ignore = "requires database"]
async fn thread_at_threshold_is_served_whole() {
    let store = store_with(paging(5, 2)).await;
    let name = unique_board();
    store.create_board(public_board(&name)).await.unwrap();
    let thread_id = store
        .create_thread(&name, thread("small", message("OP")))
        .await
        .unwrap();
    for i in 2..=5 {
        store
            .create_message(&name, thread_id, message(&format!("m{}", i)))
            .await
            .unwrap();
    }

    let page = store.get_thread(&name, thread_id, 1).await.unwrap();
    assert_eq!(page.total_pages, 1);
    assert_eq!(page.total_count, 5);
    assert_eq!(page.thread.messages.len(), 5);

    store.delete_board(&name).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn thread_over_threshold_is_windowed_around_the_opener() {
    let store = store_with(paging(5, 2)).await;
    let name = unique_board();
    store.create_board(public_board(&name)).await.unwrap();
    let thread_id = store
        .create_thread(&name, thread("large", message("OP")))
        .await
        .unwrap();
    for i in 2..=6 {
        store
            .create_message(&name, thread_id, message(&format!("m{}", i)))
            .await
            .unwrap();
    }

    let ordinals = |page: &rb_core::ThreadPage| -> Vec<i32> {
        page.thread.messages.iter().map(|m| m.ordinal).collect()
    };

    let first = store.get_thread(&name, thread_id, 1).await.unwrap();
    assert_eq!(first.total_pages, 3);
    assert_eq!(first.total_count, 6);
    assert_eq!(ordinals(&first), vec![1, 2]);
    assert!(first.thread.messages[0].is_opening_message);

    let second = store.get_thread(&name, thread_id, 2).await.unwrap();
    assert_eq!(ordinals(&second), vec![1, 3, 4]);

    let last = store.get_thread(&name, thread_id, 3).await.unwrap();
    assert_eq!(ordinals(&last), vec![1, 5, 6]);
    assert_eq!(last.page, 3);

    // Past the end only the opener remains.
    let beyond = store.get_thread(&name, thread_id, 9).await.unwrap();
    assert_eq!(ordinals(&beyond), vec![1]);

    store.delete_board(&name).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn page_numbers_start_at_one() {
    let store = store().await;
    let name = unique_board();
    store.create_board(public_board(&name)).await.unwrap();
    let thread_id = store
        .create_thread(&name, thread("t", message("OP")))
        .await
        .unwrap();

    let err = store.get_thread(&name, thread_id, 0).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    let err = store.get_board(&name, 0).await.unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));

    store.delete_board(&name).await.unwrap();
}

#[tokio::test]
#[ignore = "requires database"]
async fn board_pages_rank_pinned_threads_first() {
    let store = store_with(paging(1000, 100)).await;
    let name = unique_board();
    store.create_board(public_board(&name)).await.unwrap();

    let oldest = store
        .create_thread(
            &name,
            NewThread {
                is_pinned: true,
                ..thread("rules", message_at("read me", minute(0)))
            },
        )
        .await
        .unwrap();
    let middle = store
        .create_thread(&name, thread("middle", message_at("m", minute(1))))
        .await
        .unwrap();
    let newest = store
        .create_thread(&name, thread("newest", message_at("n", minute(2))))
        .await
        .unwrap();
    store.refresh_board_cache(&name).await.unwrap();

    let ids = |page: &rb_core::BoardPage| -> Vec<i64> { page.threads.iter().map(|t| t.id).collect() };

    let first = store.get_board(&name, 1).await.unwrap();
    assert_eq!(ids(&first), vec![oldest, newest]);
    assert!(first.threads[0].is_pinned);

    let second = store.get_board(&name, 2).await.unwrap();
    assert_eq!(ids(&second), vec![middle]);
    assert_eq!(second.page, 2);

    let empty = store.get_board(&name, 3).await.unwrap();
    assert!(empty.threads.is_empty());

    store.delete_board(&name).await.unwrap();
}
