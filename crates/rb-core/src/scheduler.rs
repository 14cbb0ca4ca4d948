//! # Preview Cache Scheduler
//!
//! An owned background task that periodically rebuilds the preview cache of
//! every board written to since the last tick. Its two collaborators are
//! injected, so the loop knows nothing about Postgres.
//!
//! Each tick fans out one task per active board, each bounded by its own
//! timeout, and waits for all of them before the next tick. A failed refresh
//! is logged and left for the next tick: the cache is never authoritative.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::traits::{ActiveBoardLister, BoardCacheRefresher};

/// Outcome of a single tick.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub refreshed: usize,
    pub failed: usize,
}

pub struct CacheScheduler {
    lister: Arc<dyn ActiveBoardLister>,
    refresher: Arc<dyn BoardCacheRefresher>,
    interval: Duration,
    refresh_timeout: Duration,
}

impl CacheScheduler {
    /// Per-board refreshes default to a timeout of twice the tick interval.
    pub fn new(
        lister: Arc<dyn ActiveBoardLister>,
        refresher: Arc<dyn BoardCacheRefresher>,
        interval: Duration,
    ) -> Self {
        Self {
            lister,
            refresher,
            interval,
            refresh_timeout: interval * 2,
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs the scheduler on its own task until `shutdown` turns `true`
    /// (or its sender is dropped).
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            "preview cache scheduler started"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                _ = ticker.tick() => {}
            }

            // Shutdown mid-tick drops the JoinSet, which aborts in-flight refreshes.
            tokio::select! {
                biased;
                _ = wait_for_shutdown(&mut shutdown) => break,
                report = self.tick() => {
                    if report.refreshed + report.failed > 0 {
                        debug!(
                            refreshed = report.refreshed,
                            failed = report.failed,
                            "preview cache tick finished"
                        );
                    }
                }
            }
        }

        info!("preview cache scheduler stopped");
    }

    /// One scheduling round: list active boards, refresh them concurrently.
    pub async fn tick(&self) -> TickReport {
        let boards = match self.lister.active_boards(self.interval).await {
            Ok(boards) => boards,
            Err(err) => {
                warn!(error = %err, "failed to list active boards");
                return TickReport::default();
            }
        };

        let mut tasks = JoinSet::new();
        for board in boards {
            let refresher = Arc::clone(&self.refresher);
            let timeout = self.refresh_timeout;
            tasks.spawn(async move {
                let started = Instant::now();
                let outcome =
                    match tokio::time::timeout(timeout, refresher.refresh_board(&board)).await {
                        Ok(Ok(())) => Ok(()),
                        Ok(Err(err)) => Err(err.to_string()),
                        Err(_) => Err(format!("timed out after {:?}", timeout)),
                    };
                (board, started.elapsed(), outcome)
            });
        }

        let mut report = TickReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((board, elapsed, Ok(()))) => {
                    report.refreshed += 1;
                    debug!(
                        board = %board,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "preview cache refreshed"
                    );
                }
                Ok((board, _, Err(reason))) => {
                    report.failed += 1;
                    warn!(board = %board, error = %reason, "preview cache refresh failed");
                }
                Err(join_err) => {
                    report.failed += 1;
                    error!(error = %join_err, "preview cache refresh task panicked");
                }
            }
        }
        report
    }
}

/// Resolves once shutdown is requested. A dropped sender counts as a request.
async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::short_name::ShortName;
    use crate::traits::{MockActiveBoardLister, MockBoardCacheRefresher};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn name(s: &str) -> ShortName {
        ShortName::parse(s).unwrap()
    }

    fn lister_of(boards: &'static [&'static str]) -> MockActiveBoardLister {
        let mut lister = MockActiveBoardLister::new();
        lister
            .expect_active_boards()
            .returning(move |_| Ok(boards.iter().map(|b| name(b)).collect()));
        lister
    }

    #[tokio::test]
    async fn tick_refreshes_every_active_board_and_isolates_failures() {
        let mut refresher = MockBoardCacheRefresher::new();
        refresher
            .expect_refresh_board()
            .times(3)
            .returning(|board| {
                if board.as_str() == "b" {
                    Err(AppError::Internal(anyhow::anyhow!("relation does not exist")))
                } else {
                    Ok(())
                }
            });

        let scheduler = CacheScheduler::new(
            Arc::new(lister_of(&["a", "b", "c"])),
            Arc::new(refresher),
            Duration::from_secs(5),
        );

        let report = scheduler.tick().await;
        assert_eq!(report, TickReport { refreshed: 2, failed: 1 });
    }

    #[tokio::test]
    async fn tick_skips_refresh_when_listing_fails() {
        let mut lister = MockActiveBoardLister::new();
        lister
            .expect_active_boards()
            .times(1)
            .returning(|_| Err(AppError::Internal(anyhow::anyhow!("pool timed out"))));
        let mut refresher = MockBoardCacheRefresher::new();
        refresher.expect_refresh_board().never();

        let scheduler =
            CacheScheduler::new(Arc::new(lister), Arc::new(refresher), Duration::from_secs(5));
        assert_eq!(scheduler.tick().await, TickReport::default());
    }

    #[tokio::test]
    async fn tick_asks_for_boards_active_within_the_interval() {
        let mut lister = MockActiveBoardLister::new();
        lister
            .expect_active_boards()
            .withf(|within| *within == Duration::from_secs(30))
            .times(1)
            .returning(|_| Ok(vec![]));
        let scheduler = CacheScheduler::new(
            Arc::new(lister),
            Arc::new(MockBoardCacheRefresher::new()),
            Duration::from_secs(30),
        );
        scheduler.tick().await;
    }

    struct StuckRefresher;

    #[async_trait]
    impl BoardCacheRefresher for StuckRefresher {
        async fn refresh_board(&self, _short_name: &ShortName) -> crate::Result<()> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn slow_refresh_is_bounded_by_timeout() {
        let scheduler = CacheScheduler::new(
            Arc::new(lister_of(&["slow"])),
            Arc::new(StuckRefresher),
            Duration::from_secs(10),
        );
        let started = Instant::now();
        let report = scheduler.tick().await;
        assert_eq!(report, TickReport { refreshed: 0, failed: 1 });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(20) && elapsed < Duration::from_secs(21));
    }

    #[tokio::test(start_paused = true)]
    async fn refresh_timeout_can_be_tightened() {
        let scheduler = CacheScheduler::new(
            Arc::new(lister_of(&["slow"])),
            Arc::new(StuckRefresher),
            Duration::from_secs(10),
        )
        .with_refresh_timeout(Duration::from_secs(3));
        assert_eq!(scheduler.interval(), Duration::from_secs(10));

        let started = Instant::now();
        let report = scheduler.tick().await;
        assert_eq!(report, TickReport { refreshed: 0, failed: 1 });
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_secs(3) && elapsed < Duration::from_secs(4));
    }

    fn counting_refresher(calls: Arc<AtomicUsize>) -> MockBoardCacheRefresher {
        let mut refresher = MockBoardCacheRefresher::new();
        refresher.expect_refresh_board().returning(move |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        refresher
    }

    #[tokio::test(start_paused = true)]
    async fn run_ticks_periodically_and_stops_on_shutdown() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = CacheScheduler::new(
            Arc::new(lister_of(&["b1"])),
            Arc::new(counting_refresher(Arc::clone(&calls))),
            Duration::from_secs(10),
        );

        let (tx, rx) = watch::channel(false);
        let handle = scheduler.spawn(rx);

        // Ticks at t=0, 10s and 20s.
        tokio::time::sleep(Duration::from_secs(25)).await;
        let before = calls.load(Ordering::SeqCst);
        assert_eq!(before, 3);

        tx.send(true).unwrap();
        handle.await.unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(calls.load(Ordering::SeqCst), before);
    }

    #[tokio::test(start_paused = true)]
    async fn already_cancelled_scheduler_never_refreshes() {
        let mut refresher = MockBoardCacheRefresher::new();
        refresher.expect_refresh_board().never();
        let scheduler = CacheScheduler::new(
            Arc::new(lister_of(&["b1"])),
            Arc::new(refresher),
            Duration::from_secs(10),
        );

        let (tx, rx) = watch::channel(true);
        scheduler.spawn(rx).await.unwrap();
        drop(tx);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_sender_stops_the_loop() {
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = CacheScheduler::new(
            Arc::new(lister_of(&["b1"])),
            Arc::new(counting_refresher(Arc::clone(&calls))),
            Duration::from_secs(10),
        );
        let (tx, rx) = watch::channel(false);
        let handle = scheduler.spawn(rx);
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(tx);
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
