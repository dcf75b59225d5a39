//! Integration tests for the watcher → queue → worker flow.

mod helpers;

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use sigil_entity::job::ScanJob;
use sigil_entity::scan::Verdict;
use sigil_worker::WatcherRunner;
use sigil_worker::filters::determine_priority;

use helpers::{ListWatcher, StubDownloader, StubScanner, TestBot};

fn discovered(name: &str) -> ScanJob {
    ScanJob::new("pypi", name, "1.0.0").with_priority(determine_priority("pypi", name, 0))
}

#[tokio::test]
async fn test_watcher_jobs_are_scanned_in_priority_order() {
    let bot = TestBot::standard();
    let watcher = Arc::new(ListWatcher::new(vec![
        discovered("agent-kit"),
        discovered("reqeusts"),
        discovered("agent-kit"),
    ]));
    let runner = WatcherRunner::new(watcher, bot.queue.clone(), 3);

    let stats = runner.poll_once().await.unwrap();
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.duplicates, 1);

    assert_eq!(bot.drain().await, 2);
    assert_eq!(
        *bot.scanner.scanned.lock().unwrap(),
        vec!["reqeusts".to_string(), "agent-kit".to_string()]
    );

    let doc = bot.store.document("pypi", "reqeusts").await.unwrap().unwrap();
    assert_eq!(doc.latest.unwrap().verdict, Verdict::HighRisk);
    assert!(doc.last_error.is_none());

    let depth = bot.queue.queue_depth().await.unwrap();
    assert_eq!(depth.pending(), 0);
    assert_eq!(depth.processing, 0);

    // Resolved jobs release their dedup claim.
    assert!(bot.queue.enqueue(&discovered("agent-kit")).await.unwrap());
}

#[tokio::test(start_paused = true)]
async fn test_scan_timeout_is_stored_and_completed() {
    let bot = TestBot::new(
        StubDownloader::default(),
        StubScanner {
            delay: Duration::from_secs(600),
            ..StubScanner::default()
        },
        Duration::from_secs(5),
    );
    bot.queue.enqueue(&discovered("slow-agent")).await.unwrap();

    assert_eq!(bot.drain().await, 1);

    let doc = bot.store.document("pypi", "slow-agent").await.unwrap().unwrap();
    assert!(doc.latest.is_none());
    let error = doc.last_error.unwrap();
    assert_eq!(error.verdict, Verdict::Error);
    assert_eq!(error.error, "Scan timed out after 5s");

    let depth = bot.queue.queue_depth().await.unwrap();
    assert_eq!(depth.delayed, 0);
    assert_eq!(depth.dead_letter, 0);
}

#[tokio::test]
async fn test_name_with_whitespace_is_skipped() {
    let bot = TestBot::standard();
    bot.queue
        .enqueue(&ScanJob::new("pypi", "evil package", "1.0.0"))
        .await
        .unwrap();

    assert_eq!(bot.drain().await, 1);
    assert_eq!(bot.downloader.calls.load(Ordering::SeqCst), 0);
    assert!(bot.scanner.scanned.lock().unwrap().is_empty());
    assert!(bot.store.document("pypi", "evil package").await.unwrap().is_none());
}

#[tokio::test]
async fn test_persistent_download_failure_is_dead_lettered_once() {
    let bot = TestBot::new(
        StubDownloader {
            fail: true,
            ..StubDownloader::default()
        },
        StubScanner::default(),
        Duration::from_secs(30),
    );
    bot.queue
        .enqueue(&discovered("agent-kit").with_max_retries(3))
        .await
        .unwrap();

    assert_eq!(bot.drain().await, 4);
    assert_eq!(bot.downloader.calls.load(Ordering::SeqCst), 4);

    let dead = bot.queue.dead_letters(10).await.unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].job.retries, 3);
    assert!(dead[0].error.contains("Download failed"));

    assert_eq!(bot.drain().await, 0);
    assert_eq!(bot.queue.queue_depth().await.unwrap().dead_letter, 1);
}
