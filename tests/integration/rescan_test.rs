//! Integration tests for stored results flowing back through the rescan
//! scheduler.

mod helpers;

use std::time::Duration;

use chrono::Utc;

use sigil_core::config::rescan::RescanConfig;
use sigil_entity::job::ScanJob;
use sigil_worker::RescanScheduler;

use helpers::TestBot;

#[tokio::test]
async fn test_high_risk_result_is_rescanned_at_low_priority() {
    let bot = TestBot::standard();
    bot.queue
        .enqueue(&ScanJob::new("npm", "mcp-server-shell", "0.4.0"))
        .await
        .unwrap();
    assert_eq!(bot.drain().await, 1);

    let scheduler = RescanScheduler::new(
        bot.queue.clone(),
        bot.store.clone(),
        RescanConfig::default(),
        3,
    );

    // Too recent for any class.
    let stats = scheduler.run_once().await.unwrap();
    assert_eq!(stats.due, 0);

    let later = Utc::now() + chrono::Duration::days(8);
    let stats = scheduler.run_at(later).await.unwrap();
    assert_eq!(stats.due, 1);
    assert_eq!(stats.enqueued, 1);

    let job = bot.queue.dequeue(Duration::ZERO).await.unwrap().unwrap();
    assert_eq!(job.name, "mcp-server-shell");
    assert_eq!(job.version, "0.4.0");
    assert_eq!(job.priority, "low");
    assert!(job.metadata.is_rescan());
    assert_eq!(job.metadata.previous_verdict(), Some("HIGH_RISK"));
    assert_eq!(job.metadata.get_str("source"), Some("sigil-bot"));
}
