//! Queue lifecycle scenarios: push, count, drain, retry, shard routing and
//! idempotent registration.

use pretty_assertions::assert_eq;

use e2e_tests::{routing_for_shard, ArticleRef, TestHarness};
use indexer_queue::{QueueCount, QueueDefinition, Reference, RETRY_QUEUE};

/// Single-shard queue, one reference, successful drain.
#[tokio::test]
async fn test_push_count_drain_success() {
    let harness = TestHarness::with_queue("Q", 1);
    harness.articles.insert("ref1", "First article");

    let reference = ArticleRef::new("site-a", "ref1");
    let written = harness.queues.push("Q", &[&reference as &dyn Reference]).unwrap();
    assert_eq!(written, 1);

    let counts = harness.queues.queue_counts().unwrap();
    assert_eq!(
        counts[0],
        QueueCount {
            queue_name: "Q".to_string(),
            shard: 0,
            count: 1,
            shard_limit: indexer_types::DEFAULT_SHARD_LIMIT,
        }
    );

    let result = harness.drain("Q", 0).await;
    assert_eq!(result.counts(), (1, 0));
    assert_eq!(harness.count("Q", 0), 0);
    assert_eq!(harness.count(RETRY_QUEUE, 0), 0);

    let stored = harness.backend.document("articles", "ref1:0").unwrap();
    assert_eq!(stored["title"], "First article");
    assert_eq!(stored["unique_identifier"], "ref1:0");
}

/// Same as above but the bulk call fails: the reference lands on the retry queue.
#[tokio::test]
async fn test_bulk_failure_moves_reference_to_retry() {
    let harness = TestHarness::with_queue("Q", 1);
    harness.articles.insert("ref1", "First article");
    harness.backend.set_fail_bulk(true);

    let reference = ArticleRef::new("site-a", "ref1");
    harness.queues.push("Q", &[&reference as &dyn Reference]).unwrap();

    let result = harness.drain("Q", 0).await;
    assert_eq!(result.counts(), (1, 1));
    assert_eq!(harness.count("Q", 0), 0);
    assert_eq!(harness.payloads(RETRY_QUEUE, 0), vec![reference.serialize().unwrap()]);
    assert_eq!(harness.backend.document_count(), 0);

    // The retry queue drains like any other once the backend recovers
    harness.backend.set_fail_bulk(false);
    let retried = harness.drain(RETRY_QUEUE, 0).await;
    assert_eq!(retried.counts(), (1, 0));
    assert_eq!(harness.count(RETRY_QUEUE, 0), 0);
    assert!(harness.backend.document("articles", "ref1:0").is_some());
}

/// Two routing keys on a three-shard queue land on shards 0 and 1, each
/// scored from 1.
#[tokio::test]
async fn test_routing_keys_spread_over_shards() {
    let harness = TestHarness::with_queue("Q", 3);
    let key0 = routing_for_shard("tenant", 0, 3);
    let key1 = routing_for_shard("tenant", 1, 3);

    let first = ArticleRef::new(&key0, "a");
    let second = ArticleRef::new(&key1, "b");
    harness
        .queues
        .push("Q", &[&first as &dyn Reference, &second as &dyn Reference])
        .unwrap();

    let items = harness.queues.all_queued_items().unwrap();
    assert_eq!(
        items["e2e:{Q}:0:zset"],
        vec![(first.serialize().unwrap(), 1)]
    );
    assert_eq!(
        items["e2e:{Q}:1:zset"],
        vec![(second.serialize().unwrap(), 1)]
    );
    assert!(items["e2e:{Q}:2:zset"].is_empty());
}

/// Registering the same queue repeatedly creates its shards once.
#[tokio::test]
async fn test_register_is_idempotent() {
    let harness = TestHarness::with_queue("Q", 3);

    harness.queues.register(QueueDefinition::new("Q", 3)).unwrap();
    let shards_after_first = harness.queues.raw_queues().len();

    harness.queues.register(QueueDefinition::new("Q", 3)).unwrap();
    harness.queues.register(QueueDefinition::new("Q", 3)).unwrap();
    assert_eq!(harness.queues.raw_queues().len(), shards_after_first);
    assert_eq!(shards_after_first, 3);

    harness.queues.register_all_queues().unwrap();
    harness.queues.register_all_queues().unwrap();
    // Q plus the retry and dead queues
    assert_eq!(harness.queues.raw_queues().len(), 5);
    assert_eq!(harness.queues.queues().len(), 3);
}
