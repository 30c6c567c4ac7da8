//! Full pipeline tests: document assembly, batching, dead-lettering,
//! settings-driven wiring, an HTTP backend and scheduled drains.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use e2e_tests::{ArticleRef, TestHarness, ThreadRef, ARTICLES};
use indexer_adapters::{load_backend, ElasticsearchBackend, ElasticsearchConfig, InMemoryBackend};
use indexer_queue::{BulkProcessQueue, CollectionRecord, Queues, Reference, DEAD_QUEUE, RETRY_QUEUE};
use indexer_scheduler::{create_drain_jobs, DrainJobConfig, SchedulerConfig, SchedulerService};
use indexer_types::{AdapterKind, DatabaseSettings, QueueSettings, Settings};

#[tokio::test]
async fn test_documents_carry_shared_and_ref_fields() {
    let harness = TestHarness::with_queue("docs", 1);
    harness.collections.insert(
        CollectionRecord::new(ARTICLES, "articles")
            .with_ref_fields(true)
            .with_shared_attribute("site", json!("blog"))
            .with_shared_attribute("title", json!("overridden")),
    );
    harness.articles.insert("7", "Seven");

    let reference = ArticleRef::new("r", "7");
    harness.queues.push("docs", &[&reference as &dyn Reference]).unwrap();
    harness.drain("docs", 0).await;

    let doc = harness.backend.document("articles", "7:0").unwrap();
    assert_eq!(doc["site"], "blog");
    // Document fields win over shared attributes
    assert_eq!(doc["title"], "Seven");
    assert_eq!(doc["ref_id"], "7");
    assert!(doc["ref_version"].is_i64());
}

#[tokio::test]
async fn test_preload_runs_once_per_drain_and_batches_split() {
    let harness = TestHarness::with_queue("docs", 1);
    let harness = TestHarness {
        backend: InMemoryBackend::new().with_index_prefix("").with_max_documents(3),
        ..harness
    };
    for n in 0..5 {
        harness.articles.insert(&n.to_string(), "t");
    }

    let mut refs: Vec<Box<dyn Reference>> = (0..5)
        .map(|n| Box::new(ArticleRef::new("r", &n.to_string())) as Box<dyn Reference>)
        .collect();
    refs.push(Box::new(ThreadRef::new("r", "t", 4)));
    let borrowed: Vec<&dyn Reference> = refs.iter().map(|r| r.as_ref()).collect();
    harness.queues.push("docs", &borrowed).unwrap();

    let result = harness.drain("docs", 0).await;

    assert_eq!(result.counts(), (6, 0));
    assert_eq!(harness.articles.preload_calls(), 1);
    // 9 documents with a flush every 3
    assert_eq!(harness.backend.bulk_calls(), 3);
    assert_eq!(harness.backend.document_count(), 9);
}

#[tokio::test]
async fn test_unusable_entries_are_dropped_or_dead_lettered() {
    let harness = TestHarness::with_queue("docs", 1);
    harness.articles.insert("ok", "fine");
    harness
        .queues
        .push_serialized(
            "docs",
            "r",
            &[
                "Retired|1|r|x".to_string(),
                "Article|one|r|y".to_string(),
                "Thread|2|r|t".to_string(),
                "Article|1|r|ok".to_string(),
            ],
        )
        .unwrap();

    let result = harness.drain("docs", 0).await;

    assert_eq!(result.processed, 4);
    assert_eq!(result.skipped, 1);
    assert_eq!(result.dead, 2);
    assert_eq!(result.failures, 0);
    assert_eq!(harness.count("docs", 0), 0);
    assert_eq!(harness.count(RETRY_QUEUE, 0), 0);
    assert_eq!(
        harness.payloads(DEAD_QUEUE, 0),
        vec!["Article|one|r|y", "Thread|2|r|t"]
    );
    assert_eq!(harness.backend.document_ids("articles"), vec!["ok:0"]);
}

#[tokio::test]
async fn test_unknown_collection_is_retried() {
    let harness = TestHarness::with_queue("docs", 1);
    harness.articles.insert("x", "orphan");
    harness
        .queues
        .push_serialized("docs", "r", &["Article|99|r|x".to_string()])
        .unwrap();

    let result = harness.drain("docs", 0).await;
    assert_eq!(result.counts(), (1, 1));
    assert_eq!(harness.payloads(RETRY_QUEUE, 0), vec!["Article|99|r|x"]);
}

#[tokio::test]
async fn test_settings_wiring_with_memory_backend() {
    let dir = tempfile::TempDir::new().unwrap();
    let settings = Settings {
        namespace: "wired".to_string(),
        db_path: dir.path().join("q").to_string_lossy().to_string(),
        databases: vec![DatabaseSettings::new("local", AdapterKind::Memory)],
        queues: vec![QueueSettings::new("docs", 2)],
        ..Default::default()
    };

    let storage = Arc::new(indexer_storage::Storage::open(&settings.expanded_db_path()).unwrap());
    let queues = Arc::new(Queues::from_settings(storage, &settings));
    let backend = load_backend(&settings).unwrap().expect("memory backend");
    assert_eq!(backend.name(), "memory");
    assert_eq!(backend.full_collection_name("articles"), "indexer-articles");

    queues.register_all_queues().unwrap();
    let names: Vec<String> = queues.raw_queues().iter().map(|s| s.zset_key()).collect();
    assert_eq!(
        names,
        vec![
            "wired:{docs}:0:zset",
            "wired:{docs}:1:zset",
            "wired:{retry_queue}:0:zset",
            "wired:{dead_queue}:0:zset",
        ]
    );
}

#[tokio::test]
async fn test_disabled_settings_neither_push_nor_drain() {
    let harness = TestHarness::with_queue("docs", 1);
    harness
        .queues
        .push_serialized("docs", "r", &["Article|1|r|a".to_string()])
        .unwrap();

    let disabled = Arc::new(
        Queues::new(harness.storage.clone(), "e2e", vec![indexer_queue::QueueDefinition::new("docs", 1)])
            .with_enabled(false),
    );
    let reference = ArticleRef::new("r", "b");
    assert_eq!(disabled.push("docs", &[&reference as &dyn Reference]).unwrap(), 0);

    let drainer = BulkProcessQueue::for_shard(
        disabled,
        harness.references.clone(),
        harness.backend_arc(),
        "docs",
        0,
    )
    .unwrap();
    assert_eq!(drainer.process().await.unwrap().counts(), (0, 0));
    assert_eq!(harness.count("docs", 0), 1);
    assert_eq!(harness.backend.bulk_calls(), 0);
}

#[tokio::test]
async fn test_drain_against_elasticsearch_bulk_api() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .and(body_string_contains("\"_index\":\"idx-articles\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "took": 3,
            "errors": true,
            "items": [
                {"index": {"_index": "idx-articles", "_id": "a:0", "status": 201}},
                {"index": {"_index": "idx-articles", "_id": "b:0", "status": 429,
                    "error": {"type": "es_rejected_execution_exception", "reason": "queue full"}}}
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let harness = TestHarness::with_queue("docs", 1);
    harness.articles.insert("a", "A");
    harness.articles.insert("b", "B");
    harness
        .queues
        .push_serialized("docs", "r", &["Article|1|r|a".to_string(), "Article|1|r|b".to_string()])
        .unwrap();

    let backend = ElasticsearchBackend::new(ElasticsearchConfig::new(server.uri()).with_index_prefix("idx")).unwrap();
    let drainer = BulkProcessQueue::for_shard(
        harness.queues.clone(),
        harness.references.clone(),
        Arc::new(backend),
        "docs",
        0,
    )
    .unwrap();

    let result = drainer.process().await.unwrap();
    assert_eq!(result.counts(), (2, 1));
    assert_eq!(harness.payloads(RETRY_QUEUE, 0), vec!["Article|1|r|b"]);
}

#[tokio::test]
async fn test_http_outage_keeps_everything_for_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_bulk"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let harness = TestHarness::with_queue("docs", 1);
    harness.articles.insert("a", "A");
    harness
        .queues
        .push_serialized("docs", "r", &["Article|1|r|a".to_string()])
        .unwrap();

    let backend = ElasticsearchBackend::new(ElasticsearchConfig::new(server.uri())).unwrap();
    let drainer =
        BulkProcessQueue::for_shard(harness.queues.clone(), harness.references.clone(), Arc::new(backend), "docs", 0)
            .unwrap();

    assert_eq!(drainer.process().await.unwrap().counts(), (1, 1));
    assert_eq!(harness.payloads(RETRY_QUEUE, 0), vec!["Article|1|r|a"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_scheduled_drains_empty_every_shard() {
    let harness = TestHarness::with_queue("docs", 3);
    for n in 0..6 {
        harness.articles.insert(&format!("s{}", n), "scheduled");
    }
    let payloads: Vec<(String, String)> = (0..6)
        .map(|n| (format!("tenant-{}", n), format!("Article|1|tenant-{}|s{}", n, n)))
        .collect();
    for (routing, payload) in &payloads {
        harness.queues.push_serialized("docs", routing, &[payload.clone()]).unwrap();
    }

    let mut scheduler = SchedulerService::new(SchedulerConfig {
        shutdown_timeout_secs: 5,
        ..Default::default()
    })
    .await
    .unwrap();
    let jobs = create_drain_jobs(
        &scheduler,
        harness.queues.clone(),
        harness.references.clone(),
        harness.backend_arc(),
        DrainJobConfig::default().with_cron("* * * * * *"),
    )
    .await
    .unwrap();
    assert_eq!(jobs.len(), 4);

    scheduler.start().await.unwrap();
    let deadline = Instant::now() + Duration::from_secs(15);
    loop {
        let drained = (0..3).all(|shard| harness.count("docs", shard) == 0);
        let all_ran = jobs.iter().all(|job| {
            scheduler
                .registry()
                .get_status(job)
                .is_some_and(|status| status.run_count >= 1)
        });
        if (drained && all_ran) || Instant::now() >= deadline {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    scheduler.shutdown().await.unwrap();

    for shard in 0..3 {
        assert_eq!(harness.count("docs", shard), 0);
    }
    assert_eq!(harness.backend.document_ids("articles").len(), 6);
    assert!(scheduler
        .registry()
        .get_all_status()
        .iter()
        .all(|status| status.error_count == 0));
}
