//! Cache and deduplication integration tests.
//!
//! Two services share one cache and one deduplicator, the way an
//! application session wires them, over an in-memory backend.
//!
//! Run with: `cargo test --test service_cache`

use futures::future::{BoxFuture, FutureExt};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use trek_route::{
    ApiRequest, BaseService, CacheManager, GetOptions, Method, RequestDeduplicator, Transport,
    TrekRouteError,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Simulated round trip of a read; writes take `WRITE_LATENCY`.
const READ_LATENCY: Duration = Duration::from_millis(100);
const WRITE_LATENCY: Duration = Duration::from_millis(10);

/// In-memory REST backend holding one JSON document per path.
///
/// Reads answer with the document as it was when the request arrived.
#[derive(Default)]
struct MemoryBackend {
    documents: Mutex<HashMap<String, Value>>,
    gets: AtomicUsize,
    writes: AtomicUsize,
}

impl MemoryBackend {
    fn with(documents: &[(&str, Value)]) -> Arc<Self> {
        let backend = Self::default();
        {
            let mut docs = backend.documents.lock().unwrap();
            for (path, doc) in documents {
                docs.insert(path.to_string(), doc.clone());
            }
        }
        Arc::new(backend)
    }
}

impl Transport for MemoryBackend {
    fn send(&self, request: ApiRequest) -> BoxFuture<'_, Result<Value, TrekRouteError>> {
        async move {
            if request.method == Method::Get {
                self.gets.fetch_add(1, Ordering::SeqCst);
                let snapshot = self.documents.lock().unwrap().get(&request.path).cloned();
                tokio::time::sleep(READ_LATENCY).await;
                return snapshot.ok_or_else(|| TrekRouteError::http_status(404, "not found"));
            }

            tokio::time::sleep(WRITE_LATENCY).await;
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut docs = self.documents.lock().unwrap();
            if request.method == Method::Delete {
                docs.remove(&request.path);
                return Ok(Value::Null);
            }
            let body = request.body.unwrap_or(Value::Null);
            docs.insert(request.path.clone(), body.clone());
            Ok(body)
        }
        .boxed()
    }
}

fn session(backend: &Arc<MemoryBackend>) -> (BaseService, BaseService) {
    let cache = Arc::new(CacheManager::new());
    let dedup = Arc::new(RequestDeduplicator::new());
    let treks = BaseService::new(
        "/api/treks",
        Arc::clone(backend) as Arc<dyn Transport>,
        Arc::clone(&cache),
        Arc::clone(&dedup),
    );
    let regions = BaseService::new(
        "/api/regions",
        Arc::clone(backend) as Arc<dyn Transport>,
        cache,
        dedup,
    );
    (treks, regions)
}

#[tokio::test(start_paused = true)]
async fn test_views_share_one_fetch() {
    init_logging();
    let backend = MemoryBackend::with(&[(
        "/api/treks",
        json!({"results": [{"id": 5, "title": "Everest Base Camp"}]}),
    )]);
    let (treks, _) = session(&backend);

    // Three views mount at once and ask for the same list
    let (a, b, c) = tokio::join!(
        treks.get_list("", json!({"page": 1}), None, GetOptions::default()),
        treks.get_list("", json!({"page": 1}), None, GetOptions::default()),
        treks.get_list("", json!({"page": 1}), None, GetOptions::default()),
    );

    assert_eq!(backend.gets.load(Ordering::SeqCst), 1);
    assert_eq!(a.unwrap().len(), 1);
    assert_eq!(b.unwrap(), c.unwrap());

    // A later view is served from cache
    treks
        .get_list("", json!({"page": 1}), None, GetOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.gets.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_update_forces_refetch_of_resource_only() {
    init_logging();
    let backend = MemoryBackend::with(&[
        ("/api/treks/5", json!({"id": 5, "title": "Everest Base Camp"})),
        ("/api/regions/khumbu", json!({"name": "Khumbu"})),
    ]);
    let (treks, regions) = session(&backend);

    treks.get("/5", Value::Null, GetOptions::default()).await.unwrap();
    regions
        .get("/khumbu", Value::Null, GetOptions::default())
        .await
        .unwrap();
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);

    treks
        .put("/5", json!({"id": 5, "title": "EBC via Gokyo"}))
        .await
        .unwrap();

    let refreshed = treks.get("/5", Value::Null, GetOptions::default()).await.unwrap();
    assert_eq!(refreshed["title"], "EBC via Gokyo");
    regions
        .get("/khumbu", Value::Null, GetOptions::default())
        .await
        .unwrap();

    // Only the trek was refetched
    assert_eq!(backend.gets.load(Ordering::SeqCst), 3);
    assert_eq!(backend.writes.load(Ordering::SeqCst), 1);

    treks.delete("/5").await.unwrap();
    assert!(treks.get("/5", Value::Null, GetOptions::default()).await.is_err());
    assert_eq!(backend.gets.load(Ordering::SeqCst), 4);
}

#[tokio::test(start_paused = true)]
async fn test_update_during_slow_read_is_not_undone() {
    init_logging();
    let backend = MemoryBackend::with(&[(
        "/api/treks/5",
        json!({"id": 5, "title": "Everest Base Camp"}),
    )]);
    let (treks, _) = session(&backend);

    // A view starts reading, the trek is edited while that read is in
    // flight, then another view reads it
    let slow_read = treks.get("/5", Value::Null, GetOptions::default());
    let edit_then_read = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        treks
            .put("/5", json!({"id": 5, "title": "EBC via Gokyo"}))
            .await
            .unwrap();
        treks.get("/5", Value::Null, GetOptions::default()).await
    };
    let (before_edit, after_edit) = tokio::join!(slow_read, edit_then_read);

    assert_eq!(before_edit.unwrap()["title"], "Everest Base Camp");
    assert_eq!(after_edit.unwrap()["title"], "EBC via Gokyo");
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);

    // The slower pre-edit answer did not overwrite the cache
    let cached = treks.get("/5", Value::Null, GetOptions::default()).await.unwrap();
    assert_eq!(cached["title"], "EBC via Gokyo");
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_failed_read_reaches_all_waiters_and_is_retried() {
    init_logging();
    let backend = MemoryBackend::with(&[]);
    let (treks, _) = session(&backend);

    let (a, b) = tokio::join!(
        treks.get("/404", Value::Null, GetOptions::default()),
        treks.get("/404", Value::Null, GetOptions::default()),
    );
    let expected = Err(TrekRouteError::http_status(404, "not found"));
    assert_eq!(a, expected);
    assert_eq!(b, expected);
    assert_eq!(backend.gets.load(Ordering::SeqCst), 1);

    // Nothing cached, nothing pending: the next read goes out again
    let _ = treks.get("/404", Value::Null, GetOptions::default()).await;
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_batch_mixes_successes_and_failures() {
    init_logging();
    let backend = MemoryBackend::with(&[
        ("/api/treks/1", json!({"id": 1})),
        ("/api/treks/2", json!({"id": 2})),
    ]);
    let (treks, _) = session(&backend);

    let results = BaseService::batch(
        ["/1", "/missing", "/2"]
            .into_iter()
            .map(|id| treks.get(id, Value::Null, GetOptions::default())),
    )
    .await;

    let ok: Vec<bool> = results.iter().map(|r| r.success).collect();
    assert_eq!(ok, vec![true, false, true]);
    assert_eq!(results[2].data.as_ref().unwrap()["id"], 2);
    assert!(matches!(
        results[1].error,
        Some(TrekRouteError::Network {
            status_code: Some(404),
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_cached_read_expires() {
    init_logging();
    let backend = MemoryBackend::with(&[("/api/treks/5", json!({"id": 5}))]);
    let (treks, _) = session(&backend);

    let options = GetOptions::default().with_ttl(Duration::from_secs(60));
    treks.get("/5", Value::Null, options.clone()).await.unwrap();
    tokio::time::advance(Duration::from_secs(30)).await;
    treks.get("/5", Value::Null, options.clone()).await.unwrap();
    assert_eq!(backend.gets.load(Ordering::SeqCst), 1);

    tokio::time::advance(Duration::from_secs(31)).await;
    treks.get("/5", Value::Null, options).await.unwrap();
    assert_eq!(backend.gets.load(Ordering::SeqCst), 2);
}
