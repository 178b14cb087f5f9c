//! Coalescing behaviour across spawned tasks

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use vendor_list::{
    FetchOptions, GvlError, GvlResult, TransportResponse, VendorListCache, VendorListRequest,
    VendorListTransport,
};

const FIXTURE: &str = include_str!("../../../fixtures/vendor-list-v3.json");

/// Records every request it sees and answers after a delay
struct RecordingTransport {
    calls: AtomicUsize,
    seen: parking_lot::Mutex<Vec<VendorListRequest>>,
    fail: bool,
}

impl RecordingTransport {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            seen: parking_lot::Mutex::new(Vec::new()),
            fail,
        })
    }
}

#[async_trait]
impl VendorListTransport for RecordingTransport {
    async fn get(&self, request: &VendorListRequest) -> GvlResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        if self.fail {
            return Err(GvlError::transport(request.endpoint.clone(), "connection reset"));
        }
        Ok(TransportResponse::new(200, FIXTURE.as_bytes()))
    }
}

#[tokio::test]
async fn test_spawned_callers_with_same_key_share_one_request() {
    let transport = RecordingTransport::new(false);
    let cache = Arc::new(VendorListCache::new("https://gvl.test/v3", transport.clone()));

    let mut handles = Vec::new();
    for i in 0..8u32 {
        let cache = Arc::clone(&cache);
        // Same set, different order and duplicates
        let ids = if i % 2 == 0 { vec![12, 8, 755] } else { vec![755, 12, 8, 8] };
        handles.push(tokio::spawn(async move {
            cache.fetch(Some(&ids), FetchOptions::default()).await
        }));
    }

    for handle in handles {
        let list = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(list.vendor_list_version, 87);
    }

    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert_eq!(transport.seen.lock()[0].vendor_ids, vec![8, 12, 755]);
    assert_eq!(cache.in_flight_count(), 0);
}

#[tokio::test]
async fn test_failure_reaches_every_joined_caller() {
    let transport = RecordingTransport::new(true);
    let cache = VendorListCache::new("https://gvl.test/v3", transport.clone());

    let (a, b) = tokio::join!(
        cache.fetch(None, FetchOptions::default()),
        cache.fetch(None, FetchOptions::default()),
    );

    assert!(matches!(a, Err(GvlError::Transport { .. })));
    assert_eq!(a, b);
    assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
    assert!(cache.get_cached().is_none());
}

#[tokio::test]
async fn test_default_and_per_call_headers_form_the_key() {
    let transport = RecordingTransport::new(false);
    let mut defaults = std::collections::BTreeMap::new();
    defaults.insert("X-Site".to_string(), "news".to_string());
    let cache = VendorListCache::new("https://gvl.test/v3", transport.clone())
        .with_default_headers(defaults);

    let (a, b) = tokio::join!(
        cache.fetch(None, FetchOptions::default()),
        cache.fetch(None, FetchOptions::default().with_header("X-Locale", "fr")),
    );
    assert!(a.is_ok() && b.is_ok());
    assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

    let seen = transport.seen.lock();
    assert!(seen.iter().all(|r| r.headers.get("X-Site").map(String::as_str) == Some("news")));
    assert!(seen.iter().any(|r| r.headers.contains_key("X-Locale")));
}
