//! Coalescing vendor list cache
//!
//! Requests with the same canonical key share one in-flight future; the
//! table only holds requests that have not completed yet. The last completed
//! result is kept for synchronous readers.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tcf_types::VendorList;
use tracing::{debug, info, warn};

use cmp_config::VendorListSettings;

use crate::error::{GvlError, GvlResult};
use crate::transport::{HttpTransport, TransportResponse, VendorListRequest, VendorListTransport};

/// `Ok(None)` means the endpoint answered 204: no vendor list applies
pub type FetchResult = GvlResult<Option<Arc<VendorList>>>;

type SharedFetch = Shared<BoxFuture<'static, FetchResult>>;

/// Per-call overrides
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    /// Replaces the configured endpoint
    pub endpoint: Option<String>,
    /// Merged over the configured default headers
    pub headers: BTreeMap<String, String>,
}

impl FetchOptions {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

pub struct VendorListCache {
    endpoint: String,
    default_headers: BTreeMap<String, String>,
    transport: Arc<dyn VendorListTransport>,
    /// key -> (generation, request)
    in_flight: Arc<DashMap<String, (u64, SharedFetch)>>,
    cached: Arc<RwLock<Option<Arc<VendorList>>>>,
    next_generation: AtomicU64,
}

impl VendorListCache {
    pub fn new(endpoint: impl Into<String>, transport: Arc<dyn VendorListTransport>) -> Self {
        Self {
            endpoint: endpoint.into(),
            default_headers: BTreeMap::new(),
            transport,
            in_flight: Arc::new(DashMap::new()),
            cached: Arc::new(RwLock::new(None)),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Cache backed by the HTTP transport described in configuration
    pub fn from_settings(settings: &VendorListSettings) -> GvlResult<Self> {
        let transport = HttpTransport::from_settings(settings)?;
        Ok(Self::new(settings.endpoint.clone(), Arc::new(transport))
            .with_default_headers(settings.headers.clone()))
    }

    pub fn with_default_headers(mut self, headers: BTreeMap<String, String>) -> Self {
        self.default_headers = headers;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Fetch the vendor list, joining an identical request already in flight
    pub async fn fetch(&self, vendor_ids: Option<&[u32]>, options: FetchOptions) -> FetchResult {
        let endpoint = options.endpoint.unwrap_or_else(|| self.endpoint.clone());
        let mut headers = self.default_headers.clone();
        headers.extend(options.headers);

        let request = VendorListRequest::new(endpoint, vendor_ids, headers);
        let key = request.cache_key();

        let shared = match self.in_flight.entry(key.clone()) {
            Entry::Occupied(entry) => {
                debug!(%key, "Joining in-flight vendor list request");
                entry.get().1.clone()
            }
            Entry::Vacant(entry) => {
                let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
                let fetch = run_request(
                    Arc::clone(&self.transport),
                    request,
                    key,
                    generation,
                    Arc::clone(&self.in_flight),
                    Arc::clone(&self.cached),
                )
                .boxed()
                .shared();
                entry.insert((generation, fetch.clone()));
                fetch
            }
        };

        shared.await
    }

    /// Last completed result, without any I/O
    pub fn get_cached(&self) -> Option<Arc<VendorList>> {
        self.cached.read().clone()
    }

    /// Seed the cached reference with a list fetched elsewhere
    pub fn prime(&self, list: Option<Arc<VendorList>>) {
        if let Some(list) = &list {
            debug!(version = list.vendor_list_version, "Vendor list cache primed");
        }
        *self.cached.write() = list;
    }

    /// Forget in-flight requests and the cached reference
    pub fn clear(&self) {
        self.in_flight.clear();
        *self.cached.write() = None;
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }
}

async fn run_request(
    transport: Arc<dyn VendorListTransport>,
    request: VendorListRequest,
    key: String,
    generation: u64,
    in_flight: Arc<DashMap<String, (u64, SharedFetch)>>,
    cached: Arc<RwLock<Option<Arc<VendorList>>>>,
) -> FetchResult {
    info!(
        endpoint = %request.endpoint,
        vendor_ids = request.vendor_ids.len(),
        "Fetching vendor list"
    );

    let outcome = match transport.get(&request).await {
        Ok(response) => parse_response(&request.endpoint, response),
        Err(e) => Err(e),
    };

    // A clear() followed by a new request may have reused the key
    in_flight.remove_if(&key, |_, (entry_generation, _)| *entry_generation == generation);

    match &outcome {
        Ok(Some(list)) => {
            info!(
                version = list.vendor_list_version,
                vendors = list.vendors.len(),
                "Vendor list loaded"
            );
            *cached.write() = Some(Arc::clone(list));
        }
        Ok(None) => {
            info!(endpoint = %request.endpoint, "Vendor list not applicable (204)");
            *cached.write() = None;
        }
        Err(e) => warn!(error = %e, "Vendor list fetch failed"),
    }

    outcome
}

/// Interpret a transport response
pub fn parse_response(endpoint: &str, response: TransportResponse) -> FetchResult {
    match response.status {
        204 => Ok(None),
        200..=299 => {
            let list: VendorList = serde_json::from_slice(&response.body)
                .map_err(|e| GvlError::InvalidPayload(e.to_string()))?;
            list.validate()
                .map_err(|e| GvlError::InvalidPayload(e.to_string()))?;
            Ok(Some(Arc::new(list)))
        }
        status => Err(GvlError::status(endpoint, status)),
    }
}
