//! Vendor list transport seam
//!
//! The cache only needs "GET this request, give me status and body". The
//! production implementation is a pooled `reqwest` client; tests swap in
//! counting or delaying transports.

use async_trait::async_trait;
use cmp_config::{protocol::VENDOR_IDS_QUERY_PARAM, VendorListSettings};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::error::{GvlError, GvlResult};

/// Canonical vendor list request
///
/// Vendor IDs are sorted and deduplicated on construction, headers are kept
/// in a sorted map, so equal requests always produce equal keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorListRequest {
    pub endpoint: String,
    pub vendor_ids: Vec<u32>,
    pub headers: BTreeMap<String, String>,
}

impl VendorListRequest {
    pub fn new(
        endpoint: impl Into<String>,
        vendor_ids: Option<&[u32]>,
        headers: BTreeMap<String, String>,
    ) -> Self {
        let mut ids = vendor_ids.map(<[u32]>::to_vec).unwrap_or_default();
        ids.sort_unstable();
        ids.dedup();
        Self {
            endpoint: endpoint.into(),
            vendor_ids: ids,
            headers,
        }
    }

    /// Comma-separated `vendorIds` value, `None` for the full list
    pub fn vendor_ids_param(&self) -> Option<String> {
        if self.vendor_ids.is_empty() {
            return None;
        }
        let joined = self
            .vendor_ids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        Some(joined)
    }

    /// Key used to coalesce identical in-flight requests
    pub fn cache_key(&self) -> String {
        let mut key = self.endpoint.clone();
        key.push('?');
        if let Some(ids) = self.vendor_ids_param() {
            key.push_str(VENDOR_IDS_QUERY_PARAM);
            key.push('=');
            key.push_str(&ids);
        }
        for (name, value) in &self.headers {
            key.push('|');
            key.push_str(&name.to_ascii_lowercase());
            key.push(':');
            key.push_str(value);
        }
        key
    }
}

/// Raw response handed back to the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl TransportResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

#[async_trait]
pub trait VendorListTransport: Send + Sync {
    async fn get(&self, request: &VendorListRequest) -> GvlResult<TransportResponse>;
}

/// `reqwest`-backed transport
///
/// Freshness is left to HTTP caching headers on the endpoint.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> GvlResult<Self> {
        let client = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .timeout(timeout)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| GvlError::Config(e.to_string()))?;
        Ok(Self { client })
    }

    pub fn from_settings(settings: &VendorListSettings) -> GvlResult<Self> {
        Self::new(Duration::from_millis(settings.timeout_ms))
    }
}

#[async_trait]
impl VendorListTransport for HttpTransport {
    async fn get(&self, request: &VendorListRequest) -> GvlResult<TransportResponse> {
        let mut builder = self.client.get(&request.endpoint);
        if let Some(ids) = request.vendor_ids_param() {
            builder = builder.query(&[(VENDOR_IDS_QUERY_PARAM, ids)]);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                GvlError::Timeout {
                    endpoint: request.endpoint.clone(),
                }
            } else {
                GvlError::transport(request.endpoint.clone(), e)
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| GvlError::transport(request.endpoint.clone(), e))?;

        debug!(
            endpoint = %request.endpoint,
            status,
            bytes = body.len(),
            "Vendor list response received"
        );
        Ok(TransportResponse::new(status, body.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_key_is_canonical() {
        let a = VendorListRequest::new("https://gvl", Some(&[3, 1, 2, 3]), BTreeMap::new());
        let b = VendorListRequest::new("https://gvl", Some(&[1, 2, 3]), BTreeMap::new());
        assert_eq!(a.vendor_ids, vec![1, 2, 3]);
        assert_eq!(a.cache_key(), b.cache_key());
        assert_eq!(a.cache_key(), "https://gvl?vendorIds=1,2,3");
    }

    #[test]
    fn test_headers_change_key() {
        let plain = VendorListRequest::new("https://gvl", None, BTreeMap::new());
        let mut headers = BTreeMap::new();
        headers.insert("X-Site".to_string(), "news".to_string());
        let with_header = VendorListRequest::new("https://gvl", None, headers);
        assert_ne!(plain.cache_key(), with_header.cache_key());
        assert_eq!(with_header.cache_key(), "https://gvl?|x-site:news");
    }

    #[test]
    fn test_empty_filter_requests_full_list() {
        let request = VendorListRequest::new("https://gvl", Some(&[]), BTreeMap::new());
        assert_eq!(request.vendor_ids_param(), None);
    }
}
