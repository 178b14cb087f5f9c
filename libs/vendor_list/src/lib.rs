//! # Vendor List - GVL Fetching and Caching
//!
//! ## Purpose
//!
//! Fetches the Global Vendor List for the consent engine:
//! - Identical concurrent requests coalesce into one network call
//! - HTTP 204 is "not applicable here", not an error
//! - Payloads are validated before anyone sees them
//!
//! ## Architecture Role
//!
//! ```text
//! endpoint → [VendorListTransport] → [VendorListCache] → Arc<VendorList>
//!                                          ↓
//!                        libs/cmp (getVendorList), services/consent
//! ```

pub mod cache;
pub mod error;
pub mod transport;

pub use cache::{parse_response, FetchOptions, FetchResult, VendorListCache};
pub use error::{GvlError, GvlResult};
pub use transport::{HttpTransport, TransportResponse, VendorListRequest, VendorListTransport};
