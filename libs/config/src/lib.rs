//! # CMP Centralized Configuration
//!
//! Configuration and protocol constants shared by every consent crate.
//!
//! ## Features
//!
//! - **Protocol Constants**: API version, locator frame name, message keys
//! - **CMP Configuration**: CMP identity, vendor list endpoint, storage names
//!
//! ## Usage
//!
//! ```rust
//! use cmp_config::{protocol, CmpConfig};
//!
//! let config = CmpConfig::default();
//! assert_eq!(config.storage.cookie_name, protocol::storage::CONSENT_COOKIE_NAME);
//! assert_eq!(protocol::LOCATOR_FRAME_NAME, "__tcfapiLocator");
//! ```

pub mod cmp_config;
pub mod protocol;

// Re-export commonly used types
pub use cmp_config::{
    load_config, CmpConfig, CmpSettings, CodecSettings, StorageSettings, VendorListSettings,
};
pub use protocol::*;
