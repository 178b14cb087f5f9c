//! # TCF Types - Consent Engine Data Model
//!
//! Pure data definitions shared by every crate in the consent workspace.
//! Nothing in here performs I/O; the codec, the vendor-list cache and the
//! protocol engine all build on these types.
//!
//! ## What This Crate Contains
//!
//! - **VendorList**: the Global Vendor List (GVL) registry, deserialized
//!   from the v3 JSON wire format and validated for dangling purpose IDs
//! - **ConsentMap / ConsentState**: the five purpose/vendor decision maps
//!   plus the disclosed-vendor set
//! - **Category / Categories**: the five host consent categories
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/cmp → services/consent
//!     ↑             ↓            ↓              ↓
//! Pure Data    TC String     Command API    Jurisdiction +
//! GVL, State   Mapper        Engine/Stub    Reconciliation
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Bit-level encoding of consent strings (belongs in libs/codec)
//! - Network fetching of the vendor list (belongs in libs/vendor_list)

pub mod category;
pub mod consent;
pub mod errors;
pub mod gvl;

pub use category::{Categories, Category};
pub use consent::{ConsentMap, ConsentState, STORAGE_ACCESS_PURPOSE};
pub use errors::VendorListError;
pub use gvl::{
    DataCategory, Feature, Purpose, SpecialFeature, SpecialPurpose, Stack, Vendor, VendorList,
    VendorUrl,
};

/// Highest purpose ID defined by TCF v2
pub const MAX_PURPOSE_ID: u32 = 11;

/// Highest special feature ID defined by TCF v2
pub const MAX_SPECIAL_FEATURE_ID: u32 = 2;

/// First ID assigned to vendors that are not part of the registry
pub const SYNTHETIC_VENDOR_ID_BASE: u32 = 90_000;
