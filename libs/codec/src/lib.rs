//! # TCF Codec - Consent String Rules
//!
//! ## Purpose
//!
//! The "rules" layer of the consent engine:
//! - TC string encoding/decoding (core + disclosed-vendor segments)
//! - Bit-level field packing with bounds-checked reads
//! - Purpose ↔ category mapping and vendor eligibility
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → libs/cmp (TCData snapshots)
//!     ↑           ↓              ↓
//! ConsentState  TC String    services/consent
//! VendorList    Mapper       (save + restore)
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Persistence of the encoded string (belongs in services/consent)
//! - Lazy loading of the codec (belongs in libs/cmp)

pub mod bits;
pub mod constants;
pub mod error;
pub mod mapper;
pub mod tc_string;
pub mod vendor_section;

pub use constants::TC_STRING_VERSION;
pub use error::{CodecError, CodecResult, DecodeError, DecodeResult};
pub use mapper::{
    categories_to_purpose_consents, category_to_purposes, legitimate_interest_purposes,
    purpose_consents_to_categories, purpose_to_category, vendor_has_consent,
    vendor_has_legitimate_interest, vendor_is_eligible,
};
pub use tc_string::{
    decode, encode, is_well_formed, DecodedConsent, EncodeMetadata, PublisherRestriction,
    TcStringCodec,
};
pub use vendor_section::VendorRanges;
