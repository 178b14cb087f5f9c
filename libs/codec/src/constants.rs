//! # TC String Constants - Field Widths and Segment Tags
//!
//! ## Purpose
//!
//! Bit widths of every field in the TCF v2 core segment and the optional
//! segments that follow it. These values are fixed by the framework and must
//! stay stable; any change produces strings other CMPs cannot read.
//!
//! ## Core Segment Layout
//!
//! ```text
//! Version(6) Created(36) LastUpdated(36) CmpId(12) CmpVersion(12)
//! ConsentScreen(6) ConsentLanguage(12) VendorListVersion(12) TcfPolicyVersion(6)
//! IsServiceSpecific(1) UseNonStandardTexts(1) SpecialFeatureOptIns(12)
//! PurposesConsent(24) PurposesLITransparency(24) PurposeOneTreatment(1)
//! PublisherCC(12) VendorConsents(...) VendorLegitimateInterests(...)
//! PublisherRestrictions(...)
//! ```

/// Only TC string version understood by this codec
pub const TC_STRING_VERSION: u8 = 2;

pub const VERSION_BITS: u32 = 6;
pub const TIMESTAMP_BITS: u32 = 36;
pub const CMP_ID_BITS: u32 = 12;
pub const CMP_VERSION_BITS: u32 = 12;
pub const CONSENT_SCREEN_BITS: u32 = 6;
pub const LETTER_BITS: u32 = 6;
pub const VENDOR_LIST_VERSION_BITS: u32 = 12;
pub const POLICY_VERSION_BITS: u32 = 6;
pub const SPECIAL_FEATURE_BITS: u32 = 12;
pub const PURPOSE_BITS: u32 = 24;
pub const MAX_VENDOR_ID_BITS: u32 = 16;
pub const VENDOR_ID_BITS: u32 = 16;
pub const NUM_ENTRIES_BITS: u32 = 12;
pub const NUM_RESTRICTIONS_BITS: u32 = 12;
pub const RESTRICTION_PURPOSE_BITS: u32 = 6;
pub const RESTRICTION_TYPE_BITS: u32 = 2;
pub const SEGMENT_TYPE_BITS: u32 = 3;

/// Segment type tags for the segments following the core string
pub const SEGMENT_DISCLOSED_VENDORS: u8 = 1;
pub const SEGMENT_ALLOWED_VENDORS: u8 = 2;
pub const SEGMENT_PUBLISHER_TC: u8 = 3;

/// Separator between segments
pub const SEGMENT_SEPARATOR: char = '.';

/// Bits in the fixed part of the core segment plus two empty vendor
/// sections and the restriction count
pub const MIN_CORE_BITS: usize = 259;

/// Smallest possible base64url length of a core segment
pub const MIN_CORE_CHARS: usize = MIN_CORE_BITS.div_ceil(6);

/// Highest vendor ID representable on the wire
pub const MAX_WIRE_VENDOR_ID: u32 = u16::MAX as u32;
