//! # TC String Codec - Consent Decision Wire Format
//!
//! ## Purpose
//!
//! Encodes a `ConsentState` into the compact, versioned, base64url TC string
//! exchanged with ad-tech vendors, and decodes such strings back into the
//! five decision maps plus metadata. The encoder is deterministic: identical
//! state, vendor list and metadata always produce byte-identical output.
//!
//! ## Segments
//!
//! ```text
//! <core segment>.<disclosed vendors segment>
//!       ↓                    ↓
//! purposes, vendors,   SegmentType=1, every vendor
//! LI, special features shown in the UI
//! ```
//!
//! Decoding additionally skips allowed-vendor and publisher-TC segments
//! written by other CMPs.
//!
//! ## Failure Model
//!
//! `decode` never panics on hostile input. Every length and letter is
//! checked and reported as a `DecodeError`, which callers treat as "no prior
//! consent". `is_well_formed` is the cheap structural gate used before a full
//! decode of cookie values.

use crate::bits::{BitReader, BitWriter};
use crate::constants::*;
use crate::error::{CodecError, CodecResult, DecodeError, DecodeResult};
use crate::vendor_section::{
    read_range_entries, read_vendor_section, write_vendor_section, VendorRanges, VendorSection,
};
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tcf_types::{
    ConsentMap, ConsentState, VendorList, MAX_PURPOSE_ID, MAX_SPECIAL_FEATURE_ID,
};
use tracing::debug;

/// base64url without padding; tolerant of non-zero trailing bits written by
/// encoders that pack 6 bits at a time
const TC_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new()
        .with_encode_padding(false)
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// Registrant and context metadata written into the core segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeMetadata {
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u8,
    /// Two-letter ISO 639-1 code
    pub consent_language: String,
    /// Two-letter ISO 3166-1 code
    pub publisher_country_code: String,
    /// Consent applies to this service only rather than globally
    pub is_service_specific: bool,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

/// Publisher restriction entry read from the core segment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherRestriction {
    pub purpose_id: u8,
    /// 0 = not allowed, 1 = require consent, 2 = require legitimate interest
    pub restriction_type: u8,
    pub vendor_ids: VendorRanges,
}

/// Everything recovered from a TC string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecodedConsent {
    pub version: u8,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u8,
    pub consent_language: String,
    pub vendor_list_version: u16,
    pub tcf_policy_version: u8,
    pub is_service_specific: bool,
    pub use_non_standard_texts: bool,
    pub purpose_one_treatment: bool,
    pub publisher_country_code: String,
    pub publisher_restrictions: Vec<PublisherRestriction>,
    pub state: ConsentState,
}

/// Stateless codec with an optional ceiling on expanded vendor IDs
#[derive(Debug, Clone, Default)]
pub struct TcStringCodec {
    max_vendor_id: Option<u32>,
}

impl TcStringCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clamp decoded vendor maps to `max_vendor_id`. Without a ceiling the
    /// maps are sized by the `MaxVendorId` carried in the string itself.
    pub fn with_max_vendor_id(max_vendor_id: Option<u32>) -> Self {
        Self { max_vendor_id }
    }

    pub fn encode(
        &self,
        state: &ConsentState,
        vendor_list: &VendorList,
        metadata: &EncodeMetadata,
    ) -> CodecResult<String> {
        let core = encode_core(state, vendor_list, metadata)?;
        let disclosed = encode_disclosed(state, vendor_list)?;
        Ok(format!(
            "{}{}{}",
            TC_BASE64.encode(core),
            SEGMENT_SEPARATOR,
            TC_BASE64.encode(disclosed)
        ))
    }

    pub fn decode(&self, tc_string: &str) -> DecodeResult<DecodedConsent> {
        check_structure(tc_string)?;

        let mut segments = tc_string.split(SEGMENT_SEPARATOR).filter(|s| !s.is_empty());
        let core_raw = segments.next().ok_or(DecodeError::Empty)?;
        let core_bytes = TC_BASE64
            .decode(core_raw)
            .map_err(|e| DecodeError::base64(0, e))?;
        let mut decoded = self.decode_core(&core_bytes)?;

        for (index, raw) in segments.enumerate() {
            let segment = index + 1;
            let bytes = TC_BASE64
                .decode(raw)
                .map_err(|e| DecodeError::base64(segment, e))?;
            let mut reader = BitReader::new(&bytes);
            let segment_type = reader.read("segmentType", SEGMENT_TYPE_BITS)? as u8;
            match segment_type {
                SEGMENT_DISCLOSED_VENDORS => {
                    let section = read_vendor_section(&mut reader, "disclosedVendors")?;
                    decoded.state.vendors_disclosed = self.expand(&section);
                }
                SEGMENT_ALLOWED_VENDORS | SEGMENT_PUBLISHER_TC => {
                    debug!(segment_type, "Skipping TC string segment not used by this CMP");
                }
                other => {
                    return Err(DecodeError::UnknownSegmentType {
                        segment_type: other,
                        segment,
                    })
                }
            }
        }

        Ok(decoded)
    }

    fn decode_core(&self, bytes: &[u8]) -> DecodeResult<DecodedConsent> {
        let mut r = BitReader::new(bytes);

        let version = r.read("version", VERSION_BITS)? as u8;
        if version != TC_STRING_VERSION {
            return Err(DecodeError::UnsupportedVersion(version));
        }
        let created = read_timestamp(&mut r, "created")?;
        let last_updated = read_timestamp(&mut r, "lastUpdated")?;
        let cmp_id = r.read("cmpId", CMP_ID_BITS)? as u16;
        let cmp_version = r.read("cmpVersion", CMP_VERSION_BITS)? as u16;
        let consent_screen = r.read("consentScreen", CONSENT_SCREEN_BITS)? as u8;
        let consent_language = read_letters(&mut r, "consentLanguage")?;
        let vendor_list_version = r.read("vendorListVersion", VENDOR_LIST_VERSION_BITS)? as u16;
        let tcf_policy_version = r.read("tcfPolicyVersion", POLICY_VERSION_BITS)? as u8;
        let is_service_specific = r.read_bool("isServiceSpecific")?;
        let use_non_standard_texts = r.read_bool("useNonStandardTexts")?;

        let special_feature_bits = r.read("specialFeatureOptIns", SPECIAL_FEATURE_BITS)?;
        let purpose_consent_bits = r.read("purposesConsent", PURPOSE_BITS)?;
        let purpose_li_bits = r.read("purposesLITransparency", PURPOSE_BITS)?;

        let purpose_one_treatment = r.read_bool("purposeOneTreatment")?;
        let publisher_country_code = read_letters(&mut r, "publisherCC")?;

        let vendor_consents = read_vendor_section(&mut r, "vendorConsents")?;
        let vendor_lis = read_vendor_section(&mut r, "vendorLegitimateInterests")?;
        let publisher_restrictions = read_restrictions(&mut r, self.vendor_ceiling())?;

        let state = ConsentState {
            purpose_consents: flags_to_map(
                purpose_consent_bits,
                PURPOSE_BITS,
                MAX_PURPOSE_ID,
            ),
            purpose_legitimate_interests: flags_to_map(
                purpose_li_bits,
                PURPOSE_BITS,
                MAX_PURPOSE_ID,
            ),
            vendor_consents: self.expand(&vendor_consents),
            vendor_legitimate_interests: self.expand(&vendor_lis),
            special_feature_opt_ins: flags_to_map(
                special_feature_bits,
                SPECIAL_FEATURE_BITS,
                MAX_SPECIAL_FEATURE_ID,
            ),
            vendors_disclosed: ConsentMap::new(),
        };

        Ok(DecodedConsent {
            version,
            created,
            last_updated,
            cmp_id,
            cmp_version,
            consent_screen,
            consent_language,
            vendor_list_version,
            tcf_policy_version,
            is_service_specific,
            use_non_standard_texts,
            purpose_one_treatment,
            publisher_country_code,
            publisher_restrictions,
            state,
        })
    }

    fn vendor_ceiling(&self) -> u32 {
        self.max_vendor_id
            .map_or(MAX_WIRE_VENDOR_ID, |limit| limit.min(MAX_WIRE_VENDOR_ID))
    }

    /// Dense `1..=max` map from a decoded section
    fn expand(&self, section: &VendorSection) -> ConsentMap {
        let ceiling = section.max_vendor_id.min(self.vendor_ceiling());
        (1..=ceiling)
            .map(|id| (id, section.ids.contains(id)))
            .collect()
    }
}

/// Cheap structural check before attempting a full decode
pub fn is_well_formed(tc_string: &str) -> bool {
    check_structure(tc_string).is_ok()
}

/// Encode with the default codec
pub fn encode(
    state: &ConsentState,
    vendor_list: &VendorList,
    metadata: &EncodeMetadata,
) -> CodecResult<String> {
    TcStringCodec::new().encode(state, vendor_list, metadata)
}

/// Decode with the default codec
pub fn decode(tc_string: &str) -> DecodeResult<DecodedConsent> {
    TcStringCodec::new().decode(tc_string)
}

fn check_structure(tc_string: &str) -> DecodeResult<()> {
    if tc_string.trim().is_empty() {
        return Err(DecodeError::Empty);
    }
    for (position, ch) in tc_string.chars().enumerate() {
        let allowed = ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == SEGMENT_SEPARATOR;
        if !allowed {
            return Err(DecodeError::InvalidCharacter { ch, position });
        }
    }
    let core_len = tc_string.split(SEGMENT_SEPARATOR).next().map_or(0, str::len);
    if core_len < MIN_CORE_CHARS {
        return Err(DecodeError::TooShort {
            len: core_len,
            min: MIN_CORE_CHARS,
        });
    }
    Ok(())
}

fn encode_core(
    state: &ConsentState,
    vendor_list: &VendorList,
    metadata: &EncodeMetadata,
) -> CodecResult<Vec<u8>> {
    let mut w = BitWriter::new();

    w.write("version", u64::from(TC_STRING_VERSION), VERSION_BITS)?;
    write_timestamp(&mut w, "created", &metadata.created)?;
    write_timestamp(&mut w, "lastUpdated", &metadata.last_updated)?;
    w.write("cmpId", u64::from(metadata.cmp_id), CMP_ID_BITS)?;
    w.write("cmpVersion", u64::from(metadata.cmp_version), CMP_VERSION_BITS)?;
    w.write(
        "consentScreen",
        u64::from(metadata.consent_screen),
        CONSENT_SCREEN_BITS,
    )?;
    write_letters(&mut w, "consentLanguage", &metadata.consent_language)?;
    w.write(
        "vendorListVersion",
        u64::from(vendor_list.vendor_list_version),
        VENDOR_LIST_VERSION_BITS,
    )?;
    w.write(
        "tcfPolicyVersion",
        u64::from(vendor_list.tcf_policy_version),
        POLICY_VERSION_BITS,
    )?;
    w.write_bool(metadata.is_service_specific);
    // useNonStandardTexts
    w.write_bool(false);

    w.write(
        "specialFeatureOptIns",
        map_to_flags(&state.special_feature_opt_ins, SPECIAL_FEATURE_BITS),
        SPECIAL_FEATURE_BITS,
    )?;
    w.write(
        "purposesConsent",
        map_to_flags(&state.purpose_consents_with_storage(), PURPOSE_BITS),
        PURPOSE_BITS,
    )?;
    w.write(
        "purposesLITransparency",
        map_to_flags(&state.purpose_legitimate_interests, PURPOSE_BITS),
        PURPOSE_BITS,
    )?;
    // purposeOneTreatment
    w.write_bool(false);
    write_letters(&mut w, "publisherCC", &metadata.publisher_country_code)?;

    let consents = registered_ids(&state.vendor_consents, vendor_list);
    write_vendor_section(&mut w, "vendorConsents", &consents)?;
    let lis = registered_ids(&state.vendor_legitimate_interests, vendor_list);
    write_vendor_section(&mut w, "vendorLegitimateInterests", &lis)?;

    // No publisher restrictions
    w.write("numPubRestrictions", 0, NUM_RESTRICTIONS_BITS)?;

    Ok(w.into_bytes())
}

fn encode_disclosed(state: &ConsentState, vendor_list: &VendorList) -> CodecResult<Vec<u8>> {
    let mut w = BitWriter::new();
    w.write(
        "segmentType",
        u64::from(SEGMENT_DISCLOSED_VENDORS),
        SEGMENT_TYPE_BITS,
    )?;
    let disclosed = registered_ids(&state.vendors_disclosed, vendor_list);
    write_vendor_section(&mut w, "disclosedVendors", &disclosed)?;
    Ok(w.into_bytes())
}

fn is_registered(id: u32, vendor_list: &VendorList) -> bool {
    id <= MAX_WIRE_VENDOR_ID && vendor_list.vendors.contains_key(&id)
}

/// Granted IDs that exist in the registry and fit the wire format
fn registered_ids(map: &ConsentMap, vendor_list: &VendorList) -> BTreeSet<u32> {
    let mut skipped = 0usize;
    let ids = map
        .iter()
        .filter(|(_, granted)| *granted)
        .filter_map(|(id, _)| {
            if is_registered(id, vendor_list) {
                Some(id)
            } else {
                skipped += 1;
                None
            }
        })
        .collect();
    if skipped > 0 {
        debug!(skipped, "Vendor decisions outside the registry left out of TC string");
    }
    ids
}

fn map_to_flags(map: &ConsentMap, width: u32) -> u64 {
    map.iter()
        .filter(|(id, granted)| *granted && *id >= 1 && *id <= width)
        .fold(0u64, |flags, (id, _)| flags | 1 << (width - id))
}

fn flags_to_map(flags: u64, width: u32, max_id: u32) -> ConsentMap {
    (1..=max_id.min(width))
        .map(|id| (id, flags >> (width - id) & 1 == 1))
        .collect()
}

fn write_timestamp(w: &mut BitWriter, field: &'static str, at: &DateTime<Utc>) -> CodecResult<()> {
    let millis = at.timestamp_millis();
    if millis < 0 {
        return Err(CodecError::InvalidTimestamp { field });
    }
    w.write(field, (millis / 100) as u64, TIMESTAMP_BITS)
}

fn read_timestamp(r: &mut BitReader<'_>, field: &'static str) -> DecodeResult<DateTime<Utc>> {
    let deciseconds = r.read(field, TIMESTAMP_BITS)?;
    // 36 bits of deciseconds always fits in the chrono range
    Ok(Utc
        .timestamp_millis_opt(deciseconds as i64 * 100)
        .single()
        .unwrap_or_default())
}

fn write_letters(w: &mut BitWriter, field: &'static str, code: &str) -> CodecResult<()> {
    let upper = code.trim().to_ascii_uppercase();
    let bytes = upper.as_bytes();
    if bytes.len() != 2 || !bytes.iter().all(u8::is_ascii_uppercase) {
        return Err(CodecError::invalid_letters(field, code));
    }
    for byte in bytes {
        w.write(field, u64::from(byte - b'A'), LETTER_BITS)?;
    }
    Ok(())
}

fn read_letters(r: &mut BitReader<'_>, field: &'static str) -> DecodeResult<String> {
    let mut code = String::with_capacity(2);
    for _ in 0..2 {
        let value = r.read(field, LETTER_BITS)? as u8;
        if value > 25 {
            return Err(DecodeError::InvalidLetter { field, value });
        }
        code.push(char::from(b'A' + value));
    }
    Ok(code)
}

fn read_restrictions(
    r: &mut BitReader<'_>,
    ceiling: u32,
) -> DecodeResult<Vec<PublisherRestriction>> {
    let count = r.read("numPubRestrictions", NUM_RESTRICTIONS_BITS)?;
    let mut restrictions = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let purpose_id = r.read("restrictionPurpose", RESTRICTION_PURPOSE_BITS)? as u8;
        let restriction_type = r.read("restrictionType", RESTRICTION_TYPE_BITS)? as u8;
        let vendor_ids = read_range_entries(r, "restrictionVendors", ceiling)?;
        restrictions.push(PublisherRestriction {
            purpose_id,
            restriction_type,
            vendor_ids,
        });
    }
    Ok(restrictions)
}
