//! # Global Vendor List (GVL) Model
//!
//! ## Purpose
//!
//! Typed mirror of the GVL v3 JSON document. The registry is fetched once,
//! validated, and then shared read-only as `Arc<VendorList>` by the codec,
//! the protocol engine and the reconciliation layer.
//!
//! ## Wire Format
//!
//! ```text
//! {
//!   "gvlSpecificationVersion": 3,
//!   "vendorListVersion": 72,
//!   "tcfPolicyVersion": 5,
//!   "lastUpdated": "2024-10-03T16:05:33Z",
//!   "purposes":        { "1": { "id": 1, "name": ..., "description": ... }, ... },
//!   "specialPurposes": { ... },
//!   "features":        { ... },
//!   "specialFeatures": { ... },
//!   "stacks":          { "1": { "id": 1, "purposes": [..], "specialFeatures": [..] } },
//!   "vendors":         { "8": { "id": 8, "purposes": [1, 3], "legIntPurposes": [2], ... } }
//! }
//! ```
//!
//! Object keys are numeric strings; serde_json maps them onto `u32` keys.

use crate::errors::VendorListError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Versioned vendor/purpose registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorList {
    #[serde(default)]
    pub gvl_specification_version: u32,
    pub vendor_list_version: u32,
    pub tcf_policy_version: u32,
    #[serde(default)]
    pub last_updated: Option<String>,
    pub purposes: BTreeMap<u32, Purpose>,
    #[serde(default)]
    pub special_purposes: BTreeMap<u32, SpecialPurpose>,
    #[serde(default)]
    pub features: BTreeMap<u32, Feature>,
    #[serde(default)]
    pub special_features: BTreeMap<u32, SpecialFeature>,
    #[serde(default)]
    pub stacks: BTreeMap<u32, Stack>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data_categories: BTreeMap<u32, DataCategory>,
    pub vendors: BTreeMap<u32, Vendor>,
}

/// One of the 11 standardized processing purposes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Purpose {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub illustrations: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consentable: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub right_to_object: Option<bool>,
}

pub type SpecialPurpose = Purpose;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feature {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub illustrations: Vec<String>,
}

pub type SpecialFeature = Feature;

/// UI grouping of purposes and special features
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stack {
    pub id: u32,
    #[serde(default)]
    pub purposes: Vec<u32>,
    #[serde(default)]
    pub special_features: Vec<u32>,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCategory {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Per-language policy links published by a vendor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VendorUrl {
    pub lang_id: String,
    pub privacy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leg_int_claim: Option<String>,
}

/// An advertising vendor and the legal bases it declares per purpose
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Vendor {
    pub id: u32,
    pub name: String,
    /// Purposes processed under the consent legal basis
    #[serde(default)]
    pub purposes: Vec<u32>,
    /// Purposes processed under legitimate interest
    #[serde(default)]
    pub leg_int_purposes: Vec<u32>,
    /// Purposes where the publisher may flip the legal basis
    #[serde(default)]
    pub flexible_purposes: Vec<u32>,
    #[serde(default)]
    pub special_purposes: Vec<u32>,
    #[serde(default)]
    pub features: Vec<u32>,
    #[serde(default)]
    pub special_features: Vec<u32>,
    #[serde(default)]
    pub uses_cookies: bool,
    #[serde(default)]
    pub cookie_max_age_seconds: Option<i64>,
    #[serde(default)]
    pub cookie_refresh: bool,
    #[serde(default)]
    pub uses_non_cookie_access: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_storage_disclosure_url: Option<String>,
    #[serde(default)]
    pub urls: Vec<VendorUrl>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_date: Option<String>,
}

impl Vendor {
    /// Vendors flagged as deleted stay in the list for decoding old strings
    /// but must not be presented in the UI.
    pub fn is_deleted(&self) -> bool {
        self.deleted_date.is_some()
    }
}

impl VendorList {
    /// Check every cross reference in the registry
    pub fn validate(&self) -> Result<(), VendorListError> {
        if self.vendor_list_version == 0 {
            return Err(VendorListError::MissingField("vendorListVersion"));
        }
        if self.purposes.is_empty() {
            return Err(VendorListError::MissingField("purposes"));
        }

        for (key, purpose) in &self.purposes {
            if *key != purpose.id {
                return Err(VendorListError::KeyMismatch {
                    table: "purposes",
                    key: *key,
                    id: purpose.id,
                });
            }
        }

        for (key, vendor) in &self.vendors {
            if *key != vendor.id {
                return Err(VendorListError::KeyMismatch {
                    table: "vendors",
                    key: *key,
                    id: vendor.id,
                });
            }
            let referenced = vendor
                .purposes
                .iter()
                .chain(&vendor.leg_int_purposes)
                .chain(&vendor.flexible_purposes);
            for purpose_id in referenced {
                if !self.purposes.contains_key(purpose_id) {
                    return Err(VendorListError::dangling_purpose(
                        "vendor",
                        vendor.id,
                        *purpose_id,
                    ));
                }
            }
            for feature_id in &vendor.special_features {
                if !self.special_features.is_empty()
                    && !self.special_features.contains_key(feature_id)
                {
                    return Err(VendorListError::dangling_special_feature(
                        "vendor",
                        vendor.id,
                        *feature_id,
                    ));
                }
            }
        }

        for stack in self.stacks.values() {
            for purpose_id in &stack.purposes {
                if !self.purposes.contains_key(purpose_id) {
                    return Err(VendorListError::dangling_purpose(
                        "stack",
                        stack.id,
                        *purpose_id,
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn vendor(&self, id: u32) -> Option<&Vendor> {
        self.vendors.get(&id)
    }

    /// Vendors that may be shown to the user (not deleted)
    pub fn active_vendors(&self) -> impl Iterator<Item = &Vendor> {
        self.vendors.values().filter(|v| !v.is_deleted())
    }

    pub fn max_vendor_id(&self) -> u32 {
        self.vendors.keys().next_back().copied().unwrap_or(0)
    }

    /// Parsed `lastUpdated`, `None` when absent or not RFC 3339
    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        self.last_updated
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "gvlSpecificationVersion": 3,
        "vendorListVersion": 72,
        "tcfPolicyVersion": 5,
        "lastUpdated": "2024-10-03T16:05:33Z",
        "purposes": {
            "1": { "id": 1, "name": "Store and/or access information on a device" },
            "2": { "id": 2, "name": "Use limited data to select advertising" }
        },
        "specialFeatures": {
            "1": { "id": 1, "name": "Use precise geolocation data" }
        },
        "stacks": {
            "1": { "id": 1, "purposes": [1, 2], "name": "Basic ads" }
        },
        "vendors": {
            "8": { "id": 8, "name": "Emerse", "purposes": [1], "legIntPurposes": [2] }
        }
    }"#;

    #[test]
    fn test_parses_gvl_v3_document() {
        let list: VendorList = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(list.vendor_list_version, 72);
        assert_eq!(list.purposes.len(), 2);
        assert_eq!(list.vendor(8).unwrap().leg_int_purposes, vec![2]);
        assert_eq!(list.max_vendor_id(), 8);
        assert!(list.last_updated_at().is_some());
        assert!(list.validate().is_ok());
    }

    #[test]
    fn test_missing_vendors_field_is_rejected() {
        let raw = r#"{"vendorListVersion": 1, "tcfPolicyVersion": 5, "purposes": {}}"#;
        assert!(serde_json::from_str::<VendorList>(raw).is_err());
    }

    #[test]
    fn test_dangling_vendor_purpose_fails_validation() {
        let mut list: VendorList = serde_json::from_str(SAMPLE).unwrap();
        list.vendors.get_mut(&8).unwrap().purposes.push(7);
        assert_eq!(
            list.validate(),
            Err(VendorListError::dangling_purpose("vendor", 8, 7))
        );
    }

    #[test]
    fn test_dangling_stack_purpose_fails_validation() {
        let mut list: VendorList = serde_json::from_str(SAMPLE).unwrap();
        list.stacks.get_mut(&1).unwrap().purposes.push(9);
        assert!(matches!(
            list.validate(),
            Err(VendorListError::DanglingPurpose { owner: "stack", .. })
        ));
    }
}
