//! Error types for vendor list validation
//!
//! A fetched registry is only trusted after every cross reference has been
//! checked. Each variant names the offending entity so a rejected payload can
//! be traced back to the upstream list.

use thiserror::Error;

/// Structural problems found in a vendor list
#[derive(Debug, Error, Clone, PartialEq)]
pub enum VendorListError {
    /// Vendor or stack references a purpose that is not in `purposes`
    #[error("{owner} {owner_id} references unknown purpose {purpose_id}")]
    DanglingPurpose {
        owner: &'static str,
        owner_id: u32,
        purpose_id: u32,
    },

    /// Vendor or stack references a special feature that is not declared
    #[error("{owner} {owner_id} references unknown special feature {feature_id}")]
    DanglingSpecialFeature {
        owner: &'static str,
        owner_id: u32,
        feature_id: u32,
    },

    /// Map key disagrees with the `id` field of the entry it holds
    #[error("{table} entry keyed {key} carries id {id}")]
    KeyMismatch {
        table: &'static str,
        key: u32,
        id: u32,
    },

    /// Required top-level field is missing or zero
    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

impl VendorListError {
    pub fn dangling_purpose(owner: &'static str, owner_id: u32, purpose_id: u32) -> Self {
        Self::DanglingPurpose {
            owner,
            owner_id,
            purpose_id,
        }
    }

    pub fn dangling_special_feature(owner: &'static str, owner_id: u32, feature_id: u32) -> Self {
        Self::DanglingSpecialFeature {
            owner,
            owner_id,
            feature_id,
        }
    }
}
