//! Consent decision state
//!
//! Purpose and vendor decisions are kept as ordered `id → bool` maps. Keeping
//! explicit `false` entries (instead of only storing grants) lets the engine
//! report "denied" and "never asked" differently to consumers that care.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Purpose 1: store and/or access information on a device
pub const STORAGE_ACCESS_PURPOSE: u32 = 1;

/// Ordered map of numeric ID to decision
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConsentMap(BTreeMap<u32, bool>);

impl ConsentMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Map with every listed ID set to `granted`
    pub fn from_ids(ids: impl IntoIterator<Item = u32>, granted: bool) -> Self {
        Self(ids.into_iter().map(|id| (id, granted)).collect())
    }

    pub fn set(&mut self, id: u32, granted: bool) {
        self.0.insert(id, granted);
    }

    pub fn get(&self, id: u32) -> Option<bool> {
        self.0.get(&id).copied()
    }

    /// Absent IDs read as not granted
    pub fn is_granted(&self, id: u32) -> bool {
        self.0.get(&id).copied().unwrap_or(false)
    }

    pub fn granted_ids(&self) -> BTreeSet<u32> {
        self.0
            .iter()
            .filter_map(|(id, granted)| granted.then_some(*id))
            .collect()
    }

    pub fn max_id(&self) -> u32 {
        self.0.keys().next_back().copied().unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, bool)> + '_ {
        self.0.iter().map(|(id, granted)| (*id, *granted))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(u32, bool)> for ConsentMap {
    fn from_iter<T: IntoIterator<Item = (u32, bool)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Full purpose/vendor decision set that a TC string is built from
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentState {
    pub purpose_consents: ConsentMap,
    pub purpose_legitimate_interests: ConsentMap,
    pub vendor_consents: ConsentMap,
    pub vendor_legitimate_interests: ConsentMap,
    pub special_feature_opt_ins: ConsentMap,
    /// Vendors shown to the user, independent of the decision
    pub vendors_disclosed: ConsentMap,
}

impl ConsentState {
    /// Purpose 1 is never optional
    pub fn purpose_consents_with_storage(&self) -> ConsentMap {
        let mut purposes = self.purpose_consents.clone();
        purposes.set(STORAGE_ACCESS_PURPOSE, true);
        purposes
    }
}
