//! Command return values
//!
//! Field names follow the `__tcfapi` wire format so that a response can be
//! handed to a cross-frame caller as JSON unchanged.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::sync::Arc;
use tcf_types::{ConsentMap, VendorList};

/// Lifecycle of the command function; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LoadStatus {
    /// Stub answering `ping`, full engine not installed yet
    #[serde(rename = "stub")]
    NotInstalled,
    #[serde(rename = "loading")]
    Loading,
    #[serde(rename = "loaded")]
    Loaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayStatus {
    Hidden,
    Visible,
    Disabled,
}

/// Reason a snapshot was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    TcLoaded,
    CmpUiShown,
    UserActionComplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PingReturn {
    pub gdpr_applies: Option<bool>,
    pub cmp_loaded: bool,
    pub cmp_status: LoadStatus,
    pub display_status: DisplayStatus,
    pub api_version: String,
    pub cmp_version: u16,
    pub cmp_id: u16,
    pub gvl_version: u32,
    pub tcf_policy_version: u32,
}

impl PingReturn {
    /// What the stub reports before the engine exists
    pub fn stub(gdpr_applies: Option<bool>) -> Self {
        Self {
            gdpr_applies,
            cmp_loaded: false,
            cmp_status: LoadStatus::NotInstalled,
            display_status: DisplayStatus::Hidden,
            api_version: cmp_config::TCF_API_VERSION.to_string(),
            cmp_version: 0,
            cmp_id: 0,
            gvl_version: 0,
            tcf_policy_version: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsentPair {
    pub consents: ConsentMap,
    pub legitimate_interests: ConsentMap,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherSection {
    pub consents: ConsentMap,
    pub legitimate_interests: ConsentMap,
    pub custom_purpose: ConsentPair,
    /// purpose ID -> vendor ID -> restriction type
    pub restrictions: BTreeMap<u32, BTreeMap<u32, u8>>,
}

/// Consent snapshot returned by `getTCData` and pushed to listeners
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TcData {
    pub tc_string: String,
    pub tcf_policy_version: u32,
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub gdpr_applies: Option<bool>,
    pub event_status: Option<EventStatus>,
    pub cmp_status: LoadStatus,
    pub listener_id: Option<u32>,
    pub is_service_specific: bool,
    pub use_non_standard_texts: bool,
    #[serde(rename = "publisherCC")]
    pub publisher_cc: String,
    pub purpose_one_treatment: bool,
    pub purpose: ConsentPair,
    pub vendor: ConsentPair,
    pub special_feature_optins: ConsentMap,
    pub publisher: PublisherSection,
}

impl TcData {
    /// Copy tagged for one delivery
    pub fn for_event(&self, event: Option<EventStatus>, listener_id: Option<u32>) -> Self {
        Self {
            event_status: event,
            listener_id,
            ..self.clone()
        }
    }

    /// Restrict vendor maps to `ids`; requested vendors absent from the
    /// string report `false`
    pub fn filter_vendors(&mut self, ids: &[u32]) {
        let pick = |map: &ConsentMap| -> ConsentMap {
            ids.iter()
                .map(|id| (*id, map.get(*id).unwrap_or(false)))
                .collect()
        };
        self.vendor = ConsentPair {
            consents: pick(&self.vendor.consents),
            legitimate_interests: pick(&self.vendor.legitimate_interests),
        };
    }
}

/// Payload handed to a command callback
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Ping(PingReturn),
    TcData(Box<TcData>),
    VendorList(Arc<VendorList>),
    Bool(bool),
}

impl ApiResponse {
    pub fn as_ping(&self) -> Option<&PingReturn> {
        match self {
            ApiResponse::Ping(ping) => Some(ping),
            _ => None,
        }
    }

    pub fn as_tc_data(&self) -> Option<&TcData> {
        match self {
            ApiResponse::TcData(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_vendor_list(&self) -> Option<&Arc<VendorList>> {
        match self {
            ApiResponse::VendorList(list) => Some(list),
            _ => None,
        }
    }
}

impl Serialize for ApiResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ApiResponse::Ping(ping) => ping.serialize(serializer),
            ApiResponse::TcData(data) => data.serialize(serializer),
            ApiResponse::VendorList(list) => list.as_ref().serialize(serializer),
            ApiResponse::Bool(value) => serializer.serialize_bool(*value),
        }
    }
}
