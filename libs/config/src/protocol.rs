//! TCF protocol constants
//!
//! Names and numbers fixed by the Transparency & Consent Framework. Third
//! party code relies on these exact values, so they are not configurable.

/// Version string reported by `ping`
pub const TCF_API_VERSION: &str = "2.2";

/// Major version accepted by the command function
pub const TCF_API_MAJOR_VERSION: u32 = 2;

/// Name of the hidden frame child frames search for
pub const LOCATOR_FRAME_NAME: &str = "__tcfapiLocator";

/// Cross-frame message keys
pub mod messages {
    pub const CALL_KEY: &str = "__tcfapiCall";
    pub const RETURN_KEY: &str = "__tcfapiReturn";
}

/// Command names
pub mod commands {
    pub const PING: &str = "ping";
    pub const GET_TC_DATA: &str = "getTCData";
    pub const GET_IN_APP_TC_DATA: &str = "getInAppTCData";
    pub const GET_VENDOR_LIST: &str = "getVendorList";
    pub const ADD_EVENT_LISTENER: &str = "addEventListener";
    pub const REMOVE_EVENT_LISTENER: &str = "removeEventListener";
}

/// Consent cookie defaults
pub mod storage {
    /// Cookie name mandated for the global TC string
    pub const CONSENT_COOKIE_NAME: &str = "euconsent-v2";

    /// 13 months
    pub const CONSENT_COOKIE_MAX_AGE_DAYS: u32 = 395;
}

/// Vendor list endpoint query parameter carrying the vendor filter
pub const VENDOR_IDS_QUERY_PARAM: &str = "vendorIds";
