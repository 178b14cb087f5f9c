//! CMP Configuration Module
//!
//! Loads the CMP identity, vendor list endpoint and storage settings from a
//! TOML file with optional profile overrides and `CMP_` environment variables.

use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::protocol::storage::{CONSENT_COOKIE_MAX_AGE_DAYS, CONSENT_COOKIE_NAME};

/// Default location of the base configuration file
pub const DEFAULT_CONFIG_PATH: &str = "config/cmp.toml";

/// Directory searched for `<profile>.toml` overrides
pub const PROFILE_DIR: &str = "config/environments";

/// Main CMP configuration structure
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CmpConfig {
    /// Registered CMP identity written into every TC string
    pub cmp: CmpSettings,

    /// Where and how the vendor list is fetched
    pub vendor_list: VendorListSettings,

    /// Persistence of the encoded consent string
    pub storage: StorageSettings,

    /// Decoder limits
    pub codec: CodecSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct CmpSettings {
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub consent_screen: u8,
    /// Two-letter ISO 639-1 code
    pub consent_language: String,
    /// Two-letter ISO 3166-1 code
    pub publisher_country_code: String,
    pub is_service_specific: bool,
    /// Route GDPR-style jurisdictions through the full TCF protocol
    pub protocol_mode_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct VendorListSettings {
    pub endpoint: String,
    /// Empty means the full list
    pub vendor_ids: Vec<u32>,
    pub headers: BTreeMap<String, String>,
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct StorageSettings {
    pub cookie_name: String,
    pub local_key: String,
    pub cookie_max_age_days: u32,
    /// File backing the local store
    pub local_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct CodecSettings {
    /// Upper bound on vendor maps expanded from decoded strings
    pub max_vendor_id: Option<u32>,
}

impl Default for CmpSettings {
    fn default() -> Self {
        Self {
            cmp_id: 1,
            cmp_version: 1,
            consent_screen: 1,
            consent_language: "EN".to_string(),
            publisher_country_code: "AA".to_string(),
            is_service_specific: true,
            protocol_mode_enabled: false,
        }
    }
}

impl Default for VendorListSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/api/vendor-list".to_string(),
            vendor_ids: Vec::new(),
            headers: BTreeMap::new(),
            timeout_ms: 5_000,
        }
    }
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            cookie_name: CONSENT_COOKIE_NAME.to_string(),
            local_key: CONSENT_COOKIE_NAME.to_string(),
            cookie_max_age_days: CONSENT_COOKIE_MAX_AGE_DAYS,
            local_path: PathBuf::from("./data/consent.json"),
        }
    }
}

impl CmpConfig {
    /// Load configuration from files with environment overrides
    ///
    /// A missing base file falls back to defaults only when no explicit path
    /// was given.
    pub fn load(base_path: Option<&Path>, profile: Option<&str>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match base_path {
            Some(path) => builder.add_source(File::from(path).required(true)),
            None => builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false)),
        };

        if let Some(profile) = profile {
            let profile_file = PathBuf::from(PROFILE_DIR).join(format!("{}.toml", profile));

            if profile_file.exists() {
                info!("Loading profile config: {:?}", profile_file);
                builder = builder.add_source(File::from(profile_file));
            } else {
                warn!("Profile config not found: {:?}", profile_file);
            }
        }

        // CMP_VENDOR_LIST__TIMEOUT_MS=2000 overrides vendor_list.timeout_ms
        builder = builder.add_source(
            Environment::with_prefix("CMP")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("vendor_list.vendor_ids"),
        );

        let config = builder.build().context("Failed to build configuration")?;

        let mut cmp: CmpConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        cmp.expand_env_vars()?;
        cmp.validate()?;

        debug!(
            cmp_id = cmp.cmp.cmp_id,
            endpoint = %cmp.vendor_list.endpoint,
            "CMP configuration loaded"
        );
        Ok(cmp)
    }

    /// Expand `${VAR}` references in the endpoint and local store path
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let endpoint = shellexpand::env(&self.vendor_list.endpoint)
            .context("Failed to expand vendor list endpoint")?;
        self.vendor_list.endpoint = endpoint.to_string();

        let local_path = self.storage.local_path.to_string_lossy().to_string();
        let expanded =
            shellexpand::env(&local_path).context("Failed to expand local storage path")?;
        self.storage.local_path = PathBuf::from(expanded.as_ref());

        Ok(())
    }

    /// Reject values that cannot be written into a TC string
    pub fn validate(&self) -> Result<()> {
        let cmp = &self.cmp;
        if cmp.cmp_id >= 1 << 12 {
            bail!("cmp.cmp_id {} does not fit in 12 bits", cmp.cmp_id);
        }
        if cmp.cmp_version >= 1 << 12 {
            bail!("cmp.cmp_version {} does not fit in 12 bits", cmp.cmp_version);
        }
        if cmp.consent_screen >= 1 << 6 {
            bail!("cmp.consent_screen {} does not fit in 6 bits", cmp.consent_screen);
        }
        check_letters("cmp.consent_language", &cmp.consent_language)?;
        check_letters("cmp.publisher_country_code", &cmp.publisher_country_code)?;

        if self.vendor_list.endpoint.trim().is_empty() {
            bail!("vendor_list.endpoint must not be empty");
        }
        if self.storage.cookie_name.is_empty() {
            bail!("storage.cookie_name must not be empty");
        }
        Ok(())
    }

    /// Render the effective configuration back to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}

fn check_letters(field: &str, value: &str) -> Result<()> {
    if value.len() != 2 || !value.chars().all(|c| c.is_ascii_alphabetic()) {
        bail!("{} must be two ASCII letters, got {:?}", field, value);
    }
    Ok(())
}

/// Convenience function to load configuration with defaults
pub fn load_config(profile: Option<&str>) -> Result<CmpConfig> {
    CmpConfig::load(None, profile)
}
