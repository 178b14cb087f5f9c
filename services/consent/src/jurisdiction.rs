//! Jurisdiction → consent model resolution
//!
//! Pure table lookup. Protocol mode only ever upgrades the opt-in regimes
//! that TCF covers; opt-out regimes are never overridden, and unknown codes
//! fall to the strict opt-in outcome.

use serde::{Deserialize, Serialize};
use std::fmt;
use tcf_types::{Categories, Category};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConsentModel {
    OptIn,
    OptOut,
    Protocol,
}

impl ConsentModel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentModel::OptIn => "opt-in",
            ConsentModel::OptOut => "opt-out",
            ConsentModel::Protocol => "protocol",
        }
    }
}

impl fmt::Display for ConsentModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Explicit "no regulation applies"
pub const NO_REGULATION: &str = "NONE";

/// US-style regimes: processing allowed until the user objects
pub const OPT_OUT_JURISDICTIONS: &[&str] = &["CCPA"];

/// Opt-in regimes that switch to the TCF protocol when it is enabled
pub const PROTOCOL_JURISDICTIONS: &[&str] = &["GDPR", "CH"];

/// Opt-in regimes outside TCF
pub const OPT_IN_JURISDICTIONS: &[&str] = &["BR", "PIPEDA", "AU", "APPI", "PIPA"];

/// Every code with an explicit table entry
pub fn known_jurisdictions() -> impl Iterator<Item = &'static str> {
    std::iter::once(NO_REGULATION)
        .chain(OPT_OUT_JURISDICTIONS.iter().copied())
        .chain(PROTOCOL_JURISDICTIONS.iter().copied())
        .chain(OPT_IN_JURISDICTIONS.iter().copied())
}

pub fn resolve_model(jurisdiction: Option<&str>, protocol_mode_enabled: bool) -> Option<ConsentModel> {
    let code = jurisdiction?.trim().to_ascii_uppercase();
    let is = |table: &[&str]| table.contains(&code.as_str());

    if code.is_empty() || code == NO_REGULATION {
        None
    } else if is(OPT_OUT_JURISDICTIONS) {
        Some(ConsentModel::OptOut)
    } else if is(PROTOCOL_JURISDICTIONS) && protocol_mode_enabled {
        Some(ConsentModel::Protocol)
    } else {
        Some(ConsentModel::OptIn)
    }
}

/// Categories a visitor starts with before making any choice
///
/// The enhanced privacy signal (e.g. Global Privacy Control) acts as an
/// objection under opt-out regimes.
pub fn default_categories(model: Option<ConsentModel>, privacy_signal: bool) -> Categories {
    match model {
        None => Categories::all_granted(),
        Some(ConsentModel::OptOut) if privacy_signal => Categories::all_granted()
            .with(Category::Marketing, false)
            .with(Category::Measurement, false),
        Some(ConsentModel::OptOut) => Categories::all_granted(),
        Some(ConsentModel::OptIn) | Some(ConsentModel::Protocol) => Categories::essential_only(),
    }
}

/// Whether the host must ask before anything beyond essentials runs
pub fn requires_prompt(model: Option<ConsentModel>) -> bool {
    matches!(model, Some(ConsentModel::OptIn) | Some(ConsentModel::Protocol))
}
