//! Reconciliation between host categories and the TCF engine
//!
//! Initialization order:
//!
//! ```text
//! resolve model ─▶ (protocol?) ─▶ install stub ─▶ vendor list ─┬─▶ Some: engine + drain queue ─▶ restore string
//!                                                              ├─▶ None: abandon stub
//!                                                              └─▶ Err:  abandon stub, jurisdiction-only model
//! ```
//!
//! A save encodes, persists, updates the host categories and only then
//! publishes to the engine, so a listener never sees a string the host has
//! not caught up with.

use chrono::{DateTime, Utc};
use cmp_api::{CmpEngine, CmpError, CmpStub, DisplayStatus, EngineSettings, LazyCodec};
use cmp_config::CmpConfig;
use frame_messaging::Window;
use std::sync::Arc;
use tcf_codec::{
    categories_to_purpose_consents, is_well_formed, legitimate_interest_purposes,
    purpose_consents_to_categories, vendor_has_consent, vendor_has_legitimate_interest,
    vendor_is_eligible, CodecError, EncodeMetadata,
};
use tcf_types::{Categories, Category, ConsentMap, ConsentState, VendorList};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use vendor_list::{FetchOptions, GvlError, VendorListCache};

use crate::host::HostStore;
use crate::jurisdiction::{default_categories, requires_prompt, resolve_model, ConsentModel};
use crate::storage::ConsentStorage;

/// Vendor list handed over from server-side rendering
#[derive(Debug, Clone)]
pub enum Prefetch {
    /// Nothing was fetched ahead of time
    NotFetched,
    /// Fetched already; `None` means the region is not covered
    Ready(Option<Arc<VendorList>>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserAction {
    AcceptAll,
    RejectAll,
    Custom(Categories),
}

impl UserAction {
    /// Categories the action amounts to; essentials cannot be refused
    pub fn categories(&self) -> Categories {
        match self {
            UserAction::AcceptAll => Categories::all_granted(),
            UserAction::RejectAll => Categories::essential_only(),
            UserAction::Custom(categories) => categories.with(Category::Essential, true),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InitOutcome {
    /// Model without the TCF protocol; no command function was installed
    Standard(Option<ConsentModel>),
    /// The vendor list does not apply to this visitor
    NotApplicable(Option<ConsentModel>),
    /// Vendor list failed; continuing under the jurisdiction-only model
    FellBack {
        model: Option<ConsentModel>,
        error: GvlError,
    },
    /// Engine installed; `restored` when a stored string was adopted
    Protocol { restored: bool },
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("TCF protocol mode is not active")]
    ProtocolInactive,

    #[error(transparent)]
    Cmp(#[from] CmpError),

    #[error("Consent string encoding failed: {0}")]
    Encode(#[from] CodecError),
}

pub type ReconcileResult<T> = Result<T, ReconcileError>;

struct Session {
    model: Option<ConsentModel>,
    engine: Option<Arc<CmpEngine>>,
    vendor_list: Option<Arc<VendorList>>,
    consent: ConsentState,
    created: Option<DateTime<Utc>>,
}

pub struct ConsentReconciler {
    config: CmpConfig,
    window: Window,
    host: Arc<dyn HostStore>,
    storage: Arc<dyn ConsentStorage>,
    vendor_lists: Arc<VendorListCache>,
    codec: Arc<LazyCodec>,
    session: Mutex<Session>,
}

impl ConsentReconciler {
    pub fn new(
        config: CmpConfig,
        window: Window,
        host: Arc<dyn HostStore>,
        storage: Arc<dyn ConsentStorage>,
        vendor_lists: Arc<VendorListCache>,
    ) -> Self {
        let codec = Arc::new(LazyCodec::with_max_vendor_id(config.codec.max_vendor_id));
        Self {
            config,
            window,
            host,
            storage,
            vendor_lists,
            codec,
            session: Mutex::new(Session {
                model: None,
                engine: None,
                vendor_list: None,
                consent: ConsentState::default(),
                created: None,
            }),
        }
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub async fn model(&self) -> Option<ConsentModel> {
        self.session.lock().await.model
    }

    pub async fn engine(&self) -> Option<Arc<CmpEngine>> {
        self.session.lock().await.engine.clone()
    }

    pub async fn consent_state(&self) -> ConsentState {
        self.session.lock().await.consent.clone()
    }

    pub async fn initialize(&self, prefetched: Prefetch) -> ReconcileResult<InitOutcome> {
        let mut session = self.session.lock().await;
        let jurisdiction = self.host.jurisdiction();
        let model = resolve_model(
            jurisdiction.as_deref(),
            self.config.cmp.protocol_mode_enabled,
        );
        info!(jurisdiction = ?jurisdiction, model = ?model, "Consent model resolved");

        if model != Some(ConsentModel::Protocol) {
            self.adopt_model(&mut session, model);
            return Ok(InitOutcome::Standard(model));
        }

        let stub = CmpStub::install(&self.window, Some(true))?;

        let fetched = match prefetched {
            Prefetch::Ready(list) => {
                debug!(applicable = list.is_some(), "Using prefetched vendor list");
                self.vendor_lists.prime(list.clone());
                Ok(list)
            }
            Prefetch::NotFetched => {
                let ids = &self.config.vendor_list.vendor_ids;
                let ids = (!ids.is_empty()).then_some(ids.as_slice());
                self.vendor_lists.fetch(ids, FetchOptions::default()).await
            }
        };

        let list = match fetched {
            Ok(Some(list)) => list,
            Ok(None) => {
                stub.abandon(&self.window);
                let model = resolve_model(jurisdiction.as_deref(), false);
                info!("Vendor list not applicable; TCF protocol inactive");
                self.adopt_model(&mut session, model);
                return Ok(InitOutcome::NotApplicable(model));
            }
            Err(error) => {
                stub.abandon(&self.window);
                let model = resolve_model(jurisdiction.as_deref(), false);
                warn!(error = %error, fallback = ?model, "Vendor list fetch failed; TCF protocol disabled");
                self.adopt_model(&mut session, model);
                return Ok(InitOutcome::FellBack { model, error });
            }
        };

        if let Some(previous) = session.engine.take() {
            previous.destroy();
        }
        let engine = CmpEngine::new(
            EngineSettings::from_config(&self.config.cmp, Some(true)),
            Arc::clone(&list),
            Arc::clone(&self.codec),
        );
        engine.attach(&self.window);
        stub.hand_off(&self.window, engine.clone());
        info!(
            gvl_version = list.vendor_list_version,
            vendors = list.vendors.len(),
            "CMP engine installed"
        );

        session.model = model;
        self.host.set_model(model);
        session.engine = Some(Arc::clone(&engine));
        session.vendor_list = Some(list);

        let restored = self.restore(&mut session, &engine).await;
        if !restored {
            engine.mark_loaded(None);
            if self.host.categories().is_none() {
                self.host
                    .set_categories(default_categories(model, self.host.privacy_signal()));
            }
            self.host.set_prompt_visible(true);
            engine.set_display_status(DisplayStatus::Visible).await;
        }
        Ok(InitOutcome::Protocol { restored })
    }

    /// Adopt a stored string if there is one that decodes
    async fn restore(&self, session: &mut Session, engine: &CmpEngine) -> bool {
        let stored = match self.storage.load().await {
            Ok(Some(value)) => value,
            Ok(None) => return false,
            Err(e) => {
                warn!(backend = self.storage.name(), error = %e, "Stored consent unreadable");
                return false;
            }
        };
        if !is_well_formed(&stored) {
            debug!("Stored consent string is malformed; ignoring");
            return false;
        }

        let decoded = match self.codec.get().await {
            Ok(codec) => codec.decode(&stored),
            Err(e) => {
                warn!(error = %e, "Codec unavailable; stored consent ignored");
                return false;
            }
        };
        let decoded = match decoded {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(error = %e, "Stored consent string failed to decode");
                return false;
            }
        };

        let categories = purpose_consents_to_categories(&decoded.state.purpose_consents);
        session.consent = decoded.state;
        session.created = Some(decoded.created);
        self.host.set_categories(categories);
        self.host.set_prompt_visible(false);
        engine.mark_loaded(Some(stored));
        info!(?categories, "Prior consent restored");
        true
    }

    fn adopt_model(&self, session: &mut Session, model: Option<ConsentModel>) {
        session.model = model;
        self.host.set_model(model);
        if self.host.categories().is_none() {
            self.host
                .set_categories(default_categories(model, self.host.privacy_signal()));
            self.host.set_prompt_visible(requires_prompt(model));
        }
    }

    /// Apply a user choice; returns the new consent string
    pub async fn save(&self, action: UserAction) -> ReconcileResult<String> {
        let mut session = self.session.lock().await;
        let (Some(engine), Some(list)) = (session.engine.clone(), session.vendor_list.clone())
        else {
            return Err(ReconcileError::ProtocolInactive);
        };

        let categories = action.categories();
        let consent = build_consent_state(&categories, &list);
        let now = Utc::now();
        let metadata = EncodeMetadata {
            cmp_id: self.config.cmp.cmp_id,
            cmp_version: self.config.cmp.cmp_version,
            consent_screen: self.config.cmp.consent_screen,
            consent_language: self.config.cmp.consent_language.clone(),
            publisher_country_code: self.config.cmp.publisher_country_code.clone(),
            is_service_specific: self.config.cmp.is_service_specific,
            created: session.created.unwrap_or(now),
            last_updated: now,
        };

        let codec = self.codec.get().await?;
        let tc_string = codec.encode(&consent, &list, &metadata)?;

        if let Err(e) = self.storage.save(&tc_string).await {
            warn!(backend = self.storage.name(), error = %e, "Consent string not persisted");
        }

        self.host.set_categories(categories);
        self.host.set_prompt_visible(false);
        engine.set_display_status(DisplayStatus::Hidden).await;

        session.consent = consent;
        session.created = Some(metadata.created);
        let notified = engine.update_consent(tc_string.clone()).await;
        info!(?action, listeners = notified, "Consent saved");
        Ok(tc_string)
    }

    /// Mirror the host banner into the engine's display status
    pub async fn set_prompt_visible(&self, visible: bool) -> ReconcileResult<usize> {
        let engine = self
            .session
            .lock()
            .await
            .engine
            .clone()
            .ok_or(ReconcileError::ProtocolInactive)?;
        self.host.set_prompt_visible(visible);
        let status = if visible {
            DisplayStatus::Visible
        } else {
            DisplayStatus::Hidden
        };
        Ok(engine.set_display_status(status).await)
    }

    /// Tear the engine down; the locator frame and relay stay
    pub async fn shutdown(&self) {
        let mut session = self.session.lock().await;
        if let Some(engine) = session.engine.take() {
            engine.destroy();
        }
        session.vendor_list = None;
    }
}

/// Purpose, vendor and special-feature maps for a set of categories
pub fn build_consent_state(categories: &Categories, list: &VendorList) -> ConsentState {
    let purpose_consents = categories_to_purpose_consents(categories);
    let purpose_legitimate_interests = legitimate_interest_purposes(categories);

    let mut vendor_consents = ConsentMap::new();
    let mut vendor_legitimate_interests = ConsentMap::new();
    let mut eligible = 0usize;
    for vendor in list.active_vendors() {
        let consent = !vendor.purposes.is_empty() && vendor_has_consent(vendor, &purpose_consents);
        let legitimate_interest = !vendor.leg_int_purposes.is_empty()
            && vendor_has_legitimate_interest(vendor, &purpose_legitimate_interests);
        vendor_consents.set(vendor.id, consent);
        vendor_legitimate_interests.set(vendor.id, legitimate_interest);
        if vendor_is_eligible(vendor, &purpose_consents, &purpose_legitimate_interests) {
            eligible += 1;
        }
    }

    let special_feature_opt_ins = list
        .special_features
        .keys()
        .map(|id| (*id, categories.marketing))
        .collect();
    let vendors_disclosed = ConsentMap::from_ids(list.active_vendors().map(|v| v.id), true);
    debug!(eligible, disclosed = vendors_disclosed.len(), "Consent maps built");

    ConsentState {
        purpose_consents,
        purpose_legitimate_interests,
        vendor_consents,
        vendor_legitimate_interests,
        special_feature_opt_ins,
        vendors_disclosed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = include_str!("../../../fixtures/vendor-list-v3.json");

    fn list() -> VendorList {
        serde_json::from_str(FIXTURE).unwrap()
    }

    #[test]
    fn test_custom_action_keeps_essentials() {
        let action = UserAction::Custom(Categories::default().with(Category::Marketing, true));
        let categories = action.categories();
        assert!(categories.essential);
        assert!(categories.marketing);
        assert!(!categories.measurement);
    }

    #[test]
    fn test_accept_all_discloses_every_active_vendor() {
        let list = list();
        let state = build_consent_state(&Categories::all_granted(), &list);

        let active: Vec<u32> = list.active_vendors().map(|v| v.id).collect();
        assert!(!active.contains(&1126));
        for id in &active {
            assert_eq!(state.vendors_disclosed.get(*id), Some(true));
        }
        assert_eq!(state.vendors_disclosed.get(1126), None);
        assert!(state.special_feature_opt_ins.iter().all(|(_, granted)| granted));
        assert!((1..=11).all(|p| state.purpose_consents.is_granted(p)));
    }

    #[test]
    fn test_reject_all_denies_vendors_but_still_discloses() {
        let list = list();
        let state = build_consent_state(&Categories::essential_only(), &list);
        assert!(state.vendor_consents.granted_ids().is_empty());
        assert!(state.special_feature_opt_ins.granted_ids().is_empty());
        assert_eq!(
            state.vendors_disclosed.len(),
            list.active_vendors().count()
        );
    }

    #[test]
    fn test_partial_categories_only_grant_covered_vendors() {
        let list = list();
        let categories = Categories::essential_only().with(Category::Marketing, true);
        let state = build_consent_state(&categories, &list);
        let purposes = categories_to_purpose_consents(&categories);
        for vendor in list.active_vendors() {
            let expected = !vendor.purposes.is_empty() && vendor_has_consent(vendor, &purposes);
            assert_eq!(state.vendor_consents.get(vendor.id), Some(expected));
        }
    }
}
