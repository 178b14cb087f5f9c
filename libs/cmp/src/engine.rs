//! # CMP Protocol Engine
//!
//! Full `__tcfapi` command handler. Replaces the stub once the vendor list
//! is available.
//!
//! ## Responsibilities
//!
//! - `ping` and `getVendorList` answered inline
//! - `getTCData` snapshots built off-thread through the lazy codec, cached
//!   until the consent string changes
//! - Event listeners kept in registration order and notified with
//!   `tcloaded`, `cmpuishown` and `useractioncomplete`
//!
//! ## Status Model
//!
//! ```text
//! LoadStatus:    NotInstalled ──▶ Loading ──▶ Loaded      (never backwards)
//! DisplayStatus: Hidden ◀──▶ Visible ◀──▶ Disabled        (free)
//! ```

use cmp_config::{CmpSettings, TCF_API_VERSION};
use frame_messaging::{WeakWindow, Window};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tcf_codec::DecodedConsent;
use tcf_types::VendorList;
use tracing::{debug, info, warn};

use crate::command::{is_supported_version, ApiCall, ApiCallback, Command, CommandHandler};
use crate::error::{CmpError, Result};
use crate::lazy::LazyCodec;
use crate::response::{
    ApiResponse, ConsentPair, DisplayStatus, EventStatus, LoadStatus, PingReturn,
    PublisherSection, TcData,
};
use crate::slot;

/// Identity reported by `ping` and embedded in snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSettings {
    pub cmp_id: u16,
    pub cmp_version: u16,
    pub gdpr_applies: Option<bool>,
    pub is_service_specific: bool,
    pub publisher_cc: String,
}

impl EngineSettings {
    pub fn from_config(cmp: &CmpSettings, gdpr_applies: Option<bool>) -> Self {
        Self {
            cmp_id: cmp.cmp_id,
            cmp_version: cmp.cmp_version,
            gdpr_applies,
            is_service_specific: cmp.is_service_specific,
            publisher_cc: cmp.publisher_country_code.to_ascii_uppercase(),
        }
    }
}

struct EngineState {
    load_status: LoadStatus,
    display_status: DisplayStatus,
    tc_string: Option<String>,
}

/// Snapshot tagged with the string it was built from
type CachedSnapshot = (Option<String>, Arc<TcData>);

/// Registered callback plus the lock that orders deliveries to it; the
/// `tcloaded` task holds the lock from registration until it has called back
struct Listener {
    callback: ApiCallback,
    delivery: Arc<tokio::sync::Mutex<()>>,
}

pub struct CmpEngine {
    this: Weak<CmpEngine>,
    settings: EngineSettings,
    vendor_list: Arc<VendorList>,
    codec: Arc<LazyCodec>,
    state: RwLock<EngineState>,
    listeners: Mutex<BTreeMap<u32, Listener>>,
    next_listener_id: AtomicU32,
    snapshot: Mutex<Option<CachedSnapshot>>,
    window: Mutex<Option<WeakWindow>>,
}

impl CmpEngine {
    pub fn new(
        settings: EngineSettings,
        vendor_list: Arc<VendorList>,
        codec: Arc<LazyCodec>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            settings,
            vendor_list,
            codec,
            state: RwLock::new(EngineState {
                load_status: LoadStatus::Loading,
                display_status: DisplayStatus::Hidden,
                tc_string: None,
            }),
            listeners: Mutex::new(BTreeMap::new()),
            next_listener_id: AtomicU32::new(1),
            snapshot: Mutex::new(None),
            window: Mutex::new(None),
        })
    }

    fn as_handler(&self) -> Option<Arc<dyn CommandHandler>> {
        self.this
            .upgrade()
            .map(|engine| engine as Arc<dyn CommandHandler>)
    }

    /// Become `window`'s command function
    pub fn install(&self, window: &Window) {
        if let Some(handler) = self.as_handler() {
            slot::install(window, handler);
            *self.window.lock() = Some(window.downgrade());
            info!(window = %window.name(), "CMP engine installed");
        }
    }

    /// Remember `window` without touching its slot; used when a stub
    /// performs the swap
    pub fn attach(&self, window: &Window) {
        *self.window.lock() = Some(window.downgrade());
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn vendor_list(&self) -> &Arc<VendorList> {
        &self.vendor_list
    }

    pub fn codec(&self) -> &Arc<LazyCodec> {
        &self.codec
    }

    pub fn load_status(&self) -> LoadStatus {
        self.state.read().load_status
    }

    pub fn display_status(&self) -> DisplayStatus {
        self.state.read().display_status
    }

    pub fn tc_string(&self) -> Option<String> {
        self.state.read().tc_string.clone()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn ping(&self) -> PingReturn {
        let state = self.state.read();
        PingReturn {
            gdpr_applies: self.settings.gdpr_applies,
            cmp_loaded: state.load_status != LoadStatus::NotInstalled,
            cmp_status: state.load_status,
            display_status: state.display_status,
            api_version: TCF_API_VERSION.to_string(),
            cmp_version: self.settings.cmp_version,
            cmp_id: self.settings.cmp_id,
            gvl_version: self.vendor_list.vendor_list_version,
            tcf_policy_version: self.vendor_list.tcf_policy_version,
        }
    }

    /// Adopt a stored string at start-up; nobody is notified
    pub fn mark_loaded(&self, tc_string: Option<String>) {
        {
            let mut state = self.state.write();
            state.tc_string = tc_string;
            state.load_status = LoadStatus::Loaded;
        }
        *self.snapshot.lock() = None;
        debug!("CMP engine marked loaded");
    }

    /// Publish a freshly saved string; every listener has been called
    /// with `useractioncomplete` when this returns
    pub async fn update_consent(&self, tc_string: String) -> usize {
        {
            let mut state = self.state.write();
            state.tc_string = Some(tc_string);
            state.load_status = LoadStatus::Loaded;
        }
        *self.snapshot.lock() = None;
        self.notify(EventStatus::UserActionComplete).await
    }

    /// Only a switch to `Visible` is announced, as `cmpuishown`
    pub async fn set_display_status(&self, status: DisplayStatus) -> usize {
        let previous = {
            let mut state = self.state.write();
            std::mem::replace(&mut state.display_status, status)
        };
        debug!(?previous, ?status, "Display status changed");
        *self.snapshot.lock() = None;

        if status == DisplayStatus::Visible {
            self.notify(EventStatus::CmpUiShown).await
        } else {
            0
        }
    }

    /// Drop listeners and cached snapshots and remove the command function
    pub fn destroy(&self) {
        let dropped = {
            let mut listeners = self.listeners.lock();
            let count = listeners.len();
            listeners.clear();
            count
        };
        *self.snapshot.lock() = None;

        let window = self.window.lock().take().and_then(|weak| weak.upgrade());
        if let (Some(window), Some(handler)) = (window, self.as_handler()) {
            slot::uninstall_if(&window, &handler);
        }
        info!(listeners = dropped, "CMP engine destroyed");
    }

    pub fn add_event_listener(&self, callback: ApiCallback) -> u32 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let delivery = Arc::new(tokio::sync::Mutex::new(()));
        let loaded_guard = Arc::clone(&delivery).try_lock_owned().ok();
        self.listeners.lock().insert(
            id,
            Listener {
                callback: Arc::clone(&callback),
                delivery,
            },
        );
        debug!(listener_id = id, "Event listener added");

        let engine = self.this.clone();
        let spawned = self.spawn(async move {
            let _loaded_guard = loaded_guard;
            let Some(engine) = engine.upgrade() else {
                return;
            };
            let snapshot = engine.current_snapshot().await;
            let data = snapshot.for_event(Some(EventStatus::TcLoaded), Some(id));
            callback(Some(ApiResponse::TcData(Box::new(data))), true);
        });
        if !spawned {
            warn!(listener_id = id, "No runtime to deliver tcloaded");
        }
        id
    }

    pub fn remove_event_listener(&self, id: u32) -> bool {
        let removed = self.listeners.lock().remove(&id).is_some();
        debug!(listener_id = id, removed, "Event listener removal");
        removed
    }

    /// Snapshot for `getTCData`, decoded on demand and cached per string
    pub async fn current_snapshot(&self) -> Arc<TcData> {
        let tc_string = self.tc_string();
        let cached = self
            .snapshot
            .lock()
            .as_ref()
            .filter(|(cached_for, _)| *cached_for == tc_string)
            .map(|(_, snapshot)| Arc::clone(snapshot));
        if let Some(snapshot) = cached {
            return snapshot;
        }

        let snapshot = Arc::new(self.build_snapshot(tc_string.as_deref()).await);
        *self.snapshot.lock() = Some((tc_string, Arc::clone(&snapshot)));
        snapshot
    }

    async fn build_snapshot(&self, tc_string: Option<&str>) -> TcData {
        let mut data = TcData {
            tc_string: tc_string.unwrap_or_default().to_string(),
            tcf_policy_version: self.vendor_list.tcf_policy_version,
            cmp_id: self.settings.cmp_id,
            cmp_version: self.settings.cmp_version,
            gdpr_applies: self.settings.gdpr_applies,
            event_status: None,
            cmp_status: self.load_status(),
            listener_id: None,
            is_service_specific: self.settings.is_service_specific,
            use_non_standard_texts: false,
            publisher_cc: self.settings.publisher_cc.clone(),
            purpose_one_treatment: false,
            purpose: ConsentPair::default(),
            vendor: ConsentPair::default(),
            special_feature_optins: Default::default(),
            publisher: PublisherSection::default(),
        };

        let Some(tc_string) = tc_string else {
            return data;
        };

        let decoded = match self.codec.get().await {
            Ok(codec) => codec.decode(tc_string),
            Err(e) => {
                warn!(error = %e, "Snapshot built without consent maps");
                return data;
            }
        };
        match decoded {
            Ok(decoded) => apply_decoded(&mut data, decoded, &self.vendor_list),
            Err(e) => warn!(error = %e, "Stored consent string failed to decode"),
        }
        data
    }

    /// Deliver one event to every listener in registration order, each
    /// only after its `tcloaded` has gone out
    async fn notify(&self, event: EventStatus) -> usize {
        let listeners: Vec<(u32, ApiCallback, Arc<tokio::sync::Mutex<()>>)> = self
            .listeners
            .lock()
            .iter()
            .map(|(id, listener)| {
                (
                    *id,
                    Arc::clone(&listener.callback),
                    Arc::clone(&listener.delivery),
                )
            })
            .collect();
        if listeners.is_empty() {
            return 0;
        }

        let snapshot = self.current_snapshot().await;
        let mut notified = 0;
        for (id, callback, delivery) in &listeners {
            let _delivering = delivery.lock().await;
            if !self.listeners.lock().contains_key(id) {
                continue;
            }
            let data = snapshot.for_event(Some(event), Some(*id));
            callback(Some(ApiResponse::TcData(Box::new(data))), true);
            notified += 1;
        }
        debug!(?event, listeners = notified, "Listeners notified");
        notified
    }

    fn spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(task);
                true
            }
            Err(_) => false,
        }
    }

    fn get_tc_data(&self, call: ApiCall) {
        let filter = match vendor_filter(call.parameter.as_ref()) {
            Ok(filter) => filter,
            Err(e) => {
                debug!(error = %e, "Rejected getTCData parameter");
                call.fail();
                return;
            }
        };

        let engine = self.this.clone();
        let callback = Arc::clone(&call.callback);
        let spawned = self.spawn(async move {
            let Some(engine) = engine.upgrade() else {
                callback(None, false);
                return;
            };
            let mut data = engine.current_snapshot().await.for_event(None, None);
            if let Some(ids) = filter {
                data.filter_vendors(&ids);
            }
            callback(Some(ApiResponse::TcData(Box::new(data))), true);
        });
        if !spawned {
            call.fail();
        }
    }
}

impl CommandHandler for CmpEngine {
    fn handle(&self, call: ApiCall) {
        let command = match call.command.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                debug!(error = %e, "Unknown command");
                call.fail();
                return;
            }
        };

        if command != Command::Ping && !is_supported_version(call.version) {
            debug!(
                command = %command,
                version = call.version,
                "{}",
                CmpError::UnsupportedVersion(call.version)
            );
            call.fail();
            return;
        }

        match command {
            Command::Ping => call.respond(Some(ApiResponse::Ping(self.ping())), true),
            Command::GetTcData | Command::GetInAppTcData => self.get_tc_data(call),
            Command::GetVendorList => call.respond(
                Some(ApiResponse::VendorList(Arc::clone(&self.vendor_list))),
                true,
            ),
            Command::AddEventListener => {
                self.add_event_listener(Arc::clone(&call.callback));
            }
            Command::RemoveEventListener => {
                match call.parameter.as_ref().and_then(Value::as_u64) {
                    Some(id) => {
                        let removed = u32::try_from(id)
                            .map(|id| self.remove_event_listener(id))
                            .unwrap_or(false);
                        call.respond(Some(ApiResponse::Bool(removed)), removed);
                    }
                    None => call.fail(),
                }
            }
        }
    }
}

/// Optional `getTCData` parameter: an array of vendor IDs
fn vendor_filter(parameter: Option<&Value>) -> Result<Option<Vec<u32>>> {
    match parameter {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|id| u32::try_from(id).ok())
                    .ok_or_else(|| {
                        CmpError::invalid_parameter("getTCData", format!("bad vendor ID {item}"))
                    })
            })
            .collect::<Result<Vec<_>>>()
            .map(Some),
        Some(other) => Err(CmpError::invalid_parameter(
            "getTCData",
            format!("expected vendor ID array, got {other}"),
        )),
    }
}

/// Restrictions are reported only for vendors the list knows
fn apply_decoded(data: &mut TcData, decoded: DecodedConsent, vendor_list: &VendorList) {
    let mut restrictions: BTreeMap<u32, BTreeMap<u32, u8>> = BTreeMap::new();
    for restriction in &decoded.publisher_restrictions {
        let by_vendor = restrictions
            .entry(u32::from(restriction.purpose_id))
            .or_default();
        for &vendor_id in vendor_list.vendors.keys() {
            if restriction.vendor_ids.contains(vendor_id) {
                by_vendor.insert(vendor_id, restriction.restriction_type);
            }
        }
    }
    restrictions.retain(|_, by_vendor| !by_vendor.is_empty());

    let state = decoded.state;
    data.tcf_policy_version = u32::from(decoded.tcf_policy_version);
    data.is_service_specific = decoded.is_service_specific;
    data.use_non_standard_texts = decoded.use_non_standard_texts;
    data.purpose_one_treatment = decoded.purpose_one_treatment;
    data.publisher_cc = decoded.publisher_country_code;
    data.purpose = ConsentPair {
        consents: state.purpose_consents,
        legitimate_interests: state.purpose_legitimate_interests,
    };
    data.vendor = ConsentPair {
        consents: state.vendor_consents,
        legitimate_interests: state.vendor_legitimate_interests,
    };
    data.special_feature_optins = state.special_feature_opt_ins;
    data.publisher.restrictions = restrictions;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::TcfApi;
    use serde_json::json;
    use tokio::sync::mpsc;

    const FIXTURE: &str = include_str!("../../../fixtures/vendor-list-v3.json");

    fn engine() -> Arc<CmpEngine> {
        let list: VendorList = serde_json::from_str(FIXTURE).unwrap();
        let settings = EngineSettings {
            cmp_id: 42,
            cmp_version: 3,
            gdpr_applies: Some(true),
            is_service_specific: true,
            publisher_cc: "DE".to_string(),
        };
        CmpEngine::new(settings, Arc::new(list), Arc::new(LazyCodec::default()))
    }

    fn channel() -> (ApiCallback, mpsc::UnboundedReceiver<(Option<ApiResponse>, bool)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let callback: ApiCallback = Arc::new(move |response: Option<ApiResponse>, success: bool| {
            let _ = tx.send((response, success));
        });
        (callback, rx)
    }

    #[test]
    fn test_ping_reports_identity_and_versions() {
        let engine = engine();
        let ping = engine.ping();
        assert_eq!(ping.cmp_id, 42);
        assert_eq!(ping.cmp_version, 3);
        assert_eq!(ping.gvl_version, 87);
        assert_eq!(ping.tcf_policy_version, 5);
        assert_eq!(ping.api_version, "2.2");
        assert_eq!(ping.cmp_status, LoadStatus::Loading);
        assert!(ping.cmp_loaded);

        engine.mark_loaded(None);
        assert_eq!(engine.ping().cmp_status, LoadStatus::Loaded);
    }

    #[tokio::test]
    async fn test_unknown_command_and_bad_version_fail() {
        let engine = engine();
        let (callback, mut rx) = channel();

        engine.handle(ApiCall::new("getConsents", 2, Arc::clone(&callback), None));
        assert_eq!(rx.recv().await.unwrap(), (None, false));

        engine.handle(ApiCall::new("getTCData", 1, Arc::clone(&callback), None));
        assert_eq!(rx.recv().await.unwrap(), (None, false));

        // Ping answers whatever version is asked
        engine.handle(ApiCall::new("ping", 7, callback, None));
        let (response, success) = rx.recv().await.unwrap();
        assert!(success && response.unwrap().as_ping().is_some());
    }

    #[tokio::test]
    async fn test_get_vendor_list_returns_cached_list() {
        let engine = engine();
        let (callback, mut rx) = channel();
        engine.handle(ApiCall::new("getVendorList", 0, callback, None));

        let (response, success) = rx.recv().await.unwrap();
        assert!(success);
        let list = response.unwrap();
        assert!(Arc::ptr_eq(list.as_vendor_list().unwrap(), engine.vendor_list()));
    }

    #[tokio::test]
    async fn test_get_tc_data_without_consent_is_empty() {
        let engine = engine();
        let (callback, mut rx) = channel();
        engine.handle(ApiCall::new("getTCData", 2, callback, None));

        let (response, success) = rx.recv().await.unwrap();
        assert!(success);
        let response = response.unwrap();
        let data = response.as_tc_data().unwrap();
        assert_eq!(data.tc_string, "");
        assert!(data.vendor.consents.is_empty());
        assert_eq!(data.publisher_cc, "DE");
        assert_eq!(data.event_status, None);
    }

    #[tokio::test]
    async fn test_malformed_vendor_filter_fails() {
        let engine = engine();
        let (callback, mut rx) = channel();
        engine.handle(ApiCall::new("getTCData", 2, callback, Some(json!("12"))));
        assert_eq!(rx.recv().await.unwrap(), (None, false));
    }

    #[tokio::test]
    async fn test_remove_event_listener_reports_existence() {
        let engine = engine();
        let (callback, mut rx) = channel();

        let id = engine.add_event_listener(Arc::clone(&callback));
        let (_, loaded) = rx.recv().await.unwrap();
        assert!(loaded);

        let remove = || {
            ApiCall::new("removeEventListener", 2, Arc::clone(&callback), Some(json!(id)))
        };
        engine.handle(remove());
        assert_eq!(rx.recv().await.unwrap(), (Some(ApiResponse::Bool(true)), true));

        engine.handle(remove());
        assert_eq!(rx.recv().await.unwrap(), (Some(ApiResponse::Bool(false)), false));

        engine.handle(ApiCall::new("removeEventListener", 2, callback, None));
        assert_eq!(rx.recv().await.unwrap(), (None, false));
    }

    fn event_of(received: Option<(Option<ApiResponse>, bool)>) -> Option<EventStatus> {
        received
            .and_then(|(response, _)| response)
            .and_then(|response| response.as_tc_data().and_then(|data| data.event_status))
    }

    #[tokio::test]
    async fn test_tcloaded_precedes_save_for_fresh_listener() {
        let engine = engine();
        let (callback, mut rx) = channel();

        let id = engine.add_event_listener(callback);
        assert_eq!(engine.update_consent("CQ-not-decoded".to_string()).await, 1);

        assert_eq!(event_of(rx.recv().await), Some(EventStatus::TcLoaded));
        assert_eq!(event_of(rx.recv().await), Some(EventStatus::UserActionComplete));
        assert!(rx.try_recv().is_err());
        assert!(engine.remove_event_listener(id));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_tcloaded_precedes_ui_shown_across_workers() {
        let engine = engine();
        let (first, mut first_rx) = channel();
        let (second, mut second_rx) = channel();

        engine.add_event_listener(first);
        engine.add_event_listener(second);
        assert_eq!(engine.set_display_status(DisplayStatus::Visible).await, 2);

        for rx in [&mut first_rx, &mut second_rx] {
            assert_eq!(event_of(rx.recv().await), Some(EventStatus::TcLoaded));
            assert_eq!(event_of(rx.recv().await), Some(EventStatus::CmpUiShown));
        }
    }

    #[tokio::test]
    async fn test_destroy_removes_only_own_function() {
        let window = Window::top("top");
        let engine = engine();
        engine.install(&window);
        let (callback, _rx) = channel();
        engine.add_event_listener(callback);

        engine.destroy();
        assert!(!window.has_tcfapi());
        assert_eq!(engine.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_restrictions_reported_only_for_listed_vendors() {
        use tcf_codec::{PublisherRestriction, VendorRanges};

        let engine = engine();
        let mut data = engine.build_snapshot(None).await;
        let at = chrono::Utc::now();
        let restriction = |purpose_id, runs| PublisherRestriction {
            purpose_id,
            restriction_type: 1,
            vendor_ids: VendorRanges::from_runs(runs),
        };
        let decoded = DecodedConsent {
            version: 2,
            created: at,
            last_updated: at,
            cmp_id: 42,
            cmp_version: 3,
            consent_screen: 1,
            consent_language: "EN".to_string(),
            vendor_list_version: 87,
            tcf_policy_version: 5,
            is_service_specific: true,
            use_non_standard_texts: false,
            purpose_one_treatment: false,
            publisher_country_code: "DE".to_string(),
            publisher_restrictions: vec![
                restriction(2, vec![(1, 65_535)]),
                restriction(7, vec![(13, 27)]),
                restriction(10, vec![(20, 30)]),
            ],
            state: Default::default(),
        };

        apply_decoded(&mut data, decoded, engine.vendor_list());

        let listed: Vec<u32> = engine.vendor_list().vendors.keys().copied().collect();
        let purpose_two = &data.publisher.restrictions[&2];
        assert_eq!(purpose_two.keys().copied().collect::<Vec<_>>(), listed);
        assert_eq!(purpose_two.get(&28), Some(&1));
        assert!(!data.publisher.restrictions.contains_key(&7));
        assert_eq!(data.publisher.restrictions[&10].keys().collect::<Vec<_>>(), vec![&28]);
    }

    #[test]
    fn test_vendor_filter_parsing() {
        assert_eq!(vendor_filter(None).unwrap(), None);
        assert_eq!(vendor_filter(Some(&json!(null))).unwrap(), None);
        assert_eq!(vendor_filter(Some(&json!([8, 755]))).unwrap(), Some(vec![8, 755]));
        assert!(vendor_filter(Some(&json!([-1]))).is_err());
        assert!(vendor_filter(Some(&json!({ "ids": [1] }))).is_err());
    }
}
