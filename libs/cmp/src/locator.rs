//! Locator frame, message relay and the frame-side client
//!
//! The CMP window carries a hidden child frame named `__tcfapiLocator`.
//! Code in a nested frame walks up its ancestors until it finds a window
//! with that child, then talks to it by `post_message`.

use cmp_config::protocol::LOCATOR_FRAME_NAME;
use dashmap::DashMap;
use frame_messaging::{ListenerId, MessageEvent, Window};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::command::{ApiCallback, Command};
use crate::error::{CmpError, Result};
use crate::messages::{self, TcfApiCall, TcfApiReturn};
use crate::response::ApiResponse;
use crate::slot::TcfApi;

/// Global marking that a relay is already listening on a window
const RELAY_GLOBAL: &str = "__tcfapiRelay";

/// Attach the locator frame unless one is already present
pub fn ensure_locator(window: &Window) -> Result<Window> {
    if let Some(existing) = window.child(LOCATOR_FRAME_NAME) {
        return Ok(existing);
    }
    let frame = window.create_child(LOCATOR_FRAME_NAME)?;
    debug!(window = %window.name(), "Locator frame attached");
    Ok(frame)
}

/// Answer `__tcfapiCall` messages posted to `window` through its command
/// function; installs at most one relay per window
pub fn ensure_relay(window: &Window) -> ListenerId {
    if let Some(existing) = window
        .global(RELAY_GLOBAL)
        .and_then(|global| global.downcast_ref::<ListenerId>().copied())
    {
        return existing;
    }

    let weak = window.downgrade();
    let id = window.add_message_listener(Arc::new(move |event: &MessageEvent| {
        if let Some(window) = weak.upgrade() {
            relay_call(&window, event);
        }
    }));
    window.set_global(RELAY_GLOBAL, Arc::new(id));
    debug!(window = %window.name(), "Message relay listening");
    id
}

fn relay_call(window: &Window, event: &MessageEvent) {
    let Some((call, encoding)) = messages::parse_call(&event.data) else {
        return;
    };
    trace!(command = %call.command, call_id = %call.call_id, "Relaying cross-frame call");

    let reply_to = event.source.downgrade();
    let from = window.downgrade();
    let call_id = call.call_id.clone();
    let callback: ApiCallback = Arc::new(move |response: Option<ApiResponse>, success: bool| {
        let (Some(target), Some(from)) = (reply_to.upgrade(), from.upgrade()) else {
            return;
        };
        let return_value = match response {
            Some(response) => serde_json::to_value(&response).unwrap_or(Value::Null),
            None => Value::Null,
        };
        let ret = TcfApiReturn {
            return_value,
            success,
            call_id: call_id.clone(),
        };
        if let Err(e) = target.post_message(messages::return_message(&ret, encoding), &from) {
            warn!(error = %e, "Failed to post __tcfapiReturn");
        }
    });

    if let Err(e) = window.tcfapi(&call.command, call.version, callback.clone(), call.parameter) {
        debug!(error = %e, "Cross-frame call with no command function");
        callback(None, false);
    }
}

/// Nearest window, starting at `frame` itself, that hosts a locator child
pub fn find_cmp_window(frame: &Window) -> Option<Window> {
    std::iter::once(frame.clone())
        .chain(frame.ancestors())
        .find(|candidate| candidate.child(LOCATOR_FRAME_NAME).is_some())
}

/// Callback for a cross-frame call: raw `returnValue` plus success flag
pub type RemoteCallback = Arc<dyn Fn(Value, bool) + Send + Sync>;

struct PendingCall {
    callback: RemoteCallback,
    /// Listener registrations keep receiving events
    persistent: bool,
}

/// Frame-side `__tcfapi` proxy
pub struct RemoteCmpClient {
    frame: Window,
    cmp: Window,
    pending: Arc<DashMap<String, PendingCall>>,
    listener: ListenerId,
}

impl RemoteCmpClient {
    /// Locate the CMP from `frame` and start routing replies
    pub fn connect(frame: &Window) -> Result<Self> {
        let cmp = find_cmp_window(frame).ok_or_else(|| CmpError::CmpNotFound {
            window: frame.name().to_string(),
        })?;

        let pending: Arc<DashMap<String, PendingCall>> = Arc::new(DashMap::new());
        let routes = Arc::clone(&pending);
        let listener = frame.add_message_listener(Arc::new(move |event: &MessageEvent| {
            let Some(ret) = messages::parse_return(&event.data) else {
                return;
            };
            let Some(call_id) = ret.call_id.as_str() else {
                return;
            };
            let (callback, persistent) = match routes.get(call_id) {
                Some(entry) => (Arc::clone(&entry.callback), entry.persistent),
                None => return,
            };
            if !persistent {
                routes.remove(call_id);
            }
            callback(ret.return_value, ret.success);
        }));

        debug!(frame = %frame.name(), cmp = %cmp.name(), "Connected to CMP");
        Ok(Self {
            frame: frame.clone(),
            cmp,
            pending,
            listener,
        })
    }

    pub fn cmp_window(&self) -> &Window {
        &self.cmp
    }

    /// Post a call to the CMP; returns its correlation ID
    pub fn call(
        &self,
        command: &str,
        version: u32,
        callback: RemoteCallback,
        parameter: Option<Value>,
    ) -> Result<String> {
        let call_id = Uuid::new_v4().to_string();
        let persistent = command == Command::AddEventListener.as_str();
        self.pending.insert(
            call_id.clone(),
            PendingCall {
                callback,
                persistent,
            },
        );

        let call = TcfApiCall {
            command: command.to_string(),
            version,
            parameter,
            call_id: Value::String(call_id.clone()),
        };
        if let Err(e) = self
            .cmp
            .post_message(messages::call_message(&call, messages::Encoding::Object), &self.frame)
        {
            self.pending.remove(&call_id);
            return Err(e.into());
        }
        Ok(call_id)
    }

    /// Stop routing events for a listener registration
    pub fn forget(&self, call_id: &str) -> bool {
        self.pending.remove(call_id).is_some()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Drop for RemoteCmpClient {
    fn drop(&mut self) {
        self.frame.remove_message_listener(self.listener);
    }
}
