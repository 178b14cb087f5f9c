//! The window-global `__tcfapi` slot
//!
//! Written only by install/uninstall. Callers clone the current handler out
//! of the slot and call it outside any lock, so a callback may re-enter the
//! command function safely.

use frame_messaging::Window;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::command::{ApiCall, ApiCallback, CommandHandler};
use crate::error::{CmpError, Result};

/// Global name of the command function
pub const API_GLOBAL: &str = "__tcfapi";

struct InstalledApi {
    handler: Arc<dyn CommandHandler>,
}

/// Install `handler` as the window's command function, replacing any other
pub fn install(window: &Window, handler: Arc<dyn CommandHandler>) {
    window.set_global(API_GLOBAL, Arc::new(InstalledApi { handler }));
    debug!(window = %window.name(), "Command function installed");
}

/// Remove the command function; `true` if one was installed
pub fn uninstall(window: &Window) -> bool {
    let removed = window.remove_global(API_GLOBAL).is_some();
    if removed {
        debug!(window = %window.name(), "Command function removed");
    }
    removed
}

/// Remove the command function only if it is `handler`
pub fn uninstall_if(window: &Window, handler: &Arc<dyn CommandHandler>) -> bool {
    match installed(window) {
        Some(current) if same_handler(&current, handler) => uninstall(window),
        _ => false,
    }
}

fn same_handler(a: &Arc<dyn CommandHandler>, b: &Arc<dyn CommandHandler>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

pub fn installed(window: &Window) -> Option<Arc<dyn CommandHandler>> {
    let global = window.global(API_GLOBAL)?;
    let api = global.downcast::<InstalledApi>().ok()?;
    Some(Arc::clone(&api.handler))
}

/// `window.__tcfapi(...)`
pub trait TcfApi {
    fn tcfapi(
        &self,
        command: &str,
        version: u32,
        callback: ApiCallback,
        parameter: Option<Value>,
    ) -> Result<()>;

    fn has_tcfapi(&self) -> bool;
}

impl TcfApi for Window {
    fn tcfapi(
        &self,
        command: &str,
        version: u32,
        callback: ApiCallback,
        parameter: Option<Value>,
    ) -> Result<()> {
        let handler = installed(self).ok_or_else(|| CmpError::NotInstalled {
            window: self.name().to_string(),
        })?;
        handler.handle(ApiCall::new(command, version, callback, parameter));
        Ok(())
    }

    fn has_tcfapi(&self) -> bool {
        installed(self).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::ApiResponse;
    use parking_lot::Mutex;

    struct Echo;

    impl CommandHandler for Echo {
        fn handle(&self, call: ApiCall) {
            call.respond(Some(ApiResponse::Bool(call.command == "ping")), true);
        }
    }

    #[test]
    fn test_call_without_function_fails() {
        let window = Window::top("top");
        let callback: ApiCallback = Arc::new(|_, _| {});
        assert!(matches!(
            window.tcfapi("ping", 2, callback, None),
            Err(CmpError::NotInstalled { .. })
        ));
        assert!(!window.has_tcfapi());
    }

    #[test]
    fn test_install_dispatches_and_uninstall_removes() {
        let window = Window::top("top");
        let handler: Arc<dyn CommandHandler> = Arc::new(Echo);
        install(&window, Arc::clone(&handler));

        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        window
            .tcfapi(
                "ping",
                2,
                Arc::new(move |response: Option<ApiResponse>, success: bool| {
                    *sink.lock() = Some((response, success))
                }),
                None,
            )
            .unwrap();
        assert_eq!(*seen.lock(), Some((Some(ApiResponse::Bool(true)), true)));

        let other: Arc<dyn CommandHandler> = Arc::new(Echo);
        assert!(!uninstall_if(&window, &other));
        assert!(uninstall_if(&window, &handler));
        assert!(!window.has_tcfapi());
        assert!(!uninstall(&window));
    }
}
