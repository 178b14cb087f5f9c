//! Early stub command function
//!
//! Answers `ping` itself and queues everything else until the engine takes
//! over. After hand-off any stale reference to the stub forwards to the
//! engine, so no call is lost.

use cmp_config::protocol::commands;
use frame_messaging::Window;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, trace};

use crate::command::{ApiCall, CommandHandler};
use crate::error::Result;
use crate::locator::{ensure_locator, ensure_relay};
use crate::response::{ApiResponse, PingReturn};
use crate::slot;

enum StubMode {
    Queueing,
    Forwarding(Arc<dyn CommandHandler>),
    /// No vendor list applies; nothing will ever answer
    Abandoned,
}

struct StubQueue {
    mode: StubMode,
    calls: Vec<ApiCall>,
}

enum Route {
    Answer,
    Queue,
    Forward(Arc<dyn CommandHandler>),
    Fail,
}

pub struct CmpStub {
    gdpr_applies: Option<bool>,
    queue: Mutex<StubQueue>,
}

impl CmpStub {
    pub fn new(gdpr_applies: Option<bool>) -> Self {
        Self {
            gdpr_applies,
            queue: Mutex::new(StubQueue {
                mode: StubMode::Queueing,
                calls: Vec::new(),
            }),
        }
    }

    /// Install as the window's command function with locator frame and relay
    pub fn install(window: &Window, gdpr_applies: Option<bool>) -> Result<Arc<Self>> {
        let stub = Arc::new(Self::new(gdpr_applies));
        slot::install(window, Arc::clone(&stub) as Arc<dyn CommandHandler>);
        ensure_locator(window)?;
        ensure_relay(window);
        info!(window = %window.name(), "CMP stub installed");
        Ok(stub)
    }

    pub fn queued_len(&self) -> usize {
        self.queue.lock().calls.len()
    }

    /// Replay queued calls into `handler` in arrival order, then make it the
    /// window's command function; returns how many were replayed
    ///
    /// Calls that reach the stub while the queue drains are queued behind
    /// the older ones. Forwarding starts only once the queue is empty.
    pub fn hand_off(&self, window: &Window, handler: Arc<dyn CommandHandler>) -> usize {
        let mut count = 0;
        loop {
            let batch = {
                let mut queue = self.queue.lock();
                if queue.calls.is_empty() {
                    queue.mode = StubMode::Forwarding(Arc::clone(&handler));
                    break;
                }
                std::mem::take(&mut queue.calls)
            };
            count += batch.len();
            for call in batch {
                handler.handle(call);
            }
        }

        slot::install(window, handler);
        info!(replayed = count, "Stub queue drained into engine");
        count
    }

    /// Remove the command function and fail every queued call
    pub fn abandon(&self, window: &Window) -> usize {
        slot::uninstall(window);
        let queued = {
            let mut queue = self.queue.lock();
            queue.mode = StubMode::Abandoned;
            std::mem::take(&mut queue.calls)
        };

        let count = queued.len();
        for call in &queued {
            call.fail();
        }
        info!(failed = count, "CMP stub abandoned");
        count
    }
}

impl CommandHandler for CmpStub {
    fn handle(&self, call: ApiCall) {
        let route = {
            let queue = self.queue.lock();
            match &queue.mode {
                StubMode::Forwarding(handler) => Route::Forward(Arc::clone(handler)),
                _ if call.command == commands::PING => Route::Answer,
                StubMode::Queueing => Route::Queue,
                StubMode::Abandoned => Route::Fail,
            }
        };

        match route {
            Route::Answer => {
                let ping = PingReturn::stub(self.gdpr_applies);
                call.respond(Some(ApiResponse::Ping(ping)), true);
            }
            Route::Queue => {
                let mut queue = self.queue.lock();
                // Hand-off may have happened between the two locks
                if let StubMode::Forwarding(handler) = &queue.mode {
                    let handler = Arc::clone(handler);
                    drop(queue);
                    handler.handle(call);
                    return;
                }
                trace!(command = %call.command, "Call queued by stub");
                queue.calls.push(call);
            }
            Route::Forward(handler) => handler.handle(call),
            Route::Fail => {
                debug!(command = %call.command, "Call to abandoned stub");
                call.fail();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::ApiCallback;
    use crate::response::LoadStatus;
    use crate::slot::TcfApi;

    type Log = Arc<Mutex<Vec<(String, Option<ApiResponse>, bool)>>>;

    fn logging(log: &Log, tag: &str) -> ApiCallback {
        let log = Arc::clone(log);
        let tag = tag.to_string();
        Arc::new(move |response: Option<ApiResponse>, success: bool| {
            log.lock().push((tag.clone(), response, success))
        })
    }

    struct Recorder(Mutex<Vec<String>>);

    impl CommandHandler for Recorder {
        fn handle(&self, call: ApiCall) {
            self.0.lock().push(call.command.clone());
            call.respond(None, true);
        }
    }

    #[test]
    fn test_ping_answered_synchronously_without_queueing() {
        let top = Window::top("top");
        let stub = CmpStub::install(&top, Some(true)).unwrap();
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        top.tcfapi("ping", 2, logging(&log, "ping"), None).unwrap();

        let entries = log.lock();
        assert_eq!(entries.len(), 1);
        let ping = entries[0].1.as_ref().and_then(ApiResponse::as_ping).unwrap();
        assert_eq!(ping.cmp_status, LoadStatus::NotInstalled);
        assert!(!ping.cmp_loaded);
        assert_eq!(ping.cmp_id, 0);
        assert_eq!(ping.gvl_version, 0);
        assert!(entries[0].2);
        assert_eq!(stub.queued_len(), 0);
    }

    #[test]
    fn test_hand_off_replays_in_arrival_order() {
        let top = Window::top("top");
        let stub = CmpStub::install(&top, Some(true)).unwrap();
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        top.tcfapi("getTCData", 2, logging(&log, "a"), None).unwrap();
        top.tcfapi("addEventListener", 2, logging(&log, "b"), None).unwrap();
        top.tcfapi("getVendorList", 2, logging(&log, "c"), None).unwrap();
        assert!(log.lock().is_empty());
        assert_eq!(stub.queued_len(), 3);

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        assert_eq!(stub.hand_off(&top, recorder.clone()), 3);

        assert_eq!(
            *recorder.0.lock(),
            vec!["getTCData", "addEventListener", "getVendorList"]
        );
        let tags: Vec<String> = log.lock().iter().map(|(tag, _, _)| tag.clone()).collect();
        assert_eq!(tags, vec!["a", "b", "c"]);

        // Stale stub references forward instead of queueing
        stub.handle(ApiCall::new("getTCData", 2, logging(&log, "d"), None));
        assert_eq!(recorder.0.lock().len(), 4);
        assert_eq!(stub.queued_len(), 0);
    }

    #[test]
    fn test_calls_made_while_draining_stay_behind_older_ones() {
        let top = Window::top("top");
        let stub = CmpStub::install(&top, Some(true)).unwrap();
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        // Answering the first queued call issues a new one mid-drain
        let page = top.clone();
        let late_log = Arc::clone(&log);
        let first: ApiCallback = Arc::new(move |_: Option<ApiResponse>, _: bool| {
            page.tcfapi("getInAppTCData", 2, logging(&late_log, "late"), None)
                .unwrap();
        });
        top.tcfapi("getTCData", 2, first, None).unwrap();
        top.tcfapi("getVendorList", 2, logging(&log, "queued"), None).unwrap();

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        assert_eq!(stub.hand_off(&top, recorder.clone()), 3);

        assert_eq!(
            *recorder.0.lock(),
            vec!["getTCData", "getVendorList", "getInAppTCData"]
        );
        let tags: Vec<String> = log.lock().iter().map(|(tag, _, _)| tag.clone()).collect();
        assert_eq!(tags, vec!["queued", "late"]);
        assert_eq!(stub.queued_len(), 0);
    }

    #[test]
    fn test_abandon_fails_queued_calls_and_removes_function() {
        let top = Window::top("top");
        let stub = CmpStub::install(&top, Some(true)).unwrap();
        let log: Log = Arc::new(Mutex::new(Vec::new()));

        top.tcfapi("getTCData", 2, logging(&log, "a"), None).unwrap();
        assert_eq!(stub.abandon(&top), 1);

        assert!(!top.has_tcfapi());
        let entries = log.lock();
        assert_eq!(entries[0], ("a".to_string(), None, false));
    }

    #[test]
    fn test_install_attaches_locator() {
        let top = Window::top("top");
        CmpStub::install(&top, None).unwrap();
        assert!(top.child(cmp_config::LOCATOR_FRAME_NAME).is_some());
    }
}
