//! Window tree and mailbox delivery
//!
//! Each window owns an unbounded mailbox drained by a single task, so
//! messages posted to one window reach its listeners in posting order.
//! Nothing is promised about ordering across different windows.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace};

use crate::error::{MessagingError, Result};

/// Callback invoked for every message delivered to a window
pub type MessageListener = Arc<dyn Fn(&MessageEvent) + Send + Sync>;

/// Value stored under a window-global name
pub type Global = Arc<dyn Any + Send + Sync>;

static NEXT_WINDOW_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

/// A delivered message
#[derive(Clone)]
pub struct MessageEvent {
    pub data: Value,
    /// Window that posted the message; replies go here
    pub source: Window,
}

impl fmt::Debug for MessageEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageEvent")
            .field("data", &self.data)
            .field("source", &self.source.name())
            .finish()
    }
}

enum Envelope {
    Message(MessageEvent),
    Settle(oneshot::Sender<()>),
}

struct WindowInner {
    id: WindowId,
    name: String,
    parent: Option<Weak<WindowInner>>,
    children: RwLock<Vec<Window>>,
    listeners: RwLock<Vec<(ListenerId, MessageListener)>>,
    globals: DashMap<String, Global>,
    sender: mpsc::UnboundedSender<Envelope>,
    /// Taken by the first post, when the delivery task starts
    receiver: Mutex<Option<mpsc::UnboundedReceiver<Envelope>>>,
    closed: AtomicBool,
    next_listener: AtomicU64,
}

/// Cheap handle to a window; clones refer to the same frame
#[derive(Clone)]
pub struct Window {
    inner: Arc<WindowInner>,
}

impl fmt::Debug for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Window")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .finish()
    }
}

/// Non-owning window handle for listeners that must not keep their window alive
#[derive(Clone)]
pub struct WeakWindow {
    inner: Weak<WindowInner>,
}

impl WeakWindow {
    pub fn upgrade(&self) -> Option<Window> {
        self.inner.upgrade().map(|inner| Window { inner })
    }
}

impl PartialEq for Window {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Window {}

impl Window {
    /// Create a top-level window
    pub fn top(name: impl Into<String>) -> Self {
        Self::with_parent(name.into(), None)
    }

    fn with_parent(name: String, parent: Option<Weak<WindowInner>>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(WindowInner {
                id: WindowId(NEXT_WINDOW_ID.fetch_add(1, Ordering::Relaxed)),
                name,
                parent,
                children: RwLock::new(Vec::new()),
                listeners: RwLock::new(Vec::new()),
                globals: DashMap::new(),
                sender,
                receiver: Mutex::new(Some(receiver)),
                closed: AtomicBool::new(false),
                next_listener: AtomicU64::new(1),
            }),
        }
    }

    /// Attach a child frame; non-empty names must be unique among siblings
    pub fn create_child(&self, name: impl Into<String>) -> Result<Window> {
        let name = name.into();
        let mut children = self.inner.children.write();
        if !name.is_empty() && children.iter().any(|c| c.name() == name) {
            return Err(MessagingError::DuplicateFrame {
                parent: self.inner.name.clone(),
                name,
            });
        }
        let child = Window::with_parent(name, Some(Arc::downgrade(&self.inner)));
        children.push(child.clone());
        debug!(parent = %self.inner.name, child = %child.name(), "Frame attached");
        Ok(child)
    }

    /// Detach and close a child frame
    pub fn remove_child(&self, name: &str) -> Option<Window> {
        let mut children = self.inner.children.write();
        let index = children.iter().position(|c| c.name() == name)?;
        let child = children.remove(index);
        child.close();
        Some(child)
    }

    pub fn downgrade(&self) -> WeakWindow {
        WeakWindow {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn id(&self) -> WindowId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn parent(&self) -> Option<Window> {
        self.inner
            .parent
            .as_ref()
            .and_then(Weak::upgrade)
            .map(|inner| Window { inner })
    }

    /// Parent first, top-level window last
    pub fn ancestors(&self) -> Vec<Window> {
        let mut chain = Vec::new();
        let mut current = self.parent();
        while let Some(window) = current {
            current = window.parent();
            chain.push(window);
        }
        chain
    }

    pub fn children(&self) -> Vec<Window> {
        self.inner.children.read().clone()
    }

    /// Direct child frame by name
    pub fn child(&self, name: &str) -> Option<Window> {
        self.inner
            .children
            .read()
            .iter()
            .find(|c| c.name() == name)
            .cloned()
    }

    pub fn add_message_listener(&self, listener: MessageListener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        self.inner.listeners.write().push((id, listener));
        id
    }

    pub fn remove_message_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }

    /// Queue `data` for delivery to this window's listeners
    ///
    /// Returns once queued; listeners run later on the delivery task.
    pub fn post_message(&self, data: Value, source: &Window) -> Result<()> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        self.ensure_delivery()?;
        trace!(target_window = %self.inner.name, source = %source.name(), "Message posted");
        self.inner
            .sender
            .send(Envelope::Message(MessageEvent {
                data,
                source: source.clone(),
            }))
            .map_err(|_| self.closed_error())
    }

    /// Wait until every message posted so far has been delivered
    pub async fn settle(&self) -> Result<()> {
        self.ensure_delivery()?;
        let (done, wait) = oneshot::channel();
        self.inner
            .sender
            .send(Envelope::Settle(done))
            .map_err(|_| self.closed_error())?;
        wait.await.map_err(|_| self.closed_error())
    }

    pub fn set_global(&self, name: impl Into<String>, value: Global) {
        self.inner.globals.insert(name.into(), value);
    }

    pub fn global(&self, name: &str) -> Option<Global> {
        self.inner.globals.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn remove_global(&self, name: &str) -> Option<Global> {
        self.inner.globals.remove(name).map(|(_, value)| value)
    }

    /// Stop accepting messages and drop all listeners
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.listeners.write().clear();
        debug!(window = %self.inner.name, "Window closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn closed_error(&self) -> MessagingError {
        MessagingError::Closed {
            window: self.inner.name.clone(),
        }
    }

    fn ensure_delivery(&self) -> Result<()> {
        let mut receiver = self.inner.receiver.lock();
        if receiver.is_none() {
            return Ok(());
        }
        let handle =
            tokio::runtime::Handle::try_current().map_err(|_| MessagingError::NoRuntime {
                window: self.inner.name.clone(),
            })?;
        if let Some(rx) = receiver.take() {
            handle.spawn(deliver(Arc::downgrade(&self.inner), rx));
        }
        Ok(())
    }
}

async fn deliver(window: Weak<WindowInner>, mut mailbox: mpsc::UnboundedReceiver<Envelope>) {
    while let Some(envelope) = mailbox.recv().await {
        match envelope {
            Envelope::Settle(done) => {
                let _ = done.send(());
            }
            Envelope::Message(event) => {
                let Some(inner) = window.upgrade() else {
                    break;
                };
                let listeners: Vec<MessageListener> = inner
                    .listeners
                    .read()
                    .iter()
                    .map(|(_, listener)| Arc::clone(listener))
                    .collect();
                drop(inner);

                for listener in listeners {
                    listener(&event);
                }
            }
        }
    }
}
