//! Seam to the host application's consent store
//!
//! The host owns the five category switches, knows the visitor's
//! jurisdiction and any browser-level privacy signal, and decides whether
//! its banner is on screen. The reconciler reads and writes through here.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tcf_types::Categories;

use crate::jurisdiction::ConsentModel;

pub trait HostStore: Send + Sync {
    /// Current categories; `None` until the visitor has made a choice
    fn categories(&self) -> Option<Categories>;

    fn jurisdiction(&self) -> Option<String>;

    /// Enhanced privacy signal such as Global Privacy Control
    fn privacy_signal(&self) -> bool;

    fn set_categories(&self, categories: Categories);

    fn set_model(&self, model: Option<ConsentModel>);

    fn set_prompt_visible(&self, visible: bool);
}

/// Snapshot of everything the host store holds
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostState {
    pub categories: Option<Categories>,
    pub jurisdiction: Option<String>,
    pub privacy_signal: bool,
    pub model: Option<ConsentModel>,
    pub prompt_visible: bool,
}

#[derive(Debug, Default)]
pub struct InMemoryHostStore {
    state: RwLock<HostState>,
}

impl InMemoryHostStore {
    pub fn new(jurisdiction: Option<&str>, privacy_signal: bool) -> Self {
        Self {
            state: RwLock::new(HostState {
                jurisdiction: jurisdiction.map(str::to_string),
                privacy_signal,
                ..HostState::default()
            }),
        }
    }

    /// Visitor who already chose categories on an earlier visit
    pub fn with_categories(self, categories: Categories) -> Self {
        self.state.write().categories = Some(categories);
        self
    }

    pub fn snapshot(&self) -> HostState {
        self.state.read().clone()
    }
}

impl HostStore for InMemoryHostStore {
    fn categories(&self) -> Option<Categories> {
        self.state.read().categories
    }

    fn jurisdiction(&self) -> Option<String> {
        self.state.read().jurisdiction.clone()
    }

    fn privacy_signal(&self) -> bool {
        self.state.read().privacy_signal
    }

    fn set_categories(&self, categories: Categories) {
        self.state.write().categories = Some(categories);
    }

    fn set_model(&self, model: Option<ConsentModel>) {
        self.state.write().model = model;
    }

    fn set_prompt_visible(&self, visible: bool) {
        self.state.write().prompt_visible = visible;
    }
}
