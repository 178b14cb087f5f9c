//! # Consent Service
//!
//! ## Purpose
//!
//! Glue between the host application and the TCF engine:
//! - **Jurisdiction**: which consent model applies to a visitor
//! - **Storage**: where the encoded consent string lives between visits
//! - **Host**: the seam to the host's category-level consent store
//! - **Reconcile**: start-up ordering and the save path on user action
//!
//! ## Architecture Role
//!
//! ```text
//! HostStore ──jurisdiction──▶ resolve_model ──protocol──▶ CmpStub ──▶ CmpEngine
//!     ▲                                                      ▲            │
//!     └──────── categories ◀── ConsentReconciler ──vendor list┘            │
//!                                    │                                     │
//!                              ConsentStorage ◀──── save ───update_consent─┘
//! ```

pub mod host;
pub mod jurisdiction;
pub mod reconcile;
pub mod storage;

pub use host::{HostState, HostStore, InMemoryHostStore};
pub use jurisdiction::{
    default_categories, known_jurisdictions, requires_prompt, resolve_model, ConsentModel,
};
pub use reconcile::{
    build_consent_state, ConsentReconciler, InitOutcome, Prefetch, ReconcileError,
    ReconcileResult, UserAction,
};
pub use storage::{
    ConsentStorage, CookieStorage, LocalStorage, MemoryStorage, MirroredStorage, StorageError,
    StorageResult, StoredCookie,
};
