//! # Frame Messaging - Window Tree and postMessage Delivery
//!
//! ## Purpose
//!
//! Models the browsing context the consent engine lives in:
//! - Named frames arranged in a parent/child tree
//! - Window-global slots (where `__tcfapi` is installed)
//! - Asynchronous `post_message` with per-window ordered delivery
//!
//! ## Architecture Role
//!
//! ```text
//! ad frame ──post_message──▶ [Window mailbox] ──▶ message listeners
//!     ▲                                               │
//!     └──────────────── post_message (reply) ◀────────┘
//! ```
//!
//! Delivery runs on a tokio task per window, started on first use.

pub mod error;
pub mod window;

pub use error::{MessagingError, Result};
pub use window::{
    Global, ListenerId, MessageEvent, MessageListener, WeakWindow, Window, WindowId,
};
