//! # CMP API - The `__tcfapi` Command Function
//!
//! ## Purpose
//!
//! Everything third-party code talks to:
//! - **Stub**: installed first, answers `ping`, queues the rest
//! - **Locator + relay**: lets nested frames reach the command function
//! - **Engine**: full command handler with listeners and lifecycle events
//! - **LazyCodec**: TC string codec loaded on first use
//!
//! ## Architecture Role
//!
//! ```text
//!  nested frame ──__tcfapiCall──▶ relay ─┐
//!                                         ▼
//!  page script ──────────────▶ __tcfapi slot ──▶ CmpStub ──hand_off──▶ CmpEngine
//!                                                                         │
//!                                      services/consent ──update_consent──┘
//! ```

pub mod command;
pub mod engine;
pub mod error;
pub mod lazy;
pub mod locator;
pub mod messages;
pub mod response;
pub mod slot;
pub mod stub;

pub use command::{is_supported_version, ApiCall, ApiCallback, Command, CommandHandler};
pub use engine::{CmpEngine, EngineSettings};
pub use error::{CmpError, Result};
pub use lazy::{unavailable_factory, CodecFactory, LazyCodec};
pub use locator::{ensure_locator, ensure_relay, find_cmp_window, RemoteCallback, RemoteCmpClient};
pub use response::{
    ApiResponse, ConsentPair, DisplayStatus, EventStatus, LoadStatus, PingReturn,
    PublisherSection, TcData,
};
pub use slot::{install, installed, uninstall, uninstall_if, TcfApi, API_GLOBAL};
pub use stub::CmpStub;
