//! # gattlink-app
//!
//! Application layer: the GATT client engine and **port definitions** (traits).
//!
//! ## Responsibilities
//! - Define **port traits** that adapters implement or consume:
//!   - `Transport`: platform BLE capability (scan, connect, discover, read,
//!     write, descriptor write, signal strength), completion-callback driven
//!   - `EventSink`: host-owned notification surface
//! - Provide the **engine**: scan controller, session manager and per-peripheral
//!   GATT session state machines, driven from a single dispatcher task so that
//!   every event reaches the sink in one total order
//! - Provide **in-process infrastructure** (broadcast event bus) that doesn't need IO
//!
//! ## Dependency rule
//! Depends on `gattlink-domain` only (plus `tokio` for channels and the dispatcher task).
//! Never imports adapter crates. Adapters depend on *this* crate, not the reverse.

pub mod config;
pub mod engine;
pub mod event_bus;
pub mod mailbox;
pub mod ports;
pub mod scan_controller;
pub mod session;
pub mod session_manager;
