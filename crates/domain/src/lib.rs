//! # gattlink-domain
//!
//! Pure domain model for the gattlink BLE GATT client engine.
//!
//! ## Responsibilities
//! - Foundational types: typed identifiers, error taxonomy, timestamps
//! - Define **Peripherals** (discovered devices) and the **Device Registry**
//!   that ranks them by signal strength
//! - Define the **GATT tree** (services, characteristics, descriptors) and
//!   connection states
//! - Define the **Value Codec**: decode raw buffers into typed values and
//!   encode typed writes back into bytes
//! - Define **Frame layouts** (bitmask-driven composite sensor payloads)
//! - Define **Events** delivered to the host
//!
//! ## Dependency rule
//! This crate has **no internal dependencies**.
//! It must never import anything from `app`, adapters, or external IO crates.
//! All IO boundaries are expressed as traits in the `app` crate (ports).

pub mod error;
pub mod id;

pub mod codec;
pub mod event;
pub mod frame;
pub mod gatt;
pub mod peripheral;
pub mod registry;
