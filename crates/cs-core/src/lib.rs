//! CharsetSwitch Core Library
//!
//! This crate provides the engine-independent core for the CharsetSwitch
//! encoding override: the supported charset labels, hostname keys, the
//! declarative rule shape handed to the platform rule engine, and the
//! identifier allocator.
//!
//! # Architecture
//!
//! Everything here is synchronous and platform-free. The stateful manager
//! that talks to the rule engine and the settings store lives in
//! `cs-manager`; the wasm bridge for extension scripts lives in `cs-wasm`.
//!
//! # Modules
//!
//! - `charset`: the fixed set of supported encoding labels
//! - `hostname`: hostname keys and host extraction from URLs
//! - `rule`: rule entities and the engine-facing wire shape
//! - `alloc`: identifier allocation for engine rules

pub mod alloc;
pub mod charset;
pub mod hostname;
pub mod rule;

// Re-export commonly used types
pub use alloc::{IdAllocator, MAX_INSTALL_ATTEMPTS};
pub use charset::{Charset, UnknownLabel, SUPPORTED_CHARSETS};
pub use hostname::{extract_host, Hostname, HostnameError};
pub use rule::{EngineRule, ResourceTypes, Rule, CONTENT_TYPE_HEADER, RULE_PRIORITY};
