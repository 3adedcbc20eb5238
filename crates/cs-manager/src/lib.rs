//! CharsetSwitch Rule Manager
//!
//! This crate keeps a browser's declarative header-rewrite rules in line with
//! the user's per-site charset choices. The engine holding the rules is
//! external and lossy: it forgets dynamic rules on updates and can contain
//! rules from other writers, so everything here is built around reconciling
//! durable intent with whatever the engine currently holds.
//!
//! # Architecture
//!
//! Intent (hostname → charset) lives in a [`store::SettingsStore`] and is the
//! source of truth. Effect (installed rules) lives in a [`engine::RuleEngine`].
//! The [`manager::RuleManager`] owns the mapping between the two plus the
//! identifier allocator, and every mutation goes through it.
//!
//! # Modules
//!
//! - `engine`: rule engine contract and in-memory implementation
//! - `store`: settings store contract, memory and JSON-file implementations
//! - `manager`: the rule manager itself
//! - `dispatch`: gesture/message validation and routing
//! - `lifecycle`: startup hooks and recovery

pub mod dispatch;
pub mod engine;
pub mod lifecycle;
pub mod manager;
pub mod store;

// Re-export commonly used types
pub use dispatch::{ApplyOutcome, Dispatcher, PageRequest, PageResponse, ResetOutcome};
pub use engine::{EngineError, MemoryRuleEngine, RuleEngine};
pub use lifecycle::{handle_startup, on_first_install, on_process_start, on_update, StartupEvent};
pub use manager::{
    ActiveRuleEntry, ManagerError, RestoreStats, RuleManager, MAX_INSTALL_ATTEMPTS,
};
pub use store::{
    JsonFileStore, MemorySettingsStore, SettingsStore, StoreError, ACTIVE_RULES_KEY, INTENT_KEY,
};
