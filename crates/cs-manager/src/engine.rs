//! Declarative rule engine boundary
//!
//! The platform engine is authoritative for installed rules at runtime but
//! loses them on lifecycle events outside this process's control (worker
//! restart, extension update). [`RuleEngine`] is the full surface the
//! manager needs; [`MemoryRuleEngine`] implements it for tests and offline
//! tooling with the same duplicate-identifier semantics as the real one.

use std::collections::BTreeMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use thiserror::Error;

use cs_core::EngineRule;

/// Errors for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// An identifier in the batch is already installed.
    #[error("rule id {0} is already installed")]
    DuplicateId(u32),

    /// The engine refused the rule payload.
    #[error("rule rejected: {reason}")]
    Rejected { reason: String },

    /// The engine could not be reached or failed internally.
    #[error("engine unavailable: {0}")]
    Unavailable(String),
}

impl EngineError {
    /// Whether retrying with a fresh identifier could succeed.
    pub fn is_duplicate_id(&self) -> bool {
        matches!(self, Self::DuplicateId(_))
    }
}

/// Host-platform mechanism for installing response-header rewrite rules
/// addressed by integer identifier.
#[async_trait]
pub trait RuleEngine: Send + Sync {
    /// All rules currently installed, whoever created them.
    async fn list_rules(&self) -> Result<Vec<EngineRule>, EngineError>;

    /// Install a batch of rules.
    ///
    /// # Errors
    /// Fails with [`EngineError::DuplicateId`] without installing anything
    /// if any identifier in the batch is already occupied.
    async fn add_rules(&self, rules: Vec<EngineRule>) -> Result<(), EngineError>;

    /// Remove rules by identifier. Unknown identifiers are ignored.
    async fn remove_rules(&self, ids: Vec<u32>) -> Result<(), EngineError>;
}

#[async_trait]
impl<E: RuleEngine + ?Sized> RuleEngine for std::sync::Arc<E> {
    async fn list_rules(&self) -> Result<Vec<EngineRule>, EngineError> {
        (**self).list_rules().await
    }

    async fn add_rules(&self, rules: Vec<EngineRule>) -> Result<(), EngineError> {
        (**self).add_rules(rules).await
    }

    async fn remove_rules(&self, ids: Vec<u32>) -> Result<(), EngineError> {
        (**self).remove_rules(ids).await
    }
}

// =============================================================================
// MemoryRuleEngine
// =============================================================================

#[derive(Default)]
struct EngineState {
    rules: BTreeMap<u32, EngineRule>,
    /// Fault hook: report this many upcoming candidate ids as occupied.
    duplicate_budget: u32,
    /// Fault hook: fail this many upcoming calls outright.
    unavailable_budget: u32,
}

/// In-memory rule engine.
///
/// Keeps the platform's contract: `add_rules` is all-or-nothing and rejects
/// duplicate identifiers. The extra knobs simulate conditions the real
/// engine produces out-of-band: state loss on restart, foreign rules from
/// other writers, and transient failures.
#[derive(Default)]
pub struct MemoryRuleEngine {
    inner: Mutex<EngineState>,
}

impl MemoryRuleEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wipe installed rules without telling anyone, the way a worker
    /// restart does.
    pub fn clear_out_of_band(&self) {
        self.inner.lock().rules.clear();
    }

    /// Plant a rule as if another writer installed it.
    pub fn seed_rule(&self, rule: EngineRule) {
        self.inner.lock().rules.insert(rule.id, rule);
    }

    /// Report the next `n` added ids as already occupied.
    pub fn occupy_next_ids(&self, n: u32) {
        self.inner.lock().duplicate_budget = n;
    }

    /// Fail the next `n` engine calls with [`EngineError::Unavailable`].
    pub fn fail_next_calls(&self, n: u32) {
        self.inner.lock().unavailable_budget = n;
    }

    pub fn installed_count(&self) -> usize {
        self.inner.lock().rules.len()
    }
}

#[async_trait]
impl RuleEngine for MemoryRuleEngine {
    async fn list_rules(&self) -> Result<Vec<EngineRule>, EngineError> {
        let mut state = self.inner.lock();
        if state.unavailable_budget > 0 {
            state.unavailable_budget -= 1;
            return Err(EngineError::Unavailable("injected fault".to_string()));
        }
        Ok(state.rules.values().cloned().collect())
    }

    async fn add_rules(&self, rules: Vec<EngineRule>) -> Result<(), EngineError> {
        let mut state = self.inner.lock();
        if state.unavailable_budget > 0 {
            state.unavailable_budget -= 1;
            return Err(EngineError::Unavailable("injected fault".to_string()));
        }
        for rule in &rules {
            if rule.condition.request_domains.is_empty() {
                return Err(EngineError::Rejected {
                    reason: "rule matches no domain".to_string(),
                });
            }
            if state.rules.contains_key(&rule.id) {
                return Err(EngineError::DuplicateId(rule.id));
            }
        }
        if state.duplicate_budget > 0 {
            state.duplicate_budget -= 1;
            if let Some(rule) = rules.first() {
                return Err(EngineError::DuplicateId(rule.id));
            }
        }
        for rule in rules {
            state.rules.insert(rule.id, rule);
        }
        Ok(())
    }

    async fn remove_rules(&self, ids: Vec<u32>) -> Result<(), EngineError> {
        let mut state = self.inner.lock();
        if state.unavailable_budget > 0 {
            state.unavailable_budget -= 1;
            return Err(EngineError::Unavailable("injected fault".to_string()));
        }
        for id in ids {
            state.rules.remove(&id);
        }
        Ok(())
    }
}
