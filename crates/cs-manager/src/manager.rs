//! The rule manager.
//!
//! Owns the hostname → rule-id map, allocates identifiers, and keeps the
//! engine's installed rules (the effect) consistent with the store's
//! hostname → charset map (the intent). All mutation funnels through here so
//! the per-hostname ordering guarantees hold.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use cs_core::{Charset, EngineRule, Hostname, IdAllocator, Rule};

use crate::engine::{EngineError, RuleEngine};
use crate::store::{SettingsStore, StoreError, ACTIVE_RULES_KEY, INTENT_KEY};

pub use cs_core::MAX_INSTALL_ATTEMPTS;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("rule engine: {0}")]
    Engine(#[from] EngineError),

    #[error("settings store: {0}")]
    Store(#[from] StoreError),

    #[error("gave up installing rule for {hostname} after {attempts} id collisions")]
    IdRetriesExhausted { hostname: Hostname, attempts: u32 },
}

/// Counters reported by a recovery pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RestoreStats {
    pub restored: usize,
    pub failed: usize,
}

/// One persisted (hostname, rule id) pair. Snapshot of the engine state,
/// written for diagnostics only; recovery rebuilds from intent instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveRuleEntry {
    pub hostname: Hostname,
    pub rule_id: u32,
}

#[derive(Default)]
struct ManagerState {
    allocator: IdAllocator,
    active: BTreeMap<Hostname, u32>,
}

/// Coordinates the engine, the store, and the in-memory rule map.
///
/// Locking order is lifecycle gate, then per-hostname lock, then persist
/// lock. The state mutex is sync and never held across an await.
pub struct RuleManager<E, S> {
    engine: E,
    store: S,
    state: Mutex<ManagerState>,
    host_locks: Mutex<HashMap<Hostname, Arc<AsyncMutex<()>>>>,
    lifecycle_gate: RwLock<()>,
    persist_lock: AsyncMutex<()>,
}

impl<E: RuleEngine, S: SettingsStore> RuleManager<E, S> {
    pub fn new(engine: E, store: S) -> Self {
        Self {
            engine,
            store,
            state: Mutex::new(ManagerState::default()),
            host_locks: Mutex::new(HashMap::new()),
            lifecycle_gate: RwLock::new(()),
            persist_lock: AsyncMutex::new(()),
        }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Clears every rule out of the engine and resets the in-memory map and
    /// allocator. Persisted intent is untouched.
    pub async fn initialize(&self) -> Result<(), ManagerError> {
        let _gate = self.lifecycle_gate.write().await;
        self.initialize_locked().await
    }

    /// Rebuilds engine rules from persisted intent: wipes the engine, then
    /// reinstalls one rule per saved hostname with fresh identifiers.
    /// Failures on individual hostnames are logged and counted, not fatal.
    pub async fn restore_saved_rules(&self) -> Result<RestoreStats, ManagerError> {
        let _gate = self.lifecycle_gate.write().await;
        self.initialize_locked().await?;

        let intent = self.read_intent().await?;
        let mut stats = RestoreStats::default();
        for (hostname, charset) in intent {
            match self.install_rule(&hostname, charset).await {
                Ok(_) => stats.restored += 1,
                Err(err) => {
                    log::warn!("failed to restore override for {hostname}: {err}");
                    stats.failed += 1;
                }
            }
        }

        self.persist_active_snapshot().await;
        log::info!(
            "restore complete: {} reinstalled, {} failed",
            stats.restored,
            stats.failed
        );
        Ok(stats)
    }

    // ========================================================================
    // Per-hostname operations
    // ========================================================================

    /// Installs a charset override for `hostname`, replacing any existing
    /// rule, and persists the intent. Returns the installed rule id.
    pub async fn create_or_replace_rule(
        &self,
        hostname: &Hostname,
        charset: Charset,
    ) -> Result<u32, ManagerError> {
        let _gate = self.lifecycle_gate.read().await;
        let host_lock = self.host_lock(hostname);
        let _host = host_lock.lock().await;

        let rule_id = self.install_rule(hostname, charset).await?;
        self.write_intent_entry(hostname, Some(charset)).await?;
        log::debug!("installed rule {rule_id} for {hostname} ({charset})");
        Ok(rule_id)
    }

    /// Removes the override for `hostname` from the engine, the in-memory
    /// map, and the persisted intent. Returns false if none was active.
    pub async fn remove_rule(&self, hostname: &Hostname) -> Result<bool, ManagerError> {
        let _gate = self.lifecycle_gate.read().await;
        let host_lock = self.host_lock(hostname);
        let _host = host_lock.lock().await;

        let Some(rule_id) = self.active_id(hostname) else {
            return Ok(false);
        };

        self.engine.remove_rules(vec![rule_id]).await?;
        {
            let mut state = self.state.lock();
            state.allocator.release(rule_id);
            state.active.remove(hostname);
        }
        self.write_intent_entry(hostname, None).await?;
        log::debug!("removed rule {rule_id} for {hostname}");
        Ok(true)
    }

    /// Repairs a hostname whose persisted intent has no installed rule,
    /// typically after an engine wipe the manager did not see. Returns true
    /// if a rule was installed.
    pub async fn reconcile_hostname(&self, hostname: &Hostname) -> Result<bool, ManagerError> {
        let _gate = self.lifecycle_gate.read().await;
        let host_lock = self.host_lock(hostname);
        let _host = host_lock.lock().await;

        if self.active_id(hostname).is_some() {
            return Ok(false);
        }
        let Some(charset) = self.read_intent().await?.remove(hostname) else {
            return Ok(false);
        };

        let rule_id = self.install_rule(hostname, charset).await?;
        self.persist_active_snapshot().await;
        log::debug!("reconciled {hostname}: reinstalled rule {rule_id} ({charset})");
        Ok(true)
    }

    /// Reads the persisted intent for one hostname. The store, not the
    /// in-memory map, answers this.
    pub async fn get_charset_for_hostname(
        &self,
        hostname: &Hostname,
    ) -> Result<Option<Charset>, ManagerError> {
        Ok(self.read_intent().await?.remove(hostname))
    }

    // ========================================================================
    // Introspection
    // ========================================================================

    pub fn active_rule_id(&self, hostname: &Hostname) -> Option<u32> {
        self.active_id(hostname)
    }

    pub fn active_rules(&self) -> Vec<ActiveRuleEntry> {
        let state = self.state.lock();
        state
            .active
            .iter()
            .map(|(hostname, &rule_id)| ActiveRuleEntry {
                hostname: hostname.clone(),
                rule_id,
            })
            .collect()
    }

    pub fn active_rule_count(&self) -> usize {
        self.state.lock().active.len()
    }

    /// Full entity view: every active rule joined with its persisted charset.
    /// An active id whose intent entry is missing (a store write failed
    /// mid-operation) is left out.
    pub async fn tracked_rules(&self) -> Result<Vec<Rule>, ManagerError> {
        let mut intent = self.read_intent().await?;
        let mut rules = Vec::new();
        for entry in self.active_rules() {
            let Some(charset) = intent.remove(&entry.hostname) else {
                continue;
            };
            rules.push(Rule {
                hostname: entry.hostname,
                charset,
                rule_id: entry.rule_id,
            });
        }
        Ok(rules)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Callers hold the write gate.
    async fn initialize_locked(&self) -> Result<(), ManagerError> {
        let installed = self.engine.list_rules().await?;
        if !installed.is_empty() {
            let ids: Vec<u32> = installed.iter().map(|rule| rule.id).collect();
            log::info!("clearing {} rule(s) left in the engine", ids.len());
            self.engine.remove_rules(ids).await?;
        }

        {
            let mut state = self.state.lock();
            state.allocator.reset();
            state.active.clear();
        }
        self.persist_active_snapshot().await;
        Ok(())
    }

    /// Retires any existing rule for the hostname, then installs a fresh one,
    /// retrying with new identifiers when the engine reports the id taken.
    /// Collided ids stay marked in the allocator; they belong to rules some
    /// other writer owns.
    async fn install_rule(
        &self,
        hostname: &Hostname,
        charset: Charset,
    ) -> Result<u32, ManagerError> {
        if let Some(old_id) = self.active_id(hostname) {
            self.engine.remove_rules(vec![old_id]).await?;
            let mut state = self.state.lock();
            state.allocator.release(old_id);
            state.active.remove(hostname);
        }

        for _ in 0..MAX_INSTALL_ATTEMPTS {
            let rule_id = self.state.lock().allocator.allocate();
            let rule = EngineRule::charset_override(rule_id, hostname, charset);
            match self.engine.add_rules(vec![rule]).await {
                Ok(()) => {
                    self.state.lock().active.insert(hostname.clone(), rule_id);
                    return Ok(rule_id);
                }
                Err(err) if err.is_duplicate_id() => {
                    log::warn!(
                        "rule id {rule_id} already taken in the engine, retrying {hostname}"
                    );
                }
                Err(err) => {
                    self.state.lock().allocator.release(rule_id);
                    return Err(err.into());
                }
            }
        }

        Err(ManagerError::IdRetriesExhausted {
            hostname: hostname.clone(),
            attempts: MAX_INSTALL_ATTEMPTS,
        })
    }

    /// Reads the persisted intent map, skipping entries that no longer parse
    /// so one corrupt record cannot wedge recovery.
    async fn read_intent(&self) -> Result<BTreeMap<Hostname, Charset>, ManagerError> {
        let Some(value) = self.store.get(INTENT_KEY).await? else {
            return Ok(BTreeMap::new());
        };
        let raw: BTreeMap<String, String> = match serde_json::from_value(value) {
            Ok(raw) => raw,
            Err(err) => {
                log::warn!("persisted intent is unreadable, treating as empty: {err}");
                return Ok(BTreeMap::new());
            }
        };

        let mut intent = BTreeMap::new();
        for (host, label) in raw {
            let hostname = match Hostname::parse(&host) {
                Ok(hostname) => hostname,
                Err(err) => {
                    log::warn!("dropping persisted entry with bad hostname {host:?}: {err}");
                    continue;
                }
            };
            let charset = match Charset::from_label(&label) {
                Ok(charset) => charset,
                Err(err) => {
                    log::warn!("dropping persisted entry for {host}: {err}");
                    continue;
                }
            };
            intent.insert(hostname, charset);
        }
        Ok(intent)
    }

    /// Read-modify-writes the intent map under the persist lock so writers
    /// for different hostnames cannot drop each other's entries.
    async fn write_intent_entry(
        &self,
        hostname: &Hostname,
        charset: Option<Charset>,
    ) -> Result<(), ManagerError> {
        let _persist = self.persist_lock.lock().await;

        let mut intent = self.read_intent().await?;
        match charset {
            Some(charset) => intent.insert(hostname.clone(), charset),
            None => intent.remove(hostname),
        };

        let value = serde_json::to_value(&intent).map_err(StoreError::from)?;
        self.store.set(INTENT_KEY, value).await?;
        self.persist_active_snapshot().await;
        Ok(())
    }

    /// Best effort. The snapshot is diagnostics, not a recovery source.
    async fn persist_active_snapshot(&self) {
        let entries = self.active_rules();
        let value = match serde_json::to_value(&entries) {
            Ok(value) => value,
            Err(err) => {
                log::warn!("could not serialize active-rule snapshot: {err}");
                return;
            }
        };
        if let Err(err) = self.store.set(ACTIVE_RULES_KEY, value).await {
            log::warn!("could not persist active-rule snapshot: {err}");
        }
    }

    fn active_id(&self, hostname: &Hostname) -> Option<u32> {
        self.state.lock().active.get(hostname).copied()
    }

    /// Lock entries are never pruned; the set of overridden hostnames stays
    /// small.
    fn host_lock(&self, hostname: &Hostname) -> Arc<AsyncMutex<()>> {
        let mut locks = self.host_locks.lock();
        locks
            .entry(hostname.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }
}
