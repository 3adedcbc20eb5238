//! Startup hooks.
//!
//! The host platform fires exactly one of these events when the background
//! process comes up. First install starts from a clean slate; every other
//! start rebuilds engine rules from persisted intent, since the engine may
//! have dropped them while the process was gone.

use crate::engine::RuleEngine;
use crate::manager::{ManagerError, RestoreStats, RuleManager};
use crate::store::SettingsStore;

/// Why the background process started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupEvent {
    FirstInstall,
    Update,
    ProcessStart,
}

/// Runs the startup sequence for `event` and reports what recovery did.
pub async fn handle_startup<E: RuleEngine, S: SettingsStore>(
    manager: &RuleManager<E, S>,
    event: StartupEvent,
) -> Result<RestoreStats, ManagerError> {
    match event {
        StartupEvent::FirstInstall => on_first_install(manager).await,
        StartupEvent::Update => on_update(manager).await,
        StartupEvent::ProcessStart => on_process_start(manager).await,
    }
}

/// Fresh install: nothing saved yet, just make sure the engine is empty.
pub async fn on_first_install<E: RuleEngine, S: SettingsStore>(
    manager: &RuleManager<E, S>,
) -> Result<RestoreStats, ManagerError> {
    log::info!("first install, starting clean");
    manager.initialize().await?;
    Ok(RestoreStats::default())
}

/// Update: the engine dropped dynamic rules with the old version.
pub async fn on_update<E: RuleEngine, S: SettingsStore>(
    manager: &RuleManager<E, S>,
) -> Result<RestoreStats, ManagerError> {
    log::info!("updated, rebuilding rules from saved intent");
    manager.restore_saved_rules().await
}

/// Routine process start after idle shutdown or a browser launch.
pub async fn on_process_start<E: RuleEngine, S: SettingsStore>(
    manager: &RuleManager<E, S>,
) -> Result<RestoreStats, ManagerError> {
    log::info!("process start, recovering rule state");
    manager.restore_saved_rules().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MemoryRuleEngine;
    use crate::store::{MemorySettingsStore, INTENT_KEY};
    use serde_json::json;

    #[tokio::test]
    async fn first_install_clears_and_restores_nothing() {
        let engine = MemoryRuleEngine::new();
        engine.seed_rule(cs_core::EngineRule::charset_override(
            7,
            &cs_core::Hostname::parse("stale.example").unwrap(),
            cs_core::Charset::Utf8,
        ));
        let manager = RuleManager::new(engine, MemorySettingsStore::new());

        let stats = handle_startup(&manager, StartupEvent::FirstInstall)
            .await
            .unwrap();

        assert_eq!(stats, RestoreStats::default());
        assert_eq!(manager.engine().installed_count(), 0);
    }

    #[tokio::test]
    async fn update_restores_saved_intent() {
        let store = MemorySettingsStore::new();
        store
            .set(
                INTENT_KEY,
                json!({"a.example": "GBK", "b.example": "EUC-JP"}),
            )
            .await
            .unwrap();
        let manager = RuleManager::new(MemoryRuleEngine::new(), store);

        let stats = handle_startup(&manager, StartupEvent::Update).await.unwrap();

        assert_eq!(stats.restored, 2);
        assert_eq!(stats.failed, 0);
        assert_eq!(manager.engine().installed_count(), 2);
        assert_eq!(manager.active_rule_count(), 2);
    }
}
