//! Settings-file sessions for the CLI.
//!
//! Commands run the real manager against a JSON settings file plus an
//! in-memory engine, so every run starts by rebuilding engine state from the
//! file the way a browser start would.

use std::collections::BTreeMap;

use cs_manager::{
    JsonFileStore, MemoryRuleEngine, RestoreStats, RuleManager, SettingsStore, ACTIVE_RULES_KEY,
    INTENT_KEY,
};

use crate::report::{OverrideEntry, SnapshotEntry, StatusReport};

pub type FileSession = RuleManager<MemoryRuleEngine, JsonFileStore>;

/// Opens a session on `path` and replays saved intent into a fresh engine.
pub async fn open_session(path: &str) -> Result<(FileSession, RestoreStats), String> {
    let manager = RuleManager::new(MemoryRuleEngine::new(), JsonFileStore::new(path));
    let stats = manager
        .restore_saved_rules()
        .await
        .map_err(|e| format!("Failed to restore from '{}': {}", path, e))?;
    Ok((manager, stats))
}

/// Reads what the settings file says without touching any engine.
pub async fn read_status(path: &str) -> Result<StatusReport, String> {
    let store = JsonFileStore::new(path);

    let overrides = match store
        .get(INTENT_KEY)
        .await
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?
    {
        Some(value) => serde_json::from_value::<BTreeMap<String, String>>(value)
            .map_err(|e| format!("Settings file '{}' is damaged: {}", path, e))?,
        None => BTreeMap::new(),
    };

    let snapshot = match store
        .get(ACTIVE_RULES_KEY)
        .await
        .map_err(|e| format!("Failed to read '{}': {}", path, e))?
    {
        Some(value) => serde_json::from_value::<Vec<SnapshotEntry>>(value)
            .map_err(|e| format!("Settings file '{}' is damaged: {}", path, e))?,
        None => Vec::new(),
    };

    Ok(StatusReport {
        settings_path: path.to_string(),
        overrides: overrides
            .into_iter()
            .map(|(hostname, charset)| OverrideEntry { hostname, charset })
            .collect(),
        snapshot,
    })
}
