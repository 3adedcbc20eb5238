use serde::{Deserialize, Serialize};
use ts_rs::TS;

use cs_core::EngineRule;

/// One supported charset label with the header value it produces.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LabelInfo {
    pub label: String,
    pub content_type: String,
}

/// One installed rule, flattened for display.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RuleInfo {
    pub rule_id: u32,
    pub hostname: String,
    pub charset: String,
}

impl RuleInfo {
    pub fn from_engine_rule(rule: &EngineRule) -> Self {
        Self {
            rule_id: rule.id,
            hostname: rule.matched_host().unwrap_or("").to_string(),
            charset: rule.charset_label().unwrap_or("").to_string(),
        }
    }
}

/// One persisted override.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct OverrideEntry {
    pub hostname: String,
    pub charset: String,
}

/// One persisted (hostname, rule id) snapshot pair.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotEntry {
    pub hostname: String,
    pub rule_id: u32,
}

/// Everything a settings file currently says.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    pub settings_path: String,
    pub overrides: Vec<OverrideEntry>,
    pub snapshot: Vec<SnapshotEntry>,
}

/// What a recovery pass did.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub restored: usize,
    pub failed: usize,
    pub rules: Vec<RuleInfo>,
}

/// Summary of a randomized soak run.
#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct SoakReport {
    pub operations: u32,
    pub seed: u64,
    pub applies: u32,
    pub resets: u32,
    pub reconciles: u32,
    pub restores: u32,
    pub wipes: u32,
    pub final_rule_count: usize,
    pub violations: Vec<String>,
}
