//! WebAssembly bindings for CharsetSwitch
//!
//! The extension's worker script drives the platform engine and storage
//! itself; this module supplies the pieces that must agree with the Rust
//! side exactly: label validation, hostname handling, rule payloads, and a
//! [`RuleTracker`] holding the allocator and hostname map between calls.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

use cs_core::{
    Charset, EngineRule, Hostname, IdAllocator, MAX_INSTALL_ATTEMPTS, SUPPORTED_CHARSETS,
};

#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

#[wasm_bindgen]
pub fn supported_labels() -> JsValue {
    let labels = js_sys::Array::new();
    for charset in SUPPORTED_CHARSETS.iter() {
        labels.push(&JsValue::from_str(charset.as_str()));
    }
    labels.into()
}

#[wasm_bindgen]
pub fn is_supported_label(label: &str) -> bool {
    Charset::from_label(label).is_ok()
}

#[wasm_bindgen]
pub fn canonical_label(label: &str) -> Option<String> {
    Charset::from_label(label)
        .ok()
        .map(|charset| charset.as_str().to_string())
}

#[wasm_bindgen]
pub fn content_type_for(label: &str) -> Option<String> {
    Charset::from_label(label)
        .ok()
        .map(|charset| charset.content_type_value())
}

#[wasm_bindgen]
pub fn host_from_url(url: &str) -> Option<String> {
    Hostname::from_url(url)
        .ok()
        .map(|hostname| hostname.as_str().to_string())
}

#[wasm_bindgen]
pub fn normalize_host(input: &str) -> Option<String> {
    Hostname::parse(input)
        .ok()
        .map(|hostname| hostname.as_str().to_string())
}

#[wasm_bindgen]
pub fn max_install_attempts() -> u32 {
    MAX_INSTALL_ATTEMPTS
}

/// Serializes the complete engine rule payload for one override, ready for
/// the worker to pass to the platform's rule-update call.
#[wasm_bindgen]
pub fn build_rule_json(rule_id: u32, host: &str, label: &str) -> Result<String, JsValue> {
    build_rule(rule_id, host, label).map_err(|e| JsValue::from_str(&e))
}

/// Re-validates a persisted intent map, dropping entries that no longer
/// parse and rewriting labels to canonical case.
#[wasm_bindgen]
pub fn sanitize_intent_json(json: &str) -> Result<String, JsValue> {
    sanitize_intent(json).map_err(|e| JsValue::from_str(&e))
}

fn build_rule(rule_id: u32, host: &str, label: &str) -> Result<String, String> {
    let hostname = Hostname::parse(host).map_err(|e| e.to_string())?;
    let charset = Charset::from_label(label).map_err(|e| e.to_string())?;
    let rule = EngineRule::charset_override(rule_id, &hostname, charset);
    serde_json::to_string(&rule).map_err(|e| e.to_string())
}

fn sanitize_intent(json: &str) -> Result<String, String> {
    let raw: BTreeMap<String, String> =
        serde_json::from_str(json).map_err(|e| format!("Intent map is not valid JSON: {}", e))?;

    let mut intent = BTreeMap::new();
    for (host, label) in raw {
        let Ok(hostname) = Hostname::parse(&host) else {
            console_warn(&format!("dropping intent entry with bad hostname {:?}", host));
            continue;
        };
        let Ok(charset) = Charset::from_label(&label) else {
            console_warn(&format!("dropping intent entry for {}: unknown label {:?}", host, label));
            continue;
        };
        intent.insert(
            hostname.as_str().to_string(),
            charset.as_str().to_string(),
        );
    }
    serde_json::to_string(&intent).map_err(|e| e.to_string())
}

#[cfg(target_arch = "wasm32")]
fn console_warn(message: &str) {
    web_sys::console::warn_1(&JsValue::from_str(message));
}

#[cfg(not(target_arch = "wasm32"))]
fn console_warn(_message: &str) {}

// ============================================================================
// RuleTracker
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TrackedRule {
    hostname: String,
    rule_id: u32,
}

struct PlannedInstall {
    rule_id: u32,
    remove_rule_ids: Vec<u32>,
    rule_json: String,
}

/// Synchronous bookkeeping for the worker's rule state.
///
/// The JS side performs the actual engine and storage calls; the tracker
/// owns the identifier allocator and the hostname → id map so every id
/// decision happens in one place. Every planned install must end in either
/// `confirm_install` or `abandon_install`, otherwise its id stays claimed.
#[wasm_bindgen]
pub struct RuleTracker {
    allocator: IdAllocator,
    active: BTreeMap<Hostname, u32>,
}

impl Default for RuleTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleTracker {
    fn plan_install_inner(&mut self, host: &str, label: &str) -> Result<PlannedInstall, String> {
        let hostname = Hostname::parse(host).map_err(|e| e.to_string())?;
        let charset = Charset::from_label(label).map_err(|e| e.to_string())?;

        let remove_rule_ids: Vec<u32> = self.active.get(&hostname).copied().into_iter().collect();
        let rule_id = self.allocator.allocate();
        let rule = EngineRule::charset_override(rule_id, &hostname, charset);
        let rule_json = serde_json::to_string(&rule).map_err(|e| e.to_string())?;

        Ok(PlannedInstall {
            rule_id,
            remove_rule_ids,
            rule_json,
        })
    }

    fn confirm_install_inner(&mut self, host: &str, rule_id: u32) -> Result<(), String> {
        let hostname = Hostname::parse(host).map_err(|e| e.to_string())?;
        if let Some(old_id) = self.active.insert(hostname, rule_id) {
            if old_id != rule_id {
                self.allocator.release(old_id);
            }
        }
        Ok(())
    }

    fn abandon_install_inner(&mut self, rule_id: u32, id_taken: bool) {
        // A taken id belongs to some other writer's rule; keep skipping it.
        if !id_taken {
            self.allocator.release(rule_id);
        }
    }

    fn confirm_remove_inner(&mut self, host: &str) -> Option<u32> {
        let hostname = Hostname::parse(host).ok()?;
        let rule_id = self.active.remove(&hostname)?;
        self.allocator.release(rule_id);
        Some(rule_id)
    }

    fn adopt_snapshot_inner(&mut self, json: &str) -> Result<u32, String> {
        let entries: Vec<TrackedRule> =
            serde_json::from_str(json).map_err(|e| format!("Snapshot is not valid JSON: {}", e))?;

        let mut adopted = 0;
        for entry in entries {
            let Ok(hostname) = Hostname::parse(&entry.hostname) else {
                console_warn(&format!(
                    "dropping snapshot entry with bad hostname {:?}",
                    entry.hostname
                ));
                continue;
            };
            if !self.allocator.mark_taken(entry.rule_id) {
                console_warn(&format!(
                    "snapshot entry for {} repeats rule id {}",
                    hostname, entry.rule_id
                ));
                continue;
            }
            self.active.insert(hostname, entry.rule_id);
            adopted += 1;
        }
        Ok(adopted)
    }

    fn snapshot_inner(&self) -> String {
        let entries: Vec<TrackedRule> = self
            .active
            .iter()
            .map(|(hostname, &rule_id)| TrackedRule {
                hostname: hostname.as_str().to_string(),
                rule_id,
            })
            .collect();
        serde_json::to_string(&entries).unwrap_or_else(|_| "[]".to_string())
    }
}

#[wasm_bindgen]
impl RuleTracker {
    #[wasm_bindgen(constructor)]
    pub fn new() -> RuleTracker {
        RuleTracker {
            allocator: IdAllocator::new(),
            active: BTreeMap::new(),
        }
    }

    /// Plans an install for `host`. Claims a fresh id and returns
    /// `{ ruleId, removeRuleIds, ruleJson }`; the worker removes
    /// `removeRuleIds`, installs `ruleJson`, then confirms or abandons.
    pub fn plan_install(&mut self, host: &str, label: &str) -> Result<JsValue, JsValue> {
        let plan = self
            .plan_install_inner(host, label)
            .map_err(|e| JsValue::from_str(&e))?;

        let result = js_sys::Object::new();
        let _ = js_sys::Reflect::set(&result, &"ruleId".into(), &JsValue::from(plan.rule_id));
        let remove_ids = js_sys::Array::new();
        for id in &plan.remove_rule_ids {
            remove_ids.push(&JsValue::from(*id));
        }
        let _ = js_sys::Reflect::set(&result, &"removeRuleIds".into(), &remove_ids);
        let _ = js_sys::Reflect::set(&result, &"ruleJson".into(), &JsValue::from_str(&plan.rule_json));
        Ok(result.into())
    }

    /// Records that the planned rule is installed in the engine.
    pub fn confirm_install(&mut self, host: &str, rule_id: u32) -> Result<(), JsValue> {
        self.confirm_install_inner(host, rule_id)
            .map_err(|e| JsValue::from_str(&e))
    }

    /// Records that the planned install never reached the engine.
    /// `id_taken` means the engine reported the identifier occupied.
    pub fn abandon_install(&mut self, rule_id: u32, id_taken: bool) {
        self.abandon_install_inner(rule_id, id_taken);
    }

    /// The id the worker should remove for `host`, if an override exists.
    pub fn plan_remove(&self, host: &str) -> Option<u32> {
        let hostname = Hostname::parse(host).ok()?;
        self.active.get(&hostname).copied()
    }

    /// Records that the rule for `host` left the engine. Returns its id.
    pub fn confirm_remove(&mut self, host: &str) -> Option<u32> {
        self.confirm_remove_inner(host)
    }

    /// Seeds the tracker from a persisted `[{hostname, ruleId}]` snapshot.
    /// Returns how many entries were adopted.
    pub fn adopt_snapshot(&mut self, json: &str) -> Result<u32, JsValue> {
        self.adopt_snapshot_inner(json)
            .map_err(|e| JsValue::from_str(&e))
    }

    /// Current state as a `[{hostname, ruleId}]` JSON string.
    pub fn snapshot_json(&self) -> String {
        self.snapshot_inner()
    }

    pub fn rule_id_for(&self, host: &str) -> Option<u32> {
        let hostname = Hostname::parse(host).ok()?;
        self.active.get(&hostname).copied()
    }

    pub fn active_rule_count(&self) -> u32 {
        self.active.len() as u32
    }

    /// Forgets everything, id history included.
    pub fn reset(&mut self) {
        self.allocator.reset();
        self.active.clear();
    }
}
