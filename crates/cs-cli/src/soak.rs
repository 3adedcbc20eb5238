//! Randomized soak of the manager against in-memory backends.
//!
//! Drives a mixed workload of applies, resets, reconciles, recovery passes,
//! and out-of-band engine wipes, checking structural invariants as it goes:
//! unique rule ids, one rule per hostname, and agreement between the
//! manager's map and the engine's contents.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use cs_core::{EngineRule, Hostname, SUPPORTED_CHARSETS};
use cs_manager::{MemoryRuleEngine, MemorySettingsStore, RuleEngine, RuleManager, INTENT_KEY};

use crate::report::SoakReport;

pub struct SoakOptions {
    pub operations: u32,
    pub seed: u64,
    pub hosts: u32,
}

pub fn run_soak(opts: &SoakOptions) -> Result<SoakReport, String> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start tokio runtime: {}", e))?;
    runtime.block_on(soak(opts))
}

fn next_rand(state: &mut u64) -> u64 {
    *state = state.wrapping_mul(1664525).wrapping_add(1013904223);
    *state
}

async fn soak(opts: &SoakOptions) -> Result<SoakReport, String> {
    let engine = Arc::new(MemoryRuleEngine::new());
    let store = Arc::new(MemorySettingsStore::new());
    let manager = RuleManager::new(Arc::clone(&engine), Arc::clone(&store));

    let host_pool: Vec<Hostname> = (0..opts.hosts.max(1))
        .map(|i| Hostname::parse(&format!("host-{i}.example")).map_err(|e| e.to_string()))
        .collect::<Result<_, _>>()?;

    let mut rng = if opts.seed == 0 { 1 } else { opts.seed };
    let mut report = SoakReport {
        operations: opts.operations,
        seed: opts.seed,
        applies: 0,
        resets: 0,
        reconciles: 0,
        restores: 0,
        wipes: 0,
        final_rule_count: 0,
        violations: Vec::new(),
    };

    for step in 0..opts.operations {
        let roll = next_rand(&mut rng) % 100;
        let hostname = &host_pool[(next_rand(&mut rng) as usize) % host_pool.len()];

        if roll < 55 {
            let charset =
                SUPPORTED_CHARSETS[(next_rand(&mut rng) as usize) % SUPPORTED_CHARSETS.len()];
            match manager.create_or_replace_rule(hostname, charset).await {
                Ok(_) => report.applies += 1,
                Err(e) => report
                    .violations
                    .push(format!("step {step}: apply {hostname} failed: {e}")),
            }
        } else if roll < 80 {
            match manager.remove_rule(hostname).await {
                Ok(_) => report.resets += 1,
                Err(e) => report
                    .violations
                    .push(format!("step {step}: reset {hostname} failed: {e}")),
            }
        } else if roll < 90 {
            match manager.reconcile_hostname(hostname).await {
                Ok(_) => report.reconciles += 1,
                Err(e) => report
                    .violations
                    .push(format!("step {step}: reconcile {hostname} failed: {e}")),
            }
        } else {
            if roll >= 96 {
                // The platform dropped every dynamic rule behind our back.
                engine.clear_out_of_band();
                report.wipes += 1;
            }
            match manager.restore_saved_rules().await {
                Ok(_) => report.restores += 1,
                Err(e) => report
                    .violations
                    .push(format!("step {step}: restore failed: {e}")),
            }
        }

        if step % 512 == 0 {
            check_invariants(step, &engine, &manager, &mut report.violations).await;
        }
    }

    manager
        .restore_saved_rules()
        .await
        .map_err(|e| format!("Final restore failed: {}", e))?;
    check_invariants(opts.operations, &engine, &manager, &mut report.violations).await;

    let intent_count = match store.peek(INTENT_KEY) {
        Some(value) => serde_json::from_value::<BTreeMap<String, String>>(value)
            .map(|m| m.len())
            .unwrap_or(0),
        None => 0,
    };
    report.final_rule_count = engine.installed_count();
    if report.final_rule_count != intent_count {
        report.violations.push(format!(
            "after final restore: {} engine rules but {} persisted overrides",
            report.final_rule_count, intent_count
        ));
    }

    Ok(report)
}

async fn check_invariants(
    step: u32,
    engine: &Arc<MemoryRuleEngine>,
    manager: &RuleManager<Arc<MemoryRuleEngine>, Arc<MemorySettingsStore>>,
    violations: &mut Vec<String>,
) {
    let rules = match engine.list_rules().await {
        Ok(rules) => rules,
        Err(e) => {
            violations.push(format!("step {step}: list_rules failed: {e}"));
            return;
        }
    };

    let mut ids = BTreeSet::new();
    let mut hosts = BTreeSet::new();
    for rule in &rules {
        if rule.id == 0 {
            violations.push(format!("step {step}: engine holds rule id 0"));
        }
        if !ids.insert(rule.id) {
            violations.push(format!("step {step}: duplicate rule id {}", rule.id));
        }
        match rule.matched_host() {
            Some(host) => {
                if !hosts.insert(host.to_string()) {
                    violations.push(format!("step {step}: two rules for {host}"));
                }
            }
            None => violations.push(format!("step {step}: rule {} matches no single host", rule.id)),
        }
    }

    if manager.active_rule_count() != rules.len() {
        violations.push(format!(
            "step {step}: manager tracks {} rules but engine holds {}",
            manager.active_rule_count(),
            rules.len()
        ));
    }

    // Between operations every active id must also carry persisted intent,
    // and the engine rule behind it must match on host and charset.
    let tracked = match manager.tracked_rules().await {
        Ok(tracked) => tracked,
        Err(e) => {
            violations.push(format!("step {step}: tracked_rules failed: {e}"));
            return;
        }
    };
    if tracked.len() != manager.active_rule_count() {
        violations.push(format!(
            "step {step}: {} active rule(s) have no persisted intent",
            manager.active_rule_count() - tracked.len()
        ));
    }
    let by_id: HashMap<u32, &EngineRule> = rules.iter().map(|rule| (rule.id, rule)).collect();
    for rule in &tracked {
        let matches = by_id.get(&rule.rule_id).map(|engine_rule| {
            engine_rule.matched_host() == Some(rule.hostname.as_str())
                && engine_rule.charset_label() == Some(rule.charset.as_str())
        });
        if matches != Some(true) {
            violations.push(format!(
                "step {step}: tracked rule {} for {} ({}) not in engine",
                rule.rule_id, rule.hostname, rule.charset
            ));
        }
    }
}
