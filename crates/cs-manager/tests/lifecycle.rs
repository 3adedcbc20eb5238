//! End-to-end lifecycle tests: install, restart, update, and recovery flows
//! against the in-memory engine and store, sharing both across simulated
//! sessions the way a browser restart would.

use std::sync::Arc;

use serde_json::json;

use cs_core::{Charset, EngineRule, Hostname};
use cs_manager::{
    handle_startup, Dispatcher, MemoryRuleEngine, MemorySettingsStore, RuleEngine, RuleManager,
    SettingsStore, StartupEvent, ACTIVE_RULES_KEY, INTENT_KEY,
};

fn host(s: &str) -> Hostname {
    Hostname::parse(s).unwrap()
}

fn fresh_stack() -> (Arc<MemoryRuleEngine>, Arc<MemorySettingsStore>) {
    (
        Arc::new(MemoryRuleEngine::new()),
        Arc::new(MemorySettingsStore::new()),
    )
}

fn session(
    engine: &Arc<MemoryRuleEngine>,
    store: &Arc<MemorySettingsStore>,
) -> RuleManager<Arc<MemoryRuleEngine>, Arc<MemorySettingsStore>> {
    RuleManager::new(Arc::clone(engine), Arc::clone(store))
}

#[tokio::test]
async fn process_restart_recovers_every_override() {
    let (engine, store) = fresh_stack();

    let first = session(&engine, &store);
    handle_startup(&first, StartupEvent::FirstInstall)
        .await
        .unwrap();
    first
        .create_or_replace_rule(&host("a.example"), Charset::Gbk)
        .await
        .unwrap();
    first
        .create_or_replace_rule(&host("b.example"), Charset::ShiftJis)
        .await
        .unwrap();
    first
        .create_or_replace_rule(&host("c.example"), Charset::Windows1251)
        .await
        .unwrap();
    drop(first);

    let second = session(&engine, &store);
    let stats = handle_startup(&second, StartupEvent::ProcessStart)
        .await
        .unwrap();

    assert_eq!(stats.restored, 3);
    assert_eq!(stats.failed, 0);

    let rules = engine.list_rules().await.unwrap();
    assert_eq!(rules.len(), 3);
    let mut ids: Vec<u32> = rules.iter().map(|r| r.id).collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![1, 2, 3]);

    assert_eq!(
        second
            .get_charset_for_hostname(&host("b.example"))
            .await
            .unwrap(),
        Some(Charset::ShiftJis)
    );
    for rule in &rules {
        let entry_id = second.active_rule_id(&host(rule.matched_host().unwrap()));
        assert_eq!(entry_id, Some(rule.id));
    }
}

#[tokio::test]
async fn update_wipe_is_rebuilt_from_intent() {
    let (engine, store) = fresh_stack();

    let before_update = session(&engine, &store);
    before_update
        .create_or_replace_rule(&host("news.example"), Charset::Big5)
        .await
        .unwrap();

    // Updates drop dynamic rules while the store keeps intent.
    engine.clear_out_of_band();
    drop(before_update);

    let after_update = session(&engine, &store);
    let stats = handle_startup(&after_update, StartupEvent::Update)
        .await
        .unwrap();

    assert_eq!(stats.restored, 1);
    let rules = engine.list_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].matched_host(), Some("news.example"));
    assert_eq!(rules[0].charset_label(), Some("Big5"));
}

#[tokio::test]
async fn restore_clears_rules_it_does_not_recognize() {
    let (engine, store) = fresh_stack();
    engine.seed_rule(EngineRule::charset_override(
        901,
        &host("foreign.example"),
        Charset::Utf8,
    ));
    store
        .set(INTENT_KEY, json!({"mine.example": "EUC-JP"}))
        .await
        .unwrap();

    let manager = session(&engine, &store);
    let stats = manager.restore_saved_rules().await.unwrap();

    assert_eq!(stats.restored, 1);
    let rules = engine.list_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].matched_host(), Some("mine.example"));
    assert_ne!(rules[0].id, 901);
}

#[tokio::test]
async fn restore_counts_per_hostname_failures_and_continues() {
    let (engine, store) = fresh_stack();
    store
        .set(
            INTENT_KEY,
            json!({
                "a.example": "GBK",
                "b.example": "Big5",
                "c.example": "EUC-KR"
            }),
        )
        .await
        .unwrap();
    // Exhausts every install attempt for the first hostname, then clears.
    engine.occupy_next_ids(cs_manager::MAX_INSTALL_ATTEMPTS);

    let manager = session(&engine, &store);
    let stats = manager.restore_saved_rules().await.unwrap();

    assert_eq!(stats.restored, 2);
    assert_eq!(stats.failed, 1);
    assert_eq!(engine.installed_count(), 2);
    assert_eq!(manager.active_rule_id(&host("a.example")), None);
    assert!(manager.active_rule_id(&host("b.example")).is_some());

    // Failed hostnames keep their intent so a later pass can retry.
    assert_eq!(
        manager
            .get_charset_for_hostname(&host("a.example"))
            .await
            .unwrap(),
        Some(Charset::Gbk)
    );
}

#[tokio::test]
async fn snapshot_tracks_engine_contents() {
    let (engine, store) = fresh_stack();
    let manager = session(&engine, &store);

    manager
        .create_or_replace_rule(&host("a.example"), Charset::Gb18030)
        .await
        .unwrap();
    manager
        .create_or_replace_rule(&host("b.example"), Charset::EucJp)
        .await
        .unwrap();

    let snapshot = store.peek(ACTIVE_RULES_KEY).unwrap();
    assert_eq!(
        snapshot,
        json!([
            {"hostname": "a.example", "ruleId": 1},
            {"hostname": "b.example", "ruleId": 2}
        ])
    );

    manager.remove_rule(&host("a.example")).await.unwrap();
    let snapshot = store.peek(ACTIVE_RULES_KEY).unwrap();
    assert_eq!(snapshot, json!([{"hostname": "b.example", "ruleId": 2}]));
}

#[tokio::test]
async fn store_outage_during_apply_heals_on_restore() {
    let (engine, store) = fresh_stack();
    let manager = session(&engine, &store);
    store.fail_next_writes(1);

    // Install succeeded but the intent write did not, leaving an engine rule
    // with no durable record.
    let err = manager
        .create_or_replace_rule(&host("example.com"), Charset::Gbk)
        .await
        .unwrap_err();
    assert!(matches!(err, cs_manager::ManagerError::Store(_)));
    assert_eq!(engine.installed_count(), 1);
    assert_eq!(
        manager
            .get_charset_for_hostname(&host("example.com"))
            .await
            .unwrap(),
        None
    );

    // Recovery rebuilds strictly from intent, clearing the orphan.
    let stats = manager.restore_saved_rules().await.unwrap();
    assert_eq!(stats.restored, 0);
    assert_eq!(engine.installed_count(), 0);
}

#[tokio::test]
async fn concurrent_applies_to_one_hostname_leave_one_rule() {
    let (engine, store) = fresh_stack();
    let manager = Arc::new(session(&engine, &store));
    let hostname = host("example.com");

    let a = {
        let manager = Arc::clone(&manager);
        let hostname = hostname.clone();
        tokio::spawn(
            async move { manager.create_or_replace_rule(&hostname, Charset::Gbk).await },
        )
    };
    let b = {
        let manager = Arc::clone(&manager);
        let hostname = hostname.clone();
        tokio::spawn(async move {
            manager
                .create_or_replace_rule(&hostname, Charset::Big5)
                .await
        })
    };
    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();

    let rules = engine.list_rules().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].matched_host(), Some("example.com"));
    assert_eq!(manager.active_rule_id(&hostname), Some(rules[0].id));

    // Whichever write won, intent and engine agree.
    let persisted = manager
        .get_charset_for_hostname(&hostname)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rules[0].charset_label(), Some(persisted.as_str()));
}

#[tokio::test]
async fn concurrent_applies_to_different_hostnames_keep_both_entries() {
    let (engine, store) = fresh_stack();
    let manager = Arc::new(session(&engine, &store));

    let a = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .create_or_replace_rule(&host("a.example"), Charset::Gbk)
                .await
        })
    };
    let b = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            manager
                .create_or_replace_rule(&host("b.example"), Charset::EucKr)
                .await
        })
    };
    let id_a = a.await.unwrap().unwrap();
    let id_b = b.await.unwrap().unwrap();

    assert_ne!(id_a, id_b);
    assert_eq!(engine.installed_count(), 2);
    assert_eq!(
        manager
            .get_charset_for_hostname(&host("a.example"))
            .await
            .unwrap(),
        Some(Charset::Gbk)
    );
    assert_eq!(
        manager
            .get_charset_for_hostname(&host("b.example"))
            .await
            .unwrap(),
        Some(Charset::EucKr)
    );
}

#[tokio::test]
async fn dispatcher_session_survives_full_lifecycle() {
    let (engine, store) = fresh_stack();

    let manager = Arc::new(session(&engine, &store));
    handle_startup(manager.as_ref(), StartupEvent::FirstInstall)
        .await
        .unwrap();
    let dispatcher = Dispatcher::new(Arc::clone(&manager));

    let applied = dispatcher.apply_charset("docs.example", "gb18030").await;
    assert!(applied.success);

    // Worker went idle and came back; rules survived, memory did not.
    drop(dispatcher);
    drop(manager);
    let manager = Arc::new(session(&engine, &store));
    let stats = handle_startup(manager.as_ref(), StartupEvent::ProcessStart)
        .await
        .unwrap();
    assert_eq!(stats.restored, 1);

    let dispatcher = Dispatcher::new(manager);
    assert_eq!(
        dispatcher.charset_for("docs.example").await,
        Some(Charset::Gb18030)
    );

    let reset = dispatcher.reset_charset("docs.example").await;
    assert!(reset.success && reset.removed);
    assert_eq!(engine.installed_count(), 0);
    assert_eq!(store.peek(INTENT_KEY), Some(json!({})));
}
