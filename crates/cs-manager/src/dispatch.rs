//! Gesture and message dispatch.
//!
//! Menus, toolbar actions, and page scripts hand over raw strings. This layer
//! validates them, routes them to the [`RuleManager`], and reduces every
//! result to an outcome payload the caller can render. Operation failures are
//! logged here and reported as unsuccessful outcomes, never as panics.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cs_core::{Charset, Hostname};

use crate::engine::RuleEngine;
use crate::manager::RuleManager;
use crate::store::SettingsStore;

/// Result of an apply gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<u32>,
    pub should_reload: bool,
}

impl ApplyOutcome {
    fn failure() -> Self {
        Self {
            success: false,
            rule_id: None,
            should_reload: false,
        }
    }
}

/// Result of a reset gesture. `removed` is false when there was nothing to
/// remove; the gesture itself still counts as successful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub success: bool,
    pub removed: bool,
    pub should_reload: bool,
}

impl ResetOutcome {
    fn failure() -> Self {
        Self {
            success: false,
            removed: false,
            should_reload: false,
        }
    }
}

/// Requests a page script can send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageRequest {
    /// Which charset override applies to this host, if any.
    #[serde(rename_all = "camelCase")]
    QueryCharset { host: String },

    /// Apply a charset override for this host.
    #[serde(rename_all = "camelCase")]
    ApplyCharset { host: String, charset: String },

    /// Drop the override for this host.
    #[serde(rename_all = "camelCase")]
    ResetCharset { host: String },
}

/// Responses paired one-to-one with [`PageRequest`] variants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PageResponse {
    #[serde(rename_all = "camelCase")]
    ActiveCharset {
        host: String,
        charset: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    Applied {
        host: String,
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        rule_id: Option<u32>,
        should_reload: bool,
    },

    #[serde(rename_all = "camelCase")]
    ResetDone {
        host: String,
        success: bool,
        removed: bool,
        should_reload: bool,
    },
}

/// Routes gestures and page messages to a shared [`RuleManager`].
pub struct Dispatcher<E, S> {
    manager: Arc<RuleManager<E, S>>,
}

impl<E, S> Clone for Dispatcher<E, S> {
    fn clone(&self) -> Self {
        Self {
            manager: Arc::clone(&self.manager),
        }
    }
}

impl<E: RuleEngine, S: SettingsStore> Dispatcher<E, S> {
    pub fn new(manager: Arc<RuleManager<E, S>>) -> Self {
        Self { manager }
    }

    pub fn manager(&self) -> &Arc<RuleManager<E, S>> {
        &self.manager
    }

    /// Menu gesture: force `label` for `host`. Validates both before any
    /// mutation happens.
    pub async fn apply_charset(&self, host: &str, label: &str) -> ApplyOutcome {
        let hostname = match Hostname::parse(host) {
            Ok(hostname) => hostname,
            Err(err) => {
                log::warn!("apply rejected, bad hostname {host:?}: {err}");
                return ApplyOutcome::failure();
            }
        };
        let charset = match Charset::from_label(label) {
            Ok(charset) => charset,
            Err(err) => {
                log::warn!("apply rejected for {hostname}: {err}");
                return ApplyOutcome::failure();
            }
        };

        match self.manager.create_or_replace_rule(&hostname, charset).await {
            Ok(rule_id) => ApplyOutcome {
                success: true,
                rule_id: Some(rule_id),
                should_reload: true,
            },
            Err(err) => {
                log::warn!("apply failed for {hostname}: {err}");
                ApplyOutcome::failure()
            }
        }
    }

    /// Menu gesture: back to the site's own encoding.
    pub async fn reset_charset(&self, host: &str) -> ResetOutcome {
        let hostname = match Hostname::parse(host) {
            Ok(hostname) => hostname,
            Err(err) => {
                log::warn!("reset rejected, bad hostname {host:?}: {err}");
                return ResetOutcome::failure();
            }
        };

        match self.manager.remove_rule(&hostname).await {
            Ok(removed) => ResetOutcome {
                success: true,
                removed,
                should_reload: removed,
            },
            Err(err) => {
                log::warn!("reset failed for {hostname}: {err}");
                ResetOutcome::failure()
            }
        }
    }

    /// Persisted override for `host`, as its canonical label.
    pub async fn charset_for(&self, host: &str) -> Option<Charset> {
        let hostname = Hostname::parse(host).ok()?;
        match self.manager.get_charset_for_hostname(&hostname).await {
            Ok(charset) => charset,
            Err(err) => {
                log::warn!("charset lookup failed for {hostname}: {err}");
                None
            }
        }
    }

    /// Navigation-committed hook. Re-creates the rule when saved intent for
    /// the page's host has no installed counterpart. Returns true if a rule
    /// was installed.
    pub async fn handle_navigation_committed(&self, url: &str) -> bool {
        let Ok(hostname) = Hostname::from_url(url) else {
            return false;
        };
        match self.manager.reconcile_hostname(&hostname).await {
            Ok(installed) => installed,
            Err(err) => {
                log::warn!("reconcile failed for {hostname}: {err}");
                false
            }
        }
    }

    /// Page message entry point.
    pub async fn handle_page_request(&self, request: PageRequest) -> PageResponse {
        match request {
            PageRequest::QueryCharset { host } => {
                let charset = self.charset_for(&host).await;
                PageResponse::ActiveCharset {
                    host,
                    charset: charset.map(|c| c.as_str().to_string()),
                }
            }
            PageRequest::ApplyCharset { host, charset } => {
                let outcome = self.apply_charset(&host, &charset).await;
                PageResponse::Applied {
                    host,
                    success: outcome.success,
                    rule_id: outcome.rule_id,
                    should_reload: outcome.should_reload,
                }
            }
            PageRequest::ResetCharset { host } => {
                let outcome = self.reset_charset(&host).await;
                PageResponse::ResetDone {
                    host,
                    success: outcome.success,
                    removed: outcome.removed,
                    should_reload: outcome.should_reload,
                }
            }
        }
    }
}
