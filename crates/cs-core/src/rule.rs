//! Rule entities and the engine wire shape
//!
//! `Rule` is what the manager tracks per hostname. `EngineRule` is the
//! declarative form handed to the platform rule engine: match document
//! loads for a single authority, overwrite the `Content-Type` response
//! header with the chosen charset. Wire fields serialize camelCase, the
//! convention of the host platform's JSON.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::charset::Charset;
use crate::hostname::Hostname;

/// Priority shared by every charset rule. One rule per hostname means rules
/// never compete, so ordering is irrelevant.
pub const RULE_PRIORITY: u32 = 1;

/// The response header every rule overwrites.
pub const CONTENT_TYPE_HEADER: &str = "Content-Type";

// =============================================================================
// Resource Types (bit mask for the rule condition)
// =============================================================================

bitflags::bitflags! {
    /// Document resource classes a rule applies to.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ResourceTypes: u8 {
        /// Top-level document load
        const MAIN_FRAME = 1 << 0;
        /// Nested frame document load
        const SUB_FRAME = 1 << 1;
        /// Both document classes
        const DOCUMENT = Self::MAIN_FRAME.bits() | Self::SUB_FRAME.bits();
    }
}

impl ResourceTypes {
    /// Wire labels for the set bits, in a stable order.
    pub fn labels(self) -> Vec<&'static str> {
        let mut labels = Vec::with_capacity(2);
        if self.contains(Self::MAIN_FRAME) {
            labels.push("main_frame");
        }
        if self.contains(Self::SUB_FRAME) {
            labels.push("sub_frame");
        }
        labels
    }

    /// Parse a wire label. Unknown labels map to an empty mask.
    pub fn from_label(label: &str) -> Self {
        match label {
            "main_frame" => Self::MAIN_FRAME,
            "sub_frame" => Self::SUB_FRAME,
            _ => Self::empty(),
        }
    }
}

impl Serialize for ResourceTypes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.labels().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ResourceTypes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let labels = Vec::<String>::deserialize(deserializer)?;
        let mut mask = Self::empty();
        for label in &labels {
            let parsed = Self::from_label(label);
            if parsed.is_empty() {
                return Err(D::Error::custom(format!("unknown resource type '{label}'")));
            }
            mask |= parsed;
        }
        Ok(mask)
    }
}

// =============================================================================
// Rule
// =============================================================================

/// An active charset override tracked by the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rule {
    pub hostname: Hostname,
    pub charset: Charset,
    /// Identifier the engine knows this rule by; unique among all installed
    /// rules, including ones this process did not create.
    pub rule_id: u32,
}

impl Rule {
    pub fn to_engine_rule(&self) -> EngineRule {
        EngineRule::charset_override(self.rule_id, &self.hostname, self.charset)
    }
}

// =============================================================================
// Engine wire shape
// =============================================================================

/// Declarative rule as the engine stores it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineRule {
    pub id: u32,
    pub priority: u32,
    pub condition: RuleCondition,
    pub action: RuleAction,
}

/// What a rule matches: one authority, document loads only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub request_domains: Vec<String>,
    pub resource_types: ResourceTypes,
}

/// What a matched rule does to the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    pub response_headers: Vec<HeaderMutation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionType {
    ModifyHeaders,
}

/// A single response-header rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderMutation {
    pub header: String,
    pub operation: HeaderOperation,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderOperation {
    Set,
}

impl EngineRule {
    /// Build the full charset-override rule for one hostname.
    pub fn charset_override(id: u32, hostname: &Hostname, charset: Charset) -> Self {
        Self {
            id,
            priority: RULE_PRIORITY,
            condition: RuleCondition {
                request_domains: vec![hostname.as_str().to_string()],
                resource_types: ResourceTypes::DOCUMENT,
            },
            action: RuleAction {
                action_type: ActionType::ModifyHeaders,
                response_headers: vec![HeaderMutation {
                    header: CONTENT_TYPE_HEADER.to_string(),
                    operation: HeaderOperation::Set,
                    value: charset.content_type_value(),
                }],
            },
        }
    }

    /// Hostname the rule matches, when it has the single-authority shape.
    pub fn matched_host(&self) -> Option<&str> {
        match self.condition.request_domains.as_slice() {
            [host] => Some(host.as_str()),
            _ => None,
        }
    }

    /// Charset label carried in the `Content-Type` rewrite, if any.
    pub fn charset_label(&self) -> Option<&str> {
        self.action
            .response_headers
            .iter()
            .find(|m| m.header.eq_ignore_ascii_case(CONTENT_TYPE_HEADER))
            .and_then(|m| m.value.split_once("charset="))
            .map(|(_, label)| label.trim())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(s: &str) -> Hostname {
        Hostname::parse(s).unwrap()
    }

    #[test]
    fn charset_override_shape() {
        let rule = EngineRule::charset_override(7, &host("example.com"), Charset::Gbk);
        assert_eq!(rule.id, 7);
        assert_eq!(rule.priority, RULE_PRIORITY);
        assert_eq!(rule.condition.request_domains, vec!["example.com"]);
        assert_eq!(rule.condition.resource_types, ResourceTypes::DOCUMENT);
        assert_eq!(rule.action.response_headers.len(), 1);
        let mutation = &rule.action.response_headers[0];
        assert_eq!(mutation.header, "Content-Type");
        assert_eq!(mutation.operation, HeaderOperation::Set);
        assert_eq!(mutation.value, "text/html; charset=GBK");
    }

    #[test]
    fn wire_json_is_camel_case() {
        let rule = EngineRule::charset_override(3, &host("a.example"), Charset::Big5);
        let value = serde_json::to_value(&rule).unwrap();
        assert_eq!(value["id"], 3);
        assert_eq!(value["condition"]["requestDomains"][0], "a.example");
        assert_eq!(
            value["condition"]["resourceTypes"],
            serde_json::json!(["main_frame", "sub_frame"])
        );
        assert_eq!(value["action"]["type"], "modifyHeaders");
        assert_eq!(value["action"]["responseHeaders"][0]["operation"], "set");
        assert_eq!(
            value["action"]["responseHeaders"][0]["value"],
            "text/html; charset=Big5"
        );

        let back: EngineRule = serde_json::from_value(value).unwrap();
        assert_eq!(back, rule);
    }

    #[test]
    fn resource_type_labels_round_trip() {
        assert_eq!(ResourceTypes::DOCUMENT.labels(), vec!["main_frame", "sub_frame"]);
        assert_eq!(ResourceTypes::MAIN_FRAME.labels(), vec!["main_frame"]);
        assert_eq!(ResourceTypes::from_label("sub_frame"), ResourceTypes::SUB_FRAME);
        assert!(ResourceTypes::from_label("script").is_empty());
        assert!(serde_json::from_str::<ResourceTypes>("[\"stylesheet\"]").is_err());
    }

    #[test]
    fn matched_host_and_label_extraction() {
        let rule = EngineRule::charset_override(1, &host("shop.example"), Charset::ShiftJis);
        assert_eq!(rule.matched_host(), Some("shop.example"));
        assert_eq!(rule.charset_label(), Some("Shift_JIS"));

        let mut foreign = rule.clone();
        foreign.condition.request_domains.push("extra.example".to_string());
        assert_eq!(foreign.matched_host(), None);
    }

    #[test]
    fn tracked_rule_converts_to_engine_rule() {
        let tracked = Rule {
            hostname: host("b.example"),
            charset: Charset::EucJp,
            rule_id: 42,
        };
        let engine = tracked.to_engine_rule();
        assert_eq!(engine.id, 42);
        assert_eq!(engine.matched_host(), Some("b.example"));
        assert_eq!(engine.charset_label(), Some("EUC-JP"));
    }
}
