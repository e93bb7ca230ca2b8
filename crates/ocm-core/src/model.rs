use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::warn;

/// Sessions touched within this window count as active.
pub const ACTIVE_THRESHOLD_MS: i64 = 30_000;

pub const UNKNOWN_AGENT: &str = "unknown";
pub const MAIN_AGENT: &str = "main";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Idle,
    Aborted,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Idle => "idle",
            SessionStatus::Aborted => "aborted",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            SessionStatus::Active => "●",
            SessionStatus::Idle => "○",
            SessionStatus::Aborted => "⚠",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aborted wins over recency; otherwise anything updated less than
/// [`ACTIVE_THRESHOLD_MS`] before `now_ms` is active.
pub fn derive_status(aborted_last_run: bool, updated_at_ms: i64, now_ms: i64) -> SessionStatus {
    if aborted_last_run {
        return SessionStatus::Aborted;
    }
    if now_ms.saturating_sub(updated_at_ms) < ACTIVE_THRESHOLD_MS {
        SessionStatus::Active
    } else {
        SessionStatus::Idle
    }
}

/// Agent owning a session key: segment 1 of `agent:<agent_id>:<context>`,
/// or [`UNKNOWN_AGENT`] for anything else.
pub fn agent_id_for_key(key: &str) -> &str {
    let mut parts = key.splitn(3, ':');
    match (parts.next(), parts.next()) {
        (Some("agent"), Some(agent_id)) => agent_id,
        _ => UNKNOWN_AGENT,
    }
}

/// One session as reported by the gateway.
///
/// Every field tolerates absence, `null` and loosely typed values; a record
/// is never rejected because one of its fields is missing or odd.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub channel: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub display_name: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub updated_at: i64,
    #[serde(default, deserialize_with = "lenient_string")]
    pub session_id: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub model: String,
    #[serde(default, deserialize_with = "lenient_opt_u64")]
    pub context_tokens: Option<u64>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub total_tokens: u64,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub aborted_last_run: bool,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub transcript_path: Option<String>,
}

impl SessionRecord {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Coerce one wire entry. Only non-object entries are refused.
    pub fn from_wire(value: &Value) -> Result<Self, String> {
        if !value.is_object() {
            return Err(format!("expected session object, got {}", json_kind(value)));
        }
        serde_json::from_value(value.clone()).map_err(|err| err.to_string())
    }

    pub fn agent_id(&self) -> &str {
        agent_id_for_key(&self.key)
    }

    /// Key remainder after `agent:<id>:`, or the whole key when shorter.
    pub fn context_label(&self) -> &str {
        self.key.splitn(3, ':').nth(2).unwrap_or(&self.key)
    }

    pub fn name(&self) -> &str {
        if let Some(label) = self.label.as_deref().filter(|label| !label.is_empty()) {
            return label;
        }
        if !self.display_name.is_empty() {
            return &self.display_name;
        }
        &self.key
    }

    /// `claude-sonnet-4-5-20250929` → `sonnet-4-5`.
    pub fn short_model(&self) -> String {
        if self.model.trim().is_empty() {
            return "unknown".to_string();
        }
        let name = self.model.replace("claude-", "");
        if let Some((head, tail)) = name.rsplit_once('-') {
            if tail.len() == 8 && tail.chars().all(|ch| ch.is_ascii_digit()) {
                return head.to_string();
            }
        }
        name
    }

    pub fn status(&self, now_ms: i64) -> SessionStatus {
        derive_status(self.aborted_last_run, self.updated_at, now_ms)
    }
}

/// Convert the raw `sessions` array into records. Non-object entries are
/// logged and skipped; every object entry yields a record.
pub fn records_from_wire(entries: &[Value]) -> Vec<SessionRecord> {
    let mut records = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        match SessionRecord::from_wire(entry) {
            Ok(record) => records.push(record),
            Err(err) => warn!("session_record_skipped: index={index} reason={err}"),
        }
    }
    records
}

/// Sessions owned by one agent, in the order the gateway returned them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentGroup {
    pub agent_id: String,
    pub sessions: Vec<SessionRecord>,
}

impl AgentGroup {
    pub fn new(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            sessions: Vec::new(),
        }
    }
}

/// One node of the gateway's sub-agent tree (`sessions_tree`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubagentNode {
    #[serde(default, deserialize_with = "lenient_string")]
    pub key: String,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub label: Option<String>,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub depth: u64,
    /// `active`, `completed`, `failed`; anything else is kept verbatim.
    #[serde(default, deserialize_with = "lenient_string")]
    pub status: String,
    #[serde(default, deserialize_with = "lenient_u64")]
    pub runtime_ms: u64,
    #[serde(default, deserialize_with = "lenient_nodes")]
    pub children: Vec<SubagentNode>,
}

impl SubagentNode {
    pub fn new(key: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            status: status.into(),
            ..Self::default()
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == "active"
    }

    pub fn is_completed(&self) -> bool {
        self.status == "completed"
    }

    /// This node followed by all of its descendants, depth first.
    pub fn walk(&self) -> Vec<&SubagentNode> {
        let mut out = Vec::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            out.push(node);
            stack.extend(node.children.iter().rev());
        }
        out
    }
}

/// Convert the raw `tree` array into nodes, skipping non-object entries at
/// every level.
pub fn subagents_from_wire(entries: &[Value]) -> Vec<SubagentNode> {
    let mut nodes = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        if !entry.is_object() {
            warn!(
                "subagent_node_skipped: index={index} reason=expected object, got {}",
                json_kind(entry)
            );
            continue;
        }
        match serde_json::from_value(entry.clone()) {
            Ok(node) => nodes.push(node),
            Err(err) => warn!("subagent_node_skipped: index={index} reason={err}"),
        }
    }
    nodes
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn string_from_value(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn i64_from_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f as i64)),
        Value::String(s) => {
            let trimmed = s.trim();
            trimmed.parse::<i64>().ok().or_else(|| {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .filter(|f| f.is_finite())
                    .map(|f| f as i64)
            })
        }
        _ => None,
    }
}

fn u64_from_value(value: &Value) -> Option<u64> {
    if let Value::Number(n) = value {
        if let Some(u) = n.as_u64() {
            return Some(u);
        }
    }
    i64_from_value(value).and_then(|v| u64::try_from(v).ok())
}

fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(string_from_value(Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_opt_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(string_from_value(Value::deserialize(deserializer)?))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(i64_from_value(&Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_u64<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(u64_from_value(&Value::deserialize(deserializer)?).unwrap_or_default())
}

fn lenient_opt_u64<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(u64_from_value(&Value::deserialize(deserializer)?))
}

fn lenient_nodes<'de, D>(deserializer: D) -> Result<Vec<SubagentNode>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(entries) => subagents_from_wire(&entries),
        _ => Vec::new(),
    })
}

// Absent, null and unrecognised values are all false.
fn lenient_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64() == Some(1),
        Value::String(s) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn aborted_overrides_recency() {
        assert_eq!(derive_status(true, 1_000, 1_000), SessionStatus::Aborted);
        assert_eq!(derive_status(true, 0, i64::MAX), SessionStatus::Aborted);
        assert_eq!(derive_status(true, 5_000, 0), SessionStatus::Aborted);
    }

    #[test]
    fn active_window_is_exclusive_at_threshold() {
        let now = 1_700_000_000_000;
        assert_eq!(derive_status(false, now, now), SessionStatus::Active);
        assert_eq!(derive_status(false, now - 29_999, now), SessionStatus::Active);
        assert_eq!(derive_status(false, now - 30_000, now), SessionStatus::Idle);
        assert_eq!(derive_status(false, now - 600_000, now), SessionStatus::Idle);
    }

    #[test]
    fn future_updates_count_as_active() {
        assert_eq!(derive_status(false, 10_000, 0), SessionStatus::Active);
    }

    #[test]
    fn extreme_timestamps_do_not_overflow() {
        assert_eq!(derive_status(false, i64::MIN, i64::MAX), SessionStatus::Idle);
        assert_eq!(derive_status(false, i64::MAX, i64::MIN), SessionStatus::Active);
    }

    #[test]
    fn missing_optional_fields_still_produce_a_record() {
        let raw = json!({
            "key": "agent:main:main",
            "updatedAt": 1_700_000_000_000i64,
            "totalTokens": 1200
        });
        let record = SessionRecord::from_wire(&raw).expect("record");
        assert!(!record.aborted_last_run);
        assert_eq!(record.context_tokens, None);
        assert_eq!(record.total_tokens, 1200);
        assert_eq!(record.agent_id(), "main");
        assert_eq!(record.label, None);
        assert_eq!(record.model, "");
    }

    #[test]
    fn nulls_and_loose_types_are_coerced() {
        let raw = json!({
            "key": "agent:ops:cron:nightly",
            "label": null,
            "updatedAt": "1700000000000",
            "totalTokens": -5,
            "contextTokens": "2048",
            "abortedLastRun": null,
            "model": 42
        });
        let record = SessionRecord::from_wire(&raw).expect("record");
        assert_eq!(record.updated_at, 1_700_000_000_000);
        assert_eq!(record.total_tokens, 0);
        assert_eq!(record.context_tokens, Some(2048));
        assert!(!record.aborted_last_run);
        assert_eq!(record.model, "42");
        assert_eq!(record.context_label(), "cron:nightly");
    }

    #[test]
    fn aborted_flag_accepts_string_and_numeric_truth() {
        let text = SessionRecord::from_wire(&json!({"abortedLastRun": "true"})).expect("record");
        assert!(text.aborted_last_run);
        let numeric = SessionRecord::from_wire(&json!({"abortedLastRun": 1})).expect("record");
        assert!(numeric.aborted_last_run);
        let zero = SessionRecord::from_wire(&json!({"abortedLastRun": 0})).expect("record");
        assert!(!zero.aborted_last_run);
    }

    #[test]
    fn missing_key_lands_in_unknown_group() {
        let record = SessionRecord::from_wire(&json!({"sessionId": "abc"})).expect("record");
        assert_eq!(record.key, "");
        assert_eq!(record.agent_id(), UNKNOWN_AGENT);
    }

    #[test]
    fn non_object_entries_are_skipped_but_objects_survive() {
        let entries = vec![
            json!({"key": "agent:main:main"}),
            json!("garbage"),
            json!({"key": "agent:zeta:x", "abortedLastRun": true}),
        ];
        let records = records_from_wire(&entries);
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].key, "agent:zeta:x");
        assert!(records[1].aborted_last_run);
    }

    #[test]
    fn agent_id_follows_key_structure() {
        assert_eq!(agent_id_for_key("agent:main:main"), "main");
        assert_eq!(agent_id_for_key("agent:sonnet-worker:subagent:uuid"), "sonnet-worker");
        assert_eq!(agent_id_for_key("agent"), UNKNOWN_AGENT);
        assert_eq!(agent_id_for_key("weird-key"), UNKNOWN_AGENT);
        assert_eq!(agent_id_for_key("cron:main:x"), UNKNOWN_AGENT);
    }

    #[test]
    fn name_prefers_label_then_display_name_then_key() {
        let mut record = SessionRecord::new("agent:main:main");
        assert_eq!(record.name(), "agent:main:main");
        record.display_name = "Main".to_string();
        assert_eq!(record.name(), "Main");
        record.label = Some("primary".to_string());
        assert_eq!(record.name(), "primary");
    }

    #[test]
    fn short_model_strips_vendor_prefix_and_date() {
        let mut record = SessionRecord::new("agent:main:main");
        record.model = "claude-sonnet-4-5-20250929".to_string();
        assert_eq!(record.short_model(), "sonnet-4-5");
        record.model = "claude-opus-4-6".to_string();
        assert_eq!(record.short_model(), "opus-4-6");
        record.model = "minimax".to_string();
        assert_eq!(record.short_model(), "minimax");
        record.model = String::new();
        assert_eq!(record.short_model(), "unknown");
    }

    #[test]
    fn subagent_tree_parses_nested_children_leniently() {
        let raw = json!([
            {"key": "agent:main:main", "status": "active", "runtimeMs": "61000", "children": [
                {"key": "agent:main:subagent:a", "status": "completed", "depth": 1},
                7,
                {"key": "agent:main:subagent:b", "status": "active", "children": null}
            ]},
            "junk",
            {"status": "failed", "runtimeMs": -5}
        ]);
        let nodes = subagents_from_wire(raw.as_array().expect("array"));
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].runtime_ms, 61_000);
        assert_eq!(nodes[0].children.len(), 2);
        assert_eq!(nodes[0].children[0].depth, 1);
        assert!(nodes[0].children[1].children.is_empty());
        assert_eq!(nodes[1].key, "");
        assert_eq!(nodes[1].runtime_ms, 0);
    }

    #[test]
    fn subagent_walk_visits_every_descendant_in_order() {
        let mut root = SubagentNode::new("root", "active");
        let mut child = SubagentNode::new("child", "completed");
        child.children.push(SubagentNode::new("grandchild", "failed"));
        root.children.push(child);
        root.children.push(SubagentNode::new("sibling", "active"));

        let keys: Vec<&str> = root.walk().iter().map(|node| node.key.as_str()).collect();
        assert_eq!(keys, ["root", "child", "grandchild", "sibling"]);
    }
}
