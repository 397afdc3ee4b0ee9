//! Attached-form schemas of action nodes.
//!
//! A schema is stored as a JSON string on the node:
//! `{"Show_Condition": "TRUE", "Fields": {"Motivo": [...], ...}}`.
//! Older records carry `"Fields"` as a bracketed list instead of a map,
//! either as invalid JSON (`"Fields": ["Motivo": [...]]`) or as a list of
//! pairs. [`repair_legacy`] rewrites both into the map shape; it runs once
//! per graph at load time through [`normalize_graph`]. [`FormSchema::parse`]
//! only accepts the canonical shape.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::GraphSnapshot;
use super::node::{Approval, NodeData};
use crate::error::ComposerError;

/// Value of an untouched select field.
pub const PLACEHOLDER: &str = "Selecione uma opção";

const FIELDS_KEY: &str = "Fields";
const SHOW_CONDITION_KEY: &str = "Show_Condition";

/// Which approval outcome makes a field visible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ShowCondition {
    True,
    False,
    Both,
}

impl ShowCondition {
    pub fn is_visible(self, approval: Approval) -> bool {
        match self {
            ShowCondition::Both => true,
            ShowCondition::True => approval == Approval::Approved,
            ShowCondition::False => approval == Approval::Rejected,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FormSchema {
    #[serde(rename = "Show_Condition", default)]
    pub show_condition: Option<ShowCondition>,
    #[serde(rename = "Fields", default)]
    pub fields: Map<String, Value>,
}

impl FormSchema {
    pub fn parse(raw: &str) -> Result<Self, ComposerError> {
        serde_json::from_str(raw).map_err(|e| ComposerError::MalformedFormSchema(e.to_string()))
    }

    /// Names of the fields shown for the given approval status. A field may
    /// carry its own `Show_Condition`; otherwise the schema-level one
    /// applies, and no condition at all means always shown.
    pub fn visible_fields(&self, approval: Approval) -> impl Iterator<Item = &str> {
        self.fields.iter().filter_map(move |(name, spec)| {
            let condition = field_condition(spec).or(self.show_condition);
            match condition {
                Some(c) if !c.is_visible(approval) => None,
                _ => Some(name.as_str()),
            }
        })
    }
}

fn field_condition(spec: &Value) -> Option<ShowCondition> {
    spec.get(SHOW_CONDITION_KEY)
        .cloned()
        .and_then(|v| serde_json::from_value(v).ok())
}

/// Whether a `formData` value counts as filled in.
pub fn is_filled(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::String(s)) => {
            let s = s.trim();
            !s.is_empty() && s != PLACEHOLDER
        }
        Some(Value::Array(items)) => !items.is_empty(),
        Some(Value::Object(map)) => !map.is_empty(),
        Some(Value::Bool(_)) | Some(Value::Number(_)) => true,
    }
}

/// Rewrite a legacy-shaped schema into the canonical one.
///
/// Returns `None` when the input is already canonical or cannot be
/// repaired; in the latter case [`FormSchema::parse`] reports it.
pub fn repair_legacy(raw: &str) -> Option<String> {
    if let Ok(mut value) = serde_json::from_str::<Value>(raw) {
        return fields_list_to_map(&mut value).then(|| value.to_string());
    }

    let patched = rebrace_fields(raw)?;
    let mut value = serde_json::from_str::<Value>(&patched).ok()?;
    fields_list_to_map(&mut value);
    Some(value.to_string())
}

/// Repair every attached form in the graph. Returns how many were rewritten.
pub fn normalize_graph(graph: &mut GraphSnapshot) -> usize {
    let mut repaired = 0;
    for node in &mut graph.nodes {
        let NodeData::Action(action) = &mut node.data else {
            continue;
        };
        let Some(raw) = action.attached_form.as_deref() else {
            continue;
        };
        if let Some(fixed) = repair_legacy(raw) {
            tracing::debug!(node_id = %node.id, "repaired legacy attached form");
            action.attached_form = Some(fixed);
            repaired += 1;
        }
    }
    repaired
}

/// Convert `"Fields": [["k", v], ...]` or `"Fields": [{"k": v}, ...]` into a
/// map. Returns true if the value changed.
fn fields_list_to_map(value: &mut Value) -> bool {
    let Some(Value::Array(items)) = value.get(FIELDS_KEY) else {
        return false;
    };

    let mut map = Map::new();
    for item in items {
        match item {
            Value::Array(pair) if pair.len() == 2 => {
                let Some(key) = pair[0].as_str() else {
                    return false;
                };
                map.insert(key.to_string(), pair[1].clone());
            }
            Value::Object(entries) => {
                map.extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
            _ => return false,
        }
    }

    value[FIELDS_KEY] = Value::Object(map);
    true
}

/// Swap the brackets around the `"Fields"` value for braces, so
/// `"Fields": ["a": 1]` becomes `"Fields": {"a": 1}`.
fn rebrace_fields(raw: &str) -> Option<String> {
    let key = format!("\"{FIELDS_KEY}\"");
    let key_at = raw.find(&key)?;
    let bytes = raw.as_bytes();

    let mut i = key_at + key.len();
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if bytes.get(i) != Some(&b':') {
        return None;
    }
    i += 1;
    while i < bytes.len() && bytes[i].is_ascii_whitespace() {
        i += 1;
    }
    if bytes.get(i) != Some(&b'[') {
        return None;
    }
    let open = i;
    let close = matching_bracket(bytes, open)?;

    let mut patched = String::with_capacity(raw.len());
    patched.push_str(&raw[..open]);
    patched.push('{');
    patched.push_str(&raw[open + 1..close]);
    patched.push('}');
    patched.push_str(&raw[close + 1..]);
    Some(patched)
}

fn matching_bracket(bytes: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[open..].iter().enumerate() {
        if in_string {
            match b {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'[' | b'{' => depth += 1,
            b']' | b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return (b == b']').then_some(open + offset);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_canonical_schema() {
        let schema =
            FormSchema::parse(r#"{"Show_Condition":"TRUE","Fields":{"Motivo":["text"]}}"#)
                .unwrap();
        assert_eq!(schema.show_condition, Some(ShowCondition::True));
        assert!(schema.fields.contains_key("Motivo"));
    }

    #[test]
    fn parse_rejects_legacy_shape() {
        let err = FormSchema::parse(r#"{"Fields":[["Motivo",["text"]]]}"#).unwrap_err();
        assert!(matches!(err, ComposerError::MalformedFormSchema(_)));
    }

    #[test]
    fn repairs_bracketed_object_body() {
        let raw = r#"{"Show_Condition":"FALSE","Fields": ["Motivo": ["text"], "Prazo": ["date", "]"]]}"#;
        let fixed = repair_legacy(raw).unwrap();
        let schema = FormSchema::parse(&fixed).unwrap();
        assert_eq!(schema.show_condition, Some(ShowCondition::False));
        assert_eq!(schema.fields["Motivo"], json!(["text"]));
        assert_eq!(schema.fields["Prazo"], json!(["date", "]"]));
    }

    #[test]
    fn repairs_list_of_pairs() {
        let raw = r#"{"Fields":[["Motivo",["text"]],{"Obs":["textarea"]}]}"#;
        let schema = FormSchema::parse(&repair_legacy(raw).unwrap()).unwrap();
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields.contains_key("Obs"));
    }

    #[test]
    fn canonical_schema_needs_no_repair() {
        assert_eq!(repair_legacy(r#"{"Fields":{"Motivo":[]}}"#), None);
    }

    #[test]
    fn garbage_is_left_for_parse_to_report() {
        assert_eq!(repair_legacy("not json at all"), None);
        assert_eq!(repair_legacy(r#"{"Fields": ["Motivo": ]"#), None);
    }

    #[test]
    fn visibility_follows_show_condition() {
        assert!(ShowCondition::Both.is_visible(Approval::Undefined));
        assert!(ShowCondition::True.is_visible(Approval::Approved));
        assert!(!ShowCondition::True.is_visible(Approval::Rejected));
        assert!(!ShowCondition::True.is_visible(Approval::Undefined));
        assert!(ShowCondition::False.is_visible(Approval::Rejected));
        assert!(!ShowCondition::False.is_visible(Approval::Approved));
    }

    #[test]
    fn field_level_condition_overrides_schema_level() {
        let schema = FormSchema::parse(
            r#"{"Show_Condition":"TRUE","Fields":{"Motivo":[],"Justificativa":{"Show_Condition":"FALSE"},"Obs":{"Show_Condition":"BOTH"}}}"#,
        )
        .unwrap();
        let mut rejected: Vec<&str> = schema.visible_fields(Approval::Rejected).collect();
        rejected.sort();
        assert_eq!(rejected, vec!["Justificativa", "Obs"]);
        let mut approved: Vec<&str> = schema.visible_fields(Approval::Approved).collect();
        approved.sort();
        assert_eq!(approved, vec!["Motivo", "Obs"]);
    }

    #[test]
    fn filled_values() {
        assert!(!is_filled(None));
        assert!(!is_filled(Some(&json!(null))));
        assert!(!is_filled(Some(&json!("  "))));
        assert!(!is_filled(Some(&json!(PLACEHOLDER))));
        assert!(!is_filled(Some(&json!([]))));
        assert!(is_filled(Some(&json!("x"))));
        assert!(is_filled(Some(&json!(0))));
        assert!(is_filled(Some(&json!(["a"]))));
    }
}
