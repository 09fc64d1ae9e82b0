//! Content resolution: arbitrary nested payloads to flat text.
//!
//! Agent runtimes emit message content as plain strings, arrays of typed
//! parts, or loosely shaped objects, and module outputs of any shape at all.
//! Every function here is total: malformed or unrecognised input resolves to
//! an empty string rather than an error.
//!
//! The field priorities are expressed as rule tables ([`PART_RULES`],
//! [`OBJECT_RULES`], [`MODULE_RULES`]) so they can be tested on their own.

use serde_json::Value;

/// Part `type` tags that always count as text.
pub const TEXTUAL_PART_TYPES: &[&str] = &["text", "output_text", "ai", "assistant", "response", "module"];

/// Nesting depth beyond which module traversal gives up.
pub const MAX_DEPTH: usize = 64;

/// A field extraction step for content parts and content objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    /// String field, or an array of fragments concatenated without separator.
    Text(&'static str),
    /// String field only.
    Str(&'static str),
    /// `data.content` string, for parts whose tag mentions text.
    TaggedDataContent,
}

/// Extraction order for one element of a content array.
pub const PART_RULES: &[Rule] = &[
    Rule::Text("text"),
    Rule::Str("value"),
    Rule::Str("content"),
    Rule::TaggedDataContent,
];

/// Extraction order for a content object.
pub const OBJECT_RULES: &[Rule] = &[Rule::Text("text"), Rule::Str("value"), Rule::Str("content")];

/// A traversal step for module payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleRule {
    /// `text` string (even when empty) or fragment array.
    Text,
    /// Resolved `content`, if non-empty.
    Content,
    /// Resolved `value`, if non-empty.
    Value,
    /// `messages` array, one line per message.
    Messages,
}

/// Preference order inside a module object; unmatched objects fall back to
/// joining every field's text by newline.
pub const MODULE_RULES: &[ModuleRule] = &[
    ModuleRule::Text,
    ModuleRule::Content,
    ModuleRule::Value,
    ModuleRule::Messages,
];

/// Resolve message content to text.
pub fn resolve(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts.iter().map(resolve_part).collect(),
        Value::Object(_) => apply_rules(OBJECT_RULES, content).unwrap_or_default(),
        _ => String::new(),
    }
}

/// Resolve a module payload of arbitrary shape to trimmed text.
pub fn resolve_module(payload: &Value) -> String {
    traverse(payload, 0).trim().to_string()
}

/// Render tool arguments: strings verbatim, structures as pretty JSON.
pub fn args_text(args: &Value) -> String {
    match args {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(_) | Value::Object(_) => {
            serde_json::to_string_pretty(args).unwrap_or_else(|_| args.to_string())
        }
        other => other.to_string(),
    }
}

/// Whether a content part with this tag contributes text.
pub fn is_textual_tag(tag: &str) -> bool {
    TEXTUAL_PART_TYPES.contains(&tag) || tag.contains("text")
}

/// First rule that matches `value`, in table order.
pub fn apply_rules(rules: &[Rule], value: &Value) -> Option<String> {
    rules.iter().find_map(|rule| apply_rule(*rule, value))
}

fn apply_rule(rule: Rule, value: &Value) -> Option<String> {
    match rule {
        Rule::Text(key) => match value.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Array(items) => Some(join_fragments(items)),
            _ => None,
        },
        Rule::Str(key) => value.get(key)?.as_str().map(str::to_string),
        Rule::TaggedDataContent => {
            let tagged = value
                .get("type")
                .and_then(Value::as_str)
                .is_some_and(|tag| tag.contains("text"));
            if !tagged {
                return None;
            }
            value.get("data")?.get("content")?.as_str().map(str::to_string)
        }
    }
}

fn resolve_part(part: &Value) -> String {
    match part {
        Value::String(s) => s.clone(),
        Value::Object(map) => {
            if let Some(tag) = map.get("type").and_then(Value::as_str) {
                if !is_textual_tag(tag) {
                    return String::new();
                }
            }
            apply_rules(PART_RULES, part).unwrap_or_default()
        }
        _ => String::new(),
    }
}

/// Concatenate non-empty fragments of a `text` array.
fn join_fragments(items: &[Value]) -> String {
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(true) => Some("true".to_string()),
            _ => None,
        })
        .collect()
}

fn join_non_empty(parts: impl Iterator<Item = String>, sep: &str) -> String {
    parts.filter(|s| !s.is_empty()).collect::<Vec<_>>().join(sep)
}

fn traverse(value: &Value, depth: usize) -> String {
    if depth > MAX_DEPTH {
        return String::new();
    }
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Array(items) => join_non_empty(items.iter().map(|item| traverse(item, depth + 1)), "\n"),
        Value::Object(map) => {
            if let Some(text) = MODULE_RULES
                .iter()
                .find_map(|rule| apply_module_rule(*rule, value, depth))
            {
                return text;
            }
            join_non_empty(map.values().map(|entry| traverse(entry, depth + 1)), "\n")
        }
    }
}

fn apply_module_rule(rule: ModuleRule, value: &Value, depth: usize) -> Option<String> {
    let non_empty = |s: String| Some(s).filter(|s| !s.is_empty());
    match rule {
        ModuleRule::Text => apply_rule(Rule::Text("text"), value),
        ModuleRule::Content => match value.get("content")? {
            Value::String(s) => non_empty(s.clone()),
            Value::Array(items) => non_empty(join_non_empty(
                items.iter().map(|item| match item {
                    Value::String(s) => s.clone(),
                    other => traverse(other, depth + 1),
                }),
                "",
            )),
            other => non_empty(traverse(other, depth + 1)),
        },
        ModuleRule::Value => non_empty(traverse(value.get("value")?, depth + 1)),
        ModuleRule::Messages => {
            let messages = value.get("messages")?.as_array()?;
            non_empty(join_non_empty(
                messages.iter().map(|message| module_message_text(message, depth + 1)),
                "\n",
            ))
        }
    }
}

fn module_message_text(message: &Value, depth: usize) -> String {
    match message {
        Value::String(s) => s.clone(),
        Value::Object(_) => {
            if let Some(text) = apply_rule(Rule::Text("text"), message) {
                return text;
            }
            match message.get("content") {
                Some(content) if is_truthy(content) => traverse(content, depth + 1),
                _ => String::new(),
            }
        }
        _ => String::new(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_string_is_returned_as_is() {
        assert_eq!(resolve(&json!("  hi  ")), "  hi  ");
    }

    #[test]
    fn parts_are_filtered_by_tag() {
        let content = json!([
            {"type": "text", "text": "Hello "},
            {"type": "image_url", "image_url": "x"},
            {"type": "reasoning_text", "text": "world"},
            {"type": "tool_use", "text": "hidden"},
            {"text": "!"},
            "?",
            42
        ]);
        assert_eq!(resolve(&content), "Hello world!?");
    }

    #[test]
    fn part_rules_follow_table_order() {
        assert_eq!(apply_rules(PART_RULES, &json!({"value": "v", "content": "c"})), Some("v".into()));
        assert_eq!(apply_rules(PART_RULES, &json!({"text": ["a", "", "b"]})), Some("ab".into()));
        assert_eq!(
            apply_rules(PART_RULES, &json!({"type": "text_delta", "data": {"content": "d"}})),
            Some("d".into())
        );
        assert_eq!(apply_rules(PART_RULES, &json!({"data": {"content": "d"}})), None);
        // An empty string still wins over later fields.
        assert_eq!(apply_rules(PART_RULES, &json!({"text": "", "value": "v"})), Some(String::new()));
    }

    #[test]
    fn object_content_uses_object_rules() {
        assert_eq!(resolve(&json!({"content": "c", "value": "v"})), "v");
        assert_eq!(resolve(&json!({"other": "x"})), "");
    }

    #[test]
    fn malformed_content_resolves_empty() {
        assert_eq!(resolve(&Value::Null), "");
        assert_eq!(resolve(&json!(12)), "");
        assert_eq!(resolve(&json!([null, {"type": 5}])), "");
    }

    #[test]
    fn module_prefers_text_then_content_then_value() {
        assert_eq!(resolve_module(&json!({"text": "t", "content": "c"})), "t");
        assert_eq!(resolve_module(&json!({"content": "", "value": {"text": "v"}})), "v");
        assert_eq!(resolve_module(&json!({"content": ["a", {"text": "b"}]})), "ab");
    }

    #[test]
    fn module_messages_join_by_newline() {
        let payload = json!({"messages": ["one", {"text": "two"}, {"content": [{"text": "three"}]}, null]});
        assert_eq!(resolve_module(&payload), "one\ntwo\nthree");
    }

    #[test]
    fn module_falls_back_to_all_fields() {
        let payload = json!({"title": "Plan", "steps": [1, 2], "done": false, "none": null});
        assert_eq!(resolve_module(&payload), "Plan\n1\n2\nfalse");
    }

    #[test]
    fn module_text_is_trimmed() {
        assert_eq!(resolve_module(&json!("  spaced \n")), "spaced");
    }

    #[test]
    fn deep_nesting_is_bounded() {
        let mut payload = json!("leaf");
        for _ in 0..(MAX_DEPTH + 10) {
            payload = json!({ "value": payload });
        }
        assert_eq!(resolve_module(&payload), "");
    }

    #[test]
    fn args_render_by_shape() {
        assert_eq!(args_text(&json!("{\"x\":")), "{\"x\":");
        assert_eq!(args_text(&json!({"x": 1})), "{\n  \"x\": 1\n}");
        assert_eq!(args_text(&json!(3)), "3");
        assert_eq!(args_text(&Value::Null), "");
    }
}
