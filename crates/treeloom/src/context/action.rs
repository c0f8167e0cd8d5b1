//! Transcript entries and their canonical text form.
//!
//! An [`ActionRecord`] is one tool call plus its result. A compression
//! marker is an `ActionRecord` whose `tool_name` is [`SUMMARY_TOOL_NAME`]
//! and whose result carries `_is_summary: true`; it stands in for an
//! arbitrary-length prefix of the transcript.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved tool name of a compression marker.
pub const SUMMARY_TOOL_NAME: &str = "_historical_summary";

/// One tool invocation and its outcome.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
    pub result: ActionResult,
}

/// The result half of an [`ActionRecord`].
///
/// Fields other than `status` and `output` are preserved verbatim in `extra`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ActionResult {
    pub status: String,
    #[serde(default)]
    pub output: String,
    #[serde(rename = "_is_summary", default, skip_serializing_if = "is_false")]
    pub is_summary: bool,
    #[serde(rename = "_compressed", default, skip_serializing_if = "is_false")]
    pub compressed: bool,
    #[serde(
        rename = "_original_tokens",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub original_tokens: Option<usize>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ActionResult {
    pub fn new(status: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            output: output.into(),
            is_summary: false,
            compressed: false,
            original_tokens: None,
            extra: Map::new(),
        }
    }

    pub fn success(output: impl Into<String>) -> Self {
        Self::new("success", output)
    }
}

impl ActionRecord {
    pub fn new(tool_name: impl Into<String>, result: ActionResult) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments: Map::new(),
            result,
        }
    }

    /// Add an argument, builder style.
    pub fn with_argument(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    /// A compression marker carrying `summary`.
    pub fn marker(summary: impl Into<String>) -> Self {
        let mut result = ActionResult::success(summary);
        result.is_summary = true;
        Self::new(SUMMARY_TOOL_NAME, result)
    }

    pub fn is_marker(&self) -> bool {
        self.tool_name == SUMMARY_TOOL_NAME
    }
}

/// Text of an argument value: strings verbatim, anything else as JSON.
pub fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Escape the markup characters `&`, `<` and `>`.
pub fn escape_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Pretty JSON of a result, as embedded in both transcript forms.
pub fn result_json(result: &ActionResult) -> String {
    serde_json::to_string_pretty(result).unwrap_or_else(|_| format!("{result:?}"))
}

/// Canonical serialization used for token counting and summarization.
///
/// ```text
/// <action>
///   <tool_name>read_file</tool_name>
///   <tool_use:path>notes.md</tool_use:path>
///   <result>
/// { ... }
///   </result>
/// </action>
/// ```
///
/// Actions are separated by a blank line.
pub fn canonical_text(actions: &[ActionRecord]) -> String {
    actions
        .iter()
        .map(|action| {
            let mut block = format!("<action>\n  <tool_name>{}</tool_name>\n", action.tool_name);
            for (name, value) in &action.arguments {
                block.push_str(&format!(
                    "  <tool_use:{name}>{}</tool_use:{name}>\n",
                    escape_markup(&value_text(value))
                ));
            }
            block.push_str(&format!(
                "  <result>\n{}\n  </result>\n</action>",
                result_json(&action.result)
            ));
            block
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
