//! Line-delimited transcript records.
//!
//! Every line is decoded independently. A line that is not a JSON object is
//! reported as `None` and skipped by the scanner; it never fails the scan.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    User,
    Assistant,
    Other(Option<String>),
}

impl EventKind {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("user" | "human") => Self::User,
            Some("assistant") => Self::Assistant,
            Some(other) => Self::Other(Some(other.to_string())),
            None => Self::Other(None),
        }
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        matches!(self, Self::User)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    ToolUse {
        id: Option<String>,
        name: String,
        input: Map<String, Value>,
    },
    ToolResult {
        tool_use_id: Option<String>,
        is_error: bool,
        content: Option<String>,
    },
    Other,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl MessageContent {
    fn from_value(value: Option<&Value>) -> Self {
        match value {
            Some(Value::String(text)) => Self::Text(text.clone()),
            Some(Value::Array(items)) => {
                Self::Blocks(items.iter().map(ContentBlock::from_value).collect())
            }
            _ => Self::Blocks(Vec::new()),
        }
    }

    /// Flattens the payload into one string.
    ///
    /// Tool-result text is command output; it is useful context for linking
    /// but produces false positives when looking for user corrections, so
    /// callers choose whether to include it.
    #[must_use]
    pub fn text(&self, include_tool_results: bool) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Blocks(blocks) => {
                let mut parts: Vec<&str> = Vec::new();
                for block in blocks {
                    match block {
                        ContentBlock::Text(text) => parts.push(text),
                        ContentBlock::ToolResult {
                            content: Some(content),
                            ..
                        } if include_tool_results => parts.push(content),
                        _ => {}
                    }
                }
                parts.join(" ")
            }
        }
    }

    #[must_use]
    pub fn blocks(&self) -> &[ContentBlock] {
        match self {
            Self::Text(_) => &[],
            Self::Blocks(blocks) => blocks,
        }
    }
}

impl ContentBlock {
    fn from_value(value: &Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::Other;
        };

        match object.get("type").and_then(Value::as_str) {
            Some("text") => Self::Text(
                object
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
            ),
            Some("tool_use") => Self::ToolUse {
                id: non_empty_str(object.get("id")),
                name: object
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                input: object
                    .get("input")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default(),
            },
            Some("tool_result") => Self::ToolResult {
                tool_use_id: non_empty_str(object.get("tool_use_id")),
                is_error: object
                    .get("is_error")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
                content: flatten_result_content(object.get("content")),
            },
            _ => Self::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TranscriptEvent {
    pub kind: EventKind,
    pub content: MessageContent,
}

impl TranscriptEvent {
    /// Decodes one transcript line. Returns `None` for anything that is not a
    /// JSON object.
    #[must_use]
    pub fn from_line(line: &str) -> Option<Self> {
        let value: Value = serde_json::from_str(line.trim()).ok()?;
        Self::from_value(&value)
    }

    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let kind = EventKind::parse(object.get("type").and_then(Value::as_str));
        let content = MessageContent::from_value(
            object
                .get("message")
                .and_then(Value::as_object)
                .and_then(|message| message.get("content")),
        );
        Some(Self { kind, content })
    }
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|raw| !raw.is_empty())
        .map(str::to_string)
}

fn flatten_result_content(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => {
            let texts = items
                .iter()
                .filter_map(Value::as_object)
                .filter(|block| block.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|block| block.get("text").and_then(Value::as_str))
                .collect::<Vec<_>>();
            Some(texts.join(" "))
        }
        _ => None,
    }
}
