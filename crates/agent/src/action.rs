//! Structured actions and the parser that recovers them from model replies.

use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("reply is empty")]
    Empty,

    #[error("reply is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("reply is JSON but not an object")]
    NotAnObject,
}

/// What the model asked the browser to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Navigate,
    Wait,
    Done,
    /// A name outside the action table, kept so it can be reported back
    Unsupported(String),
}

impl ActionKind {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "click" => ActionKind::Click,
            "type" => ActionKind::Type,
            "scroll" => ActionKind::Scroll,
            "navigate" => ActionKind::Navigate,
            "wait" => ActionKind::Wait,
            "done" => ActionKind::Done,
            _ => ActionKind::Unsupported(name.trim().to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Scroll => "scroll",
            ActionKind::Navigate => "navigate",
            ActionKind::Wait => "wait",
            ActionKind::Done => "done",
            ActionKind::Unsupported(name) => name,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One parsed model decision
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub observation: String,
    pub reasoning: String,
    pub kind: ActionKind,
    pub args: Map<String, Value>,
}

impl Action {
    /// String argument, only if it is a JSON string
    pub fn arg_str(&self, key: &str) -> Option<&str> {
        self.args.get(key).and_then(Value::as_str)
    }

    /// Argument rendered as text; numbers and booleans are accepted too
    pub fn arg_text(&self, key: &str) -> Option<String> {
        match self.args.get(key)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Integer argument from a JSON number or a numeric string
    pub fn arg_i64(&self, key: &str) -> Option<i64> {
        match self.args.get(key)? {
            Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f.round() as i64)),
            Value::String(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.round() as i64))
            }
            _ => None,
        }
    }
}

/// Parse a raw model reply into an [`Action`].
///
/// Accepts bare JSON, JSON padded with whitespace, or JSON inside the first
/// fenced code block (with or without a language tag). Missing fields take
/// defaults: empty observation and reasoning, `done`, no arguments.
pub fn parse(text: &str) -> Result<Action, ParseError> {
    let trimmed = text.trim();
    let payload = fenced_block(trimmed).unwrap_or(trimmed);
    if payload.is_empty() {
        return Err(ParseError::Empty);
    }

    let value: Value = serde_json::from_str(payload)?;
    let Value::Object(mut fields) = value else {
        return Err(ParseError::NotAnObject);
    };

    let kind = match fields.get("action") {
        Some(Value::String(name)) if !name.trim().is_empty() => ActionKind::from_name(name),
        _ => ActionKind::Done,
    };
    let args = match fields.remove("actionArgs") {
        Some(Value::Object(args)) => args,
        _ => Map::new(),
    };

    Ok(Action {
        observation: text_field(fields.get("observation")),
        reasoning: text_field(fields.get("reasoning")),
        kind,
        args,
    })
}

fn text_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Content of the first ``` fenced block, if one is closed
fn fenced_block(text: &str) -> Option<&str> {
    const FENCE: &str = "```";

    let open = text.find(FENCE)? + FENCE.len();
    let after_open = &text[open..];
    // Language tag runs up to the first non-word character
    let tag_len = after_open
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
        .unwrap_or(after_open.len());
    let body = &after_open[tag_len..];
    let close = body.find(FENCE)?;
    Some(body[..close].trim())
}
