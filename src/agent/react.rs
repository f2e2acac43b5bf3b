//! Parser for the Thought / Action / Action Input / Final Answer protocol.

use regex::Regex;
use serde_json::Value;

/// Generation stops here so the model cannot invent its own observations.
pub const STOP_SEQUENCE: &str = "\nObservation:";

const FINAL_ANSWER: &str = "Final Answer:";

/// One parsed model turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReactStep {
    /// The model selected a tool.
    Action {
        /// Tool name as written by the model.
        tool: String,
        /// Raw action input.
        input: String,
    },
    /// The model finished.
    FinalAnswer(String),
}

/// A model turn that does not follow the protocol. The message is fed back
/// to the model as the observation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Neither an action nor a final answer.
    #[error("Invalid Format: Missing 'Action:' after 'Thought:'")]
    MissingAction,
    /// An action without its input.
    #[error("Invalid Format: Missing 'Action Input:' after 'Action:'")]
    MissingActionInput,
    /// Both an action and a final answer in the same turn.
    #[error(
        "Invalid Format: the response contains both a final answer and an action. \
         Either call one tool or give the Final Answer."
    )]
    AmbiguousStep,
    /// Native tool call whose arguments are not a JSON object.
    #[error("Invalid Format: arguments for {tool} must be a JSON object, got: {raw}")]
    InvalidArguments {
        /// Tool the model called.
        tool: String,
        /// Arguments as received.
        raw: String,
    },
}

/// Parse one model turn.
///
/// # Errors
///
/// Returns [`ProtocolError`] when the text has no action and no final answer,
/// an action without input, or both an action and a final answer.
pub fn parse_step(text: &str) -> Result<ReactStep, ProtocolError> {
    // Text past an observation marker was generated after the stop point.
    let text = text
        .split_once(STOP_SEQUENCE)
        .map_or(text, |(before, _)| before);

    let action = action_regex().and_then(|re| {
        re.captures(text).map(|caps| {
            let tool = caps.get(1).map_or("", |m| m.as_str());
            let input = caps.get(2).map_or("", |m| m.as_str());
            (clean_tool_name(tool), clean_input(input))
        })
    });
    let final_answer = text
        .split_once(FINAL_ANSWER)
        .map(|(_, answer)| answer.trim().to_owned());

    match (action, final_answer) {
        (Some(_), Some(_)) => Err(ProtocolError::AmbiguousStep),
        (Some((tool, input)), None) => Ok(ReactStep::Action { tool, input }),
        (None, Some(answer)) => Ok(ReactStep::FinalAnswer(answer)),
        (None, None) => {
            if has_action_label(text) {
                Err(ProtocolError::MissingActionInput)
            } else {
                Err(ProtocolError::MissingAction)
            }
        }
    }
}

/// Interpret a raw action input as the JSON value handed to the tool.
///
/// JSON objects and strings are decoded; anything else stays a plain string.
pub fn input_value(input: &str) -> Value {
    match serde_json::from_str::<Value>(input) {
        Ok(value @ (Value::Object(_) | Value::String(_))) => value,
        _ => Value::String(input.to_owned()),
    }
}

fn action_regex() -> Option<Regex> {
    Regex::new(r"(?s)Action\s*\d*\s*:[\s]*(.*?)[\s]*Action\s*\d*\s*Input\s*\d*\s*:[\s]*(.*)").ok()
}

fn has_action_label(text: &str) -> bool {
    Regex::new(r"Action\s*\d*\s*:")
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

fn clean_tool_name(raw: &str) -> String {
    raw.trim().trim_matches(|c| c == '`' || c == '*' || c == '"').trim().to_owned()
}

fn clean_input(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();
    // A quoted plain-text input is unwrapped; a quoted JSON string is left
    // for `input_value` to decode.
    match trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(inner) if serde_json::from_str::<String>(trimmed).is_err() => inner.to_owned(),
        _ => trimmed.to_owned(),
    }
}
