use serde_json::Value;

use super::decode::Frame;
use super::types::StageEvent;

/// Classification of one decoded frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Interpretation {
    /// A recognized stage transition with a valid shape.
    Event(StageEvent),
    /// A discriminator this client does not know. Newer backends may emit these.
    Unknown(String),
    /// No discriminator, or a known one whose payload has the wrong shape.
    Malformed(String),
}

/// Classify a frame into one of the nine stage transitions.
///
/// Pure: nothing is mutated, so it can be exercised without a transport.
pub fn interpret(frame: Frame) -> Interpretation {
    let kind = match frame.get("type") {
        Some(Value::String(kind)) => kind.clone(),
        Some(other) => return Interpretation::Malformed(format!("non-string type: {other}")),
        None => return Interpretation::Malformed("missing type".to_string()),
    };
    if !StageEvent::KINDS.contains(&kind.as_str()) {
        return Interpretation::Unknown(kind);
    }
    match serde_json::from_value(frame) {
        Ok(event) => Interpretation::Event(event),
        Err(e) => Interpretation::Malformed(format!("{kind}: {e}")),
    }
}
