//! Structured output extraction
//!
//! Turns free-form model text into a JSON object or array. Malformed text gets exactly one
//! repair attempt through a fast model; anything still unusable becomes `None`. Nothing in
//! this module returns an error or panics on bad input.

mod repair;
mod scan;

use serde_json::Value;
use tracing::debug;

pub use repair::{Extractor, REPAIR_SYSTEM_PROMPT};
pub use scan::{Region, find_region, strip_fences};

/// The top-level JSON shape a caller expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Object,
    Array,
}

impl Shape {
    fn opener(self) -> u8 {
        match self {
            Shape::Object => b'{',
            Shape::Array => b'[',
        }
    }

    fn other(self) -> Shape {
        match self {
            Shape::Object => Shape::Array,
            Shape::Array => Shape::Object,
        }
    }
}

/// Why text could not be turned into the expected shape
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseFailure {
    /// Nothing left after stripping fences
    Empty,
    /// The isolated fragment is not valid JSON; repair may help
    Syntax { fragment: String, error: String },
    /// Valid JSON of the wrong shape, e.g. a bare scalar
    Shape { found: &'static str },
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Isolate the JSON fragment most likely to hold the expected shape
///
/// A region that runs off the end of the text wins over anything nested inside it, so
/// truncated output surfaces as a syntax failure instead of a plausible inner fragment.
fn isolate(text: &str, shape: Shape) -> &str {
    let primary = find_region(text, shape.opener());
    let fallback = find_region(text, shape.other().opener());

    match (primary, fallback) {
        (Region::Balanced(start, _), Region::Unclosed(outer)) if outer < start => &text[outer..],
        (Region::Balanced(start, end), _) => &text[start..end],
        (Region::Unclosed(start), Region::Unclosed(outer)) => &text[start.min(outer)..],
        (Region::Unclosed(start), _) => &text[start..],
        (Region::Missing, Region::Balanced(start, end)) => &text[start..end],
        (Region::Missing, Region::Unclosed(start)) => &text[start..],
        (Region::Missing, Region::Missing) => text,
    }
}

/// Accept the value if it has the expected shape, unwrapping single-item containers
fn conform(value: Value, shape: Shape) -> Result<Value, ParseFailure> {
    match (shape, value) {
        (Shape::Object, v @ Value::Object(_)) => Ok(v),
        (Shape::Array, v @ Value::Array(_)) => Ok(v),
        (Shape::Object, Value::Array(mut items)) if items.len() == 1 && items[0].is_object() => Ok(items.remove(0)),
        (Shape::Array, Value::Object(map)) if map.len() == 1 && map.values().all(Value::is_array) => {
            Ok(map.into_iter().map(|(_, v)| v).next().unwrap_or(Value::Array(Vec::new())))
        }
        (_, other) => Err(ParseFailure::Shape { found: kind_of(&other) }),
    }
}

/// Strip fences, isolate, strictly parse and shape-check `raw`
pub fn parse_shaped(raw: &str, shape: Shape) -> Result<Value, ParseFailure> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(ParseFailure::Empty);
    }

    let fragment = isolate(&text, shape);
    debug!(?shape, fragment_len = fragment.len(), "parse_shaped: isolated fragment");
    match serde_json::from_str::<Value>(fragment) {
        Ok(value) => conform(value, shape),
        Err(e) => Err(ParseFailure::Syntax {
            fragment: fragment.to_string(),
            error: e.to_string(),
        }),
    }
}

/// Extraction without a repair model
pub fn extract_local(raw: Option<&str>, shape: Shape) -> Option<Value> {
    parse_shaped(raw?, shape).ok()
}
