//! Turns free-text model replies into JSON values.
//!
//! Order of attempts, first success wins:
//! 1. empty or whitespace-only text fails immediately;
//! 2. strict parse of the whole trimmed text;
//! 3. fenced-block extraction, then a strict parse of the block as-is;
//! 4. smart-quote and line-ending normalization, then a strict parse;
//! 5. the `{ ... }` span between the first `{` and the last `}`, run through
//!    each [`Repair`] in order, first as written and then normalized.
//!
//! Every candidate goes through `serde_json`'s strict parser, so a repair
//! can only ever turn a failure into the value the text spells out.

pub mod repair;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::config::SNIPPET_LIMIT;
use crate::errors::InterpretError;

pub use repair::Repair;

pub fn interpret(raw: &str) -> Result<Value, InterpretError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(InterpretError::Empty);
    }

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(value);
    }

    let body = repair::strip_code_fence(trimmed);
    if body.len() != trimmed.len()
        && let Ok(value) = serde_json::from_str::<Value>(body)
    {
        return Ok(value);
    }

    let normalized = repair::normalize(body);
    let direct_error = match serde_json::from_str::<Value>(&normalized) {
        Ok(value) => return Ok(value),
        Err(err) => err,
    };

    let (Some(raw_span), Some(span)) = (repair::object_span(body), repair::object_span(&normalized))
    else {
        return Err(malformed(&direct_error.to_string(), raw));
    };

    let mut last_error = direct_error;
    let spans = if raw_span == span { vec![span] } else { vec![raw_span, span] };
    for (candidate_span, candidate) in spans
        .iter()
        .flat_map(|span| Repair::ORDER.map(|repair| (*span, repair)))
    {
        match serde_json::from_str::<Value>(&candidate.apply(candidate_span)) {
            Ok(value) => {
                log::debug!("recovered JSON with repair '{}'", candidate.name());
                return Ok(value);
            }
            Err(err) => last_error = err,
        }
    }

    Err(malformed(&last_error.to_string(), span))
}

/// Interpret `raw` and deserialize the result into `T`.
pub fn interpret_as<T: DeserializeOwned>(raw: &str) -> Result<T, InterpretError> {
    let value = interpret(raw)?;
    serde_json::from_value(value).map_err(|err| malformed(&err.to_string(), raw))
}

/// A whitespace-collapsed prefix of `text`, never longer than
/// [`SNIPPET_LIMIT`] characters.
pub fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= SNIPPET_LIMIT {
        return collapsed;
    }

    let mut cut: String = collapsed.chars().take(SNIPPET_LIMIT - 3).collect();
    cut.push_str("...");
    cut
}

fn malformed(message: &str, text: &str) -> InterpretError {
    InterpretError::Malformed {
        message: message.to_string(),
        snippet: snippet(text),
    }
}
