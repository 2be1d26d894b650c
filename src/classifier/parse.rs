//! Lenient interpretation of the classifier's free-text answer.
//!
//! The service is asked for a bare JSON object but may wrap it in code
//! fences or surrounding prose. Missing fields take fixed defaults; most
//! importantly an absent `isSafe` means safe.

use serde_json::{Map, Value};

use crate::error::ClassifierError;
use crate::models::{RiskCategory, SampleKind, Verdict};

pub const DEFAULT_FRAME_REASONING: &str = "Harmful content detected";
pub const DEFAULT_TEXT_REASONING: &str = "Harmful text detected";

pub fn parse_verdict(raw: &str, kind: SampleKind) -> Result<Verdict, ClassifierError> {
    let object = extract_object(raw)?;

    let is_safe = object.get("isSafe").and_then(lenient_bool).unwrap_or(true);

    let category = match object.get("category").and_then(Value::as_str) {
        Some(label) => RiskCategory::from_label(label),
        None if is_safe => RiskCategory::Safe,
        None => RiskCategory::Other,
    };
    // An unsafe verdict never carries the SAFE label.
    let category = match (is_safe, category) {
        (false, RiskCategory::Safe) => RiskCategory::Other,
        (_, category) => category,
    };

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0);

    let reasoning = object
        .get("reasoning")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| default_reasoning(kind).to_string());

    Ok(Verdict {
        is_safe,
        category,
        confidence,
        reasoning,
    })
}

pub fn default_reasoning(kind: SampleKind) -> &'static str {
    match kind {
        SampleKind::Frame => DEFAULT_FRAME_REASONING,
        SampleKind::Text => DEFAULT_TEXT_REASONING,
    }
}

fn extract_object(raw: &str) -> Result<Map<String, Value>, ClassifierError> {
    let cleaned = raw.replace("```json", "").replace("```", "");
    let cleaned = cleaned.trim();

    let parsed = serde_json::from_str::<Value>(cleaned).or_else(|first_err| {
        match (cleaned.find('{'), cleaned.rfind('}')) {
            (Some(start), Some(end)) if start < end => {
                serde_json::from_str::<Value>(&cleaned[start..=end])
            }
            _ => Err(first_err),
        }
    });

    match parsed {
        Ok(Value::Object(object)) => Ok(object),
        Ok(other) => Err(ClassifierError::MalformedResponse(format!(
            "expected a JSON object, got {other}"
        ))),
        Err(err) => Err(ClassifierError::MalformedResponse(err.to_string())),
    }
}

fn lenient_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(text) if text.eq_ignore_ascii_case("true") => Some(true),
        Value::String(text) if text.eq_ignore_ascii_case("false") => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fenced_unsafe_verdict() {
        let raw = "```json\n{\"isSafe\": false, \"category\": \"NUDITY\", \"confidence\": 0.9, \"reasoning\": \"x\"}\n```";
        let verdict = parse_verdict(raw, SampleKind::Frame).unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(verdict.category, RiskCategory::Nudity);
        assert!((verdict.confidence - 0.9).abs() < f32::EPSILON);
        assert_eq!(verdict.reasoning, "x");
    }

    #[test]
    fn missing_is_safe_defaults_to_safe() {
        let verdict =
            parse_verdict("{\"category\": \"NUDITY\", \"confidence\": 0.4}", SampleKind::Frame)
                .unwrap();
        assert!(verdict.is_safe);
    }

    #[test]
    fn fills_defaults_for_unsafe_text() {
        let verdict = parse_verdict("{\"isSafe\": \"false\"}", SampleKind::Text).unwrap();
        assert!(!verdict.is_safe);
        assert_eq!(verdict.category, RiskCategory::Other);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.reasoning, DEFAULT_TEXT_REASONING);
    }

    #[test]
    fn unknown_category_and_out_of_range_confidence() {
        let verdict = parse_verdict(
            "{\"isSafe\": false, \"category\": \"UNSAFE\", \"confidence\": 7}",
            SampleKind::Frame,
        )
        .unwrap();
        assert_eq!(verdict.category, RiskCategory::Other);
        assert_eq!(verdict.confidence, 1.0);
        assert_eq!(verdict.reasoning, DEFAULT_FRAME_REASONING);
    }

    #[test]
    fn extracts_object_from_prose() {
        let raw = "Here is my answer: {\"isSafe\": true, \"category\": \"SAFE\"} hope it helps";
        let verdict = parse_verdict(raw, SampleKind::Frame).unwrap();
        assert!(verdict.is_safe);
        assert_eq!(verdict.category, RiskCategory::Safe);
    }

    #[test]
    fn rejects_non_json() {
        assert!(matches!(
            parse_verdict("I cannot help with that.", SampleKind::Text),
            Err(ClassifierError::MalformedResponse(_))
        ));
        assert!(matches!(
            parse_verdict("[1, 2]", SampleKind::Text),
            Err(ClassifierError::MalformedResponse(_))
        ));
    }
}
