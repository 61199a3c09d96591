//! Structured action records — model output parsing and validation.

use serde::{Deserialize, Serialize};

use crate::error::ExtractError;

/// A validated action extracted from a channel message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Full-sentence action description. Never empty.
    pub text: String,
    pub summary: String,
    /// Exactly three keywords.
    pub keywords: Vec<String>,
    pub suggestions: Vec<String>,
    /// At most four category tags.
    pub labels: Vec<String>,
    /// Integer 0-100. Higher means more urgent.
    pub importance_rating: u8,
}

/// Wire shape of the model output, before validation.
///
/// The model is asked for an integer rating but occasionally emits a float,
/// and suggestions may come back as a bare string instead of an array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawAction {
    text: String,
    summary: String,
    keywords: Vec<String>,
    #[serde(default)]
    suggestions: Suggestions,
    #[serde(default)]
    labels: Vec<String>,
    importance_rating: f64,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Suggestions {
    Many(Vec<String>),
    One(String),
}

impl Default for Suggestions {
    fn default() -> Self {
        Self::Many(Vec::new())
    }
}

impl Suggestions {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::Many(v) => v,
            Self::One(s) => vec![s],
        }
    }
}

/// Derive the 0-5 priority estimate from an importance rating.
pub fn estimate(rating: u8) -> u8 {
    rating / 20
}

/// Parse and validate a model response into an `ActionRecord`.
///
/// Tolerates markdown fencing and surrounding prose when locating the JSON
/// object; the schema itself is checked strictly.
pub fn parse_action(raw: &str) -> Result<ActionRecord, ExtractError> {
    let json_str = extract_json_object(raw);
    let parsed: RawAction = serde_json::from_str(&json_str)
        .map_err(|e| ExtractError::MalformedOutput(format!("JSON parse error: {e}")))?;
    validate(parsed)
}

fn validate(raw: RawAction) -> Result<ActionRecord, ExtractError> {
    if raw.text.trim().is_empty() {
        return Err(ExtractError::SchemaValidation(
            "text must not be empty".into(),
        ));
    }
    if raw.keywords.len() != 3 {
        return Err(ExtractError::SchemaValidation(format!(
            "keywords must have exactly 3 items, got {}",
            raw.keywords.len()
        )));
    }
    if raw.labels.len() > 4 {
        return Err(ExtractError::SchemaValidation(format!(
            "labels must have at most 4 items, got {}",
            raw.labels.len()
        )));
    }

    let rating = raw.importance_rating.round();
    if !(0.0..=100.0).contains(&rating) {
        return Err(ExtractError::SchemaValidation(format!(
            "importanceRating must be between 0 and 100, got {}",
            raw.importance_rating
        )));
    }

    Ok(ActionRecord {
        text: raw.text,
        summary: raw.summary,
        keywords: raw.keywords,
        suggestions: raw.suggestions.into_vec(),
        labels: raw.labels,
        importance_rating: rating as u8,
    })
}

/// Pull the JSON object out of a model response that may include markdown
/// fencing or surrounding prose.
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            return trimmed[start..=end].to_string();
        }
    }

    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "text": "Review and pay the invoice before 18:00.",
        "summary": "Settle the outstanding invoice.",
        "keywords": ["invoice", "payment", "due"],
        "suggestions": ["Open the billing page"],
        "labels": ["intraday", "high", "email"],
        "importanceRating": 88
    }"#;

    #[test]
    fn parses_valid_action() {
        let action = parse_action(VALID).unwrap();
        assert_eq!(action.importance_rating, 88);
        assert_eq!(action.keywords.len(), 3);
        assert_eq!(action.suggestions, vec!["Open the billing page"]);
    }

    #[test]
    fn parses_fenced_output() {
        let fenced = format!("Here is the result:\n```json\n{VALID}\n```\nDone.");
        let action = parse_action(&fenced).unwrap();
        assert_eq!(action.summary, "Settle the outstanding invoice.");
    }

    #[test]
    fn parses_prose_wrapped_output() {
        let wrapped = format!("Sure! {VALID} Let me know if you need more.");
        assert!(parse_action(&wrapped).is_ok());
    }

    #[test]
    fn single_string_suggestions_accepted() {
        let raw = VALID.replace(
            r#"["Open the billing page"]"#,
            r#""No action needed""#,
        );
        let action = parse_action(&raw).unwrap();
        assert_eq!(action.suggestions, vec!["No action needed"]);
    }

    #[test]
    fn float_rating_rounds_to_integer() {
        let raw = VALID.replace("88", "87.6");
        let action = parse_action(&raw).unwrap();
        assert_eq!(action.importance_rating, 88);
    }

    #[test]
    fn rejects_wrong_keyword_count() {
        let raw = VALID.replace(
            r#"["invoice", "payment", "due"]"#,
            r#"["invoice", "payment", "due", "urgent"]"#,
        );
        let err = parse_action(&raw).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation(_)));
    }

    #[test]
    fn rejects_too_many_labels() {
        let raw = VALID.replace(
            r#"["intraday", "high", "email"]"#,
            r#"["intraday", "high", "email", "work", "billing"]"#,
        );
        let err = parse_action(&raw).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation(_)));
    }

    #[test]
    fn rejects_empty_text() {
        let raw = VALID.replace("Review and pay the invoice before 18:00.", "  ");
        let err = parse_action(&raw).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation(_)));
    }

    #[test]
    fn rejects_out_of_range_rating() {
        let raw = VALID.replace("88", "140");
        let err = parse_action(&raw).unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation(_)));
    }

    #[test]
    fn rejects_non_json_output() {
        let err = parse_action("I could not find any action here.").unwrap_err();
        assert!(matches!(err, ExtractError::MalformedOutput(_)));
    }

    #[test]
    fn estimate_boundaries() {
        assert_eq!(estimate(0), 0);
        assert_eq!(estimate(19), 0);
        assert_eq!(estimate(20), 1);
        assert_eq!(estimate(39), 1);
        assert_eq!(estimate(40), 2);
        assert_eq!(estimate(99), 4);
        assert_eq!(estimate(100), 5);
    }
}
