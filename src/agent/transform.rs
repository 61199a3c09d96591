//! Input normalizer — turns raw channel payloads into prompt text.
//!
//! Total: never errors. `None` means the payload carries no usable content
//! and the extractor should short-circuit without calling the model.

use serde_json::Value;

use crate::channels::{Channel, MailMessage};

/// Normalize a raw channel payload into prompt-ready text.
///
/// Mail messages get a structured text block with derived routing flags.
/// Every other channel is serialized as JSON with escape sequences relaxed
/// for readability.
pub fn transform(channel: Channel, payload: &Value) -> Option<String> {
    match channel {
        Channel::Gmail => transform_mail(payload),
        _ => Some(transform_generic(payload)),
    }
}

/// Format a mail message as a structured text block.
///
/// Returns `None` when both subject and snippet are absent: there is nothing
/// for the model to analyze. Missing fields render as empty tokens.
fn transform_mail(payload: &Value) -> Option<String> {
    let message: MailMessage = serde_json::from_value(payload.clone()).ok()?;

    let subject = message.subject();
    let snippet = message.snippet.as_deref();
    if subject.is_none() && snippet.is_none() {
        return None;
    }

    let labels = message.label_ids.join(", ");

    Some(format!(
        "title: {}\n\
         content: {}\n\
         from: {}\n\
         to: {}\n\
         labels: {}\n\
         hasImportantLabel: {}\n\
         isNoreply: {}\n\
         isCategoryPromotions: {}",
        subject.unwrap_or_default(),
        snippet.unwrap_or_default(),
        message.from().unwrap_or_default(),
        message.to().unwrap_or_default(),
        labels,
        message.has_important_label(),
        message.is_noreply(),
        message.is_category_promotions(),
    ))
}

/// Serialize an arbitrary payload, unescaping `\n` and `\"` so nested text
/// fields stay readable in the prompt.
fn transform_generic(payload: &Value) -> String {
    payload.to_string().replace("\\n", "\n").replace("\\\"", "\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mail_payload() -> Value {
        json!({
            "id": "mail-1",
            "snippet": "Pay by Friday",
            "labelIds": ["INBOX", "IMPORTANT"],
            "payload": {
                "headers": [
                    {"name": "Subject", "value": "Invoice Due"},
                    {"name": "From", "value": "billing@vendor.com"},
                    {"name": "To", "value": "alice@example.com"}
                ]
            }
        })
    }

    #[test]
    fn mail_block_contains_fields_and_flags() {
        let text = transform(Channel::Gmail, &mail_payload()).unwrap();
        assert!(text.contains("title: Invoice Due"));
        assert!(text.contains("content: Pay by Friday"));
        assert!(text.contains("from: billing@vendor.com"));
        assert!(text.contains("to: alice@example.com"));
        assert!(text.contains("labels: INBOX, IMPORTANT"));
        assert!(text.contains("hasImportantLabel: true"));
        assert!(text.contains("isNoreply: false"));
        assert!(text.contains("isCategoryPromotions: false"));
    }

    #[test]
    fn mail_without_subject_or_snippet_is_no_content() {
        let payload = json!({"id": "mail-2", "labelIds": ["INBOX"]});
        assert!(transform(Channel::Gmail, &payload).is_none());
    }

    #[test]
    fn mail_with_only_snippet_still_renders() {
        let payload = json!({"id": "mail-3", "snippet": "quick note"});
        let text = transform(Channel::Gmail, &payload).unwrap();
        assert!(text.contains("title: \n"));
        assert!(text.contains("content: quick note"));
    }

    #[test]
    fn noreply_flag_is_case_insensitive() {
        let payload = json!({
            "id": "mail-4",
            "snippet": "automated notice",
            "payload": {
                "headers": [{"name": "From", "value": "NoReply@service.com"}]
            }
        });
        let text = transform(Channel::Gmail, &payload).unwrap();
        assert!(text.contains("isNoreply: true"));
    }

    #[test]
    fn generic_channel_serializes_payload() {
        let payload = json!({"title": "Standup", "start": "2026-03-01T09:00:00Z"});
        let text = transform(Channel::GoogleCalendar, &payload).unwrap();
        assert!(text.contains("\"title\":\"Standup\""));
    }

    #[test]
    fn generic_channel_relaxes_escapes() {
        let payload = json!({"body": "line one\nsaid \"hi\""});
        let text = transform(Channel::Notion, &payload).unwrap();
        assert!(text.contains("line one\nsaid \"hi\""));
    }
}
