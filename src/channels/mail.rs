//! Mail channel types — the provider's message shape plus header lookup.

use serde::{Deserialize, Serialize};

/// Label id the mail provider sets on messages it flags important.
pub const LABEL_IMPORTANT: &str = "IMPORTANT";

/// Label id for the promotions category.
pub const LABEL_CATEGORY_PROMOTIONS: &str = "CATEGORY_PROMOTIONS";

/// A mail message as delivered by the provider's API.
///
/// Only the fields the normalizer reads are modeled; everything else in the
/// raw payload is ignored on deserialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailMessage {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub thread_id: Option<String>,
    /// Short plain-text preview of the body.
    #[serde(default)]
    pub snippet: Option<String>,
    /// Provider label ids (e.g. "IMPORTANT", "CATEGORY_PROMOTIONS").
    #[serde(default)]
    pub label_ids: Vec<String>,
    #[serde(default)]
    pub payload: Option<MailPayload>,
}

/// The MIME payload portion of a mail message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailPayload {
    #[serde(default)]
    pub headers: Vec<MailHeader>,
}

/// A single RFC 822 header.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailHeader {
    pub name: String,
    pub value: String,
}

impl MailMessage {
    /// Look up a header value by name (case-sensitive, matching the provider).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|h| h.name == name)
            .map(|h| h.value.as_str())
    }

    pub fn subject(&self) -> Option<&str> {
        self.header("Subject")
    }

    pub fn from(&self) -> Option<&str> {
        self.header("From")
    }

    pub fn to(&self) -> Option<&str> {
        self.header("To")
    }

    /// Whether the provider marked this message important.
    pub fn has_important_label(&self) -> bool {
        self.label_ids.iter().any(|l| l == LABEL_IMPORTANT)
    }

    /// Whether the sender address looks automated.
    pub fn is_noreply(&self) -> bool {
        self.from()
            .is_some_and(|f| f.to_lowercase().contains("noreply"))
    }

    /// Whether the provider categorized this as promotional.
    pub fn is_category_promotions(&self) -> bool {
        self.label_ids.iter().any(|l| l == LABEL_CATEGORY_PROMOTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message_with_headers(headers: Vec<(&str, &str)>) -> MailMessage {
        MailMessage {
            payload: Some(MailPayload {
                headers: headers
                    .into_iter()
                    .map(|(name, value)| MailHeader {
                        name: name.into(),
                        value: value.into(),
                    })
                    .collect(),
            }),
            ..Default::default()
        }
    }

    #[test]
    fn header_lookup() {
        let msg = message_with_headers(vec![
            ("Subject", "Invoice Due"),
            ("From", "billing@acme.com"),
            ("To", "user@example.com"),
        ]);
        assert_eq!(msg.subject(), Some("Invoice Due"));
        assert_eq!(msg.from(), Some("billing@acme.com"));
        assert_eq!(msg.to(), Some("user@example.com"));
    }

    #[test]
    fn missing_payload_yields_no_headers() {
        let msg = MailMessage::default();
        assert!(msg.subject().is_none());
        assert!(msg.from().is_none());
    }

    #[test]
    fn noreply_detection_is_case_insensitive() {
        let msg = message_with_headers(vec![("From", "NoReply@service.com")]);
        assert!(msg.is_noreply());

        let msg = message_with_headers(vec![("From", "alice@example.com")]);
        assert!(!msg.is_noreply());
    }

    #[test]
    fn label_flags() {
        let msg = MailMessage {
            label_ids: vec!["IMPORTANT".into(), "CATEGORY_PROMOTIONS".into()],
            ..Default::default()
        };
        assert!(msg.has_important_label());
        assert!(msg.is_category_promotions());

        let msg = MailMessage {
            label_ids: vec!["INBOX".into()],
            ..Default::default()
        };
        assert!(!msg.has_important_label());
        assert!(!msg.is_category_promotions());
    }

    #[test]
    fn deserializes_provider_json() {
        let raw = r#"{
            "id": "18f0",
            "threadId": "18f0",
            "snippet": "Pay by Friday",
            "labelIds": ["INBOX", "IMPORTANT"],
            "payload": {
                "headers": [
                    {"name": "Subject", "value": "Invoice Due"},
                    {"name": "From", "value": "billing@acme.com"}
                ],
                "mimeType": "text/plain"
            },
            "sizeEstimate": 4096
        }"#;
        let msg: MailMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(msg.snippet.as_deref(), Some("Pay by Friday"));
        assert_eq!(msg.subject(), Some("Invoice Due"));
        assert!(msg.has_important_label());
    }
}
