//! Action extractor — normalizes a channel payload, runs the model, and
//! validates the result into an `ExtractOutcome`.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::agent::action::{self, ActionRecord};
use crate::agent::{prompts, transform};
use crate::channels::Channel;
use crate::error::ExtractError;
use crate::llm::{ChatMessage, CompletionRequest, LlmProvider};
use crate::store::model::{UserPortrait, UserProfile};

/// Sampling temperature for extraction. Low, since we want schema-stable JSON.
const EXTRACT_TEMPERATURE: f64 = 0.2;

/// Token ceiling for a single extraction response.
const EXTRACT_MAX_TOKENS: u64 = 1024;

/// Everything needed to extract an action from one channel message.
pub struct ExtractRequest<'a> {
    pub channel: Channel,
    pub payload: &'a Value,
    pub profile: &'a UserProfile,
    pub portrait: Option<&'a UserPortrait>,
}

/// Result of one extraction run.
///
/// `action` is `None` when the payload carried no usable content; in that
/// case `estimate` is always 0.
#[derive(Debug, Clone)]
pub struct ExtractOutcome {
    pub action: Option<ActionRecord>,
    pub estimate: u8,
}

impl ExtractOutcome {
    fn no_content() -> Self {
        Self {
            action: None,
            estimate: 0,
        }
    }
}

/// Converts inbound channel messages into rated action records.
pub struct ActionExtractor {
    llm: Arc<dyn LlmProvider>,
}

impl ActionExtractor {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm }
    }

    /// Extract a structured action from a channel payload.
    ///
    /// Empty payloads (e.g. a mail message with neither subject nor snippet)
    /// short-circuit without a model call. Model and schema failures
    /// propagate; the caller decides whether to retry.
    pub async fn extract(
        &self,
        request: ExtractRequest<'_>,
    ) -> Result<ExtractOutcome, ExtractError> {
        let Some(input) = transform::transform(request.channel, request.payload) else {
            debug!(channel = %request.channel, "Payload has no content, skipping extraction");
            return Ok(ExtractOutcome::no_content());
        };

        let prompt = format!(
            "{}\n{}",
            prompts::profile_context(request.profile, request.portrait, Utc::now()),
            prompts::content_block(&input),
        );

        let completion = CompletionRequest::new(vec![
            ChatMessage::system(prompts::extraction_policy(request.channel)),
            ChatMessage::user(prompt),
        ])
        .with_temperature(EXTRACT_TEMPERATURE)
        .with_max_tokens(EXTRACT_MAX_TOKENS);

        let response = self.llm.complete(completion).await?;
        debug!(
            model = self.llm.model_name(),
            input_tokens = response.input_tokens,
            output_tokens = response.output_tokens,
            "Extraction completion finished"
        );

        let action = action::parse_action(&response.content)?;
        let estimate = action::estimate(action.importance_rating);
        info!(
            channel = %request.channel,
            rating = action.importance_rating,
            estimate,
            "Action extracted"
        );

        Ok(ExtractOutcome {
            action: Some(action),
            estimate,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LlmError;
    use crate::llm::CompletionResponse;
    use async_trait::async_trait;
    use serde_json::json;

    /// Mock provider returning a canned response (or failing).
    struct MockLlm {
        response: Result<String, ()>,
    }

    impl MockLlm {
        fn returning(content: &str) -> Arc<Self> {
            Arc::new(Self {
                response: Ok(content.to_string()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self { response: Err(()) })
        }
    }

    #[async_trait]
    impl LlmProvider for MockLlm {
        fn model_name(&self) -> &str {
            "mock-model"
        }

        async fn complete(
            &self,
            _request: CompletionRequest,
        ) -> Result<CompletionResponse, LlmError> {
            match &self.response {
                Ok(content) => Ok(CompletionResponse {
                    content: content.clone(),
                    input_tokens: 100,
                    output_tokens: 50,
                }),
                Err(()) => Err(LlmError::RequestFailed {
                    provider: "mock".into(),
                    reason: "model unavailable".into(),
                }),
            }
        }
    }

    fn mail_payload() -> Value {
        json!({
            "id": "mail-1",
            "snippet": "Pay by Friday",
            "payload": {
                "headers": [{"name": "Subject", "value": "Invoice Due"}]
            }
        })
    }

    fn request<'a>(payload: &'a Value, profile: &'a UserProfile) -> ExtractRequest<'a> {
        ExtractRequest {
            channel: Channel::Gmail,
            payload,
            profile,
            portrait: None,
        }
    }

    #[tokio::test]
    async fn extracts_action_and_estimate() {
        let llm = MockLlm::returning(
            r#"{
                "text": "Review and pay the invoice before Friday.",
                "summary": "Settle the outstanding invoice.",
                "keywords": ["invoice", "payment", "due"],
                "suggestions": ["Open the billing page"],
                "labels": ["intraday", "high", "email"],
                "importanceRating": 88
            }"#,
        );
        let extractor = ActionExtractor::new(llm);
        let profile = UserProfile::empty("u1");
        let payload = mail_payload();

        let outcome = extractor.extract(request(&payload, &profile)).await.unwrap();
        let action = outcome.action.unwrap();
        assert_eq!(action.importance_rating, 88);
        assert_eq!(outcome.estimate, 4);
    }

    #[tokio::test]
    async fn empty_mail_short_circuits_without_model_call() {
        // A failing provider proves the model is never invoked.
        let extractor = ActionExtractor::new(MockLlm::failing());
        let profile = UserProfile::empty("u1");
        let payload = json!({"id": "mail-2", "labelIds": ["INBOX"]});

        let outcome = extractor.extract(request(&payload, &profile)).await.unwrap();
        assert!(outcome.action.is_none());
        assert_eq!(outcome.estimate, 0);
    }

    #[tokio::test]
    async fn zero_score_output_yields_zero_estimate() {
        let llm = MockLlm::returning(
            r#"{
                "text": "Brand-triggered item detected; no action is required.",
                "summary": "Filtered by keyword.",
                "keywords": ["brand", "filtered", "receipt"],
                "suggestions": ["No action needed"],
                "labels": ["monthly", "low", "email"],
                "importanceRating": 0
            }"#,
        );
        let extractor = ActionExtractor::new(llm);
        let profile = UserProfile::empty("u1");
        let payload = mail_payload();

        let outcome = extractor.extract(request(&payload, &profile)).await.unwrap();
        assert_eq!(outcome.estimate, 0);
        assert_eq!(
            outcome.action.unwrap().suggestions,
            vec!["No action needed"]
        );
    }

    #[tokio::test]
    async fn promotional_output_stays_in_low_band() {
        let llm = MockLlm::returning(
            r#"{
                "text": "Promotional email detected; no action is required.",
                "summary": "Promotional content filtered.",
                "keywords": ["promotional", "filtered", "email"],
                "suggestions": "No action needed",
                "labels": ["monthly", "low", "email"],
                "importanceRating": 5
            }"#,
        );
        let extractor = ActionExtractor::new(llm);
        let profile = UserProfile::empty("u1");
        let payload = mail_payload();

        let outcome = extractor.extract(request(&payload, &profile)).await.unwrap();
        let action = outcome.action.unwrap();
        assert!((3..=10).contains(&action.importance_rating));
        assert_eq!(action.suggestions, vec!["No action needed"]);
        assert_eq!(outcome.estimate, 0);
    }

    #[tokio::test]
    async fn schema_violation_is_an_error() {
        let llm = MockLlm::returning(
            r#"{
                "text": "Do the thing.",
                "summary": "Thing.",
                "keywords": ["one", "two"],
                "suggestions": [],
                "labels": [],
                "importanceRating": 50
            }"#,
        );
        let extractor = ActionExtractor::new(llm);
        let profile = UserProfile::empty("u1");
        let payload = mail_payload();

        let err = extractor.extract(request(&payload, &profile)).await.unwrap_err();
        assert!(matches!(err, ExtractError::SchemaValidation(_)));
    }

    #[tokio::test]
    async fn llm_failure_propagates() {
        let extractor = ActionExtractor::new(MockLlm::failing());
        let profile = UserProfile::empty("u1");
        let payload = mail_payload();

        let err = extractor.extract(request(&payload, &profile)).await.unwrap_err();
        assert!(matches!(err, ExtractError::Llm(_)));
    }
}
