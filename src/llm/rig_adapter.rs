//! Bridges rig's `CompletionModel` to our `LlmProvider` trait.

use async_trait::async_trait;
use rig::agent::AgentBuilder;
use rig::completion::{AssistantContent, Completion, CompletionModel};

use crate::error::LlmError;
use crate::llm::provider::{ChatMessage, CompletionRequest, CompletionResponse, LlmProvider, Role};

/// Adapter wrapping a rig completion model.
pub struct RigAdapter<M: CompletionModel> {
    model: M,
    name: String,
}

impl<M: CompletionModel> RigAdapter<M> {
    pub fn new(model: M, name: &str) -> Self {
        Self {
            model,
            name: name.to_string(),
        }
    }
}

/// Split messages into a preamble (system) and a single prompt string.
fn split_messages(messages: &[ChatMessage]) -> (String, String) {
    let mut preamble = String::new();
    let mut prompt = String::new();

    for message in messages {
        match message.role {
            Role::System => {
                if !preamble.is_empty() {
                    preamble.push_str("\n\n");
                }
                preamble.push_str(&message.content);
            }
            Role::User | Role::Assistant => {
                if !prompt.is_empty() {
                    prompt.push_str("\n\n");
                }
                prompt.push_str(&message.content);
            }
        }
    }

    (preamble, prompt)
}

#[async_trait]
impl<M: CompletionModel> LlmProvider for RigAdapter<M> {
    fn model_name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        let (preamble, prompt) = split_messages(&request.messages);

        let mut builder = AgentBuilder::new(self.model.clone());
        if !preamble.is_empty() {
            builder = builder.preamble(&preamble);
        }
        if let Some(temperature) = request.temperature {
            builder = builder.temperature(temperature);
        }
        if let Some(max_tokens) = request.max_tokens {
            builder = builder.max_tokens(max_tokens);
        }
        let agent = builder.build();

        let response = agent
            .completion(prompt, Vec::new())
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.name.clone(),
                reason: format!("failed to build completion: {e}"),
            })?
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: self.name.clone(),
                reason: e.to_string(),
            })?;

        let content: String = response
            .choice
            .iter()
            .filter_map(|part| match part {
                AssistantContent::Text(text) => Some(text.text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("");

        if content.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: self.name.clone(),
                reason: "model returned no text content".into(),
            });
        }

        Ok(CompletionResponse {
            content,
            input_tokens: response.usage.input_tokens,
            output_tokens: response.usage.output_tokens,
        })
    }
}
