//! Reply generation: turns the original email plus the user's answers
//! into a drafted reply body.

use async_trait::async_trait;
use rig::client::CompletionClient;
use rig::completion::Prompt;
use secrecy::ExposeSecret;

use crate::config::LlmConfig;
use crate::conversation::{CorrelatedAnswers, OriginatingEmail};
use crate::error::LlmError;

/// Output of a reply generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedReply {
    pub reply_text: String,
}

/// Produces a reply for an email given the user's answers.
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn generate(
        &self,
        email: &OriginatingEmail,
        answers: &CorrelatedAnswers,
    ) -> Result<GeneratedReply, LlmError>;
}

const SYSTEM_PROMPT: &str = "You draft email replies on behalf of the user. \
You are given the email they received and their answers to a few clarifying questions. \
Write the reply body only: no subject line, no placeholders, no commentary. \
Match the tone of the original email, keep it concise, and use every answer provided. \
If an answer is missing, do not invent a commitment for it.";

/// Build the user prompt for an email and its answers.
pub fn build_prompt(email: &OriginatingEmail, answers: &CorrelatedAnswers) -> String {
    let mut prompt = format!(
        "From: {}\nSubject: {}\n\n{}\n\n",
        email.sender, email.subject, email.body
    );

    if answers.is_empty() {
        prompt.push_str(
            "The user gave no specific answers. Write a brief, polite acknowledgement.",
        );
    } else {
        prompt.push_str("The user's answers:\n");
        for (question, answer) in answers.iter() {
            prompt.push_str(&format!("- Q: {question}\n  A: {answer}\n"));
        }
    }

    prompt
}

/// Anthropic-backed reply generator (via rig-core).
pub struct LlmReplyGenerator {
    client: rig::client::Client<rig::providers::anthropic::client::AnthropicExt>,
    model: String,
}

impl LlmReplyGenerator {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        use rig::providers::anthropic;

        let client: rig::client::Client<anthropic::client::AnthropicExt> =
            anthropic::Client::new(config.api_key.expose_secret()).map_err(|e| {
                LlmError::RequestFailed {
                    provider: "anthropic".to_string(),
                    reason: format!("Failed to create Anthropic client: {}", e),
                }
            })?;

        tracing::info!("Using Anthropic for reply generation (model: {})", config.model);
        Ok(Self {
            client,
            model: config.model.clone(),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl ReplyGenerator for LlmReplyGenerator {
    async fn generate(
        &self,
        email: &OriginatingEmail,
        answers: &CorrelatedAnswers,
    ) -> Result<GeneratedReply, LlmError> {
        let agent = self
            .client
            .agent(&self.model)
            .preamble(SYSTEM_PROMPT)
            .max_tokens(1024)
            .temperature(0.4)
            .build();

        let reply: String = agent
            .prompt(build_prompt(email, answers))
            .await
            .map_err(|e| LlmError::RequestFailed {
                provider: "anthropic".to_string(),
                reason: e.to_string(),
            })?;

        let reply_text = reply.trim().to_string();
        if reply_text.is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: "empty reply".to_string(),
            });
        }

        Ok(GeneratedReply { reply_text })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn email() -> OriginatingEmail {
        OriginatingEmail::new("bob@example.com", "Lunch?", "Are you free Thursday?", "<t1>")
    }

    #[test]
    fn prompt_includes_email_and_answers() {
        let answers = CorrelatedAnswers::from([("Free Thursday?", "yes, after 1pm")]);
        let prompt = build_prompt(&email(), &answers);
        assert!(prompt.contains("From: bob@example.com"));
        assert!(prompt.contains("Subject: Lunch?"));
        assert!(prompt.contains("Are you free Thursday?"));
        assert!(prompt.contains("- Q: Free Thursday?\n  A: yes, after 1pm"));
    }

    #[test]
    fn prompt_without_answers_asks_for_acknowledgement() {
        let prompt = build_prompt(&email(), &CorrelatedAnswers::default());
        assert!(prompt.contains("no specific answers"));
    }

    #[test]
    fn generator_constructs_with_any_key() {
        // rig-core clients accept any string as API key at construction time.
        let config = LlmConfig {
            api_key: secrecy::SecretString::from("test-key"),
            model: "claude-3-5-sonnet-latest".to_string(),
        };
        let generator = LlmReplyGenerator::new(&config).unwrap();
        assert_eq!(generator.model_name(), "claude-3-5-sonnet-latest");
    }
}
