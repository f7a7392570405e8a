use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::traits::PromptBuilder;

use super::types::*;
use super::OpenAi;

const DEFAULT_MAX_TOKENS: u32 = 2048;

pub struct OpenAiPromptBuilder {
    agent: OpenAi,
    input: String,
    preamble: Option<String>,
    temperature: Option<f32>,
    max_tokens: u32,
}

impl OpenAiPromptBuilder {
    pub(crate) fn new(agent: OpenAi, input: String) -> Self {
        Self {
            agent,
            input,
            preamble: None,
            temperature: None,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    /// The request `send` would issue.
    pub(crate) fn request(&self) -> ChatRequest {
        let mut messages = Vec::new();

        if let Some(ref preamble) = self.preamble {
            messages.push(WireMessage::system(preamble));
        }

        if !self.input.is_empty() {
            messages.push(WireMessage::user(&self.input));
        }

        let model = self.agent.model();
        ChatRequest::new(model)
            .messages(messages)
            .budget(model, self.max_tokens, self.temperature)
    }
}

#[async_trait]
impl PromptBuilder for OpenAiPromptBuilder {
    fn preamble(mut self, preamble: impl Into<String>) -> Self {
        self.preamble = Some(preamble.into());
        self
    }

    fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    async fn send(self) -> Result<String> {
        let request = self.request();
        debug!(model = %request.model, "Sending prompt");
        self.agent.client().chat_text(&request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Agent;

    #[test]
    fn request_sends_preamble_before_input() {
        let agent = OpenAi::new("sk-test", "gpt-4o");
        let request = agent
            .prompt("Who ordered it?")
            .preamble("You are a case analyst.")
            .temperature(0.1)
            .max_tokens(512)
            .request();

        let roles: Vec<Role> = request.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User]);
        assert_eq!(request.messages[0].content, "You are a case analyst.");
        assert_eq!(request.messages[1].content, "Who ordered it?");
        assert_eq!(request.max_tokens, Some(512));
        assert_eq!(request.temperature, Some(0.1));
    }

    #[test]
    fn empty_input_adds_no_user_turn() {
        let agent = OpenAi::new("sk-test", "gpt-4o");
        let request = agent.prompt("").preamble("rules").request();
        assert_eq!(request.messages.len(), 1);
        assert_eq!(request.messages[0].role, Role::System);
    }
}
