//! Reply drafter.

use std::sync::Arc;

use tracing::{error, warn};

use crate::llm::provider::{CompletionRequest, LlmProvider};
use crate::pipeline::truncate_chars;
use crate::pipeline::types::InboundMessage;

const DRAFT_BODY_CHARS: usize = 3000;
const DRAFT_MAX_TOKENS: u32 = 1024;
const DRAFT_TEMPERATURE: f32 = 0.7;

const DRAFT_PROMPT: &str = "You are a drafting assistant. Draft a reply to the message below, \
written in the first person on behalf of the recipient.\n\n\
CRITICAL RULES (violation = unusable draft):\n\
- NEVER invent URLs, links, or web addresses.\n\
- NEVER fabricate statistics, figures, dates, or prices.\n\
- NEVER claim attachments are included.\n\
- If you are unsure of a fact, say \"I will confirm and follow up\" rather than guessing.\n\n\
Keep the reply short, polite and direct. Output only the reply text, with no preamble.";

/// LLM-backed reply drafter.
pub struct Drafter {
    llm: Arc<dyn LlmProvider>,
    signature: Option<String>,
}

impl Drafter {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self {
            llm,
            signature: None,
        }
    }

    pub fn with_signature(mut self, signature: Option<String>) -> Self {
        self.signature = signature.filter(|s| !s.trim().is_empty());
        self
    }

    fn system_prompt(&self) -> String {
        match &self.signature {
            Some(signature) => format!("{}\nSign off with: {}", DRAFT_PROMPT, signature),
            None => DRAFT_PROMPT.to_string(),
        }
    }

    /// Draft a reply to a classified message. `None` on call failure or
    /// empty output.
    pub async fn draft(&self, msg: &InboundMessage) -> Option<String> {
        let request = CompletionRequest::simple(self.system_prompt(), build_draft_prompt(msg))
            .with_temperature(DRAFT_TEMPERATURE)
            .with_max_tokens(DRAFT_MAX_TOKENS);

        match self.llm.complete(request).await {
            Ok(response) => {
                let text = response.content.trim();
                if text.is_empty() {
                    warn!(message_id = %msg.message_id, "Drafter returned empty text");
                    None
                } else {
                    Some(text.to_string())
                }
            }
            Err(e) => {
                error!(message_id = %msg.message_id, error = %e, "Draft generation failed");
                None
            }
        }
    }
}

fn build_draft_prompt(msg: &InboundMessage) -> String {
    format!(
        "Original message from {}:\nSubject: {}\n---\n{}\n---\n\nClassification: {}\nSuggested action: {}",
        msg.sender,
        msg.subject,
        truncate_chars(&msg.body, DRAFT_BODY_CHARS),
        msg.classification.as_deref().unwrap_or("unknown"),
        msg.suggested_action
            .as_deref()
            .unwrap_or("respond appropriately"),
    )
}
