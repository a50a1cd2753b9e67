//! Message classifier: one LLM call per inbound message, structured verdict out.
//!
//! Classification is fail-closed. Any call or parse failure yields `None` and
//! the message goes no further.

use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::llm::provider::{CompletionRequest, LlmProvider};
use crate::pipeline::truncate_chars;
use crate::pipeline::types::{InboundMessage, Urgency};

/// Body characters shown to the classifier.
const CLASSIFY_BODY_CHARS: usize = 2000;

const CLASSIFY_MAX_TOKENS: u32 = 256;

const CLASSIFY_TEMPERATURE: f32 = 0.3;

const CLASSIFY_PROMPT: &str = "You are a message triage assistant. \
Classify the following message. Respond with ONLY a JSON object:\n\
{\n  \"urgency\": \"low|normal|high|critical\",\n  \
\"classification\": \"one of: personal, work, reply, newsletter, automated, spam, unknown\",\n  \
\"needs_response\": true/false,\n  \
\"summary\": \"one sentence summary\",\n  \
\"suggested_action\": \"brief description of recommended action or null\"\n}\n\n\
Rules:\n\
- Newsletters, marketing and automated notifications never need a response\n\
- Use \"critical\" only for messages that need action within hours\n\
- When unsure whether a reply is needed, answer true";

/// Structured classification of one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub urgency: Urgency,
    pub classification: String,
    pub needs_response: bool,
    pub summary: String,
    pub suggested_action: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawVerdict {
    #[serde(default)]
    urgency: Option<String>,
    #[serde(default)]
    classification: Option<String>,
    #[serde(default)]
    needs_response: bool,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    suggested_action: Option<String>,
}

/// LLM-backed classifier.
pub struct Classifier {
    llm: Arc<dyn LlmProvider>,
    /// Operator-supplied paragraph appended to the system prompt.
    context: Option<String>,
}

impl Classifier {
    pub fn new(llm: Arc<dyn LlmProvider>) -> Self {
        Self { llm, context: None }
    }

    pub fn with_context(mut self, context: Option<String>) -> Self {
        self.context = context.filter(|c| !c.trim().is_empty());
        self
    }

    fn system_prompt(&self) -> String {
        match &self.context {
            Some(context) => format!("{}\n\nContext: {}", CLASSIFY_PROMPT, context),
            None => CLASSIFY_PROMPT.to_string(),
        }
    }

    /// Classify `msg`, writing urgency, classification and suggested action
    /// onto it. `None` on any failure.
    pub async fn classify(&self, msg: &mut InboundMessage) -> Option<Verdict> {
        let request = CompletionRequest::simple(self.system_prompt(), build_classify_prompt(msg))
            .with_temperature(CLASSIFY_TEMPERATURE)
            .with_max_tokens(CLASSIFY_MAX_TOKENS);

        let response = match self.llm.complete(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(message_id = %msg.message_id, error = %e, "Classification call failed");
                return None;
            }
        };

        let verdict = match parse_verdict(&response.content) {
            Ok(verdict) => verdict,
            Err(e) => {
                warn!(
                    message_id = %msg.message_id,
                    raw_response = %response.content,
                    error = %e,
                    "Classification parse failed, dropping message"
                );
                return None;
            }
        };

        msg.urgency = verdict.urgency;
        msg.classification = Some(verdict.classification.clone());
        msg.suggested_action = verdict.suggested_action.clone();
        debug!(
            message_id = %msg.message_id,
            urgency = %verdict.urgency,
            classification = %verdict.classification,
            needs_response = verdict.needs_response,
            "Message classified"
        );
        Some(verdict)
    }
}

/// Build the user turn describing the message.
fn build_classify_prompt(msg: &InboundMessage) -> String {
    format!(
        "Channel: {}\nFrom: {}\nSubject: {}\nBody:\n{}",
        msg.channel,
        msg.sender,
        msg.subject,
        truncate_chars(&msg.body, CLASSIFY_BODY_CHARS)
    )
}

/// Strip one leading and one trailing Markdown code fence, if present.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string (e.g. `json`) on the opening fence line.
    let rest = rest.split_once('\n').map_or("", |(_, body)| body);
    let rest = match rest.rfind("```") {
        Some(end) => &rest[..end],
        None => rest,
    };
    rest.trim()
}

/// Parse model output into a verdict.
pub fn parse_verdict(raw: &str) -> Result<Verdict, String> {
    let parsed: RawVerdict =
        serde_json::from_str(strip_code_fence(raw)).map_err(|e| format!("JSON parse error: {e}"))?;

    Ok(Verdict {
        urgency: parsed
            .urgency
            .as_deref()
            .map(Urgency::parse_lenient)
            .unwrap_or_default(),
        classification: parsed
            .classification
            .filter(|c| !c.trim().is_empty())
            .unwrap_or_else(|| "unknown".into()),
        needs_response: parsed.needs_response,
        summary: parsed.summary.unwrap_or_default(),
        suggested_action: parsed
            .suggested_action
            .filter(|a| !a.trim().is_empty() && a != "null"),
    })
}
