//! Attribute synthesizer backed by an LLM that replies in JSON.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

use super::{AttributeSynthesizer, LinkDecision, RelevanceJudgment, SynthesizedAttributes};
use crate::error::{Error, Result};
use crate::llm::{ChatMessage, CompletionRequest, LLMClient, ResponseFormat};
use crate::memory::MemoryNote;

const COLLABORATOR: &str = "synthesizer";

const SYNTHESIZE_INSTRUCTION: &str = "Describe the memory note below. Reply with a JSON object \
with fields \"context\" (one sentence), \"keywords\" (array of strings) and \"tags\" \
(array of strings).";

const JUDGE_INSTRUCTION: &str = "Decide whether two memory notes share an actionable \
relationship. Reply with a JSON object with fields \"should_link\" (boolean), \
\"keywords\" and \"tags\" (arrays of strings shared by both notes), and optionally \
\"subject_context\" and \"candidate_context\" (revised one-sentence summaries).";

/// Synthesizer that prompts an [`LLMClient`] and parses its JSON reply.
pub struct LlmSynthesizer {
    client: Arc<dyn LLMClient>,
    model: Option<String>,
    temperature: f64,
    max_tokens: u32,
}

impl LlmSynthesizer {
    pub fn new(client: Arc<dyn LLMClient>) -> Self {
        Self {
            client,
            model: None,
            temperature: 0.0,
            max_tokens: 512,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    async fn ask(&self, instruction: &str, body: String) -> Result<Value> {
        let mut request = CompletionRequest::new()
            .with_system(instruction)
            .with_message(ChatMessage::user(body))
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_response_format(ResponseFormat::JsonObject);
        if let Some(model) = &self.model {
            request = request.with_model(model);
        }

        let response = self.client.complete(request).await?;
        debug!(tokens = response.usage.total(), "Synthesizer reply");
        if response.finish_reason.is_some_and(|r| r.is_truncated()) {
            return Err(Error::collaborator(
                COLLABORATOR,
                format!("reply cut off at {} tokens", self.max_tokens),
            ));
        }

        extract_json(&response.content).ok_or_else(|| {
            Error::collaborator(
                COLLABORATOR,
                format!("reply is not JSON: {}", truncate(&response.content, 200)),
            )
        })
    }
}

#[derive(Debug, Deserialize)]
struct JudgeReply {
    should_link: bool,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    subject_context: Option<String>,
    #[serde(default)]
    candidate_context: Option<String>,
}

fn describe(note: &MemoryNote) -> String {
    format!(
        "content: {}\ncontext: {}\nkeywords: {}\ntags: {}\ncategory: {}",
        note.content,
        note.context,
        note.keywords.iter().cloned().collect::<Vec<_>>().join(", "),
        note.tags.iter().cloned().collect::<Vec<_>>().join(", "),
        note.category,
    )
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

#[async_trait]
impl AttributeSynthesizer for LlmSynthesizer {
    #[instrument(skip(self, content))]
    async fn synthesize(&self, content: &str) -> Result<SynthesizedAttributes> {
        let value = self
            .ask(SYNTHESIZE_INSTRUCTION, format!("content: {}", content))
            .await?;
        serde_json::from_value(value)
            .map_err(|e| Error::collaborator(COLLABORATOR, format!("malformed attributes: {}", e)))
    }

    #[instrument(skip(self, subject, candidate), fields(subject = %subject.id, candidate = %candidate.id))]
    async fn judge(
        &self,
        subject: &MemoryNote,
        candidate: &MemoryNote,
    ) -> Result<RelevanceJudgment> {
        let body = format!(
            "Subject note:\n{}\n\nCandidate note:\n{}",
            describe(subject),
            describe(candidate)
        );
        let value = self.ask(JUDGE_INSTRUCTION, body).await?;
        let reply: JudgeReply = serde_json::from_value(value)
            .map_err(|e| Error::collaborator(COLLABORATOR, format!("malformed judgment: {}", e)))?;

        if !reply.should_link {
            return Ok(RelevanceJudgment::no_link());
        }
        Ok(RelevanceJudgment {
            decision: LinkDecision::Link,
            proposed_keywords: reply.keywords,
            proposed_tags: reply.tags,
            proposed_context_subject: non_empty(reply.subject_context),
            proposed_context_candidate: non_empty(reply.candidate_context),
        })
    }
}

/// Extract the first JSON object from model output.
///
/// Accepts a bare object, a fenced ```json block, or an object embedded in
/// surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(trimmed) {
        return Some(value);
    }

    if let Some(start) = trimmed.find("```") {
        let after_fence = &trimmed[start + 3..];
        let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after_fence[body_start..];
        if let Some(end) = body.find("```") {
            if let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(&body[..end]) {
                return Some(value);
            }
        }
    }

    let start = trimmed.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in trimmed[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return serde_json::from_str(&trimmed[start..start + i + 1]).ok();
                }
            }
            _ => {}
        }
    }
    None
}
