use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

use crate::extract::{self, EnvelopeScan};
use crate::prompting::{
    render_envelope_instruction, render_missing_fields_reminder, render_system_prompt,
    SystemPromptContext,
};
use crate::types::{ChatTurn, LeadPayload};

const CHAT_TEMPERATURE: f64 = 0.7;
const CHAT_MAX_TOKENS: u32 = 800;

/// Exact text `converse` returns when every model attempt failed. The chat
/// handler matches on it and swaps in the offline responder.
pub const OFFLINE_REPLY_MARKER: &str =
    "I'm having trouble reaching our assistant service right now.";

/// Failure surface of a chat-completion provider.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model provider is not configured")]
    NotConfigured,
    #[error("model request failed: {0}")]
    Request(String),
    #[error("model response was unusable: {0}")]
    Response(String),
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Runs one chat completion over the prepared message sequence.
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, ModelError>;

    /// Whether the provider has the credentials it needs to take traffic.
    fn is_configured(&self) -> bool {
        true
    }
}

/// Chat-completions provider backed by the OpenAI API.
pub struct OpenAiProvider {
    client: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn from_env() -> Self {
        let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
        let model =
            std::env::var("OPENAI_CHAT_MODEL").unwrap_or_else(|_| "gpt-3.5-turbo".to_string());
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { client, api_key, model }
    }
}

#[async_trait]
impl ModelProvider for OpenAiProvider {
    async fn complete(&self, messages: &[ChatTurn]) -> Result<String, ModelError> {
        if !self.is_configured() {
            return Err(ModelError::NotConfigured);
        }

        let response = self
            .client
            .post("https://api.openai.com/v1/chat/completions")
            .bearer_auth(&self.api_key)
            .json(&json!({
                "model": self.model,
                "messages": messages,
                "temperature": CHAT_TEMPERATURE,
                "max_tokens": CHAT_MAX_TOKENS,
            }))
            .send()
            .await
            .map_err(|err| ModelError::Request(format!("OpenAI request failed: {err}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ModelError::Response(format!("OpenAI returned {status}: {body}")));
        }

        let payload: Value = response
            .json()
            .await
            .map_err(|err| ModelError::Response(format!("OpenAI response parse failed: {err}")))?;

        let text = payload
            .get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .map(str::trim)
            .unwrap_or_default()
            .to_string();

        if text.is_empty() {
            return Err(ModelError::Response("OpenAI response had no content".to_string()));
        }

        Ok(text)
    }

    fn is_configured(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Retry budget for model invocations. The delay doubles after every failed
/// attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, base_delay: Duration::from_millis(500) }
    }
}

/// What the orchestrator hands back to the HTTP layer for one turn.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub message: String,
    pub lead: Option<LeadPayload>,
}

/// Conversation orchestrator: composes the prompt, calls the model inside a
/// retry budget, and parses the lead envelope out of the reply.
pub struct LeadCaptureAgent {
    provider: Arc<dyn ModelProvider>,
    retry: RetryPolicy,
    org_name: String,
    bot_name: String,
}

impl LeadCaptureAgent {
    pub fn new(provider: Arc<dyn ModelProvider>, retry: RetryPolicy) -> Self {
        let org_name =
            std::env::var("ORG_NAME").unwrap_or_else(|_| "Harborlight Foundation".to_string());
        let bot_name = std::env::var("BOT_NAME").unwrap_or_else(|_| "Mira".to_string());
        Self { provider, retry, org_name, bot_name }
    }

    pub fn provider_configured(&self) -> bool {
        self.provider.is_configured()
    }

    /// One conversation turn. Never returns an error: when the model stays
    /// unreachable the reply is `OFFLINE_REPLY_MARKER` with no lead attached.
    pub async fn converse(&self, user_message: &str, history: &[ChatTurn]) -> AgentReply {
        let messages = self.build_messages(user_message, history);
        let raw = match self.invoke_with_retry(&messages).await {
            Ok(text) => text,
            Err(err) => {
                warn!("model unavailable after {} attempts: {err}", self.retry.attempts);
                return AgentReply { message: OFFLINE_REPLY_MARKER.to_string(), lead: None };
            }
        };

        match extract::scan_envelope(&raw) {
            EnvelopeScan::Parsed { payload, cleaned } => {
                let lead = if payload.is_empty() { None } else { Some(payload) };
                AgentReply { message: cleaned, lead }
            }
            EnvelopeScan::Malformed => {
                warn!("lead envelope present but unparseable, passing reply through unstripped");
                AgentReply { message: raw, lead: None }
            }
            EnvelopeScan::NoEnvelope => AgentReply { message: raw, lead: None },
        }
    }

    /// One-shot minimal completion for the diagnostics endpoint. No retries.
    pub async fn probe_model(&self) -> Result<String, ModelError> {
        let messages = vec![
            ChatTurn::system("You are a connectivity check. Reply with the single word: ok."),
            ChatTurn::user("ping"),
        ];
        self.provider.complete(&messages).await
    }

    fn build_messages(&self, user_message: &str, history: &[ChatTurn]) -> Vec<ChatTurn> {
        let mut messages = Vec::with_capacity(history.len() + 4);
        messages.push(ChatTurn::system(render_system_prompt(&SystemPromptContext {
            org_name: &self.org_name,
            bot_name: &self.bot_name,
        })));
        messages.extend(history.iter().cloned());
        messages.push(ChatTurn::user(user_message));

        let presence = extract::scan_presence(history);
        messages.push(ChatTurn::system(render_missing_fields_reminder(&presence.missing())));
        messages.push(ChatTurn::system(render_envelope_instruction()));
        messages
    }

    async fn invoke_with_retry(&self, messages: &[ChatTurn]) -> Result<String, ModelError> {
        let mut delay = self.retry.base_delay;
        let mut last_err: Option<ModelError> = None;
        for attempt in 1..=self.retry.attempts {
            match self.provider.complete(messages).await {
                Ok(text) => return Ok(text),
                Err(err) => {
                    warn!("model attempt {attempt}/{} failed: {err}", self.retry.attempts);
                    last_err = Some(err);
                }
            }
            if attempt < self.retry.attempts {
                sleep(delay).await;
                delay *= 2;
            }
        }
        Err(last_err.unwrap_or(ModelError::NotConfigured))
    }

    /// Rule-based responder used while the model is unreachable. Replies from
    /// canned text and rebuilds a best-effort lead payload with the free-text
    /// recognizers, so capture keeps working during an outage.
    pub fn offline_reply(&self, user_message: &str, history: &[ChatTurn]) -> AgentReply {
        let mut payload = extract::seed_payload_from_history(history);
        if payload.email.is_none() {
            payload.email = extract::find_email(user_message);
        }
        if payload.phone.is_none() {
            payload.phone = extract::find_phone(user_message);
        }
        if payload.name.is_none() {
            payload.name = extract::find_intro_name(user_message);
        }

        let message = self.canned_response(user_message, &payload);
        let lead = if payload.is_empty() { None } else { Some(payload) };
        AgentReply { message, lead }
    }

    fn canned_response(&self, user_message: &str, payload: &LeadPayload) -> String {
        let lower = user_message.to_lowercase();

        if GREETING_WORDS.iter().any(|w| has_word(&lower, w))
            || lower.contains("good morning")
            || lower.contains("good afternoon")
            || lower.contains("good evening")
        {
            return format!(
                "Hello! I'm {} from {}. We run programs in education, community health, \
                 food security, and youth mentorship. What brings you here today?",
                self.bot_name, self.org_name
            );
        }

        if lower.contains("programs")
            || lower.contains("services")
            || lower.contains("initiatives")
            || lower.contains("what do you do")
        {
            return format!(
                "{} runs four programs: Education Access (tutoring and scholarships), \
                 Community Health (free clinics and wellness checkups), Food Security \
                 (pantries and community meals), and Youth Mentorship (trained volunteer \
                 mentors). Which of these would you like to hear more about?",
                self.org_name
            );
        }

        if let Some(blurb) = program_blurb(&lower) {
            return blurb.to_string();
        }

        if lower.contains("donat") || lower.contains("contribut") || has_word(&lower, "give") {
            return "Donations go directly into our programs: tutoring hours, clinic supplies, \
                    pantry stock, and mentor training. Even small monthly gifts keep a program \
                    running. Would you like our team to send you the details?"
                .to_string();
        }

        if lower.contains("volunteer") || lower.contains("help out") {
            return "We always welcome volunteers! People help with tutoring, staffing our \
                    clinics and pantries, and mentoring young people. If you share a way to \
                    reach you, our coordinator will get in touch about the next orientation."
                .to_string();
        }

        if lower.contains("thank") || lower.contains("appreciate") || lower.contains("grateful") {
            return "You're very welcome! It is lovely to meet people who care about this work. \
                    Is there anything else you would like to know?"
                .to_string();
        }

        if payload.name.is_none() {
            return "Thanks for reaching out! May I ask your name?".to_string();
        }
        if payload.email.is_none() {
            return "Could you share an email address so our team can follow up with you?"
                .to_string();
        }
        if payload.phone.is_none() {
            return "Is there a phone number our team could reach you at?".to_string();
        }

        format!(
            "Thanks for getting in touch with {}. Our team will follow up with you shortly; \
             in the meantime, feel free to ask about any of our programs.",
            self.org_name
        )
    }
}

const GREETING_WORDS: &[&str] = &["hello", "hi", "hey"];

fn has_word(lower: &str, word: &str) -> bool {
    lower.split(|c: char| !c.is_alphanumeric()).any(|token| token == word)
}

fn program_blurb(lower: &str) -> Option<&'static str> {
    if lower.contains("education") || lower.contains("tutor") || lower.contains("scholarship") {
        return Some(
            "Our Education Access program pairs children with tutors, covers school supplies, \
             and funds scholarships for students in underserved neighborhoods. Would you like \
             to get involved?",
        );
    }
    if lower.contains("health") || lower.contains("clinic") || lower.contains("wellness") {
        return Some(
            "Our Community Health program runs free clinics and wellness checkups so families \
             can see a nurse without worrying about the bill. Would you like to hear how to \
             support it?",
        );
    }
    if lower.contains("food") || lower.contains("meal") || lower.contains("pantry") || lower.contains("hunger")
    {
        return Some(
            "Our Food Security program keeps neighborhood pantries stocked and serves community \
             meals every week. Volunteers and donations both make a big difference there.",
        );
    }
    if lower.contains("mentor") || lower.contains("youth") {
        return Some(
            "Our Youth Mentorship program pairs young people with trained volunteer mentors who \
             stick with them through school and beyond. It is one of the most rewarding ways to \
             help.",
        );
    }
    None
}
