//! Intent router — classifies a consented contact's free-text message and
//! produces a reply through the chat gateway.
//!
//! Two sequential calls: a triage call that names the intent, then a
//! generation call under an intent-specific persona. Either call failing is
//! a single transient error and the caller records nothing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::consent::model::Contact;
use crate::error::AgentError;
use crate::llm::{ChatGateway, ChatRequest};

/// Temperature for the triage call (deterministic-ish).
const TRIAGE_TEMPERATURE: f32 = 0.3;

/// Temperature and token cap for reply generation.
const REPLY_TEMPERATURE: f32 = 0.7;
const REPLY_MAX_TOKENS: u32 = 200;

/// Fixed intent vocabulary for inbound free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    UpdateNumber,
    CheckStatus,
    MissingData,
    GeneralSupport,
    FollowUp,
}

impl Intent {
    /// Map the triage answer onto the vocabulary by substring, first match
    /// wins. Anything unrecognized falls back to general support.
    pub fn from_answer(answer: &str) -> Self {
        let answer = answer.trim().to_lowercase();
        if answer.contains("update") || answer.contains("number") {
            Intent::UpdateNumber
        } else if answer.contains("status") || answer.contains("check") {
            Intent::CheckStatus
        } else if answer.contains("missing") || answer.contains("data") {
            Intent::MissingData
        } else if answer.contains("follow") {
            Intent::FollowUp
        } else {
            Intent::GeneralSupport
        }
    }

    /// Label of the responder persona handling this intent.
    pub fn agent_label(&self) -> &'static str {
        match self {
            Intent::UpdateNumber | Intent::MissingData => "Missing Data Agent",
            Intent::CheckStatus | Intent::GeneralSupport => "Support Agent",
            Intent::FollowUp => "Follow-Up Agent",
        }
    }
}

/// A generated reply plus the persona that produced it.
#[derive(Debug, Clone)]
pub struct AgentReply {
    pub message: String,
    pub agent: String,
    pub intent: Intent,
}

/// Routes a message through triage and persona generation.
pub struct IntentRouter {
    gateway: Arc<dyn ChatGateway>,
}

impl IntentRouter {
    pub fn new(gateway: Arc<dyn ChatGateway>) -> Self {
        Self { gateway }
    }

    /// Classify `message` and generate a reply for `contact`.
    pub async fn route(&self, message: &str, contact: &Contact) -> Result<AgentReply, AgentError> {
        let intent = self.classify(message, contact).await?;
        info!(intent = ?intent, "Detected intent");

        let reply = self
            .gateway
            .chat(
                ChatRequest::new(persona_prompt(intent, contact), message)
                    .with_temperature(REPLY_TEMPERATURE)
                    .with_max_tokens(REPLY_MAX_TOKENS),
            )
            .await?;

        Ok(AgentReply {
            message: reply,
            agent: intent.agent_label().to_string(),
            intent,
        })
    }

    async fn classify(&self, message: &str, contact: &Contact) -> Result<Intent, AgentError> {
        let user_prompt = format!(
            "Analyze this message and determine the user's intent.\n\
             Possible intents: update_number, check_status, missing_data, general_support, follow_up.\n\
             Message: \"{message}\"\n\
             Contact info: Name: {}, Email: {}, Phone: {}\n\
             Respond with just the intent name.",
            contact.full_name(),
            contact.email.as_deref().unwrap_or("None"),
            contact.phone,
        );

        let answer = self
            .gateway
            .chat(
                ChatRequest::new(
                    "You are a triage agent that identifies user intent.",
                    user_prompt,
                )
                .with_temperature(TRIAGE_TEMPERATURE),
            )
            .await?;

        debug!(answer = %answer, "Triage answer");
        Ok(Intent::from_answer(&answer))
    }
}

/// Intent-specific system persona, with the contact's data interpolated.
fn persona_prompt(intent: Intent, contact: &Contact) -> String {
    let name = contact.full_name();
    let email = contact.email.as_deref().unwrap_or("None");
    let phone = &contact.phone;

    match intent {
        Intent::UpdateNumber => format!(
            "You are a data collection agent. Help the user update their information.\n\
             Current contact data: Name: {name}, Email: {email}, Phone: {phone}.\n\
             Ask what information they want to update and guide them to provide it clearly."
        ),
        Intent::CheckStatus => {
            let consented = contact
                .consent_timestamp
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "You are a support agent. Provide status information about the contact.\n\
                 Contact status: Consent granted on {consented}. Data is being processed.\n\
                 Be helpful and informative."
            )
        }
        Intent::MissingData => format!(
            "You are a data collection agent. The system detected missing information.\n\
             Current data: Name: {name}, Email: {email}, Phone: {phone}.\n\
             Politely ask the user to provide the missing information."
        ),
        Intent::FollowUp => "You are a follow-up agent. Send friendly reminders to complete \
             missing information.\nKeep it professional and encouraging."
            .to_string(),
        Intent::GeneralSupport => "You are a helpful support agent for a contact onboarding \
             service.\nAnswer questions about the service, data processing, and help with any \
             concerns.\nBe professional, friendly, and concise."
            .to_string(),
    }
}
