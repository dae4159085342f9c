//! Contact and conversation types for the consent subsystem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::pipeline::identity::normalize_phone;

/// Per-contact consent state.
///
/// Transitions are driven purely by message content: an exact YES moves any
/// state to `Consented`, an exact NO to `Denied`. There is no terminal
/// state — a denied contact can re-consent later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentStatus {
    Pending,
    Consented,
    Denied,
}

impl ConsentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentStatus::Pending => "pending",
            ConsentStatus::Consented => "consented",
            ConsentStatus::Denied => "denied",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "consented" => ConsentStatus::Consented,
            "denied" => ConsentStatus::Denied,
            _ => ConsentStatus::Pending,
        }
    }
}

/// A contact under consent management.
///
/// Created by the ingestion pipeline for valid records bearing a phone
/// number; mutated only by the consent engine afterwards. The phone is
/// stored digits-only so the upsert key and the webhook lookup key match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contact {
    pub id: Uuid,
    pub owner_id: String,
    pub first_name: String,
    pub last_name: Option<String>,
    pub phone: String,
    pub email: Option<String>,
    pub consent_status: ConsentStatus,
    pub consent_timestamp: Option<DateTime<Utc>>,
    pub latest_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Contact {
    /// Build a pending contact from a cleaned record's name/email/phone.
    ///
    /// The name splits on whitespace: first token becomes the first name,
    /// the rest the surname.
    pub fn from_record(owner_id: &str, name: &str, email: &str, phone: &str) -> Self {
        let mut parts = name.split_whitespace();
        let first_name = parts.next().unwrap_or_default().to_string();
        let rest = parts.collect::<Vec<_>>().join(" ");
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            owner_id: owner_id.to_string(),
            first_name,
            last_name: (!rest.is_empty()).then_some(rest),
            phone: normalize_phone(phone),
            email: (!email.is_empty()).then(|| email.to_string()),
            consent_status: ConsentStatus::Pending,
            consent_timestamp: None,
            latest_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Display name for outbound greetings.
    pub fn greeting_name(&self) -> &str {
        if self.first_name.is_empty() {
            "there"
        } else {
            &self.first_name
        }
    }

    /// Full name for prompt context, or "Unknown" when absent.
    pub fn full_name(&self) -> String {
        let full = match &self.last_name {
            Some(last) => format!("{} {}", self.first_name, last),
            None => self.first_name.clone(),
        };
        if full.trim().is_empty() {
            "Unknown".to_string()
        } else {
            full
        }
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnSender {
    Contact,
    System,
    Agent,
}

impl TurnSender {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnSender::Contact => "contact",
            TurnSender::System => "system",
            TurnSender::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "system" => TurnSender::System,
            "agent" => TurnSender::Agent,
            _ => TurnSender::Contact,
        }
    }
}

/// One message in a contact's conversation log. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    pub contact_id: Uuid,
    pub sender: TurnSender,
    pub message: String,
    pub agent_label: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ConversationTurn {
    fn new(contact_id: Uuid, sender: TurnSender, message: &str, agent_label: Option<&str>) -> Self {
        Self {
            id: Uuid::new_v4(),
            contact_id,
            sender,
            message: message.to_string(),
            agent_label: agent_label.map(str::to_string),
            created_at: Utc::now(),
        }
    }

    pub fn contact(contact_id: Uuid, message: &str) -> Self {
        Self::new(contact_id, TurnSender::Contact, message, None)
    }

    pub fn system(contact_id: Uuid, message: &str) -> Self {
        Self::new(contact_id, TurnSender::System, message, None)
    }

    pub fn agent(contact_id: Uuid, message: &str, label: &str) -> Self {
        Self::new(contact_id, TurnSender::Agent, message, Some(label))
    }
}
