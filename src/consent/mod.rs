//! Consent subsystem — per-contact consent state over inbound messages.

pub mod engine;
pub mod model;

pub use engine::{consent_request_text, ConsentEngine, InboundOutcome};
pub use model::{ConsentStatus, Contact, ConversationTurn, TurnSender};
