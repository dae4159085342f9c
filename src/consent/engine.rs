//! Consent state machine — consumes inbound messages, owns contact
//! consent state, and hands consented free text to the intent router.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::agents::IntentRouter;
use crate::consent::model::{ConsentStatus, Contact, ConversationTurn};
use crate::error::{ConsentError, Error};
use crate::messaging::Notifier;
use crate::pipeline::identity::normalize_phone;
use crate::store::Database;

/// Confirmation sent after an exact YES.
const CONSENT_CONFIRMATION: &str =
    "Thank you for your consent! Your data will be processed now.";

/// Acknowledgement sent after an exact NO.
const CONSENT_DENIAL_ACK: &str = "Understood. Your data will not be processed. Thank you.";

/// Reminder sent for any other text before consent is granted.
const CONSENT_REMINDER: &str = "We need your YES consent before continuing. Please reply YES \
     to consent to our data processing, or NO to deny.";

/// How an inbound message was handled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    /// Exact YES — contact is now consented.
    ConsentGranted,
    /// Exact NO — contact is now denied.
    ConsentDenied,
    /// Free text before consent — reminder sent, state unchanged.
    ConsentRequired,
    /// Free text after consent — routed to an agent persona.
    AgentReplied { agent: String },
}

impl InboundOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            InboundOutcome::ConsentGranted => "consent_granted",
            InboundOutcome::ConsentDenied => "consent_denied",
            InboundOutcome::ConsentRequired => "consent_required",
            InboundOutcome::AgentReplied { .. } => "agent_replied",
        }
    }
}

/// Per-contact consent protocol over asynchronous inbound events.
pub struct ConsentEngine {
    db: Arc<dyn Database>,
    notifier: Arc<dyn Notifier>,
    router: IntentRouter,
}

impl ConsentEngine {
    pub fn new(db: Arc<dyn Database>, notifier: Arc<dyn Notifier>, router: IntentRouter) -> Self {
        Self {
            db,
            notifier,
            router,
        }
    }

    /// Handle one inbound message.
    ///
    /// Transitions are driven purely by message content: an exact
    /// (trimmed, case-insensitive) YES or NO flips consent regardless of
    /// the current state; anything else either draws a reminder or, once
    /// consented, goes to the intent router. Router failure leaves no
    /// conversation state behind.
    pub async fn handle_inbound(&self, phone: &str, body: &str) -> Result<InboundOutcome, Error> {
        let phone = normalize_phone(phone);
        let contact = self
            .db
            .get_contact_by_phone(&phone)
            .await?
            .ok_or(ConsentError::ContactNotFound {
                phone: phone.clone(),
            })?;

        info!(phone = %phone, contact_id = %contact.id, "Inbound message");

        let reply = body.trim().to_uppercase();
        match reply.as_str() {
            "YES" => self.grant(&contact, body).await,
            "NO" => self.deny(&contact, body).await,
            _ if contact.consent_status != ConsentStatus::Consented => {
                self.remind(&contact, body).await
            }
            _ => self.converse(&contact, body).await,
        }
    }

    async fn grant(&self, contact: &Contact, body: &str) -> Result<InboundOutcome, Error> {
        self.db
            .set_consent(contact.id, ConsentStatus::Consented, Some(Utc::now()), body)
            .await?;
        self.db
            .append_turns(&[ConversationTurn::contact(contact.id, body)])
            .await?;
        self.send_best_effort(&contact.phone, CONSENT_CONFIRMATION).await;

        info!(contact_id = %contact.id, "Consent granted");
        Ok(InboundOutcome::ConsentGranted)
    }

    async fn deny(&self, contact: &Contact, body: &str) -> Result<InboundOutcome, Error> {
        self.db
            .set_consent(contact.id, ConsentStatus::Denied, None, body)
            .await?;
        self.db
            .append_turns(&[ConversationTurn::contact(contact.id, body)])
            .await?;
        self.send_best_effort(&contact.phone, CONSENT_DENIAL_ACK).await;

        info!(contact_id = %contact.id, "Consent denied");
        Ok(InboundOutcome::ConsentDenied)
    }

    async fn remind(&self, contact: &Contact, body: &str) -> Result<InboundOutcome, Error> {
        self.db
            .append_turns(&[ConversationTurn::contact(contact.id, body)])
            .await?;
        self.send_best_effort(&contact.phone, CONSENT_REMINDER).await;
        Ok(InboundOutcome::ConsentRequired)
    }

    async fn converse(&self, contact: &Contact, body: &str) -> Result<InboundOutcome, Error> {
        // Route before any write: if either gateway call fails the
        // conversation log stays exactly as it was.
        let reply = self.router.route(body, contact).await?;

        self.db
            .append_turns(&[
                ConversationTurn::contact(contact.id, body),
                ConversationTurn::agent(contact.id, &reply.message, &reply.agent),
            ])
            .await?;
        self.db.set_latest_message(contact.id, body).await?;
        self.send_best_effort(&contact.phone, &reply.message).await;

        Ok(InboundOutcome::AgentReplied { agent: reply.agent })
    }

    /// Outbound delivery never fails the webhook; failures are logged only.
    async fn send_best_effort(&self, phone: &str, text: &str) {
        if let Err(e) = self.notifier.send(phone, text).await {
            warn!(error = %e, "Outbound message failed");
        }
    }
}

/// The consent-request greeting sent to a newly created contact.
pub fn consent_request_text(contact: &Contact) -> String {
    format!(
        "Hi {}! Welcome to LeadFlow. To proceed with processing your data, please reply \
         YES to consent to our data processing. Reply NO to deny. Thank you!",
        contact.greeting_name()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::IntentRouter;
    use crate::consent::model::TurnSender;
    use crate::error::{AgentError, MessagingError};
    use crate::llm::{ChatGateway, ChatRequest};
    use crate::store::LibSqlBackend;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Notifier stub that records every send.
    struct RecordingNotifier {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingNotifier {
        fn new() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, phone: &str, body: &str) -> Result<String, MessagingError> {
            if self.fail {
                return Err(MessagingError::SendFailed {
                    phone: phone.to_string(),
                    reason: "stub failure".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((phone.to_string(), body.to_string()));
            Ok("SM_stub".to_string())
        }
    }

    /// Gateway stub with fixed triage + reply answers, or a hard failure.
    struct FixedGateway {
        fail: bool,
    }

    #[async_trait]
    impl ChatGateway for FixedGateway {
        async fn chat(&self, request: ChatRequest) -> Result<String, AgentError> {
            if self.fail {
                return Err(AgentError::Gateway {
                    reason: "gateway down".into(),
                });
            }
            if request.system.contains("triage") {
                Ok("check_status".to_string())
            } else {
                Ok("Your data is being processed.".to_string())
            }
        }
    }

    async fn engine_with(
        gateway_fails: bool,
    ) -> (ConsentEngine, Arc<LibSqlBackend>, Arc<RecordingNotifier>) {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::new());
        let router = IntentRouter::new(Arc::new(FixedGateway {
            fail: gateway_fails,
        }));
        let engine = ConsentEngine::new(db.clone(), notifier.clone(), router);
        (engine, db, notifier)
    }

    async fn seed_contact(db: &Arc<LibSqlBackend>, status: ConsentStatus) -> Contact {
        let contact = Contact::from_record("owner-1", "John Doe", "j@x.com", "1234567890");
        db.upsert_contact(&contact).await.unwrap();
        if status != ConsentStatus::Pending {
            let ts = (status == ConsentStatus::Consented).then(Utc::now);
            db.set_consent(contact.id, status, ts, "seed").await.unwrap();
        }
        db.get_contact(contact.id).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn yes_from_pending_grants_consent() {
        let (engine, db, notifier) = engine_with(false).await;
        let contact = seed_contact(&db, ConsentStatus::Pending).await;

        let outcome = engine.handle_inbound("1234567890", "yes").await.unwrap();
        assert_eq!(outcome, InboundOutcome::ConsentGranted);

        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.consent_status, ConsentStatus::Consented);
        assert!(loaded.consent_timestamp.is_some());
        assert_eq!(loaded.latest_message.as_deref(), Some("yes"));

        let turns = db.list_turns(contact.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].sender, TurnSender::Contact);

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].1.contains("Thank you for your consent"));
    }

    #[tokio::test]
    async fn no_denies_and_acknowledges() {
        let (engine, db, notifier) = engine_with(false).await;
        let contact = seed_contact(&db, ConsentStatus::Pending).await;

        let outcome = engine.handle_inbound("1234567890", " No ").await.unwrap();
        assert_eq!(outcome, InboundOutcome::ConsentDenied);

        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.consent_status, ConsentStatus::Denied);
        assert!(loaded.consent_timestamp.is_none());

        let sent = notifier.sent.lock().unwrap();
        assert!(sent[0].1.contains("will not be processed"));
    }

    #[tokio::test]
    async fn free_text_while_pending_draws_reminder_only() {
        let (engine, db, notifier) = engine_with(false).await;
        let contact = seed_contact(&db, ConsentStatus::Pending).await;

        let outcome = engine
            .handle_inbound("1234567890", "yes please")
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::ConsentRequired);

        // No transition on anything but an exact YES/NO.
        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.consent_status, ConsentStatus::Pending);

        let turns = db.list_turns(contact.id).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert!(notifier.sent.lock().unwrap()[0].1.contains("YES"));
    }

    #[tokio::test]
    async fn consented_free_text_routes_to_agent() {
        let (engine, db, notifier) = engine_with(false).await;
        let contact = seed_contact(&db, ConsentStatus::Consented).await;

        let outcome = engine
            .handle_inbound("1234567890", "What's my status?")
            .await
            .unwrap();
        assert_eq!(
            outcome,
            InboundOutcome::AgentReplied {
                agent: "Support Agent".to_string()
            }
        );

        let turns = db.list_turns(contact.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].sender, TurnSender::Contact);
        assert_eq!(turns[1].sender, TurnSender::Agent);
        assert_eq!(turns[1].agent_label.as_deref(), Some("Support Agent"));

        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.latest_message.as_deref(), Some("What's my status?"));

        let sent = notifier.sent.lock().unwrap();
        assert_eq!(sent[0].1, "Your data is being processed.");
    }

    #[tokio::test]
    async fn router_failure_writes_no_turns() {
        let (engine, db, notifier) = engine_with(true).await;
        let contact = seed_contact(&db, ConsentStatus::Consented).await;

        let err = engine
            .handle_inbound("1234567890", "What's my status?")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Agent(AgentError::Gateway { .. })));

        // No dangling half-conversation, nothing sent.
        assert!(db.list_turns(contact.id).await.unwrap().is_empty());
        assert!(notifier.sent.lock().unwrap().is_empty());
        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.latest_message.as_deref(), Some("seed"));
    }

    #[tokio::test]
    async fn unknown_phone_is_not_found() {
        let (engine, _db, notifier) = engine_with(false).await;
        let err = engine.handle_inbound("9999999999", "yes").await.unwrap_err();
        assert!(matches!(
            err,
            Error::Consent(ConsentError::ContactNotFound { .. })
        ));
        assert!(notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn denied_contact_can_reconsent() {
        let (engine, db, _notifier) = engine_with(false).await;
        let contact = seed_contact(&db, ConsentStatus::Denied).await;

        let outcome = engine.handle_inbound("1234567890", "YES").await.unwrap();
        assert_eq!(outcome, InboundOutcome::ConsentGranted);

        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.consent_status, ConsentStatus::Consented);
    }

    #[tokio::test]
    async fn inbound_phone_is_normalized_before_lookup() {
        let (engine, db, _notifier) = engine_with(false).await;
        seed_contact(&db, ConsentStatus::Pending).await;

        // Same digits with separators and a plus still resolve.
        let outcome = engine
            .handle_inbound("+1 (234) 567-890", "yes")
            .await
            .unwrap();
        assert_eq!(outcome, InboundOutcome::ConsentGranted);
    }

    #[tokio::test]
    async fn send_failure_never_fails_the_transition() {
        let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let notifier = Arc::new(RecordingNotifier::failing());
        let router = IntentRouter::new(Arc::new(FixedGateway { fail: false }));
        let engine = ConsentEngine::new(db.clone(), notifier, router);
        let contact = seed_contact(&db, ConsentStatus::Pending).await;

        let outcome = engine.handle_inbound("1234567890", "yes").await.unwrap();
        assert_eq!(outcome, InboundOutcome::ConsentGranted);
        let loaded = db.get_contact(contact.id).await.unwrap().unwrap();
        assert_eq!(loaded.consent_status, ConsentStatus::Consented);
    }
}
