//! Outbound messaging — WhatsApp delivery via the Twilio REST API.
//!
//! Delivery is best-effort: callers log failures and move on. Nothing here
//! retries.

use async_trait::async_trait;
use secrecy::ExposeSecret;

pub use crate::config::MessagingConfig;
use crate::error::MessagingError;

/// Twilio API base. Overridable for tests that point at a local stub.
const TWILIO_API_BASE: &str = "https://api.twilio.com";

/// Outbound notification capability: one message, one delivery id.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send `body` to the digits-only `phone`. Returns the provider's
    /// delivery id.
    async fn send(&self, phone: &str, body: &str) -> Result<String, MessagingError>;
}

/// WhatsApp sender backed by Twilio's Messages endpoint.
pub struct TwilioWhatsApp {
    client: reqwest::Client,
    config: MessagingConfig,
    api_base: String,
}

impl TwilioWhatsApp {
    pub fn new(config: MessagingConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            api_base: TWILIO_API_BASE.to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: &str) -> Self {
        self.api_base = base.to_string();
        self
    }

    fn messages_url(&self) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.api_base, self.config.account_sid
        )
    }
}

#[async_trait]
impl Notifier for TwilioWhatsApp {
    async fn send(&self, phone: &str, body: &str) -> Result<String, MessagingError> {
        let send_err = |reason: String| MessagingError::SendFailed {
            phone: phone.to_string(),
            reason,
        };

        let form = [
            ("From", format!("whatsapp:{}", self.config.from_number)),
            ("To", format!("whatsapp:+{phone}")),
            ("Body", body.to_string()),
        ];

        let response = self
            .client
            .post(self.messages_url())
            .basic_auth(
                &self.config.account_sid,
                Some(self.config.auth_token.expose_secret()),
            )
            .form(&form)
            .send()
            .await
            .map_err(|e| send_err(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(send_err(format!("Twilio API error ({status}): {detail}")));
        }

        let payload: serde_json::Value = response
            .json()
            .await
            .map_err(|e| send_err(e.to_string()))?;

        let sid = payload["sid"].as_str().unwrap_or_default().to_string();
        tracing::info!(phone, sid = %sid, "WhatsApp message sent");
        Ok(sid)
    }
}
