//! Process-wide configuration.
//!
//! Built once at startup from the environment and passed into each
//! component — nothing reads env vars at call sites.

use std::collections::HashMap;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default bind address for the HTTP server.
const DEFAULT_BIND: &str = "0.0.0.0:8080";

/// Default local database path.
const DEFAULT_DB_PATH: &str = "./data/leadflow.db";

/// Default chat-completion gateway base URL.
const DEFAULT_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev";

/// Default model served by the chat gateway.
const DEFAULT_GATEWAY_MODEL: &str = "google/gemini-2.5-flash";

/// Service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address, `host:port`.
    pub bind_addr: String,
    /// Path to the local libSQL database file.
    pub db_path: String,
    /// Bearer token → owner id. A request's token resolves to the owner
    /// whose working set it operates on.
    pub api_tokens: HashMap<String, String>,
    /// Outbound messaging gateway credentials.
    pub messaging: MessagingConfig,
    /// Chat-completion gateway credentials.
    pub chat_gateway: ChatGatewayConfig,
}

/// Credentials for the outbound messaging gateway (Twilio WhatsApp).
#[derive(Clone)]
pub struct MessagingConfig {
    pub account_sid: String,
    pub auth_token: SecretString,
    /// Sender number including the leading `+`.
    pub from_number: String,
}

/// Credentials for the OpenAI-compatible chat gateway.
#[derive(Clone)]
pub struct ChatGatewayConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub model: String,
}

impl Config {
    /// Build the configuration from environment variables.
    ///
    /// `LEADFLOW_API_TOKENS` is a comma-separated list of `token:owner`
    /// pairs; Twilio and gateway credentials are required, everything else
    /// has a default.
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_tokens = parse_api_tokens(&require("LEADFLOW_API_TOKENS")?)?;

        let messaging = MessagingConfig {
            account_sid: require("TWILIO_ACCOUNT_SID")?,
            auth_token: SecretString::from(require("TWILIO_AUTH_TOKEN")?),
            from_number: require("TWILIO_WHATSAPP_NUMBER")?,
        };

        let chat_gateway = ChatGatewayConfig {
            base_url: std::env::var("CHAT_GATEWAY_URL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_URL.to_string()),
            api_key: SecretString::from(require("CHAT_GATEWAY_API_KEY")?),
            model: std::env::var("CHAT_GATEWAY_MODEL")
                .unwrap_or_else(|_| DEFAULT_GATEWAY_MODEL.to_string()),
        };

        Ok(Self {
            bind_addr: std::env::var("LEADFLOW_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string()),
            db_path: std::env::var("LEADFLOW_DB_PATH")
                .unwrap_or_else(|_| DEFAULT_DB_PATH.to_string()),
            api_tokens,
            messaging,
            chat_gateway,
        })
    }
}

fn require(key: &str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::MissingEnvVar(key.to_string()))
}

/// Parse `token:owner,token2:owner2` into a lookup map.
fn parse_api_tokens(raw: &str) -> Result<HashMap<String, String>, ConfigError> {
    let mut tokens = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (token, owner) = pair.split_once(':').ok_or_else(|| ConfigError::InvalidValue {
            key: "LEADFLOW_API_TOKENS".to_string(),
            message: format!("expected token:owner, got {pair:?}"),
        })?;
        if token.is_empty() || owner.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "LEADFLOW_API_TOKENS".to_string(),
                message: "token and owner must be non-empty".to_string(),
            });
        }
        tokens.insert(token.to_string(), owner.to_string());
    }
    if tokens.is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "LEADFLOW_API_TOKENS".to_string(),
            message: "at least one token:owner pair is required".to_string(),
        });
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_pairs() {
        let tokens = parse_api_tokens("abc:owner-1, def:owner-2").unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens["abc"], "owner-1");
        assert_eq!(tokens["def"], "owner-2");
    }

    #[test]
    fn rejects_malformed_pairs() {
        assert!(parse_api_tokens("no-separator").is_err());
        assert!(parse_api_tokens(":owner").is_err());
        assert!(parse_api_tokens("").is_err());
    }
}
