use alert_core::config::TelegramConfig;
use alert_core::ports::{MessageAction, MessageChannel};
use alert_core::ChannelError;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Descriptions the Bot API uses when a chat can no longer be reached.
const BLOCKED_MARKERS: &[&str] = &[
    "bot was blocked by the user",
    "user is deactivated",
    "chat not found",
    "bot was kicked",
];

#[derive(Debug, Default, Deserialize)]
struct ResponseParameters {
    retry_after: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BotApiResponse {
    ok: bool,
    description: Option<String>,
    parameters: Option<ResponseParameters>,
}

/// Maps a failed Bot API response onto the channel error taxonomy.
fn classify_failure(status: u16, recipient: i64, body: BotApiResponse) -> ChannelError {
    let description = body
        .description
        .unwrap_or_else(|| "no description".to_string());
    let lowered = description.to_lowercase();

    if status == 403 || BLOCKED_MARKERS.iter().any(|m| lowered.contains(m)) {
        return ChannelError::Blocked {
            recipient,
            reason: description,
        };
    }

    if status == 429 {
        let retry_after_secs = body
            .parameters
            .and_then(|p| p.retry_after)
            .unwrap_or(1);
        return ChannelError::RateLimited { retry_after_secs };
    }

    ChannelError::Api {
        status,
        description,
    }
}

/// Telegram Bot API channel. Without a bot token every send fails with
/// `NotConfigured`.
pub struct TelegramChannel {
    client: reqwest::Client,
    endpoint: Option<String>,
}

impl TelegramChannel {
    pub fn new(config: &TelegramConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| anyhow!("Failed to create HTTP client: {}", e))?;

        let endpoint = match &config.bot_token {
            Some(token) => {
                tracing::info!("Telegram channel initialized");
                Some(format!(
                    "{}/bot{}/sendMessage",
                    config.api_base.trim_end_matches('/'),
                    token
                ))
            }
            None => {
                tracing::warn!("Telegram delivery disabled (TELEGRAM_BOT_TOKEN not set)");
                None
            }
        };

        Ok(Self { client, endpoint })
    }

    async fn post(&self, recipient: i64, payload: Value) -> Result<(), ChannelError> {
        let endpoint = self
            .endpoint
            .as_deref()
            .ok_or_else(|| ChannelError::NotConfigured("TELEGRAM_BOT_TOKEN not set".into()))?;

        let response = self
            .client
            .post(endpoint)
            .json(&payload)
            .send()
            .await
            // without_url keeps the bot token out of logs
            .map_err(|e| ChannelError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        let body: BotApiResponse = response.json().await.unwrap_or_default();

        if status.is_success() && body.ok {
            tracing::debug!(recipient, "Telegram message delivered");
            return Ok(());
        }

        Err(classify_failure(status.as_u16(), recipient, body))
    }
}

fn message_payload(recipient: i64, text: &str) -> Value {
    json!({
        "chat_id": recipient,
        "text": text,
        "parse_mode": "HTML",
        "disable_web_page_preview": true,
    })
}

#[async_trait]
impl MessageChannel for TelegramChannel {
    async fn send_message(&self, recipient: i64, text: &str) -> Result<(), ChannelError> {
        self.post(recipient, message_payload(recipient, text)).await
    }

    async fn send_message_with_action(
        &self,
        recipient: i64,
        text: &str,
        action: &MessageAction,
    ) -> Result<(), ChannelError> {
        let mut payload = message_payload(recipient, text);
        payload["reply_markup"] = json!({
            "inline_keyboard": [[{
                "text": action.text,
                "callback_data": action.callback_data,
            }]]
        });
        self.post(recipient, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn channel(server: &MockServer) -> TelegramChannel {
        TelegramChannel::new(&TelegramConfig {
            bot_token: Some("TOKEN".into()),
            api_base: server.uri(),
        })
        .unwrap()
    }

    #[test]
    fn forbidden_is_blocked() {
        let err = classify_failure(
            403,
            11,
            BotApiResponse {
                ok: false,
                description: Some("Forbidden: bot was blocked by the user".into()),
                parameters: None,
            },
        );
        assert!(err.is_blocked());
    }

    #[test]
    fn chat_not_found_is_blocked_even_on_400() {
        let err = classify_failure(
            400,
            11,
            BotApiResponse {
                ok: false,
                description: Some("Bad Request: chat not found".into()),
                parameters: None,
            },
        );
        assert!(err.is_blocked());
    }

    #[test]
    fn too_many_requests_carries_retry_after() {
        let err = classify_failure(
            429,
            11,
            BotApiResponse {
                ok: false,
                description: Some("Too Many Requests: retry after 7".into()),
                parameters: Some(ResponseParameters { retry_after: Some(7) }),
            },
        );
        assert!(matches!(err, ChannelError::RateLimited { retry_after_secs: 7 }));
    }

    #[tokio::test]
    async fn sends_html_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({"chat_id": 42, "parse_mode": "HTML"})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": {}})),
            )
            .expect(1)
            .mount(&server)
            .await;

        channel(&server).send_message(42, "<b>hi</b>").await.unwrap();
    }

    #[tokio::test]
    async fn action_becomes_inline_keyboard() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/botTOKEN/sendMessage"))
            .and(body_partial_json(json!({
                "reply_markup": {
                    "inline_keyboard": [[{"text": "Mute", "callback_data": "mute:node:n1"}]]
                }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let action = MessageAction {
            text: "Mute".into(),
            callback_data: "mute:node:n1".into(),
        };
        channel(&server)
            .send_message_with_action(42, "down", &action)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn blocked_response_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_json(json!({
                "ok": false,
                "error_code": 403,
                "description": "Forbidden: bot was blocked by the user"
            })))
            .mount(&server)
            .await;

        let err = channel(&server).send_message(42, "hi").await.unwrap_err();
        assert!(err.is_blocked());
    }

    #[tokio::test]
    async fn missing_token_is_not_configured() {
        let channel = TelegramChannel::new(&TelegramConfig {
            bot_token: None,
            api_base: "http://unused".into(),
        })
        .unwrap();
        let err = channel.send_message(1, "hi").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotConfigured(_)));
    }
}
