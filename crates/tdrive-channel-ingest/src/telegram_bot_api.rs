//! Telegram Bot API session: `getMe` authorization and `getUpdates` long polling.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;

use crate::channel_identity::normalize;
use crate::platform_session::{
    AuthStatus, BotIdentity, PlatformError, PlatformSession, PolledUpdates,
};
use crate::platform_update::{
    DocumentAttribute, DocumentKind, DocumentMedia, MessageMedia, Peer, PlatformMessage,
    PlatformUpdates, UpdateEvent,
};

pub const DEFAULT_TELEGRAM_API_BASE: &str = "https://api.telegram.org";
pub const DEFAULT_POLL_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 45_000;

const ALLOWED_UPDATES: &str = r#"["message","channel_post","edited_channel_post"]"#;
const DEFAULT_RATE_LIMIT_RETRY_AFTER: Duration = Duration::from_secs(1);

#[derive(Clone, PartialEq, Eq)]
pub struct TelegramBotConfig {
    pub api_base: String,
    pub bot_token: String,
    pub poll_timeout_seconds: u64,
    pub request_timeout: Duration,
}

impl TelegramBotConfig {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_TELEGRAM_API_BASE.to_string(),
            bot_token: bot_token.into(),
            poll_timeout_seconds: DEFAULT_POLL_TIMEOUT_SECONDS,
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }

    /// Bot id encoded in the token prefix (`<bot-id>:<secret>`).
    pub fn token_bot_id(&self) -> Option<i64> {
        token_bot_id(&self.bot_token)
    }
}

impl std::fmt::Debug for TelegramBotConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBotConfig")
            .field("api_base", &self.api_base)
            .field("bot_token", &"<redacted>")
            .field("poll_timeout_seconds", &self.poll_timeout_seconds)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

fn token_bot_id(token: &str) -> Option<i64> {
    let (prefix, secret) = token.trim().split_once(':')?;
    if secret.is_empty() {
        return None;
    }
    prefix.parse::<i64>().ok().filter(|id| *id > 0)
}

#[derive(Debug, Clone, Deserialize)]
struct ApiEnvelope<T> {
    ok: bool,
    #[serde(default = "Option::default")]
    result: Option<T>,
    #[serde(default)]
    error_code: Option<i64>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Deserialize)]
struct ResponseParameters {
    #[serde(default)]
    retry_after: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct WireUser {
    id: i64,
    #[serde(default)]
    is_bot: bool,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireUpdate {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<WireMessage>,
    #[serde(default)]
    pub channel_post: Option<WireMessage>,
    #[serde(default)]
    pub edited_message: Option<Value>,
    #[serde(default)]
    pub edited_channel_post: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireMessage {
    pub message_id: i64,
    #[serde(default)]
    pub date: Option<i64>,
    pub chat: WireChat,
    #[serde(default)]
    pub document: Option<WireFile>,
    #[serde(default)]
    pub audio: Option<WireFile>,
    #[serde(default)]
    pub video: Option<WireFile>,
    #[serde(default)]
    pub animation: Option<WireFile>,
    #[serde(default)]
    pub voice: Option<WireFile>,
    #[serde(default)]
    pub video_note: Option<WireFile>,
    #[serde(default)]
    pub photo: Option<Vec<Value>>,
    #[serde(default)]
    pub sticker: Option<Value>,
    #[serde(default)]
    pub location: Option<Value>,
    #[serde(default)]
    pub contact: Option<Value>,
    #[serde(default)]
    pub poll: Option<Value>,
    #[serde(default)]
    pub dice: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireChat {
    pub id: i64,
    #[serde(rename = "type", default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WireFile {
    pub file_id: String,
    #[serde(default)]
    pub file_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub file_size: Option<u64>,
}

/// Bot API client bound to one bot token.
pub struct TelegramBotSession {
    http: reqwest::Client,
    api_base: String,
    bot_token: String,
    poll_timeout_seconds: u64,
}

impl std::fmt::Debug for TelegramBotSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramBotSession")
            .field("api_base", &self.api_base)
            .field("poll_timeout_seconds", &self.poll_timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl TelegramBotSession {
    pub fn new(config: &TelegramBotConfig) -> Result<Self> {
        let bot_token = config.bot_token.trim();
        if bot_token.is_empty() {
            bail!("telegram bot token cannot be empty");
        }
        let api_base = config.api_base.trim().trim_end_matches('/');
        if api_base.is_empty() {
            bail!("telegram api base cannot be empty");
        }
        let poll_window = Duration::from_secs(config.poll_timeout_seconds);
        if config.request_timeout <= poll_window {
            bail!(
                "request timeout ({}ms) must exceed the long-poll timeout ({}s)",
                config.request_timeout.as_millis(),
                config.poll_timeout_seconds
            );
        }

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("tdrive-ingest"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("application/json"),
        );
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.request_timeout)
            .build()
            .context("failed to create telegram api client")?;

        Ok(Self {
            http,
            api_base: api_base.to_string(),
            bot_token: bot_token.to_string(),
            poll_timeout_seconds: config.poll_timeout_seconds,
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
    ) -> Result<T, PlatformError> {
        let url = format!("{}/bot{}/{method}", self.api_base, self.bot_token);
        let response = self
            .http
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|error| {
                PlatformError::Connection(format!(
                    "telegram {method} transport error: {}",
                    error.without_url()
                ))
            })?;
        let status = response.status().as_u16();
        let header_retry_after = parse_retry_after_header(response.headers());
        let body = response.bytes().await.map_err(|error| {
            PlatformError::Connection(format!(
                "telegram {method} body read error: {}",
                error.without_url()
            ))
        })?;
        decode_api_response(method, status, header_retry_after, &body)
    }
}

#[async_trait]
impl PlatformSession for TelegramBotSession {
    async fn auth_status(
        &mut self,
        persisted: Option<&BotIdentity>,
    ) -> Result<AuthStatus, PlatformError> {
        let expected = token_bot_id(&self.bot_token);
        Ok(match persisted {
            Some(identity) if expected == Some(identity.bot_id) => {
                AuthStatus::Authorized(identity.clone())
            }
            _ => AuthStatus::Unauthorized,
        })
    }

    async fn authorize_bot(&mut self) -> Result<BotIdentity, PlatformError> {
        let user: WireUser = self.call("getMe", &[]).await?;
        if !user.is_bot {
            return Err(PlatformError::Auth(format!(
                "telegram account {} is not a bot",
                user.id
            )));
        }
        Ok(BotIdentity {
            bot_id: user.id,
            username: user.username,
        })
    }

    async fn next_updates(&mut self, offset: Option<i64>) -> Result<PolledUpdates, PlatformError> {
        let mut query = vec![
            ("timeout", self.poll_timeout_seconds.to_string()),
            ("allowed_updates", ALLOWED_UPDATES.to_string()),
        ];
        if let Some(offset) = offset {
            query.push(("offset", offset.to_string()));
        }
        let raw_updates: Vec<Value> = self.call("getUpdates", &query).await?;
        Ok(decode_updates(raw_updates, offset))
    }

    async fn close(&mut self) -> Result<(), PlatformError> {
        tracing::debug!(api_base = %self.api_base, "telegram session closed");
        Ok(())
    }
}

/// Decodes a raw `getUpdates` response body. Exposed for fuzzing.
pub fn decode_get_updates_body(
    body: &[u8],
    expected_offset: Option<i64>,
) -> Result<PolledUpdates, PlatformError> {
    let raw_updates: Vec<Value> = decode_api_response("getUpdates", 200, None, body)?;
    Ok(decode_updates(raw_updates, expected_offset))
}

fn decode_api_response<T: DeserializeOwned>(
    method: &str,
    status: u16,
    header_retry_after: Option<Duration>,
    body: &[u8],
) -> Result<T, PlatformError> {
    let success = (200..300).contains(&status);
    let Ok(envelope) = serde_json::from_slice::<ApiEnvelope<T>>(body) else {
        if success {
            return Err(PlatformError::Connection(format!(
                "telegram {method} returned a malformed response"
            )));
        }
        return Err(classify_failure(method, status, header_retry_after, None));
    };

    if envelope.ok && success {
        return envelope.result.ok_or_else(|| {
            PlatformError::Connection(format!("telegram {method} response missing result"))
        });
    }
    let code = envelope
        .error_code
        .and_then(|code| u16::try_from(code).ok())
        .filter(|code| *code >= 400)
        .unwrap_or(status);
    let retry_after = envelope
        .parameters
        .and_then(|parameters| parameters.retry_after)
        .map(Duration::from_secs)
        .or(header_retry_after);
    Err(classify_failure(
        method,
        code,
        retry_after,
        envelope.description,
    ))
}

fn classify_failure(
    method: &str,
    code: u16,
    retry_after: Option<Duration>,
    description: Option<String>,
) -> PlatformError {
    let detail = description.unwrap_or_else(|| "no description".to_string());
    match code {
        429 => PlatformError::RateLimited {
            retry_after: retry_after.unwrap_or(DEFAULT_RATE_LIMIT_RETRY_AFTER),
        },
        401 | 403 | 404 => {
            PlatformError::Auth(format!("telegram {method} rejected credentials ({code}): {detail}"))
        }
        _ => PlatformError::Connection(format!("telegram {method} failed with status {code}: {detail}")),
    }
}

fn parse_retry_after_header(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    let raw = headers.get("retry-after")?.to_str().ok()?.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(seconds) = raw.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }
    let retry_at = DateTime::parse_from_rfc2822(raw).ok()?.with_timezone(&Utc);
    let delay_ms = retry_at.signed_duration_since(Utc::now()).num_milliseconds();
    Some(Duration::from_millis(u64::try_from(delay_ms).unwrap_or(0)))
}

/// Decodes one `getUpdates` result. A first update id above `expected_offset`
/// yields a leading `TooLong` shape. Telegram advances the offset over update
/// types outside `allowed_updates` as well, so such a gap is informational.
fn decode_updates(raw_updates: Vec<Value>, expected_offset: Option<i64>) -> PolledUpdates {
    let mut update_ids = Vec::with_capacity(raw_updates.len());
    let mut events = Vec::with_capacity(raw_updates.len());
    for raw in raw_updates {
        let raw_update_id = raw.get("update_id").and_then(Value::as_i64);
        match serde_json::from_value::<WireUpdate>(raw) {
            Ok(update) => {
                update_ids.push(update.update_id);
                events.push(decode_update(update));
            }
            Err(error) => {
                tracing::warn!(update_id = ?raw_update_id, %error, "skipping undecodable telegram update");
                update_ids.extend(raw_update_id);
                events.push(UpdateEvent::Service {
                    kind: "undecodable".to_string(),
                });
            }
        }
    }

    let mut shapes = Vec::new();
    if let (Some(expected), Some(first)) = (expected_offset, update_ids.iter().min().copied()) {
        if first > expected {
            shapes.push(PlatformUpdates::TooLong {
                skipped: u64::try_from(first.saturating_sub(expected)).ok(),
            });
        }
    }
    shapes.extend(PlatformUpdates::from_events(events));

    PolledUpdates {
        shapes,
        next_offset: update_ids
            .iter()
            .map(|update_id| update_id.saturating_add(1))
            .max(),
    }
}

/// Maps one Bot API update to the platform-neutral event model.
pub fn decode_update(update: WireUpdate) -> UpdateEvent {
    if let Some(message) = update.channel_post.or(update.message) {
        return UpdateEvent::NewMessage(decode_message(message));
    }
    let kind = if update.edited_channel_post.is_some() {
        "edited_channel_post"
    } else if update.edited_message.is_some() {
        "edited_message"
    } else {
        "unsupported"
    };
    UpdateEvent::Service {
        kind: kind.to_string(),
    }
}

fn decode_message(message: WireMessage) -> PlatformMessage {
    let peer = decode_peer(&message.chat);
    let date = message
        .date
        .and_then(|seconds| DateTime::<Utc>::from_timestamp(seconds, 0));
    PlatformMessage {
        message_id: message.message_id,
        peer,
        date,
        media: decode_media(message),
    }
}

fn decode_peer(chat: &WireChat) -> Peer {
    match chat.kind.as_str() {
        "channel" | "supergroup" => match normalize(chat.id) {
            Ok(normalized) => Peer::Channel(normalized),
            Err(_) => Peer::Chat(chat.id),
        },
        // Basic groups use the legacy id range.
        "group" => match normalize(chat.id) {
            Ok(normalized) => Peer::Channel(normalized),
            Err(_) => Peer::Chat(chat.id.saturating_neg()),
        },
        "private" => Peer::User(chat.id),
        _ => Peer::Chat(chat.id.saturating_neg()),
    }
}

fn decode_media(message: WireMessage) -> Option<MessageMedia> {
    let WireMessage {
        document,
        audio,
        video,
        animation,
        voice,
        video_note,
        photo,
        sticker,
        location,
        contact,
        poll,
        dice,
        ..
    } = message;

    let file = animation
        .map(|file| (DocumentKind::Animation, file))
        .or_else(|| document.map(|file| (DocumentKind::File, file)))
        .or_else(|| audio.map(|file| (DocumentKind::Audio, file)))
        .or_else(|| video.map(|file| (DocumentKind::Video, file)))
        .or_else(|| voice.map(|file| (DocumentKind::Voice, file)))
        .or_else(|| video_note.map(|file| (DocumentKind::VideoNote, file)));
    if let Some((kind, file)) = file {
        let mut attributes = vec![DocumentAttribute::Kind(kind)];
        if let Some(file_name) = file.file_name {
            attributes.push(DocumentAttribute::Filename(file_name));
        }
        return Some(MessageMedia::Document(DocumentMedia {
            file_id: file.file_id,
            size_bytes: file.file_size.unwrap_or(0),
            reported_mime_type: file.mime_type,
            attributes,
        }));
    }

    if photo.is_some() {
        return Some(MessageMedia::Photo);
    }
    [
        ("sticker", sticker),
        ("location", location),
        ("contact", contact),
        ("poll", poll),
        ("dice", dice),
    ]
    .into_iter()
    .find(|(_, value)| value.is_some())
    .map(|(kind, _)| MessageMedia::Other {
        kind: kind.to_string(),
    })
}

#[cfg(test)]
mod tests;
