//! Tests for the Telegram Bot API session and update decoding.

use std::time::Duration;

use httpmock::prelude::*;
use serde_json::json;

use super::{
    decode_get_updates_body, token_bot_id, TelegramBotConfig, TelegramBotSession,
};
use crate::channel_identity::ChannelBinding;
use crate::platform_session::{AuthStatus, BotIdentity, PlatformError, PlatformSession};
use crate::platform_update::{
    DocumentAttribute, DocumentKind, MessageMedia, Peer, PlatformUpdates, UpdateEvent,
};
use crate::test_support::broadcast_peer;

const TOKEN: &str = "123456:test-secret";

fn test_config(base_url: &str) -> TelegramBotConfig {
    TelegramBotConfig {
        api_base: base_url.to_string(),
        bot_token: TOKEN.to_string(),
        poll_timeout_seconds: 0,
        request_timeout: Duration::from_secs(5),
    }
}

fn channel_post(update_id: i64, message: serde_json::Value) -> serde_json::Value {
    json!({ "update_id": update_id, "channel_post": message })
}

#[test]
fn unit_token_bot_id_reads_numeric_prefix() {
    assert_eq!(token_bot_id("123456:abc"), Some(123_456));
    assert_eq!(token_bot_id(" 42:x "), Some(42));
    assert_eq!(token_bot_id("abc:def"), None);
    assert_eq!(token_bot_id("123456"), None);
    assert_eq!(token_bot_id("123456:"), None);
}

#[test]
fn regression_session_rejects_request_timeout_shorter_than_poll_window() {
    let mut config = TelegramBotConfig::new(TOKEN);
    config.poll_timeout_seconds = 30;
    config.request_timeout = Duration::from_secs(30);
    let error = TelegramBotSession::new(&config).expect_err("timeout must exceed poll window");
    assert!(error.to_string().contains("must exceed the long-poll timeout"));

    config.bot_token = "   ".to_string();
    assert!(TelegramBotSession::new(&config).is_err());
}

#[tokio::test]
async fn unit_auth_status_uses_persisted_identity_matching_token() {
    let mut session = TelegramBotSession::new(&test_config("http://127.0.0.1:9")).expect("session");
    let matching = BotIdentity {
        bot_id: 123_456,
        username: Some("drive_bot".to_string()),
    };
    let stale = BotIdentity {
        bot_id: 999,
        username: None,
    };
    assert_eq!(
        session.auth_status(Some(&matching)).await.expect("status"),
        AuthStatus::Authorized(matching.clone())
    );
    assert_eq!(
        session.auth_status(Some(&stale)).await.expect("status"),
        AuthStatus::Unauthorized
    );
    assert_eq!(
        session.auth_status(None).await.expect("status"),
        AuthStatus::Unauthorized
    );
}

#[tokio::test]
async fn functional_authorize_bot_returns_identity_from_get_me() {
    let server = MockServer::start();
    let get_me = server.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getMe"));
        then.status(200).body(
            json!({
                "ok": true,
                "result": {"id": 123456, "is_bot": true, "username": "drive_bot"}
            })
            .to_string(),
        );
    });

    let mut session = TelegramBotSession::new(&test_config(&server.base_url())).expect("session");
    let identity = session.authorize_bot().await.expect("authorize");
    assert_eq!(identity.bot_id, 123_456);
    assert_eq!(identity.username.as_deref(), Some("drive_bot"));
    get_me.assert_calls(1);
}

#[tokio::test]
async fn regression_get_me_unauthorized_maps_to_auth_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getMe"));
        then.status(401).body(
            json!({"ok": false, "error_code": 401, "description": "Unauthorized"}).to_string(),
        );
    });

    let mut session = TelegramBotSession::new(&test_config(&server.base_url())).expect("session");
    let error = session.authorize_bot().await.expect_err("unauthorized");
    assert!(matches!(error, PlatformError::Auth(ref message) if message.contains("Unauthorized")));
    assert!(!error.to_string().contains("test-secret"));
}

#[tokio::test]
async fn regression_rate_limit_prefers_body_retry_after_over_header() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getMe"));
        then.status(429).header("retry-after", "3").body(
            json!({
                "ok": false,
                "error_code": 429,
                "description": "Too Many Requests: retry after 7",
                "parameters": {"retry_after": 7}
            })
            .to_string(),
        );
    });

    let mut session = TelegramBotSession::new(&test_config(&server.base_url())).expect("session");
    let error = session.authorize_bot().await.expect_err("rate limited");
    assert_eq!(
        error,
        PlatformError::RateLimited {
            retry_after: Duration::from_secs(7)
        }
    );
}

#[tokio::test]
async fn regression_rate_limit_falls_back_to_header_then_default() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getMe"));
        then.status(429).header("retry-after", "4").body("slow down");
    });
    let mut session = TelegramBotSession::new(&test_config(&server.base_url())).expect("session");
    let error = session.authorize_bot().await.expect_err("rate limited");
    assert_eq!(
        error,
        PlatformError::RateLimited {
            retry_after: Duration::from_secs(4)
        }
    );

    let bare = MockServer::start();
    bare.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getMe"));
        then.status(429).body("{}");
    });
    let mut session = TelegramBotSession::new(&test_config(&bare.base_url())).expect("session");
    let error = session.authorize_bot().await.expect_err("rate limited");
    assert_eq!(
        error,
        PlatformError::RateLimited {
            retry_after: Duration::from_secs(1)
        }
    );
}

#[tokio::test]
async fn regression_server_errors_map_to_connection_error() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path(format!("/bot{TOKEN}/getUpdates"));
        then.status(502).body("bad gateway");
    });
    let mut session = TelegramBotSession::new(&test_config(&server.base_url())).expect("session");
    let error = session.next_updates(None).await.expect_err("bad gateway");
    assert!(matches!(error, PlatformError::Connection(_)));
}

#[tokio::test]
async fn functional_next_updates_decodes_documents_and_offsets() {
    let server = MockServer::start();
    let updates = server.mock(|when, then| {
        when.method(GET)
            .path(format!("/bot{TOKEN}/getUpdates"))
            .query_param("offset", "10")
            .query_param("timeout", "0");
        then.status(200).body(
            json!({
                "ok": true,
                "result": [
                    channel_post(10, json!({
                        "message_id": 501,
                        "date": 1760100000,
                        "chat": {"id": -1001234567890_i64, "type": "channel"},
                        "document": {
                            "file_id": "doc-1",
                            "file_name": "report.pdf",
                            "mime_type": "application/pdf",
                            "file_size": 2048
                        }
                    })),
                    channel_post(11, json!({
                        "message_id": 502,
                        "chat": {"id": -1001234567890_i64, "type": "channel"},
                        "text": "hello"
                    }))
                ]
            })
            .to_string(),
        );
    });

    let mut session = TelegramBotSession::new(&test_config(&server.base_url())).expect("session");
    let polled = session.next_updates(Some(10)).await.expect("poll");
    updates.assert_calls(1);
    assert_eq!(polled.next_offset, Some(12));
    assert_eq!(polled.shapes.len(), 1);
    let PlatformUpdates::Batch(events) = &polled.shapes[0] else {
        panic!("expected batch shape, got {:?}", polled.shapes[0]);
    };
    let UpdateEvent::NewMessage(first) = &events[0] else {
        panic!("expected message");
    };
    assert_eq!(first.peer, broadcast_peer(1_234_567_890));
    assert_eq!(first.message_id, 501);
    let Some(MessageMedia::Document(document)) = &first.media else {
        panic!("expected document media");
    };
    assert_eq!(document.size_bytes, 2048);
    assert_eq!(document.file_name(), Some("report.pdf"));
    let UpdateEvent::NewMessage(second) = &events[1] else {
        panic!("expected message");
    };
    assert_eq!(second.media, None);
}

#[test]
fn functional_decode_reports_offset_gap_before_updates() {
    let body = json!({
        "ok": true,
        "result": [channel_post(25, json!({
            "message_id": 9,
            "chat": {"id": -1001234567890_i64, "type": "channel"},
            "photo": [{"file_id": "p"}]
        }))]
    })
    .to_string();
    let polled = decode_get_updates_body(body.as_bytes(), Some(20)).expect("decode");
    assert_eq!(polled.next_offset, Some(26));
    assert_eq!(
        polled.shapes[0],
        PlatformUpdates::TooLong { skipped: Some(5) }
    );
    let PlatformUpdates::Short(UpdateEvent::NewMessage(message)) = &polled.shapes[1] else {
        panic!("expected short message shape");
    };
    assert_eq!(message.media, Some(MessageMedia::Photo));
}

#[test]
fn unit_decode_maps_peer_kinds_and_document_variants() {
    let body = json!({
        "ok": true,
        "result": [
            {"update_id": 1, "message": {
                "message_id": 1, "chat": {"id": 77, "type": "private"},
                "voice": {"file_id": "v", "file_size": 10}
            }},
            {"update_id": 2, "message": {
                "message_id": 2, "chat": {"id": -4242, "type": "group"},
                "audio": {"file_id": "a", "file_name": "song.mp3"}
            }},
            {"update_id": 3, "edited_channel_post": {"message_id": 3}},
            {"update_id": 4, "channel_post": {"message_id": "not-a-number"}}
        ]
    })
    .to_string();
    let polled = decode_get_updates_body(body.as_bytes(), None).expect("decode");
    assert_eq!(polled.next_offset, Some(5));
    let PlatformUpdates::Batch(events) = &polled.shapes[0] else {
        panic!("expected batch");
    };
    assert_eq!(events.len(), 4);

    let UpdateEvent::NewMessage(private) = &events[0] else {
        panic!("expected message");
    };
    assert_eq!(private.peer, Peer::User(77));
    let Some(MessageMedia::Document(voice)) = &private.media else {
        panic!("expected voice document");
    };
    assert_eq!(voice.attributes, vec![DocumentAttribute::Kind(DocumentKind::Voice)]);

    let UpdateEvent::NewMessage(group) = &events[1] else {
        panic!("expected message");
    };
    assert_eq!(group.peer, Peer::Chat(4242));

    assert_eq!(
        events[2],
        UpdateEvent::Service {
            kind: "edited_channel_post".to_string()
        }
    );
    assert_eq!(
        events[3],
        UpdateEvent::Service {
            kind: "undecodable".to_string()
        }
    );
}

#[test]
fn regression_decode_rejects_malformed_success_body() {
    let error = decode_get_updates_body(b"not json", None).expect_err("malformed");
    assert!(matches!(error, PlatformError::Connection(_)));

    let empty = decode_get_updates_body(br#"{"ok":true,"result":[]}"#, Some(3)).expect("empty");
    assert!(empty.is_empty());
    assert_eq!(empty.next_offset, None);
}

#[test]
fn regression_decoded_peers_keep_channel_class_for_binding_match() {
    let body = json!({
        "ok": true,
        "result": [
            channel_post(1, json!({
                "message_id": 1,
                "chat": {"id": -1_000_000_000_042_i64, "type": "channel"},
                "document": {"file_id": "d1", "file_name": "foreign.pdf"}
            })),
            {"update_id": 2, "message": {
                "message_id": 2,
                "chat": {"id": -1_000_042, "type": "group"},
                "document": {"file_id": "d2", "file_name": "bound.pdf"}
            }}
        ]
    })
    .to_string();
    let polled = decode_get_updates_body(body.as_bytes(), None).expect("decode");
    let PlatformUpdates::Batch(events) = &polled.shapes[0] else {
        panic!("expected batch");
    };
    let peers: Vec<Peer> = events
        .iter()
        .map(|event| match event {
            UpdateEvent::NewMessage(message) => message.peer,
            other => panic!("expected message, got {other:?}"),
        })
        .collect();

    let legacy = ChannelBinding::new(-1_000_042, None).expect("legacy binding");
    assert!(!legacy.matches(&peers[0]), "broadcast channel 42 is not legacy 42");
    assert!(legacy.matches(&peers[1]));

    let broadcast = ChannelBinding::new(-1_000_000_000_042, None).expect("broadcast binding");
    assert!(broadcast.matches(&peers[0]));
    assert!(!broadcast.matches(&peers[1]));
}
