use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::{ArgAction, Parser};
use tdrive_catalog::FileCategory;
use tdrive_channel_ingest::telegram_bot_api::{
    DEFAULT_POLL_TIMEOUT_SECONDS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_TELEGRAM_API_BASE,
};
use tdrive_channel_ingest::update_listener::{DEFAULT_AUTH_TIMEOUT_MS, DEFAULT_RECONNECT_TIMEOUT_MS};
use tdrive_channel_ingest::{IngestPipelineConfig, ListenerConfig, TelegramBotConfig};

fn parse_positive_u64(value: &str) -> Result<u64, String> {
    let parsed = value
        .parse::<u64>()
        .map_err(|error| format!("failed to parse integer: {error}"))?;
    if parsed == 0 {
        return Err("value must be greater than 0".to_string());
    }
    Ok(parsed)
}

fn parse_category_parent(value: &str) -> Result<(FileCategory, String), String> {
    let (category, parent) = value
        .split_once('=')
        .ok_or_else(|| format!("expected category=directory-id, got '{value}'"))?;
    let category = FileCategory::parse(category)
        .ok_or_else(|| format!("unknown file category '{}'", category.trim()))?;
    let parent = parent.trim();
    if parent.is_empty() {
        return Err(format!(
            "category '{}' needs a directory id",
            category.as_str()
        ));
    }
    Ok((category, parent.to_string()))
}

#[derive(Debug, Parser)]
#[command(
    name = "tdrive-ingest",
    about = "Ingest documents posted to a Telegram channel into the tdrive catalog",
    version
)]
pub struct Cli {
    #[arg(
        long = "ingest-enabled",
        env = "TDRIVE_INGEST_ENABLED",
        default_value_t = true,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Enable channel ingestion. When false the command exits without contacting Telegram"
    )]
    pub ingest_enabled: bool,

    #[arg(
        long = "channel-id",
        env = "TDRIVE_CHANNEL_ID",
        allow_hyphen_values = true,
        help = "Source channel id in the public encoding, e.g. -1001234567890"
    )]
    pub channel_id: Option<i64>,

    #[arg(
        long = "target-parent-id",
        env = "TDRIVE_TARGET_PARENT_ID",
        help = "Catalog directory that receives ingested files. Defaults to the root"
    )]
    pub target_parent_id: Option<String>,

    #[arg(
        long = "category-parent",
        env = "TDRIVE_CATEGORY_PARENTS",
        value_delimiter = ',',
        value_parser = parse_category_parent,
        help = "Route a file category to a directory, as category=directory-id. Repeatable"
    )]
    pub category_parent: Vec<(FileCategory, String)>,

    #[arg(
        long = "bot-token",
        env = "TDRIVE_BOT_TOKEN",
        hide_env_values = true,
        help = "Telegram bot token used to read channel updates"
    )]
    pub bot_token: Option<String>,

    #[arg(
        long = "telegram-api-base",
        env = "TDRIVE_TELEGRAM_API_BASE",
        default_value = DEFAULT_TELEGRAM_API_BASE,
        help = "Base URL of the Telegram Bot API"
    )]
    pub telegram_api_base: String,

    #[arg(
        long = "catalog-db",
        env = "TDRIVE_CATALOG_DB",
        default_value = ".tdrive/catalog.sqlite",
        help = "SQLite catalog database path"
    )]
    pub catalog_db: PathBuf,

    #[arg(
        long = "owner-id",
        env = "TDRIVE_OWNER_ID",
        help = "Account id recorded as owner of ingested entries"
    )]
    pub owner_id: Option<i64>,

    #[arg(
        long = "state-path",
        env = "TDRIVE_STATE_PATH",
        default_value = ".tdrive/listener-state.json",
        help = "Listener state file holding the update offset and bot identity"
    )]
    pub state_path: PathBuf,

    #[arg(
        long = "poll-timeout-seconds",
        env = "TDRIVE_POLL_TIMEOUT_SECONDS",
        default_value_t = DEFAULT_POLL_TIMEOUT_SECONDS,
        help = "Long-poll window requested from getUpdates"
    )]
    pub poll_timeout_seconds: u64,

    #[arg(
        long = "request-timeout-ms",
        env = "TDRIVE_REQUEST_TIMEOUT_MS",
        default_value_t = DEFAULT_REQUEST_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "HTTP timeout per Bot API request; must exceed the poll window"
    )]
    pub request_timeout_ms: u64,

    #[arg(
        long = "auth-timeout-ms",
        env = "TDRIVE_AUTH_TIMEOUT_MS",
        default_value_t = DEFAULT_AUTH_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Upper bound on bot authorization during startup"
    )]
    pub auth_timeout_ms: u64,

    #[arg(
        long = "reconnect-timeout-ms",
        env = "TDRIVE_RECONNECT_TIMEOUT_MS",
        default_value_t = DEFAULT_RECONNECT_TIMEOUT_MS,
        value_parser = parse_positive_u64,
        help = "Total reconnect budget before the update stream is declared lost"
    )]
    pub reconnect_timeout_ms: u64,

    #[arg(
        long = "startup-grace-ms",
        env = "TDRIVE_STARTUP_GRACE_MS",
        default_value_t = 2_000,
        help = "How long startup waits for the handshake before continuing in the background"
    )]
    pub startup_grace_ms: u64,

    #[arg(
        long = "shutdown-grace-ms",
        env = "TDRIVE_SHUTDOWN_GRACE_MS",
        default_value_t = 5_000,
        help = "How long in-flight writes may run after cancellation"
    )]
    pub shutdown_grace_ms: u64,

    #[arg(
        long = "auth-rate-limit-retries",
        env = "TDRIVE_AUTH_RATE_LIMIT_RETRIES",
        default_value_t = 3,
        help = "Startup retries after Telegram rate-limits authorization"
    )]
    pub auth_rate_limit_retries: u32,

    #[arg(
        long = "idempotent-redelivery",
        env = "TDRIVE_IDEMPOTENT_REDELIVERY",
        default_value_t = false,
        action = ArgAction::Set,
        num_args = 0..=1,
        require_equals = true,
        default_missing_value = "true",
        help = "Skip messages that already produced an entry instead of creating a renamed copy"
    )]
    pub idempotent_redelivery: bool,

    #[arg(
        long = "channel-id-inspect",
        allow_hyphen_values = true,
        conflicts_with = "catalog_inspect",
        help = "Print how a public channel id normalizes, then exit"
    )]
    pub channel_id_inspect: Option<i64>,

    #[arg(
        long = "catalog-inspect",
        default_value_t = false,
        help = "Print the catalog entries as JSON, then exit"
    )]
    pub catalog_inspect: bool,
}

impl Cli {
    pub fn category_parent_ids(&self) -> BTreeMap<FileCategory, String> {
        self.category_parent.iter().cloned().collect()
    }

    pub fn pipeline_config(&self) -> Result<IngestPipelineConfig> {
        if self.ingest_enabled && self.owner_id.is_none() {
            bail!("--owner-id (TDRIVE_OWNER_ID) is required when ingestion is enabled");
        }
        let mut listener = ListenerConfig {
            auth_timeout: Duration::from_millis(self.auth_timeout_ms),
            ..ListenerConfig::default()
        };
        listener.reconnect.max_elapsed = Duration::from_millis(self.reconnect_timeout_ms);

        Ok(IngestPipelineConfig {
            enabled: self.ingest_enabled,
            channel_id: self.channel_id,
            target_parent_id: self.target_parent_id.clone(),
            category_parent_ids: self.category_parent_ids(),
            owner_id: self.owner_id.unwrap_or_default(),
            idempotent_redelivery: self.idempotent_redelivery,
            startup_grace: Duration::from_millis(self.startup_grace_ms),
            shutdown_grace: Duration::from_millis(self.shutdown_grace_ms),
            state_path: Some(self.state_path.clone()),
            listener,
        })
    }

    pub fn telegram_config(&self) -> Result<TelegramBotConfig> {
        let Some(bot_token) = self
            .bot_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
        else {
            bail!("--bot-token (TDRIVE_BOT_TOKEN) is required when ingestion is enabled");
        };
        let mut config = TelegramBotConfig::new(bot_token);
        config.api_base = self.telegram_api_base.trim_end_matches('/').to_string();
        config.poll_timeout_seconds = self.poll_timeout_seconds;
        config.request_timeout = Duration::from_millis(self.request_timeout_ms);
        Ok(config)
    }
}
