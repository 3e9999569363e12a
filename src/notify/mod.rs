//! Notifications — pushing ledger events out to users.
//!
//! The scheduler hands events to a [`Notifier`] and moves on. Delivery is
//! best-effort: a failure is logged by the caller and never retried.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use crate::engine::ledger::cycle::EarningsUpdate;

const TELEGRAM_API_URL: &str = "https://api.telegram.org";

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Something a user should hear about.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// Periodic earnings summary.
    Earnings {
        total_staked: Decimal,
        total_earned: Decimal,
    },
    /// Positions were moved to a better source during a cycle.
    Reallocated {
        cycle_number: u64,
        positions_moved: usize,
        source_id: String,
    },
}

impl From<&EarningsUpdate> for LedgerEvent {
    fn from(update: &EarningsUpdate) -> Self {
        LedgerEvent::Earnings {
            total_staked: update.total_staked,
            total_earned: update.total_earned,
        }
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerEvent::Earnings { total_staked, total_earned } => write!(
                f,
                "Earnings update: {:.6} earned on {:.4} staked",
                total_earned, total_staked
            ),
            LedgerEvent::Reallocated { positions_moved, source_id, .. } => write!(
                f,
                "{positions_moved} position(s) moved to {source_id} for a better rate"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// Notifier trait
// ---------------------------------------------------------------------------

/// Outbound channel for ledger events.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver one event to one user.
    async fn notify(&self, user_id: &str, event: &LedgerEvent) -> Result<()>;

    /// Short name for logs.
    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Log notifier
// ---------------------------------------------------------------------------

/// Writes events to the log. Used when no transport is configured.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, user_id: &str, event: &LedgerEvent) -> Result<()> {
        info!(user_id, event = %event, "Notification");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "log"
    }
}

// ---------------------------------------------------------------------------
// Telegram
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
}

/// Sends events through the Telegram Bot API. The user id is used as the
/// chat id.
pub struct TelegramNotifier {
    http: Client,
    token: SecretString,
    base_url: String,
}

impl TelegramNotifier {
    pub fn new(token: SecretString) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(15))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            http,
            token,
            base_url: TELEGRAM_API_URL.to_string(),
        })
    }

    /// Point at a different API host (for a local bot API server).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn send_message_url(&self) -> String {
        format!(
            "{}/bot{}/sendMessage",
            self.base_url.trim_end_matches('/'),
            self.token.expose_secret()
        )
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, user_id: &str, event: &LedgerEvent) -> Result<()> {
        let body = SendMessage { chat_id: user_id, text: event.to_string() };
        let response = self
            .http
            .post(self.send_message_url())
            .json(&body)
            .send()
            .await
            .context("Telegram request failed")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            anyhow::bail!("Telegram API error {status}: {error_text}");
        }
        debug!(user_id, "Telegram message sent");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "telegram"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
