//! Notification delivery.
//!
//! The driver hands each slot's drained events to a [`NotificationSink`].
//! Formatting for a particular chat service happens downstream of the sink.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use apalert_core::{NotificationEvent, SlotPosition};
use apalert_session::SessionId;
use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

/// Which tracked slot a batch of events belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAddress {
    /// `None` when the slot's URL no longer resolves to a session.
    pub session: Option<SessionId>,
    pub url: String,
    pub position: SlotPosition,
    pub name: String,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver `events` in order. An error leaves them queued on the slot.
    async fn deliver(
        &self,
        player: &str,
        slot: &SlotAddress,
        events: &[NotificationEvent],
    ) -> anyhow::Result<()>;
}

// ─── Log ─────────────────────────────────────────────────────────────

/// Writes every event to the log. Default when no outbox is configured.
#[derive(Debug, Default)]
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn deliver(
        &self,
        player: &str,
        slot: &SlotAddress,
        events: &[NotificationEvent],
    ) -> anyhow::Result<()> {
        for event in events {
            tracing::info!(
                player,
                session = ?slot.session,
                slot = slot.position,
                kind = event.kind(),
                event = %serde_json::to_string(event)?,
                "notification"
            );
        }
        Ok(())
    }
}

// ─── Outbox ──────────────────────────────────────────────────────────

#[derive(Serialize)]
struct OutboxLine<'a> {
    player: &'a str,
    slot: &'a SlotAddress,
    event: &'a NotificationEvent,
}

/// Appends one JSON line per event for an external chat relay to consume.
#[derive(Debug)]
pub struct OutboxSink {
    path: PathBuf,
    lock: tokio::sync::Mutex<()>,
}

impl OutboxSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: tokio::sync::Mutex::new(()),
        }
    }
}

#[async_trait]
impl NotificationSink for OutboxSink {
    async fn deliver(
        &self,
        player: &str,
        slot: &SlotAddress,
        events: &[NotificationEvent],
    ) -> anyhow::Result<()> {
        let mut buf = Vec::new();
        for event in events {
            serde_json::to_writer(&mut buf, &OutboxLine { player, slot, event })?;
            buf.push(b'\n');
        }

        let _guard = self.lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&buf).await?;
        file.flush().await?;
        Ok(())
    }
}

// ─── Memory ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub player: String,
    pub slot: SlotAddress,
    pub events: Vec<NotificationEvent>,
}

/// Keeps deliveries in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
    /// Players whose deliveries fail.
    refuse: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery to `player` fail from now on.
    pub fn refuse(&self, player: impl Into<String>) {
        if let Ok(mut refuse) = self.refuse.lock() {
            refuse.push(player.into());
        }
    }

    pub fn take(&self) -> Vec<Delivery> {
        self.deliveries
            .lock()
            .map(|mut d| std::mem::take(&mut *d))
            .unwrap_or_default()
    }
}

#[async_trait]
impl NotificationSink for MemorySink {
    async fn deliver(
        &self,
        player: &str,
        slot: &SlotAddress,
        events: &[NotificationEvent],
    ) -> anyhow::Result<()> {
        let refused = self
            .refuse
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .iter()
            .any(|p| p == player);
        if refused {
            anyhow::bail!("delivery to {player} refused");
        }
        self.deliveries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory sink poisoned"))?
            .push(Delivery {
                player: player.to_owned(),
                slot: slot.clone(),
                events: events.to_vec(),
            });
        Ok(())
    }
}
