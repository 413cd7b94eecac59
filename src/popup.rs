//! The trigger panel: one refresh button, the last update time, and a status line.

use crate::cache::{ListCache, StorageError};
use crate::messages::{MessagingError, RuntimeMessage, UpdateResponse};
use crate::record::timestamp;
use crate::runtime::ServiceHandle;
use chrono::{DateTime, Local, TimeZone};
use std::time::Duration;
use tokio::time::Instant;
use tracing::warn;

/// How long a status message stays visible.
pub const STATUS_CLEAR_AFTER: Duration = Duration::from_secs(3);

const NOT_UPDATED: &str = "Not updated yet";
const UPDATING: &str = "Updating...";
const UPDATE_OK: &str = "Update successful!";

/// State of the panel between user actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerPanel {
    last_updated: String,
    status: String,
    button_enabled: bool,
    status_expires: Option<Instant>,
}

impl TriggerPanel {
    /// Opens the panel, reading the last update time from the cache.
    pub async fn open(cache: &ListCache) -> Result<Self, StorageError> {
        let last_updated = last_updated_text(cache.last_update().await?);
        Ok(Self {
            last_updated,
            status: String::new(),
            button_enabled: true,
            status_expires: None,
        })
    }

    /// `Last updated: ...` or `Not updated yet`.
    pub fn last_updated(&self) -> &str {
        &self.last_updated
    }

    /// Current status line; empty when idle.
    pub fn status(&self) -> &str {
        &self.status
    }

    /// False while a refresh is in flight.
    pub fn is_button_enabled(&self) -> bool {
        self.button_enabled
    }

    /// Disables the button and shows the in-progress status.
    pub fn begin_refresh(&mut self) {
        self.button_enabled = false;
        self.status = UPDATING.to_string();
        self.status_expires = None;
    }

    /// Shows the outcome, re-enables the button, and starts the status timer.
    pub async fn finish_refresh(
        &mut self,
        result: Result<UpdateResponse, MessagingError>,
        cache: &ListCache,
    ) {
        let status = match result {
            Ok(UpdateResponse { success: true, .. }) => {
                match cache.last_update().await {
                    Ok(last_update) => self.last_updated = last_updated_text(last_update),
                    Err(err) => warn!(error = %err, "could not re-read the last update time"),
                }
                UPDATE_OK.to_string()
            }
            Ok(UpdateResponse { error, .. }) => {
                format!("Update failed: {}", error.as_deref().unwrap_or("unknown error"))
            }
            Err(err) => format!("Update failed: {err}"),
        };
        self.status = status;
        self.button_enabled = true;
        self.status_expires = Some(Instant::now() + STATUS_CLEAR_AFTER);
    }

    /// Runs the whole button flow against the background service.
    pub async fn request_refresh(&mut self, service: &ServiceHandle, cache: &ListCache) {
        self.begin_refresh();
        let result = service.send(RuntimeMessage::UpdateList).await;
        self.finish_refresh(result, cache).await;
    }

    /// Clears the status line.
    pub fn clear_status(&mut self) {
        self.status.clear();
        self.status_expires = None;
    }

    /// Clears the status once [`STATUS_CLEAR_AFTER`] has passed since the
    /// last outcome. Returns true when it cleared something.
    pub fn expire_status(&mut self, now: Instant) -> bool {
        match self.status_expires {
            Some(deadline) if now >= deadline => {
                self.clear_status();
                true
            }
            _ => false,
        }
    }

    /// Text rendition of the panel.
    pub fn render(&self) -> String {
        let button = if self.button_enabled {
            "[ Update Now ]"
        } else {
            "[ Update Now ] (disabled)"
        };
        let mut out = format!("{button}\n{}\n", self.last_updated);
        if !self.status.is_empty() {
            out.push_str(&self.status);
            out.push('\n');
        }
        out
    }
}

fn last_updated_text(epoch_ms: Option<u64>) -> String {
    match epoch_ms.and_then(timestamp) {
        Some(utc) => format!("Last updated: {}", format_local(&utc.with_timezone(&Local))),
        None => NOT_UPDATED.to_string(),
    }
}

/// Formats like a browser's default `toLocaleString`: `10/16/2026, 3:04:05 PM`.
pub fn format_local<Tz: TimeZone>(time: &DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    time.format("%-m/%-d/%Y, %-I:%M:%S %p").to_string()
}
