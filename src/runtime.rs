//! Background service: serves refresh requests and runs the refresh schedule.

use crate::bus::EventBus;
use crate::cache::{JsonFileStore, ListCache, StorageError};
use crate::controls::Settings;
use crate::fetcher::{FetchError, ListFetcher};
use crate::messages::{MessagingError, RuntimeMessage, UpdateResponse};
use crate::record::{epoch_ms, CacheRecord};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const REQUEST_QUEUE_DEPTH: usize = 16;

/// Shared pieces every context is wired to.
#[derive(Clone, Debug)]
pub struct Services {
    /// Persistent list cache.
    pub cache: ListCache,
    /// Notification bus towards page agents.
    pub bus: EventBus<RuntimeMessage>,
    /// Downloader writing into `cache`.
    pub fetcher: ListFetcher,
}

impl Services {
    /// Wires a file-backed cache, a fresh bus, and a fetcher from `settings`.
    pub fn from_settings(settings: &Settings) -> Result<Self, FetchError> {
        let cache = ListCache::new(Arc::new(JsonFileStore::new(settings.cache_path())));
        Self::with_cache(settings, cache)
    }

    /// Same as [`Services::from_settings`] around an existing cache.
    pub fn with_cache(settings: &Settings, cache: ListCache) -> Result<Self, FetchError> {
        let bus = EventBus::new();
        let fetcher = ListFetcher::new(
            settings.endpoint().clone(),
            settings.request_timeout(),
            cache.clone(),
            bus.clone(),
        )?;
        Ok(Self {
            cache,
            bus,
            fetcher,
        })
    }
}

/// Message plus an optional reply slot, as queued for the service.
#[derive(Debug)]
pub struct ServiceRequest {
    /// Requested action.
    pub message: RuntimeMessage,
    reply: Option<oneshot::Sender<UpdateResponse>>,
}

impl ServiceRequest {
    /// Sends `response` back to the requester. Returns false when nobody is
    /// waiting for it.
    pub fn respond(self, response: UpdateResponse) -> bool {
        match self.reply {
            Some(reply) => reply.send(response).is_ok(),
            None => false,
        }
    }
}

/// Cloneable sender side of the service's request queue.
#[derive(Clone, Debug)]
pub struct ServiceHandle {
    requests: mpsc::Sender<ServiceRequest>,
}

impl ServiceHandle {
    /// Sends `message` and waits for the reply.
    pub async fn send(&self, message: RuntimeMessage) -> Result<UpdateResponse, MessagingError> {
        let (reply, response) = oneshot::channel();
        self.requests
            .send(ServiceRequest {
                message,
                reply: Some(reply),
            })
            .await
            .map_err(|_| MessagingError::Disconnected)?;
        response.await.map_err(|_| MessagingError::NoReply)
    }

    /// Queues `message` without waiting for a reply.
    pub fn notify(&self, message: RuntimeMessage) -> Result<(), MessagingError> {
        self.requests
            .try_send(ServiceRequest {
                message,
                reply: None,
            })
            .map_err(|err| match err {
                mpsc::error::TrySendError::Closed(_) => MessagingError::Disconnected,
                mpsc::error::TrySendError::Full(_) => MessagingError::NoReply,
            })
    }
}

/// Creates a request queue: the handle for senders and the receiver the
/// service drains.
pub fn channel() -> (ServiceHandle, mpsc::Receiver<ServiceRequest>) {
    let (requests, inbox) = mpsc::channel(REQUEST_QUEUE_DEPTH);
    (ServiceHandle { requests }, inbox)
}

/// Single background context owning the fetcher and the refresh schedule.
#[derive(Debug)]
pub struct BackgroundService {
    fetcher: ListFetcher,
    period: Duration,
    inbox: mpsc::Receiver<ServiceRequest>,
}

impl BackgroundService {
    /// Creates the service and the handle used to reach it.
    pub fn new(fetcher: ListFetcher, period: Duration) -> (Self, ServiceHandle) {
        let (handle, inbox) = channel();
        (Self::with_inbox(fetcher, period, inbox), handle)
    }

    /// Creates the service around an existing request queue.
    pub fn with_inbox(
        fetcher: ListFetcher,
        period: Duration,
        inbox: mpsc::Receiver<ServiceRequest>,
    ) -> Self {
        Self {
            fetcher,
            period: period.max(Duration::from_secs(1)),
            inbox,
        }
    }

    /// Answers one message. Only `updateList` produces a reply.
    pub async fn handle(&self, message: RuntimeMessage) -> Option<UpdateResponse> {
        match message {
            RuntimeMessage::UpdateList => Some(match self.fetcher.refresh().await {
                Ok(_) => UpdateResponse::ok(),
                Err(err) => UpdateResponse::failed(err),
            }),
            RuntimeMessage::RefreshPodUsers => None,
        }
    }

    /// Delay before the first scheduled run, based on the cached record.
    pub async fn initial_delay(&self) -> Result<Duration, StorageError> {
        let record = self.fetcher.cache().load().await?;
        Ok(first_run_delay(record.as_ref(), self.period, epoch_ms()))
    }

    /// Serves requests and runs the schedule until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let delay = match self.initial_delay().await {
            Ok(delay) => delay,
            Err(err) => {
                warn!(error = %err, "cache unreadable, refreshing immediately");
                Duration::ZERO
            }
        };
        info!(
            endpoint = %self.fetcher.endpoint(),
            first_run_in_secs = delay.as_secs(),
            period_secs = self.period.as_secs(),
            "background service started"
        );
        self.drive(Some(delay), shutdown).await;
    }

    /// Serves requests until `shutdown` completes, without the schedule.
    /// One-shot commands use this so a manual update is the only download.
    pub async fn serve_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        debug!(endpoint = %self.fetcher.endpoint(), "serving requests without a schedule");
        self.drive(None, shutdown).await;
    }

    async fn drive<F>(mut self, first_run: Option<Duration>, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let scheduled = first_run.is_some();
        let start = Instant::now() + first_run.unwrap_or(self.period);

        let mut schedule = interval_at(start, self.period);
        schedule.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut inbox_open = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = schedule.tick(), if scheduled => {
                    if let Err(err) = self.fetcher.refresh().await {
                        debug!(
                            error = %err,
                            "scheduled refresh failed; waiting for the next period"
                        );
                    }
                }
                request = self.inbox.recv(), if inbox_open => match request {
                    Some(request) => self.serve(request).await,
                    None => inbox_open = false,
                },
            }
        }
        info!("background service stopped");
    }

    async fn serve(&self, request: ServiceRequest) {
        let message = request.message;
        let Some(response) = self.handle(message).await else {
            debug!(?message, "ignored message without a handler");
            return;
        };
        if !request.respond(response) {
            debug!(?message, "requester left before the reply");
        }
    }
}

fn first_run_delay(record: Option<&CacheRecord>, period: Duration, now_ms: u64) -> Duration {
    match record {
        None => Duration::ZERO,
        Some(record) if record.is_stale(period, now_ms) => Duration::ZERO,
        Some(record) => {
            let age = Duration::from_millis(now_ms.saturating_sub(record.fetched_at_epoch_ms));
            period.saturating_sub(age)
        }
    }
}

/// Runs the background service from `settings` until Ctrl-C or, when given,
/// until `duration` elapses.
pub async fn run(settings: &Settings, duration: Option<Duration>) -> Result<(), FetchError> {
    let services = Services::from_settings(settings)?;
    let (service, _handle) = BackgroundService::new(services.fetcher, settings.refresh_interval());
    service.run_until(shutdown_signal(duration)).await;
    Ok(())
}

async fn shutdown_signal(duration: Option<Duration>) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };
    let deadline = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = deadline => info!("run duration elapsed, shutting down"),
    }
}
