//! Downloads the remote list and publishes it to the cache.

use crate::bus::EventBus;
use crate::cache::{ListCache, StorageError};
use crate::messages::{RuntimeMessage, PAGE_TOPIC};
use crate::record::{CacheRecord, EntryList};
use reqwest::{Client, StatusCode};
use std::error::Error;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

/// Endpoint serving the newline-delimited list.
pub const DEFAULT_ENDPOINT: &str = "https://jantegze.b-cdn.net/linkedin.txt";
const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
const MAX_REDIRECTS: usize = 5;

/// Fetches the list, stores it, and notifies page agents.
#[derive(Clone, Debug)]
pub struct ListFetcher {
    client: Client,
    endpoint: Url,
    cache: ListCache,
    bus: EventBus<RuntimeMessage>,
}

impl ListFetcher {
    /// Builds a fetcher with its own HTTP client.
    pub fn new(
        endpoint: Url,
        timeout: Duration,
        cache: ListCache,
        bus: EventBus<RuntimeMessage>,
    ) -> Result<Self, FetchError> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(FetchError::Network)?;
        Ok(Self::with_client(client, endpoint, cache, bus))
    }

    /// Builds a fetcher around an existing client.
    pub fn with_client(
        client: Client,
        endpoint: Url,
        cache: ListCache,
        bus: EventBus<RuntimeMessage>,
    ) -> Self {
        Self {
            client,
            endpoint,
            cache,
            bus,
        }
    }

    /// Configured list endpoint.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Cache the fetcher writes to.
    pub fn cache(&self) -> &ListCache {
        &self.cache
    }

    /// Downloads the list, overwrites the cache record, and broadcasts
    /// `refreshPodUsers`. On failure the previous record is left untouched.
    pub async fn refresh(&self) -> Result<EntryList, FetchError> {
        let result = self.fetch_and_store().await;
        match &result {
            Ok(entries) => {
                let report = self.bus.publish(PAGE_TOPIC, &RuntimeMessage::RefreshPodUsers);
                info!(
                    entries = entries.len(),
                    notified = report.delivered,
                    "pod user list updated"
                );
            }
            Err(err) => warn!(
                endpoint = %self.endpoint,
                error = %err,
                "failed to update pod user list"
            ),
        }
        result
    }

    async fn fetch_and_store(&self) -> Result<EntryList, FetchError> {
        let response = self
            .client
            .get(self.endpoint.clone())
            .send()
            .await
            .map_err(FetchError::Network)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status));
        }

        let body = response.text().await.map_err(FetchError::Network)?;
        let entries = EntryList::parse(&body);
        self.cache
            .store(&CacheRecord::fetched_now(entries.clone()))
            .await
            .map_err(FetchError::Storage)?;
        Ok(entries)
    }
}

/// Reasons a refresh did not update the cache.
#[derive(Debug)]
pub enum FetchError {
    /// Transport failure: DNS, connect, timeout, redirect limit, or body read.
    Network(reqwest::Error),
    /// The endpoint answered with a non-success status.
    HttpStatus(StatusCode),
    /// The list was downloaded but could not be stored.
    Storage(StorageError),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(err) => write!(f, "network error: {err}"),
            Self::HttpStatus(status) => write!(f, "HTTP error! status: {}", status.as_u16()),
            Self::Storage(err) => write!(f, "storage error: {err}"),
        }
    }
}

impl Error for FetchError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Network(err) => Some(err),
            Self::HttpStatus(_) => None,
            Self::Storage(err) => Some(err),
        }
    }
}

impl From<StorageError> for FetchError {
    fn from(err: StorageError) -> Self {
        Self::Storage(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_errors_mention_the_code() {
        let err = FetchError::HttpStatus(StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.to_string(), "HTTP error! status: 500");
        assert!(err.source().is_none());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn unreachable_endpoint_is_a_network_error() {
        let cache = ListCache::in_memory();
        let bus = EventBus::new();
        let (_sub, mut rx) = bus.subscribe_channel(PAGE_TOPIC);
        let endpoint = Url::parse("http://127.0.0.1:9/list.txt").expect("url");
        let fetcher = ListFetcher::new(endpoint, Duration::from_secs(2), cache.clone(), bus)
            .expect("client");

        let err = fetcher.refresh().await.expect_err("nothing listens on port 9");
        assert!(matches!(err, FetchError::Network(_)));
        assert_eq!(cache.load().await.expect("load"), None);
        assert!(rx.try_recv().is_err());
    }
}
