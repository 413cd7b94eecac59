#![warn(missing_docs)]
//! Core library for podlabel: fetch a remote list of profile URLs, cache it,
//! and label matching profiles inside live HTML documents.

pub mod bus;
pub mod cache;
pub mod controls;
pub mod fetcher;
pub mod labeler;
pub mod matcher;
pub mod messages;
pub mod normalizer;
pub mod page;
pub mod pattern;
pub mod popup;
pub mod record;
pub mod runtime;
pub mod telemetry;

pub use bus::{Delivery, EventBus, PublishReport, Subscription};
pub use cache::{JsonFileStore, KeyValueStore, ListCache, MemoryStore, StorageError};
pub use controls::{Cli, Command, ConfigError, Settings};
pub use fetcher::{FetchError, ListFetcher, DEFAULT_ENDPOINT};
pub use labeler::{badge_count, BadgePlacement, LabelRules, Labeler, ScanReport};
pub use matcher::Matcher;
pub use messages::{MessagingError, RuntimeMessage, UpdateResponse};
pub use normalizer::{normalize, NormalizedUrl};
pub use page::{MutationBatch, PageAgent, StartOutcome};
pub use pattern::{MatchPattern, PatternError};
pub use popup::TriggerPanel;
pub use record::{CacheRecord, EntryList};
pub use runtime::{run as run_service, BackgroundService, ServiceHandle, Services};
