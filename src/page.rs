//! Per-document scanning context.
//!
//! A [`PageAgent`] owns one [`Document`] together with its own [`Matcher`].
//! Structural changes are drained from the document as [`MutationBatch`]es
//! and handed to subscribers; any batch that added nodes marks the agent
//! dirty, and the next [`PageAgent::flush`] runs a single scan no matter how
//! many batches arrived in between.

use crate::bus::{Delivery, EventBus, Subscription};
use crate::cache::{ListCache, StorageError};
use crate::labeler::{Labeler, ScanReport};
use crate::matcher::Matcher;
use crate::messages::{RuntimeMessage, PAGE_TOPIC};
use crate::pattern::MatchPattern;
use crate::runtime::ServiceHandle;
use page_dom::{Document, MutationRecord};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Interval between mutation flushes inside [`PageAgent::run`].
pub const FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const MUTATION_TOPIC: &str = "mutations";

/// Records drained from the document in one flush.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationBatch {
    records: Vec<MutationRecord>,
}

impl MutationBatch {
    /// Wraps records, typically from [`Document::take_mutations`].
    pub fn new(records: Vec<MutationRecord>) -> Self {
        Self { records }
    }

    /// Records in the order they happened.
    pub fn records(&self) -> &[MutationRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when the batch holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// True when any record inserted nodes.
    pub fn has_additions(&self) -> bool {
        self.records.iter().any(MutationRecord::has_additions)
    }
}

/// How [`PageAgent::start`] obtained its list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Cached entries were found and the page was scanned.
    Scanned(ScanReport),
    /// Nothing was cached; an update was requested from the service.
    UpdateRequested,
}

/// Scanning context bound to one document.
pub struct PageAgent {
    document: Document,
    matcher: Matcher,
    labeler: Labeler,
    cache: ListCache,
    service: ServiceHandle,
    mutations: EventBus<MutationBatch>,
    dirty: Arc<AtomicBool>,
    notifications: mpsc::UnboundedReceiver<RuntimeMessage>,
    _attached: Subscription,
    _observer: Subscription,
}

impl PageAgent {
    /// Attaches an agent to `document` when its location matches `pattern`.
    ///
    /// Returns `None` for documents without a location or outside the
    /// pattern; those never receive list notifications.
    pub fn attach(
        document: Document,
        pattern: &MatchPattern,
        cache: ListCache,
        service: ServiceHandle,
        bus: &EventBus<RuntimeMessage>,
    ) -> Option<Self> {
        let location = document.location()?;
        if !pattern.matches(location) {
            debug!(location, pattern = %pattern, "page outside the match pattern");
            return None;
        }

        let (attached, notifications) = bus.subscribe_channel(PAGE_TOPIC);
        let mutations = EventBus::new();
        let dirty = Arc::new(AtomicBool::new(false));
        let observer = {
            let dirty = Arc::clone(&dirty);
            mutations.subscribe(MUTATION_TOPIC, move |batch: &MutationBatch| {
                if batch.has_additions() {
                    dirty.store(true, Ordering::Release);
                }
                Delivery::Delivered
            })
        };

        Some(Self {
            document,
            matcher: Matcher::default(),
            labeler: Labeler::default(),
            cache,
            service,
            mutations,
            dirty,
            notifications,
            _attached: attached,
            _observer: observer,
        })
    }

    /// The managed document.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Mutable access for host-driven edits; they are picked up on the next flush.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.document
    }

    /// Current list state.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Loads cached entries and scans, or asks the service for a first fetch.
    pub async fn start(&mut self) -> Result<StartOutcome, StorageError> {
        match self.cache.load_entries().await? {
            Some(entries) => {
                info!(entries = entries.len(), "pod users loaded from cache");
                self.matcher.replace(&entries);
                Ok(StartOutcome::Scanned(self.scan()))
            }
            None => {
                info!("no cached pod users, requesting an update");
                if let Err(err) = self.service.notify(RuntimeMessage::UpdateList) {
                    warn!(error = %err, "could not reach the background service");
                }
                Ok(StartOutcome::UpdateRequested)
            }
        }
    }

    /// Reacts to a message from the background service. Returns the scan
    /// performed, if any.
    pub async fn handle_message(
        &mut self,
        message: RuntimeMessage,
    ) -> Result<Option<ScanReport>, StorageError> {
        match message {
            RuntimeMessage::RefreshPodUsers => {
                let entries = self.cache.load_entries().await?.unwrap_or_default();
                self.matcher.replace(&entries);
                Ok(Some(self.scan()))
            }
            RuntimeMessage::UpdateList => Ok(None),
        }
    }

    /// Waits for the next service notification and handles it. Returns
    /// `Ok(None)` once the bus is gone.
    pub async fn next_message(&mut self) -> Result<Option<ScanReport>, StorageError> {
        match self.notifications.recv().await {
            Some(message) => self.handle_message(message).await,
            None => Ok(None),
        }
    }

    /// Subscribes `callback` to every non-empty mutation batch.
    pub fn on_mutation<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&MutationBatch) + Send + Sync + 'static,
    {
        self.mutations
            .subscribe(MUTATION_TOPIC, move |batch: &MutationBatch| {
                callback(batch);
                Delivery::Delivered
            })
    }

    /// Feeds a batch to the mutation subscribers as if the document produced it.
    pub fn observe(&self, batch: &MutationBatch) {
        if !batch.is_empty() {
            self.mutations.publish(MUTATION_TOPIC, batch);
        }
    }

    /// Publishes pending mutations, then scans once if any batch since the
    /// previous flush added nodes.
    pub fn flush(&mut self) -> Option<ScanReport> {
        let batch = MutationBatch::new(self.document.take_mutations());
        self.observe(&batch);
        if self.dirty.swap(false, Ordering::AcqRel) {
            Some(self.scan())
        } else {
            None
        }
    }

    /// Event loop: handles service notifications and flushes mutations every
    /// [`FLUSH_INTERVAL`] until `shutdown` completes.
    pub async fn run<F>(&mut self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(FLUSH_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut attached = true;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                message = self.notifications.recv(), if attached => match message {
                    Some(message) => {
                        if let Err(err) = self.handle_message(message).await {
                            warn!(error = %err, "failed to reload pod users");
                        }
                    }
                    None => attached = false,
                },
                _ = ticker.tick() => {
                    self.flush();
                }
            }
        }
    }

    fn scan(&mut self) -> ScanReport {
        let report = self.labeler.scan(&mut self.document, &self.matcher);
        debug!(
            entries = self.matcher.len(),
            inserted = report.inserted(),
            items_matched = report.items_matched,
            skipped_visual = report.skipped_visual,
            "scanned page"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labeler::badge_count;
    use crate::record::CacheRecord;
    use crate::runtime;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    const PAGE: &str = concat!(
        r#"<html><body><main id="feed">"#,
        r#"<p><a href="/in/jdoe">John Doe</a></p>"#,
        r#"</main></body></html>"#
    );
    const FEED_URL: &str = "https://www.linkedin.com/feed/";

    struct Fixture {
        agent: PageAgent,
        cache: ListCache,
        bus: EventBus<RuntimeMessage>,
        inbox: mpsc::Receiver<runtime::ServiceRequest>,
    }

    fn fixture(location: &str) -> Option<Fixture> {
        let cache = ListCache::in_memory();
        let bus = EventBus::new();
        let (handle, inbox) = runtime::channel();
        let document = Document::parse(PAGE).with_location(location);
        let agent = PageAgent::attach(
            document,
            &MatchPattern::default(),
            cache.clone(),
            handle,
            &bus,
        )?;
        Some(Fixture {
            agent,
            cache,
            bus,
            inbox,
        })
    }

    async fn seed(cache: &ListCache, entries: &[&str]) {
        let record = CacheRecord::new(entries.iter().copied().collect(), 1);
        cache.store(&record).await.expect("seed cache");
    }

    fn main_id(agent: &PageAgent) -> page_dom::NodeId {
        let selector = page_dom::parse_selector("#feed").expect("selector");
        agent.document().select_first(&selector).expect("main")
    }

    #[test]
    fn pages_outside_the_pattern_do_not_attach() {
        assert!(fixture("https://example.com/in/jdoe").is_none());
        let bus = EventBus::new();
        let (handle, _inbox) = runtime::channel();
        let no_location = PageAgent::attach(
            Document::parse(PAGE),
            &MatchPattern::default(),
            ListCache::in_memory(),
            handle,
            &bus,
        );
        assert!(no_location.is_none());
        assert_eq!(bus.subscriber_count(PAGE_TOPIC), 0);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_scans_cached_entries() {
        let mut fx = fixture(FEED_URL).expect("attached");
        seed(&fx.cache, &["/in/jdoe"]).await;

        let outcome = fx.agent.start().await.expect("start");
        let StartOutcome::Scanned(report) = outcome else {
            panic!("expected a scan, got {outcome:?}");
        };
        assert_eq!(report.link_badges, 1);
        assert_eq!(badge_count(fx.agent.document()), 1);
        assert!(fx.inbox.try_recv().is_err());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn start_without_cache_requests_an_update() {
        let mut fx = fixture(FEED_URL).expect("attached");
        assert_eq!(fx.agent.start().await.expect("start"), StartOutcome::UpdateRequested);

        let request = fx.inbox.try_recv().expect("update requested");
        assert_eq!(request.message, RuntimeMessage::UpdateList);
        assert!(!request.respond(crate::messages::UpdateResponse::ok()));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refresh_notification_reloads_the_list() {
        let mut fx = fixture(FEED_URL).expect("attached");
        fx.agent.start().await.expect("start");
        assert_eq!(badge_count(fx.agent.document()), 0);

        seed(&fx.cache, &["/in/jdoe"]).await;
        let report = fx.bus.publish(PAGE_TOPIC, &RuntimeMessage::RefreshPodUsers);
        assert_eq!(report.delivered, 1);

        let scan = fx.agent.next_message().await.expect("reload").expect("scanned");
        assert_eq!(scan.inserted(), 1);
        assert_eq!(fx.agent.matcher().len(), 1);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn refresh_with_missing_entries_clears_the_matcher() {
        let mut fx = fixture(FEED_URL).expect("attached");
        fx.agent.matcher.replace(&["/in/jdoe"].into_iter().collect());
        let scan = fx
            .agent
            .handle_message(RuntimeMessage::RefreshPodUsers)
            .await
            .expect("reload");
        assert_eq!(scan, Some(ScanReport::default()));
        assert!(fx.agent.matcher().is_empty());
        assert_eq!(
            fx.agent.handle_message(RuntimeMessage::UpdateList).await.expect("ignored"),
            None
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn bursts_of_mutations_coalesce_into_one_scan() {
        let mut fx = fixture(FEED_URL).expect("attached");
        seed(&fx.cache, &["/in/jdoe", "/in/asmith"]).await;
        fx.agent.start().await.expect("start");
        // Drain the badge insertions made by the initial scan.
        fx.agent.flush();
        assert_eq!(fx.agent.flush(), None);

        let feed = main_id(&fx.agent);
        for _ in 0..3 {
            fx.agent
                .document_mut()
                .append_html(feed, r#"<p><a href="/in/asmith">Ann Smith</a></p>"#);
        }
        let report = fx.agent.flush().expect("one scan for the burst");
        assert_eq!(report.link_badges, 3);
        assert_eq!(badge_count(fx.agent.document()), 4);

        let settle = fx.agent.flush().expect("rescan after badge insertions");
        assert_eq!(settle.inserted(), 0);
        assert_eq!(fx.agent.flush(), None);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn removals_alone_do_not_trigger_a_scan() {
        let mut fx = fixture(FEED_URL).expect("attached");
        seed(&fx.cache, &["/in/jdoe"]).await;
        fx.agent.start().await.expect("start");
        while fx.agent.flush().is_some() {}

        let paragraph = fx
            .agent
            .document()
            .descendants(main_id(&fx.agent))
            .next()
            .expect("paragraph");
        assert!(fx.agent.document_mut().remove(paragraph));
        assert_eq!(fx.agent.flush(), None);
        assert_eq!(badge_count(fx.agent.document()), 0);
    }

    #[test]
    fn mutation_subscribers_can_unsubscribe() {
        let fx = fixture(FEED_URL).expect("attached");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subscription = {
            let seen = Arc::clone(&seen);
            fx.agent.on_mutation(move |batch| {
                seen.lock().expect("lock").push(batch.len());
            })
        };

        let feed = main_id(&fx.agent);
        let synthetic = MutationBatch::new(vec![
            MutationRecord {
                target: feed,
                added: vec![feed],
                removed: Vec::new(),
            },
            MutationRecord {
                target: feed,
                added: Vec::new(),
                removed: vec![feed],
            },
        ]);
        fx.agent.observe(&synthetic);
        subscription.unsubscribe();
        fx.agent.observe(&synthetic);

        assert_eq!(*seen.lock().expect("lock"), vec![2]);
        assert!(fx.agent.dirty.load(Ordering::Acquire));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_handles_notifications_until_shutdown() {
        let mut fx = fixture(FEED_URL).expect("attached");
        let cache = fx.cache.clone();
        let bus = fx.bus.clone();
        let (stop, stopped) = tokio::sync::oneshot::channel::<()>();

        let driver = async move {
            seed(&cache, &["/in/jdoe"]).await;
            bus.publish(PAGE_TOPIC, &RuntimeMessage::RefreshPodUsers);
            tokio::time::sleep(FLUSH_INTERVAL * 3).await;
            let _ = stop.send(());
        };
        let agent = fx.agent.run(async {
            let _ = stopped.await;
        });
        tokio::join!(agent, driver);

        assert_eq!(badge_count(fx.agent.document()), 1);
    }
}
