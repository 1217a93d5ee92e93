//! The explicit context object: one per loaded scene.
//!
//! A [`Session`] owns the element registry, the singleflight document cache,
//! the refresh scheduler and a single-threaded task pool. Nothing in it runs on
//! its own; the host calls [`Session::tick`] once per frame.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::rc::{Rc, Weak};

use bytes::Bytes;
use foundation::time::Time;
use futures::executor::{LocalPool, LocalSpawner};
use futures::future::{self, FutureExt, LocalBoxFuture};
use futures::task::LocalSpawnExt;
use runtime::clock::{Clock, SystemClock};
use runtime::diagnostics::{Diagnostic, Diagnostics};
use runtime::metrics::CacheMetrics;
use runtime::refresh::{RefreshEvent, RefreshKind, RefreshListener};
use serde::{Deserialize, Serialize};
use streaming::archive::{ArchiveFetcher, KmzArchive};
use streaming::cache::{FetchState, ResourceCache};
use streaming::fetch::{FetchError, Fetcher};
use streaming::key::ResourceKey;
use tracing::{debug, info, warn};

use crate::kml::document::{KmlDocument, LoadError};
use crate::kml::element::Element;
use crate::kml::network_link::{NetworkLink, RefreshMode, ViewRefreshMode};
use crate::kml::registry::ElementRegistry;
use crate::kml::render::{RenderContext, RenderHost, ShapeCollector};
use crate::kml::resolve::{SharedBundle, SharedDocument, StyleHost, StyleResolver};
use crate::kml::style::AttributeBundle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub follow_network_links: bool,
    /// Used for `onInterval` links that carry no `refreshInterval`.
    pub default_refresh_interval_s: f64,
    /// Shorter intervals are clamped up to this.
    pub min_refresh_interval_s: f64,
    pub max_link_depth: u32,
    /// Used for `onStop` links that carry no `viewRefreshTime`.
    pub view_refresh_time_s: f64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            follow_network_links: true,
            default_refresh_interval_s: 4.0,
            min_refresh_interval_s: 1.0,
            max_link_depth: 8,
            view_refresh_time_s: 4.0,
        }
    }
}

impl SessionConfig {
    pub fn refresh_interval(&self, link: &NetworkLink) -> f64 {
        link.refresh_interval_s
            .unwrap_or(self.default_refresh_interval_s)
            .max(self.min_refresh_interval_s)
    }
}

/// Result of one [`Session::tick`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TickSummary {
    /// Locations whose reload was started this tick.
    pub refreshed: Vec<String>,
    pub pending_refreshes: usize,
    pub next_refresh: Option<Time>,
}

type ArchiveEntry = (Rc<KmzArchive>, String);

/// Shared state of a session. Style resolution and rendering reach it through
/// [`StyleHost`] and [`RenderHost`].
pub struct SessionContext {
    config: SessionConfig,
    registry: Rc<ElementRegistry>,
    fetcher: Rc<dyn Fetcher>,
    cache: RefCell<ResourceCache<Rc<KmlDocument>, LoadError>>,
    /// Documents whose reload is in flight, served until it finishes.
    reloading: RefCell<BTreeMap<ResourceKey, Rc<KmlDocument>>>,
    /// Opened KMZ archives by archive location.
    archives: RefCell<BTreeMap<String, Rc<KmzArchive>>>,
    refresh: RefCell<RefreshListener<String>>,
    /// Links with a timed refresh already queued.
    scheduled: RefCell<BTreeSet<String>>,
    /// `onStop` links and their view refresh delay.
    view_links: RefCell<BTreeMap<String, f64>>,
    diagnostics: RefCell<Diagnostics>,
    default_style: Rc<AttributeBundle>,
    resolver: Rc<StyleResolver>,
    spawner: LocalSpawner,
    this: Weak<SessionContext>,
}

impl SessionContext {
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Rc<ElementRegistry> {
        &self.registry
    }

    pub fn resolver(&self) -> &Rc<StyleResolver> {
        &self.resolver
    }

    /// The cached document at `location` if its load has completed. While a
    /// reload is pending this is still the previous document.
    pub fn document(&self, location: &str) -> Option<Rc<KmlDocument>> {
        let key = ResourceKey::parse(location);
        if let Some(document) = self.cache.borrow().retrieve(&key) {
            return Some(document);
        }
        self.reloading.borrow().get(&key).cloned()
    }

    /// The first document loaded into this session.
    pub fn root_document(&self) -> Option<Rc<KmlDocument>> {
        let cache = self.cache.borrow();
        if let Some(document) = cache.retrieve(&ResourceKey::Root) {
            return Some(document);
        }
        let key = cache.root_key()?;
        self.reloading.borrow().get(key).cloned()
    }

    pub fn load_state(&self, location: &str) -> Option<FetchState> {
        self.cache.borrow().state(&ResourceKey::parse(location))
    }

    /// Evicts `location` and loads it again. The previous document is kept
    /// when the new bytes are identical or the fetch fails.
    pub fn reload(&self, location: &str) -> SharedDocument {
        let key = ResourceKey::parse(location);
        let evicted = self.cache.borrow_mut().evict(&key);
        let previous = match evicted {
            Some(document) => {
                self.reloading.borrow_mut().insert(key, Rc::clone(&document));
                Some(document)
            }
            // A reload of a reload keeps serving the last good document.
            None => self.reloading.borrow().get(&key).cloned(),
        };
        info!(location, had_previous = previous.is_some(), "reloading document");
        self.load_with(location, previous)
    }

    fn load_with(&self, location: &str, previous: Option<Rc<KmlDocument>>) -> SharedDocument {
        let mut started = false;
        let shared = self
            .cache
            .borrow_mut()
            .get_or_fetch(ResourceKey::parse(location), || {
                started = true;
                self.fetch_document(location, previous)
            });
        if started {
            self.spawn(shared.clone().map(|_| ()).boxed_local());
        }
        shared
    }

    fn fetch_document(
        &self,
        location: &str,
        previous: Option<Rc<KmlDocument>>,
    ) -> LocalBoxFuture<'static, Result<Rc<KmlDocument>, LoadError>> {
        debug!(location, "fetching document");
        let entry = self.archive_entry(location);
        let bytes = match &entry {
            Some((archive, _)) => {
                ArchiveFetcher::new(Rc::clone(archive), Rc::clone(&self.fetcher)).fetch(location)
            }
            None => self.fetcher.fetch(location),
        };
        let registry = Rc::clone(&self.registry);
        let this = self.this.clone();
        let location = location.to_string();
        async move {
            let result = parse_fetched(&location, bytes.await, entry, registry);
            match this.upgrade() {
                Some(context) => context.finish_load(&location, previous, result),
                None => result,
            }
        }
        .boxed_local()
    }

    /// `archive!/entry` locations of archives this session has opened.
    fn archive_entry(&self, location: &str) -> Option<ArchiveEntry> {
        let (archive_location, _) = location.split_once("!/")?;
        let archive = self.archives.borrow().get(archive_location).cloned()?;
        let entry = archive.entry_for(location)?;
        Some((archive, entry))
    }

    fn finish_load(
        &self,
        location: &str,
        previous: Option<Rc<KmlDocument>>,
        result: Result<Rc<KmlDocument>, LoadError>,
    ) -> Result<Rc<KmlDocument>, LoadError> {
        self.reloading.borrow_mut().remove(&ResourceKey::parse(location));
        match (result, previous) {
            (Ok(document), Some(previous)) if document.content_hash() == previous.content_hash() => {
                debug!(location, hash = %previous.content_hash(), "reloaded document is unchanged");
                Ok(previous)
            }
            (Ok(document), previous) => {
                info!(
                    location,
                    shapes = document.shapes().len(),
                    archive = document.archive().is_some(),
                    "loaded document"
                );
                self.register(&document);
                if previous.is_some() {
                    self.resolver.invalidate_dependents(location);
                }
                Ok(document)
            }
            (Err(e), previous) => {
                warn!(location, error = %e, "document load failed");
                self.diagnostics.borrow_mut().warn("load-failed", e.to_string());
                match previous {
                    Some(previous) => {
                        warn!(location, "keeping previously loaded document");
                        Ok(previous)
                    }
                    None => Err(e),
                }
            }
        }
    }

    /// Records what later lookups need from a freshly loaded document: its
    /// archive and, for the first document, the root alias.
    fn register(&self, document: &Rc<KmlDocument>) {
        if let Some(archive) = document.archive() {
            self.archives
                .borrow_mut()
                .insert(archive.location().to_string(), Rc::clone(archive));
        }
        if self
            .cache
            .borrow_mut()
            .set_root(ResourceKey::Path(document.location().to_string()))
        {
            debug!(location = %document.location(), "root document set");
        }
    }

    fn insert_document(&self, document: Rc<KmlDocument>) -> Rc<KmlDocument> {
        let key = ResourceKey::Path(document.location().to_string());
        self.register(&document);
        let shared = {
            let mut cache = self.cache.borrow_mut();
            cache.evict(&key);
            cache.add(key, future::ready(Ok(Rc::clone(&document))).boxed_local())
        };
        // Completes the ready future so synchronous lookups see it.
        let _ = shared.now_or_never();
        document
    }

    fn track_link(&self, link: &NetworkLink, location: &str) {
        if link.is_timed() && self.scheduled.borrow_mut().insert(location.to_string()) {
            let kind = match link.refresh_mode {
                RefreshMode::OnExpire => RefreshKind::Expire,
                _ => RefreshKind::Interval,
            };
            let delay = self.config.refresh_interval(link);
            self.refresh
                .borrow_mut()
                .add_event(RefreshEvent::new(kind, location.to_string(), delay));
            debug!(location, ?kind, delay_s = delay, "scheduled network link refresh");
        }
        if link.view_refresh_mode == ViewRefreshMode::OnStop {
            let delay = link
                .view_refresh_time_s
                .unwrap_or(self.config.view_refresh_time_s);
            self.view_links
                .borrow_mut()
                .insert(location.to_string(), delay);
        }
    }
}

fn parse_fetched(
    location: &str,
    bytes: Result<Bytes, FetchError>,
    entry: Option<ArchiveEntry>,
    registry: Rc<ElementRegistry>,
) -> Result<Rc<KmlDocument>, LoadError> {
    let bytes = bytes?;
    match entry {
        Some((archive, entry)) => KmlDocument::from_archive_entry(archive, &entry, &bytes, registry),
        None => KmlDocument::from_bytes(location, bytes, registry),
    }
}

impl StyleHost for SessionContext {
    fn load_document(&self, location: &str) -> SharedDocument {
        self.load_with(location, None)
    }

    fn spawn(&self, task: LocalBoxFuture<'static, ()>) {
        if let Err(e) = self.spawner.spawn_local(task) {
            warn!(error = %e, "session task pool is gone, dropping task");
        }
    }
}

impl RenderHost for SessionContext {
    fn current_attributes(&self, shape: &Rc<Element>) -> Option<Rc<AttributeBundle>> {
        self.resolver.current_attributes(shape)
    }

    fn linked_document(&self, link: &NetworkLink, location: &str) -> Option<Rc<KmlDocument>> {
        if !self.config.follow_network_links {
            return None;
        }
        self.track_link(link, location);
        if let Some(document) = self.document(location) {
            return Some(document);
        }
        self.load_document(location).now_or_never()?.ok()
    }

    fn max_link_depth(&self) -> u32 {
        self.config.max_link_depth
    }
}

impl std::fmt::Debug for SessionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContext")
            .field("config", &self.config)
            .field("cache", &self.cache.borrow())
            .field("refresh", &self.refresh.borrow())
            .finish()
    }
}

pub struct Session {
    context: Rc<SessionContext>,
    pool: LocalPool,
}

impl Session {
    pub fn new(fetcher: Rc<dyn Fetcher>, config: SessionConfig) -> Self {
        Self::with_clock(fetcher, config, Rc::new(SystemClock::new()))
    }

    pub fn with_clock(fetcher: Rc<dyn Fetcher>, config: SessionConfig, clock: Rc<dyn Clock>) -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        let context = Rc::new_cyclic(|this: &Weak<SessionContext>| {
            let host: Weak<dyn StyleHost> = this.clone();
            SessionContext {
                config,
                registry: Rc::new(ElementRegistry::kml()),
                fetcher,
                cache: RefCell::new(ResourceCache::new()),
                reloading: RefCell::new(BTreeMap::new()),
                archives: RefCell::new(BTreeMap::new()),
                refresh: RefCell::new(RefreshListener::new(clock)),
                scheduled: RefCell::new(BTreeSet::new()),
                view_links: RefCell::new(BTreeMap::new()),
                diagnostics: RefCell::new(Diagnostics::new()),
                default_style: Rc::new(AttributeBundle::default()),
                resolver: StyleResolver::new(host),
                spawner,
                this: this.clone(),
            }
        });
        Self { context, pool }
    }

    pub fn context(&self) -> &Rc<SessionContext> {
        &self.context
    }

    pub fn config(&self) -> &SessionConfig {
        &self.context.config
    }

    pub fn registry(&self) -> &Rc<ElementRegistry> {
        &self.context.registry
    }

    /// Starts (or joins) the load of `location`. The first document loaded
    /// successfully becomes the root.
    pub fn load(&self, location: &str) -> SharedDocument {
        self.context.load_document(location)
    }

    /// Parses `text` as the document at `location` and caches it.
    pub fn load_text(&self, location: &str, text: &str) -> Result<Rc<KmlDocument>, LoadError> {
        let document = KmlDocument::parse(location, text, Rc::clone(&self.context.registry))?;
        info!(location, shapes = document.shapes().len(), "loaded document from text");
        Ok(self.context.insert_document(document))
    }

    pub fn document(&self, location: &str) -> Option<Rc<KmlDocument>> {
        self.context.document(location)
    }

    pub fn root_document(&self) -> Result<Rc<KmlDocument>, LoadError> {
        self.context.root_document().ok_or(LoadError::NoRoot)
    }

    pub fn styles(&self, shape: &Rc<Element>) -> SharedBundle {
        self.context.resolver.styles(shape)
    }

    /// Attributes to draw `shape` with right now. Defaults until its styles
    /// have resolved.
    pub fn current_attributes(&self, shape: &Rc<Element>) -> Rc<AttributeBundle> {
        self.context
            .resolver
            .current_attributes(shape)
            .unwrap_or_else(|| Rc::clone(&self.context.default_style))
    }

    pub fn render(&self, document: &KmlDocument, collector: &mut dyn ShapeCollector) {
        let ctx = RenderContext::for_document(
            &*self.context,
            Rc::clone(&self.context.default_style),
            document.location(),
        );
        document.render(collector, &ctx);
    }

    /// Runs every task that can make progress, then starts reloads for the
    /// refresh events that have come due.
    pub fn tick(&mut self) -> TickSummary {
        self.pool.run_until_stalled();

        let due = self.context.refresh.borrow_mut().get_active_events();
        let mut refreshed = Vec::with_capacity(due.len());
        for event in due {
            let location = event.payload;
            self.context.scheduled.borrow_mut().remove(&location);
            info!(location = %location, kind = ?event.kind, "refreshing network link");
            let _ = self.context.reload(&location);
            refreshed.push(location);
        }
        if !refreshed.is_empty() {
            self.pool.run_until_stalled();
        }

        let refresh = self.context.refresh.borrow();
        TickSummary {
            refreshed,
            pending_refreshes: refresh.pending_len(),
            next_refresh: refresh.next_fire_time(),
        }
    }

    /// Drives the session's tasks until `future` completes.
    pub fn run_until<F: Future>(&mut self, future: F) -> F::Output {
        self.pool.run_until(future)
    }

    pub fn reload(&self, location: &str) -> SharedDocument {
        self.context.reload(location)
    }

    /// Restarts the view-stop timer of every `onStop` link seen so far.
    pub fn notify_view_changed(&self) -> usize {
        let links = self.context.view_links.borrow();
        let mut refresh = self.context.refresh.borrow_mut();
        for (location, delay) in links.iter() {
            refresh.cancel_where(|e| e.kind == RefreshKind::ViewStop && e.payload == *location);
            refresh.add_event(RefreshEvent::new(RefreshKind::ViewStop, location.clone(), *delay));
        }
        links.len()
    }

    /// Queues a reload of `location` for the next tick.
    pub fn request_refresh(&self, location: &str) {
        self.context
            .refresh
            .borrow_mut()
            .add_event(RefreshEvent::new(RefreshKind::Manual, location.to_string(), 0.0));
    }

    /// Session-level problems, such as failed loads. Problems inside a
    /// document are on [`KmlDocument::diagnostics`].
    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.context.diagnostics.borrow().entries().to_vec()
    }

    pub fn cache_metrics(&self) -> CacheMetrics {
        self.context.cache.borrow().metrics().clone()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("context", &self.context).finish()
    }
}
