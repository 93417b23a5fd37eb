//! Background monitor
//!
//! Watches navigation events and redirects any tab whose new URL is blocked
//! by the cached rule tree. It only ever reads the local cache; it never
//! waits for a fresher copy, so a write made elsewhere takes effect once its
//! change notification has refreshed the cache.

use std::future::Future;
use std::sync::Arc;

use chrono::NaiveTime;
use log::{debug, error, info};
use tokio::sync::mpsc;

use pb_core::url::is_same_page;
use pb_core::{Matcher, TreeCache, UnknownKindPolicy};

/// Browser tab identifier.
pub type TabId = i32;

/// Default page blocked navigations are sent to.
pub const DEFAULT_REDIRECT_TARGET: &str = "/blocked.html";

/// A tab finished (or started) navigating.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationEvent {
    pub tab_id: TabId,
    /// New URL, if the update carried one
    pub url: Option<String>,
}

impl NavigationEvent {
    pub fn new(tab_id: TabId, url: impl Into<String>) -> Self {
        Self {
            tab_id,
            url: Some(url.into()),
        }
    }
}

/// A redirect issued for a blocked navigation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirect {
    pub tab_id: TabId,
    /// The blocked URL
    pub url: String,
    /// Where the tab was sent
    pub target: String,
    /// Pathname of the rule that matched
    pub rule_path: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("Failed to redirect tab {tab_id}: {reason}")]
pub struct TabError {
    pub tab_id: TabId,
    pub reason: String,
}

/// Something that can point a tab at a new URL.
pub trait TabController: Send + Sync + 'static {
    fn redirect(&self, tab_id: TabId, url: &str) -> impl Future<Output = Result<(), TabError>> + Send;
}

/// Source of the current time of day, for schedule windows.
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveTime;
}

/// Local wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveTime {
        chrono::Local::now().time()
    }
}

/// A clock stuck at one time of day.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveTime {
        self.0
    }
}

/// Monitor behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Page blocked tabs are sent to, absolute or relative to the origin
    pub redirect_target: String,
    /// Origin a relative target is served from, e.g. `chrome-extension://<id>`
    pub extension_origin: Option<String>,
    pub unknown_kinds: UnknownKindPolicy,
    /// Whether rule schedule windows are honored
    pub enforce_schedules: bool,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            redirect_target: DEFAULT_REDIRECT_TARGET.to_string(),
            extension_origin: None,
            unknown_kinds: UnknownKindPolicy::FailOpen,
            enforce_schedules: true,
        }
    }
}

impl MonitorSettings {
    /// Absolute URL of the blocked page, as a tab showing it reports it.
    pub fn blocked_page_url(&self) -> String {
        match &self.extension_origin {
            Some(origin) if self.redirect_target.starts_with('/') => {
                format!("{}{}", origin.trim_end_matches('/'), self.redirect_target)
            }
            _ => self.redirect_target.clone(),
        }
    }
}

pub struct BackgroundMonitor<T, C = SystemClock> {
    cache: Arc<TreeCache>,
    tabs: T,
    clock: C,
    matcher: Matcher,
    settings: MonitorSettings,
}

impl<T: TabController> BackgroundMonitor<T, SystemClock> {
    pub fn new(cache: Arc<TreeCache>, tabs: T, settings: MonitorSettings) -> Self {
        Self {
            cache,
            tabs,
            clock: SystemClock,
            matcher: Matcher::new(settings.unknown_kinds),
            settings,
        }
    }
}

impl<T: TabController, C: Clock> BackgroundMonitor<T, C> {
    pub fn with_clock<C2: Clock>(self, clock: C2) -> BackgroundMonitor<T, C2> {
        BackgroundMonitor {
            cache: self.cache,
            tabs: self.tabs,
            clock,
            matcher: self.matcher,
            settings: self.settings,
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn tabs(&self) -> &T {
        &self.tabs
    }

    /// Decide whether `event` must be redirected, without acting on it.
    pub fn evaluate(&self, event: &NavigationEvent) -> Option<Redirect> {
        let url = event.url.as_deref()?;
        if self.is_redirect_target(url) {
            debug!("Tab {} is on the blocked page; skipping", event.tab_id);
            return None;
        }

        let tree = self.cache.snapshot();
        let now = self.settings.enforce_schedules.then(|| self.clock.now());
        let result = self.matcher.match_url_at(url, tree.root(), now);
        if !result.is_blocked() {
            return None;
        }

        Some(Redirect {
            tab_id: event.tab_id,
            url: url.to_string(),
            target: self.settings.redirect_target.clone(),
            rule_path: result.rule_path.unwrap_or_default(),
        })
    }

    /// Redirect the tab if its new URL is blocked.
    ///
    /// A failed redirect is returned to the caller and never retried.
    pub async fn handle_event(&self, event: &NavigationEvent) -> Result<Option<Redirect>, TabError> {
        let redirect = match self.evaluate(event) {
            Some(redirect) => redirect,
            None => return Ok(None),
        };
        self.tabs.redirect(redirect.tab_id, &redirect.target).await?;
        info!(
            "Redirected tab {} away from {} (rule {})",
            redirect.tab_id,
            redirect.url,
            redirect.rule_path.join("/")
        );
        Ok(Some(redirect))
    }

    /// Consume navigation events until the sender side closes.
    ///
    /// Returns the number of redirects issued.
    pub async fn run(&self, mut events: mpsc::Receiver<NavigationEvent>) -> usize {
        let mut redirects = 0usize;
        while let Some(event) = events.recv().await {
            match self.handle_event(&event).await {
                Ok(Some(_)) => redirects += 1,
                Ok(None) => {}
                Err(e) => error!("{}", e),
            }
        }
        debug!("Navigation event stream closed after {} redirects", redirects);
        redirects
    }

    /// The blocked page itself must never be redirected, or a rule matching
    /// its URL would loop. Only an exact match counts.
    fn is_redirect_target(&self, url: &str) -> bool {
        is_same_page(url, &self.settings.blocked_page_url())
    }
}
