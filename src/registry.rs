//! The form registry and its process-wide cache.
//!
//! Forms are read from a [`FormRegistryStore`] and kept in a
//! [`FormRegistryCache`] for a fixed time-to-live (5 minutes by default).
//! The cache is an explicit service object: construct it once at start-up,
//! share it behind an `Arc`, and call [`FormRegistryCache::invalidate`] (or
//! [`clear_form_mappings_cache`]) from any flow that edits the registry.
//!
//! Refreshes are not serialized. Concurrent requests that see an expired
//! snapshot may each fetch and replace it; every snapshot is an immutable
//! `Arc`, so the last writer wins and readers never observe a partial one.
//! A fetch that was already running when the cache was invalidated does not
//! store its result, so an edit is visible on the next load.

use crate::error::FormAccessError;
use crate::form::{CompiledForm, FormRegistryEntry};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::cmp::Reverse;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Default time-to-live of a loaded snapshot.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5 * 60);

/// Persistent source of registry entries.
///
/// # Example
/// ```
/// use axum_form_access::{FormAccessError, FormRegistryEntry, FormRegistryStore};
/// use async_trait::async_trait;
///
/// struct Forms;
///
/// #[async_trait]
/// impl FormRegistryStore for Forms {
///     async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError> {
///         // SELECT FormCode, FormName, ModuleName, FormUrl, IsActive
///         //   FROM Forms WHERE IsActive = 1 ORDER BY LEN(FormUrl) DESC
///         Ok(vec![FormRegistryEntry::new("THEFT", "Theft Report", "/theft-report")])
///     }
/// }
/// ```
#[async_trait]
pub trait FormRegistryStore: Send + Sync {
    /// List the active entries, ideally longest URL first.
    async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError>;
}

#[async_trait]
impl<T: FormRegistryStore + ?Sized> FormRegistryStore for Arc<T> {
    async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError> {
        (**self).list_active().await
    }
}

/// A store over a fixed list of entries.
#[derive(Debug, Clone, Default)]
pub struct StaticFormStore {
    entries: Vec<FormRegistryEntry>,
}

impl StaticFormStore {
    /// Create a store.
    pub fn new(entries: Vec<FormRegistryEntry>) -> Self {
        Self { entries }
    }
}

#[async_trait]
impl FormRegistryStore for StaticFormStore {
    async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError> {
        Ok(self.entries.iter().filter(|e| e.is_active).cloned().collect())
    }
}

/// A mutable in-process store.
///
/// Editing it does not touch any cache; callers invalidate the cache
/// themselves after a successful edit.
#[derive(Debug, Default)]
pub struct InMemoryFormStore {
    entries: RwLock<Vec<FormRegistryEntry>>,
}

impl InMemoryFormStore {
    /// Create a store with initial entries.
    pub fn new(entries: Vec<FormRegistryEntry>) -> Self {
        Self {
            entries: RwLock::new(entries),
        }
    }

    /// Insert an entry, replacing any entry with the same form code.
    pub fn upsert(&self, entry: FormRegistryEntry) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.form_code == entry.form_code) {
            Some(existing) => *existing = entry,
            None => entries.push(entry),
        }
    }

    /// Activate or deactivate a form. Returns `false` for an unknown code.
    pub fn set_active(&self, form_code: &str, is_active: bool) -> bool {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|e| e.form_code == form_code) {
            Some(entry) => {
                entry.is_active = is_active;
                true
            }
            None => false,
        }
    }

    /// Remove a form. Returns `false` for an unknown code.
    pub fn remove(&self, form_code: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| e.form_code != form_code);
        entries.len() != before
    }

    /// All entries, active or not.
    pub fn entries(&self) -> Vec<FormRegistryEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl FormRegistryStore for InMemoryFormStore {
    async fn list_active(&self) -> Result<Vec<FormRegistryEntry>, FormAccessError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.is_active)
            .cloned()
            .collect())
    }
}

/// Source of the current time for cache expiry.
pub trait Clock: Send + Sync {
    /// Current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock stopped at `start`.
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let by = chrono::Duration::from_std(by).unwrap_or_else(|_| chrono::Duration::zero());
        let mut now = self.now.lock();
        *now += by;
    }

    /// Set the clock.
    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }
}

impl<T: Clock + ?Sized> Clock for Arc<T> {
    fn now(&self) -> DateTime<Utc> {
        (**self).now()
    }
}

/// An immutable, ordered set of compiled forms.
#[derive(Debug, Clone)]
pub struct FormSnapshot {
    forms: Vec<CompiledForm>,
    loaded_at: Option<DateTime<Utc>>,
}

impl FormSnapshot {
    /// Build a snapshot: drop inactive entries, order longest URL first, compile.
    ///
    /// The sort is stable, so entries of equal URL length keep store order.
    pub fn build(entries: Vec<FormRegistryEntry>, loaded_at: DateTime<Utc>) -> Self {
        let mut entries: Vec<_> = entries.into_iter().filter(|e| e.is_active).collect();
        entries.sort_by_key(|e| Reverse(e.url_len()));
        Self {
            forms: entries.into_iter().map(CompiledForm::new).collect(),
            loaded_at: Some(loaded_at),
        }
    }

    /// A snapshot with no forms that was never loaded.
    pub fn empty() -> Self {
        Self {
            forms: Vec::new(),
            loaded_at: None,
        }
    }

    /// The compiled forms, longest URL first.
    pub fn forms(&self) -> &[CompiledForm] {
        &self.forms
    }

    /// When the snapshot was fetched. `None` for the empty fallback.
    pub fn loaded_at(&self) -> Option<DateTime<Utc>> {
        self.loaded_at
    }

    /// Number of forms.
    pub fn len(&self) -> usize {
        self.forms.len()
    }

    /// Whether no forms are known.
    pub fn is_empty(&self) -> bool {
        self.forms.is_empty()
    }
}

/// Time-to-live cache over a [`FormRegistryStore`].
///
/// # Example
/// ```
/// use axum_form_access::{FormRegistryCache, FormRegistryEntry, StaticFormStore};
/// use std::time::Duration;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let store = StaticFormStore::new(vec![
///     FormRegistryEntry::new("OHS", "OHS Inspection", "/ohs-inspection"),
/// ]);
/// let cache = FormRegistryCache::new(store).with_ttl(Duration::from_secs(60));
///
/// let first = cache.load().await;
/// let second = cache.load().await;
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// # }
/// ```
pub struct FormRegistryCache {
    store: Arc<dyn FormRegistryStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    fetch_timeout: Option<Duration>,
    slot: RwLock<Option<Arc<FormSnapshot>>>,
    // Bumped by every invalidation, under the slot lock.
    generation: AtomicU64,
    empty: Arc<FormSnapshot>,
}

impl FormRegistryCache {
    /// Create a cache over `store` with the default TTL and the system clock.
    pub fn new(store: impl FormRegistryStore + 'static) -> Self {
        Self::from_arc(Arc::new(store))
    }

    /// Create a cache over a shared store.
    pub fn from_arc(store: Arc<dyn FormRegistryStore>) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            ttl: DEFAULT_CACHE_TTL,
            fetch_timeout: None,
            slot: RwLock::new(None),
            generation: AtomicU64::new(0),
            empty: Arc::new(FormSnapshot::empty()),
        }
    }

    /// Set the time-to-live.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Use a different clock.
    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Give up on a store fetch after `timeout`. A timeout counts as a failed fetch.
    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = Some(timeout);
        self
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Current forms.
    ///
    /// Returns the cached snapshot while it is younger than the TTL, without
    /// touching the store. Otherwise fetches and replaces it. If the fetch
    /// fails the previous snapshot is returned even though it is stale, or an
    /// empty one when nothing was ever loaded. Never fails.
    pub async fn load(&self) -> Arc<FormSnapshot> {
        match self.try_load().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                let previous = self.slot.read().clone();
                tracing::warn!(
                    error = %err,
                    stale = previous.is_some(),
                    "Form registry fetch failed, using previous forms"
                );
                previous.unwrap_or_else(|| self.empty.clone())
            }
        }
    }

    /// Like [`load`](Self::load) but reports a failed fetch instead of
    /// falling back.
    pub async fn try_load(&self) -> Result<Arc<FormSnapshot>, FormAccessError> {
        if let Some(snapshot) = self.fresh() {
            tracing::trace!(forms = snapshot.len(), "Form registry cache hit");
            return Ok(snapshot);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let snapshot = self.fetch().await?;

        let mut slot = self.slot.write();
        if self.generation.load(Ordering::Acquire) == generation {
            tracing::debug!(forms = snapshot.len(), "Form registry loaded");
            *slot = Some(snapshot.clone());
        } else {
            tracing::debug!(
                forms = snapshot.len(),
                "Form registry invalidated during fetch, not caching result"
            );
        }
        Ok(snapshot)
    }

    /// Drop the cached snapshot. The next load fetches from the store.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write();
        *slot = None;
        self.generation.fetch_add(1, Ordering::AcqRel);
        drop(slot);
        tracing::debug!("Form registry cache cleared");
    }

    /// The cached snapshot, fresh or not, without fetching.
    pub fn cached(&self) -> Option<Arc<FormSnapshot>> {
        self.slot.read().clone()
    }

    fn fresh(&self) -> Option<Arc<FormSnapshot>> {
        let slot = self.slot.read();
        let snapshot = slot.as_ref()?;
        let loaded_at = snapshot.loaded_at?;
        // A clock that moved backwards counts as expired.
        match (self.clock.now() - loaded_at).to_std() {
            Ok(age) if age < self.ttl => Some(snapshot.clone()),
            _ => None,
        }
    }

    async fn fetch(&self) -> Result<Arc<FormSnapshot>, FormAccessError> {
        let entries = match self.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.store.list_active())
                .await
                .map_err(|_| FormAccessError::StoreTimeout(limit))??,
            None => self.store.list_active().await?,
        };
        Ok(Arc::new(FormSnapshot::build(entries, self.clock.now())))
    }
}

impl fmt::Debug for FormRegistryCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormRegistryCache")
            .field("ttl", &self.ttl)
            .field("fetch_timeout", &self.fetch_timeout)
            .field("cached_forms", &self.cached().map(|s| s.len()))
            .finish()
    }
}

/// Clear the form mappings cache after a registry edit.
pub fn clear_form_mappings_cache(cache: &FormRegistryCache) {
    cache.invalidate();
}
