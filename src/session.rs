//! Stale-while-revalidate sessions.
//!
//! A `FetchSession` follows one resource key at a time on behalf of one
//! consumer. Activating a key starts two operations concurrently:
//!
//! - **revalidate**: call the fetcher, write the result to the store, publish it as `Valid`
//! - **hydrate**: read the store and publish the cached payload as `Stale`
//!
//! Nothing is ever aborted when the key changes. Every continuation compares
//! the key it was issued for with the active key when it resumes and drops its
//! result on mismatch. Hydration additionally yields to a remote result that
//! already landed for the current activation, so a slow cache read never
//! overwrites fresher data.
//!
//! State is published through a `tokio::sync::watch` channel.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::context::FetchContext;
use crate::error::{CacheError, FetchError};
use crate::fetcher::Fetcher;
use crate::normalize::{Params, normalize_url};
use crate::store::Store;

/// Callback invoked with the key and the data of a successful remote load.
pub type LoadCallback<T> = Arc<dyn Fn(&str, &T) + Send + Sync>;

/// Provenance of the data currently shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataStatus {
    /// No data for the active key yet.
    #[default]
    Absent,
    /// Data read from the store, or kept from the previous key; a remote result is pending or failed.
    Stale,
    /// Data returned by the fetcher for the active key.
    Valid,
}

/// Observable state of a session.
#[derive(Debug, Clone)]
pub struct FetchState<T> {
    /// The active resource key.
    pub key: Option<String>,
    pub data: Option<T>,
    /// Last remote failure. Cleared by the next remote success.
    pub error: Option<FetchError>,
    pub status: DataStatus,
    /// A first remote load for the key is in flight.
    pub loading: bool,
    /// A remote refresh of an already loaded key is in flight.
    pub reloading: bool,
}

impl<T> Default for FetchState<T> {
    fn default() -> Self {
        FetchState {
            key: None,
            data: None,
            error: None,
            status: DataStatus::Absent,
            loading: false,
            reloading: false,
        }
    }
}

/// Per-activation options.
pub struct FetchOptions<T> {
    /// Overrides the context fetcher.
    pub fetcher: Option<Arc<dyn Fetcher>>,
    /// Overrides the context store.
    pub store: Option<Arc<dyn Store>>,
    /// Merged into the key's query string.
    pub params: Option<Params>,
    /// Do not fetch or hydrate; the state resets to `Absent`.
    pub disabled: bool,
    /// Keep the previous key's data and error visible until the new key loads.
    pub preserve: bool,
    /// Revalidate periodically while the key is active.
    pub interval: Option<Duration>,
    /// Called on the first successful remote load of a key.
    pub on_load: Option<LoadCallback<T>>,
    /// Called on every later successful remote load of the same key.
    pub on_reload: Option<LoadCallback<T>>,
    /// Extra values; a change forces re-activation in `FetchSession::update`.
    pub dependencies: Vec<Value>,
}

impl<T> Default for FetchOptions<T> {
    fn default() -> Self {
        FetchOptions {
            fetcher: None,
            store: None,
            params: None,
            disabled: false,
            preserve: false,
            interval: None,
            on_load: None,
            on_reload: None,
            dependencies: Vec::new(),
        }
    }
}

impl<T> Clone for FetchOptions<T> {
    fn clone(&self) -> Self {
        FetchOptions {
            fetcher: self.fetcher.clone(),
            store: self.store.clone(),
            params: self.params.clone(),
            disabled: self.disabled,
            preserve: self.preserve,
            interval: self.interval,
            on_load: self.on_load.clone(),
            on_reload: self.on_reload.clone(),
            dependencies: self.dependencies.clone(),
        }
    }
}

impl<T> FetchOptions<T> {
    pub fn fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Arc::new(fetcher));
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Add one query parameter to the key.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params
            .get_or_insert_with(Params::new)
            .insert(name.into(), value.into());
        self
    }

    pub fn params(mut self, params: Params) -> Self {
        self.params = Some(params);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = disabled;
        self
    }

    pub fn preserve(mut self, preserve: bool) -> Self {
        self.preserve = preserve;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn on_load(mut self, callback: impl Fn(&str, &T) + Send + Sync + 'static) -> Self {
        self.on_load = Some(Arc::new(callback));
        self
    }

    pub fn on_reload(mut self, callback: impl Fn(&str, &T) + Send + Sync + 'static) -> Self {
        self.on_reload = Some(Arc::new(callback));
        self
    }

    pub fn dependency(mut self, value: impl Into<Value>) -> Self {
        self.dependencies.push(value.into());
        self
    }
}

/// One consumer's view of one resource key at a time.
///
/// Methods that start work (`activate`, `update`) spawn onto the ambient tokio
/// runtime and must be called from within one. Dropping the session cancels
/// periodic refresh and silences every in-flight operation.
///
/// # Example
/// ```ignore
/// let session = context.session::<User>();
/// let mut state = session.subscribe();
///
/// session.activate("/users/1", FetchOptions::default());
/// let loaded = state.wait_for(|s| !s.loading).await?;
/// ```
pub struct FetchSession<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    context: FetchContext,
    state: watch::Sender<FetchState<T>>,
    slot: Mutex<Slot<T>>,
}

struct Slot<T> {
    active: Option<Activation<T>>,
    /// Key whose remote result last landed.
    last_completed: Option<String>,
    ticker: Option<JoinHandle<()>>,
}

struct Activation<T> {
    key: String,
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn Store>,
    disabled: bool,
    interval: Option<Duration>,
    dependencies: Vec<Value>,
    on_load: Option<LoadCallback<T>>,
    on_reload: Option<LoadCallback<T>>,
    remote_landed: bool,
}

impl<T> FetchSession<T>
where
    T: Clone + Send + Sync + DeserializeOwned + 'static,
{
    /// Create an idle session. Prefer `FetchContext::session`.
    pub fn new(context: FetchContext) -> Self {
        let (state, _) = watch::channel(FetchState::default());
        FetchSession {
            shared: Arc::new(Shared {
                context,
                state,
                slot: Mutex::new(Slot {
                    active: None,
                    last_completed: None,
                    ticker: None,
                }),
            }),
        }
    }

    /// Make `url` (normalized with `options.params`) the active key and start
    /// revalidation and hydration, even if it is already active.
    pub fn activate(&self, url: &str, options: FetchOptions<T>) {
        let key = normalize_url(url, options.params.as_ref());
        self.shared.activate(key, options);
    }

    /// Like `activate`, but only when something that identifies the request changed:
    /// the key, `disabled`, `dependencies`, or the fetcher/store in use.
    ///
    /// Otherwise callbacks are replaced in place and the periodic
    /// refresh is rescheduled if `interval` changed.
    pub fn update(&self, url: &str, options: FetchOptions<T>) {
        let key = normalize_url(url, options.params.as_ref());
        if !self.shared.refresh_in_place(&key, &options) {
            self.shared.activate(key, options);
        }
    }

    /// Fetch the active key again.
    ///
    /// Resolves once the result has been applied (or discarded).
    pub async fn reload(&self) {
        self.shared.reload().await;
    }

    /// Delete the active key from its store.
    ///
    /// The data on display is left alone.
    pub async fn remove(&self) -> Result<(), CacheError> {
        let target = {
            let slot = self.shared.slot.lock();
            slot.active
                .as_ref()
                .map(|active| (active.key.clone(), Arc::clone(&active.store)))
        };

        match target {
            Some((key, store)) => store.remove(&key).await,
            None => Ok(()),
        }
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> FetchState<T> {
        self.shared.state.borrow().clone()
    }

    /// Receive every state change.
    pub fn subscribe(&self) -> watch::Receiver<FetchState<T>> {
        self.shared.state.subscribe()
    }

    /// The active key, if any.
    pub fn key(&self) -> Option<String> {
        self.shared
            .slot
            .lock()
            .active
            .as_ref()
            .map(|active| active.key.clone())
    }

    /// Stop following the active key.
    ///
    /// Cancels periodic refresh; results still in flight are discarded.
    pub fn detach(&self) {
        self.shared.detach();
    }
}

impl<T> Drop for FetchSession<T> {
    fn drop(&mut self) {
        self.shared.detach();
    }
}

impl<T> Shared<T> {
    fn detach(&self) {
        let mut slot = self.slot.lock();
        if let Some(ticker) = slot.ticker.take() {
            ticker.abort();
        }
        slot.active = None;
    }

    /// Flag a remote load as in flight: `loading` for a key never loaded, else `reloading`.
    fn mark_pending(&self, slot: &Slot<T>, key: &str) {
        let first = slot.last_completed.as_deref() != Some(key);
        self.state.send_modify(|state| {
            state.loading = first;
            state.reloading = !first;
        });
    }
}

impl<T> Shared<T>
where
    T: Clone + Send + Sync + DeserializeOwned + 'static,
{
    fn resolve(&self, options: &FetchOptions<T>) -> (Arc<dyn Fetcher>, Arc<dyn Store>) {
        let fetcher = options
            .fetcher
            .clone()
            .unwrap_or_else(|| Arc::clone(self.context.fetcher()));
        let store = options
            .store
            .clone()
            .unwrap_or_else(|| Arc::clone(self.context.store()));
        (fetcher, store)
    }

    fn activate(self: &Arc<Self>, key: String, options: FetchOptions<T>) {
        let (fetcher, store) = self.resolve(&options);
        let FetchOptions {
            disabled,
            preserve,
            interval,
            on_load,
            on_reload,
            dependencies,
            ..
        } = options;

        let mut slot = self.slot.lock();
        if let Some(ticker) = slot.ticker.take() {
            ticker.abort();
        }
        slot.active = Some(Activation {
            key: key.clone(),
            fetcher: Arc::clone(&fetcher),
            store: Arc::clone(&store),
            disabled,
            interval,
            dependencies,
            on_load,
            on_reload,
            remote_landed: false,
        });

        // Clear the previous key's view before any async work is issued.
        self.state.send_modify(|state| {
            state.key = Some(key.clone());
            state.loading = false;
            state.reloading = false;
            if preserve && !disabled {
                state.status = if state.data.is_some() {
                    DataStatus::Stale
                } else {
                    DataStatus::Absent
                };
            } else {
                state.data = None;
                state.error = None;
                state.status = DataStatus::Absent;
            }
        });

        if disabled {
            debug!(key = %key, "activated disabled key");
            return;
        }

        debug!(key = %key, "activated key");
        self.mark_pending(&slot, &key);
        if let Some(period) = interval {
            slot.ticker = self.spawn_ticker(period);
        }
        drop(slot);

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            futures::join!(
                shared.revalidate(&key, &fetcher, &store),
                shared.hydrate(&key, &store),
            );
        });
    }

    /// Apply `options` to the active activation if it still describes the same request.
    fn refresh_in_place(self: &Arc<Self>, key: &str, options: &FetchOptions<T>) -> bool {
        let (fetcher, store) = self.resolve(options);
        let mut slot = self.slot.lock();
        let slot = &mut *slot;

        let Some(active) = slot.active.as_mut() else {
            return false;
        };
        let same_request = active.key == key
            && active.disabled == options.disabled
            && active.dependencies == options.dependencies
            && Arc::ptr_eq(&active.fetcher, &fetcher)
            && Arc::ptr_eq(&active.store, &store);
        if !same_request {
            return false;
        }

        active.on_load = options.on_load.clone();
        active.on_reload = options.on_reload.clone();

        if active.interval != options.interval {
            active.interval = options.interval;
            if let Some(ticker) = slot.ticker.take() {
                ticker.abort();
            }
            if let (false, Some(period)) = (active.disabled, options.interval) {
                slot.ticker = self.spawn_ticker(period);
            }
        }

        true
    }

    fn spawn_ticker(self: &Arc<Self>, period: Duration) -> Option<JoinHandle<()>> {
        if period.is_zero() {
            warn!("ignoring zero refresh interval");
            return None;
        }

        let shared: Weak<Self> = Arc::downgrade(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.reload().await;
            }
        }))
    }

    async fn reload(&self) {
        let target = {
            let slot = self.slot.lock();
            match slot.active.as_ref() {
                Some(active) if !active.disabled => {
                    self.mark_pending(&slot, &active.key);
                    Some((
                        active.key.clone(),
                        Arc::clone(&active.fetcher),
                        Arc::clone(&active.store),
                    ))
                }
                _ => None,
            }
        };

        if let Some((key, fetcher, store)) = target {
            self.revalidate(&key, &fetcher, &store).await;
        }
    }

    async fn revalidate(&self, key: &str, fetcher: &Arc<dyn Fetcher>, store: &Arc<dyn Store>) {
        let outcome = fetcher.fetch(key).await.and_then(|raw| {
            serde_json::from_value::<T>(raw.clone())
                .map(|data| (raw, data))
                .map_err(|e| FetchError::Decode(e.to_string()))
        });

        match outcome {
            Ok((raw, data)) => {
                if let Err(e) = store.set(key, raw).await {
                    warn!(store = store.name(), key, error = %e, "failed to cache fetched payload");
                }
                if let Some(callback) = self.land(key, data.clone()) {
                    callback(key, &data);
                }
            }
            Err(e) => self.fail(key, e),
        }
    }

    /// Publish a remote result. Returns the load/reload callback to run, if any.
    fn land(&self, key: &str, data: T) -> Option<LoadCallback<T>> {
        let mut slot = self.slot.lock();
        let slot = &mut *slot;

        let Some(active) = slot.active.as_mut().filter(|a| a.key == key && !a.disabled) else {
            debug!(key, "discarding remote result for inactive key");
            return None;
        };

        active.remote_landed = true;
        let first = slot.last_completed.as_deref() != Some(key);
        let callback = if first {
            active.on_load.clone()
        } else {
            active.on_reload.clone()
        };
        slot.last_completed = Some(key.to_string());

        self.state.send_modify(|state| {
            state.data = Some(data);
            state.error = None;
            state.status = DataStatus::Valid;
            state.loading = false;
            state.reloading = false;
        });

        callback
    }

    fn fail(&self, key: &str, error: FetchError) {
        let slot = self.slot.lock();
        if !slot.active.as_ref().is_some_and(|a| a.key == key && !a.disabled) {
            debug!(key, "discarding remote failure for inactive key");
            return;
        }

        debug!(key, error = %error, "remote fetch failed");
        self.state.send_modify(|state| {
            state.error = Some(error);
            state.loading = false;
            state.reloading = false;
        });
    }

    async fn hydrate(&self, key: &str, store: &Arc<dyn Store>) {
        match store.has(key).await {
            Ok(true) => {}
            Ok(false) => return,
            Err(e) => {
                warn!(store = store.name(), key, error = %e, "failed to check store");
                return;
            }
        }

        let raw = match store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return,
            Err(e) => {
                warn!(store = store.name(), key, error = %e, "failed to read store");
                return;
            }
        };

        let data: T = match serde_json::from_value(raw) {
            Ok(data) => data,
            Err(e) => {
                warn!(store = store.name(), key, error = %e, "ignoring undecodable cached payload");
                return;
            }
        };

        let slot = self.slot.lock();
        let applies = slot
            .active
            .as_ref()
            .is_some_and(|a| a.key == key && !a.disabled && !a.remote_landed);
        if !applies {
            debug!(key, "discarding cached payload");
            return;
        }

        self.state.send_modify(|state| {
            state.data = Some(data);
            state.status = DataStatus::Stale;
        });
    }
}
