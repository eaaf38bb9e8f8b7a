//! Observable now-playing state store.
//!
//! The store is the single source of truth for track metadata. It holds
//! one [`NowPlaying`] record, fed by an initial fetch and by full-snapshot
//! frames from the push channel, and lets the command layer apply
//! optimistic patches that later frames or rollbacks overwrite.
//!
//! Notification is a synchronous fan-out in registration order: every
//! registered listener sees every mutation exactly once, in the order the
//! mutations were applied, and nothing after it unsubscribes. Listeners
//! must hand work off (e.g. over a channel)
//! rather than call back into the store, and must not subscribe or
//! unsubscribe from within a notification.

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Mutex, Weak,
};

use tokio_util::sync::CancellationToken;
use url::Url;

use crate::{
    gateway::NowPlayingApi,
    protocol::{NowPlaying, StatePatch},
    push,
};

type Listener = Box<dyn Fn(&NowPlaying) + Send + Sync>;

/// Shared, observable now-playing state.
///
/// Constructed once by whoever owns the UI tree and torn down with
/// [`shutdown`](Self::shutdown). The first subscription lazily triggers
/// exactly one initial fetch and opens the single push-channel connection.
pub struct Store<A> {
    api: Arc<A>,
    ws_url: Url,

    state: Mutex<Option<NowPlaying>>,
    /// Held across mutation *and* fan-out, so concurrent writers cannot
    /// deliver their notifications out of mutation order. Never taken by
    /// readers.
    write: Mutex<()>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,

    started: AtomicBool,
    shutdown: CancellationToken,
}

/// Handle returned by [`Store::subscribe`].
///
/// Unsubscribes on drop or explicitly via [`unsubscribe`](Self::unsubscribe).
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    /// Removes the listener; equivalent to dropping the handle.
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl<A> Store<A>
where
    A: NowPlayingApi + Send + Sync + 'static,
{
    pub fn new(api: Arc<A>, ws_url: Url) -> Arc<Self> {
        Arc::new(Self {
            api,
            ws_url,
            state: Mutex::new(None),
            write: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        })
    }

    /// Returns a clone of the current record, or `None` before first load.
    #[must_use]
    pub fn get(&self) -> Option<NowPlaying> {
        // OK to unwrap: a poisoned lock means a listener panicked and the
        // process is going down anyway.
        self.state.lock().unwrap().clone()
    }

    /// Registers a listener for every subsequent mutation.
    ///
    /// The first subscriber triggers the initial fetch and opens the push
    /// channel; both happen exactly once for the store's lifetime.
    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(&NowPlaying) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .lock()
            .unwrap()
            .push((id, Box::new(listener)));

        if !self.started.swap(true, Ordering::SeqCst) {
            self.start();
        }

        let weak: Weak<Self> = Arc::downgrade(self);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(store) = weak.upgrade() {
                    store.listeners.lock().unwrap().retain(|(i, _)| *i != id);
                }
            })),
        }
    }

    /// Shallow-merges a partial update into the current record.
    ///
    /// A no-op before the first load: optimistic updates make no sense
    /// against a record we have never seen.
    pub fn patch(&self, patch: &StatePatch) {
        let _write = self.write.lock().unwrap();
        let record = {
            let mut state = self.state.lock().unwrap();
            let Some(record) = state.as_mut() else {
                debug!("dropping patch before first load");
                return;
            };
            patch.apply(record);
            record.clone()
        };
        self.notify(&record);
    }

    /// Installs a server-authoritative snapshot and always notifies.
    pub fn replace(&self, record: NowPlaying) {
        let _write = self.write.lock().unwrap();
        *self.state.lock().unwrap() = Some(record.clone());
        self.notify(&record);
    }

    /// Cancels the push-channel task. The last known record stays
    /// readable; only live updates stop.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn notify(&self, record: &NowPlaying) {
        let listeners = self.listeners.lock().unwrap();
        for (_, listener) in listeners.iter() {
            listener(record);
        }
    }

    /// Kicks off the initial fetch and the push-channel task.
    fn start(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            match store.api.fetch_state().await {
                Ok(record) => store.replace(record),
                Err(e) => {
                    warn!("initial state fetch failed: {e}");
                    // A push frame may have landed first; never clobber a
                    // real record with the placeholder.
                    if store.get().is_none() {
                        store.replace(NowPlaying::offline());
                    }
                }
            }
        });

        let store = Arc::clone(self);
        let url = self.ws_url.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            push::run(
                url,
                move |record| store.replace(record),
                shutdown,
            )
            .await;
        });
    }
}
