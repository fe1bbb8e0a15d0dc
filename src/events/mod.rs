/*
 * Event multiplexer: many subscribers over one underlying subscription
 *
 * Phases run Idle -> Creating -> Active -> Idle. The first subscriber starts
 * the underlying subscription, later ones join it, the last one to leave
 * tears it down.
 */

pub mod token_created;

pub use token_created::{LogStreamSource, TokenCreated};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, error, info, warn};

use crate::metrics::QuoterMetrics;
use crate::models::{QuoterError, Result};

/// Closes an underlying subscription.
pub type Teardown = Box<dyn FnOnce() + Send>;
pub type DataCallback<E> = Arc<dyn Fn(&E) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&QuoterError) + Send + Sync>;

type Creation = Shared<BoxFuture<'static, Result<()>>>;

/// Something that can be watched: `open` starts delivering into `sink` and
/// resolves once the subscription is live.
#[async_trait]
pub trait EventSource<E>: Send + Sync {
    async fn open(&self, sink: EventSink<E>) -> Result<Teardown>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplexerPhase {
    Idle,
    Creating,
    Active,
}

enum Phase {
    Idle,
    Creating { generation: u64, ready: Creation },
    Active(Teardown),
}

impl Phase {
    fn observed(&self) -> MultiplexerPhase {
        match self {
            Phase::Idle => MultiplexerPhase::Idle,
            Phase::Creating { .. } => MultiplexerPhase::Creating,
            Phase::Active(_) => MultiplexerPhase::Active,
        }
    }
}

struct State<E> {
    phase: Phase,
    data: BTreeMap<u64, DataCallback<E>>,
    errors: BTreeMap<u64, ErrorCallback>,
    ref_count: usize,
    generation: u64,
    next_id: u64,
}

struct Inner<E> {
    name: String,
    source: Arc<dyn EventSource<E>>,
    state: Mutex<State<E>>,
    metrics: Option<Arc<QuoterMetrics>>,
}

/// Handle given to a source to push events and errors to the subscribers.
pub struct EventSink<E> {
    inner: Weak<Inner<E>>,
}

impl<E> Clone for EventSink<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Send + Sync + 'static> EventSink<E> {
    /// Returns false once the multiplexer is gone.
    pub fn emit(&self, event: &E) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.broadcast(event);
                true
            }
            None => false,
        }
    }

    pub fn fail(&self, error: &QuoterError) -> bool {
        match self.inner.upgrade() {
            Some(inner) => {
                inner.broadcast_error(error);
                true
            }
            None => false,
        }
    }
}

impl<E: Send + Sync + 'static> Inner<E> {
    fn state(&self) -> MutexGuard<'_, State<E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish_count(&self, count: usize) {
        if let Some(metrics) = &self.metrics {
            metrics.set_live_subscribers(count);
        }
    }

    fn broadcast(&self, event: &E) {
        let callbacks: Vec<(u64, DataCallback<E>)> =
            self.state().data.iter().map(|(id, cb)| (*id, cb.clone())).collect();
        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("{}: subscriber {} panicked while handling an event", self.name, id);
            }
        }
    }

    fn broadcast_error(&self, err: &QuoterError) {
        let callbacks: Vec<(u64, ErrorCallback)> =
            self.state().errors.iter().map(|(id, cb)| (*id, cb.clone())).collect();
        if callbacks.is_empty() {
            error!("{}: unhandled subscription error: {}", self.name, err);
            return;
        }
        for (id, callback) in callbacks {
            if catch_unwind(AssertUnwindSafe(|| callback(err))).is_err() {
                error!("{}: subscriber {} panicked while handling error {}", self.name, id, err);
            }
        }
    }

    /// Completion of an underlying open. A result for a creation nobody is
    /// waiting on any more is closed straight away.
    fn install(&self, generation: u64, opened: Result<Teardown>) -> Result<()> {
        let mut state = self.state();
        let current = matches!(state.phase, Phase::Creating { generation: g, .. } if g == generation);
        match opened {
            Ok(teardown) if current => {
                state.phase = Phase::Active(teardown);
                drop(state);
                if let Some(metrics) = &self.metrics {
                    metrics.record_subscription_opened();
                }
                info!("{}: underlying subscription active", self.name);
                Ok(())
            }
            Ok(teardown) => {
                drop(state);
                debug!("{}: subscribers left during creation, closing", self.name);
                teardown();
                Ok(())
            }
            Err(e) => {
                if current {
                    state.phase = Phase::Idle;
                }
                drop(state);
                warn!("{}: failed to open underlying subscription: {}", self.name, e);
                Err(e)
            }
        }
    }

    fn release(&self, id: u64) -> Result<()> {
        let mut state = self.state();
        if state.ref_count == 0 {
            let phase = std::mem::replace(&mut state.phase, Phase::Idle);
            drop(state);
            error!("{}: reference count would go negative releasing subscription {}", self.name, id);
            if let Phase::Active(teardown) = phase {
                teardown();
            }
            return Err(QuoterError::ConsistencyViolation(format!(
                "{}: released subscription {} with no live subscribers",
                self.name, id
            )));
        }
        state.errors.remove(&id);
        if state.data.remove(&id).is_none() {
            drop(state);
            error!("{}: released unknown subscription {}", self.name, id);
            return Err(QuoterError::ConsistencyViolation(format!(
                "{}: subscription {} is not registered",
                self.name, id
            )));
        }

        state.ref_count -= 1;
        let remaining = state.ref_count;
        let teardown = if remaining == 0 {
            match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::Active(teardown) => Some(teardown),
                Phase::Creating { .. } => {
                    debug!("{}: last subscriber left during creation", self.name);
                    None
                }
                Phase::Idle => None,
            }
        } else {
            None
        };
        drop(state);

        self.publish_count(remaining);
        if let Some(teardown) = teardown {
            teardown();
            info!("{}: underlying subscription closed", self.name);
        }
        Ok(())
    }
}

fn open_underlying<E: Send + Sync + 'static>(
    inner: Weak<Inner<E>>,
    source: Arc<dyn EventSource<E>>,
    generation: u64,
) -> Creation {
    async move {
        let opened = source.open(EventSink { inner: inner.clone() }).await;
        match inner.upgrade() {
            Some(inner) => inner.install(generation, opened),
            None => {
                if let Ok(teardown) = opened {
                    teardown();
                }
                Err(QuoterError::SubscriptionError(
                    "Multiplexer dropped while opening".to_string(),
                ))
            }
        }
    }
    .boxed()
    .shared()
}

/// Shares one underlying subscription among any number of subscribers.
///
/// Each watched resource gets its own multiplexer; nothing is global.
pub struct Multiplexer<E> {
    inner: Arc<Inner<E>>,
}

impl<E> Clone for Multiplexer<E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E: Send + Sync + 'static> Multiplexer<E> {
    pub fn new(name: impl Into<String>, source: Arc<dyn EventSource<E>>) -> Self {
        Self::build(name.into(), source, None)
    }

    pub fn with_metrics(name: impl Into<String>, source: Arc<dyn EventSource<E>>, metrics: Arc<QuoterMetrics>) -> Self {
        Self::build(name.into(), source, Some(metrics))
    }

    fn build(name: String, source: Arc<dyn EventSource<E>>, metrics: Option<Arc<QuoterMetrics>>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                source,
                state: Mutex::new(State {
                    phase: Phase::Idle,
                    data: BTreeMap::new(),
                    errors: BTreeMap::new(),
                    ref_count: 0,
                    generation: 0,
                    next_id: 0,
                }),
                metrics,
            }),
        }
    }

    #[must_use]
    pub fn phase(&self) -> MultiplexerPhase {
        self.inner.state().phase.observed()
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.state().ref_count
    }

    /// Registers both callbacks and resolves once the underlying
    /// subscription is live. If opening it fails, every subscriber waiting on
    /// it gets the error and is removed again.
    pub async fn subscribe<D, X>(&self, on_data: D, on_error: X) -> Result<Subscription<E>>
    where
        D: Fn(&E) + Send + Sync + 'static,
        X: Fn(&QuoterError) + Send + Sync + 'static,
    {
        self.register(Arc::new(on_data), Some(Arc::new(on_error))).await
    }

    /// Like [`Multiplexer::subscribe`] without an error callback.
    pub async fn subscribe_data<D>(&self, on_data: D) -> Result<Subscription<E>>
    where
        D: Fn(&E) + Send + Sync + 'static,
    {
        self.register(Arc::new(on_data), None).await
    }

    async fn register(&self, on_data: DataCallback<E>, on_error: Option<ErrorCallback>) -> Result<Subscription<E>> {
        let (subscription, pending, count) = {
            let mut state = self.inner.state();
            let id = state.next_id;
            state.next_id += 1;
            state.data.insert(id, on_data);
            if let Some(on_error) = on_error {
                state.errors.insert(id, on_error);
            }
            state.ref_count += 1;

            if matches!(state.phase, Phase::Idle) {
                state.generation += 1;
                let generation = state.generation;
                info!("{}: opening underlying subscription", self.inner.name);
                state.phase = Phase::Creating {
                    generation,
                    ready: open_underlying(Arc::downgrade(&self.inner), self.inner.source.clone(), generation),
                };
            }
            let pending = match &state.phase {
                Phase::Creating { ready, .. } => Some(ready.clone()),
                _ => None,
            };

            let subscription = Subscription {
                id,
                inner: self.inner.clone(),
                released: AtomicBool::new(false),
            };
            (subscription, pending, state.ref_count)
        };
        self.inner.publish_count(count);

        // Dropping `subscription` on failure or cancellation rolls the
        // registration back.
        if let Some(ready) = pending {
            ready.await?;
        }
        debug!("{}: subscriber {} registered", self.inner.name, subscription.id);
        Ok(subscription)
    }
}

/// A live registration. Unsubscribes when dropped.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription<E: Send + Sync + 'static> {
    id: u64,
    inner: Arc<Inner<E>>,
    released: AtomicBool,
}

impl<E: Send + Sync + 'static> Subscription<E> {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Idempotent: only the first call releases the registration.
    pub fn unsubscribe(&self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.inner.release(self.id)
    }
}

impl<E: Send + Sync + 'static> Drop for Subscription<E> {
    fn drop(&mut self) {
        // failures are already logged by release
        let _ = self.unsubscribe();
    }
}
