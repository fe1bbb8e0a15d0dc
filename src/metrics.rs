/*
 * Prometheus metrics for cache efficiency, quoting and subscriptions
 */

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::models::{QuoterError, Result, VenueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Hit,
    Miss,
    Joined,
}

impl CacheOutcome {
    fn as_label(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
            CacheOutcome::Joined => "joined",
        }
    }
}

/// Metrics owned by one engine instance; each instance has its own registry.
pub struct QuoterMetrics {
    registry: Registry,
    cache_lookups: IntCounterVec,
    quotes: IntCounterVec,
    subscriptions_opened: IntCounter,
    live_subscribers: IntGauge,
}

impl QuoterMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let cache_lookups = IntCounterVec::new(
            Opts::new("quoter_cache_lookups_total", "Memoized chain reads by outcome"),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;
        let quotes = IntCounterVec::new(
            Opts::new("quoter_quotes_total", "Trade parameter quotes by venue"),
            &["venue"],
        )
        .map_err(metrics_error)?;
        let subscriptions_opened = IntCounter::new(
            "quoter_underlying_subscriptions_total",
            "Underlying log subscriptions opened",
        )
        .map_err(metrics_error)?;
        let live_subscribers = IntGauge::new(
            "quoter_live_subscribers",
            "Registered event multiplexer subscribers",
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(cache_lookups.clone())).map_err(metrics_error)?;
        registry.register(Box::new(quotes.clone())).map_err(metrics_error)?;
        registry.register(Box::new(subscriptions_opened.clone())).map_err(metrics_error)?;
        registry.register(Box::new(live_subscribers.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            cache_lookups,
            quotes,
            subscriptions_opened,
            live_subscribers,
        })
    }

    pub fn record_cache(&self, operation: &str, outcome: CacheOutcome) {
        self.cache_lookups
            .with_label_values(&[operation, outcome.as_label()])
            .inc();
    }

    #[must_use]
    pub fn cache_count(&self, operation: &str, outcome: CacheOutcome) -> u64 {
        self.cache_lookups
            .with_label_values(&[operation, outcome.as_label()])
            .get()
    }

    pub fn record_quote(&self, venue: VenueKind) {
        let label = venue.to_string();
        self.quotes.with_label_values(&[label.as_str()]).inc();
    }

    pub fn record_subscription_opened(&self) {
        self.subscriptions_opened.inc();
    }

    pub fn set_live_subscribers(&self, count: usize) {
        self.live_subscribers.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn render(&self) -> Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        String::from_utf8(buffer).map_err(|e| QuoterError::Unknown(format!("Metrics are not UTF-8: {e}")))
    }
}

fn metrics_error(e: prometheus::Error) -> QuoterError {
    QuoterError::Unknown(format!("Metrics error: {e}"))
}
