/*
 * Venue Quoter - trade parameter quoting across bonding-curve and AMM venues
 * Core library exports and module declarations
 */

pub mod api;
pub mod cache;
pub mod config;
pub mod dex;
pub mod events;
pub mod fees;
pub mod metrics;
pub mod models;
pub mod router;
pub mod rpc;
pub mod service;
pub mod telemetry;
pub mod utils;

#[cfg(test)]
mod test_support;

pub use cache::{CachePolicy, MemoCache};
pub use config::Config;
pub use events::{EventSource, Multiplexer, Subscription};
pub use metrics::QuoterMetrics;
pub use models::*;
pub use router::Router;
pub use rpc::{ChainClient, ChainReader, RpcClient};
pub use service::QuoteService;
