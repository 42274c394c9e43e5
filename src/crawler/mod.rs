//! Harvest pipeline
//!
//! This module contains the core harvesting logic, including:
//! - GraphQL page fetching and failure classification
//! - Retry backoff and quota-aware pacing
//! - Normalization of raw nodes into catalog entries
//! - The resumable harvest loop tying it all together

mod coordinator;
mod fetcher;
mod governor;
mod normalizer;
mod retry;
mod sleeper;

pub use coordinator::{run_harvest, HarvestOutcome, Harvester, Step, StopReason};
pub use fetcher::{
    build_http_client, classify_status, parse_page, FetchFailure, GraphqlFetcher, PageFetcher,
    QuotaTelemetry, RawEntry, RawLanguage, RawOwner, SearchPage, SEARCH_QUERY,
};
pub use governor::{Pause, RateGovernor};
pub use normalizer::{decode_node, normalize_entry, normalize_page, NormalizedPage, Rejection};
pub use retry::{RetryController, RetryDecision};
pub use sleeper::{ShutdownSignal, Sleeper, TokioSleeper};
