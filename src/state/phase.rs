/// Crawl phase definitions for the harvest state machine
///
/// This module defines every phase the harvest loop can be in.
use std::fmt;

/// Represents the current phase of the harvest loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CrawlPhase {
    /// Loading the checkpoint and resetting run state
    Init,

    /// A page request is about to be (or is being) issued
    Fetching,

    /// Waiting out a backoff delay after a retryable failure
    Retrying,

    /// Turning raw page nodes into catalog entries
    Normalizing,

    /// Committing a batch of entries and snapshots
    Ingesting,

    /// Persisting the next cursor
    Checkpointing,

    /// The harvest stopped normally
    Done,

    /// The harvest stopped on a fatal error
    Failed,
}

impl fmt::Display for CrawlPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Fetching => "fetching",
            Self::Retrying => "retrying",
            Self::Normalizing => "normalizing",
            Self::Ingesting => "ingesting",
            Self::Checkpointing => "checkpointing",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}
