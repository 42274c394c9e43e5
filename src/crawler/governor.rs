//! Quota-aware pacing between page requests
//!
//! After every page the governor looks at the remaining quota:
//! - below the low-water mark it waits until the reported reset (plus a margin),
//!   or a fixed fallback pause when the reset time cannot be parsed
//! - below the soft threshold it inserts a short pause
//! - otherwise requests go out back to back

use crate::config::QuotaConfig;
use crate::crawler::fetcher::QuotaTelemetry;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Pause the governor wants before the next request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pause {
    None,
    /// Quota is getting low; spread requests out
    Soft(Duration),
    /// Quota is nearly exhausted; wait for the reset
    UntilReset(Duration),
    /// Quota is nearly exhausted and the reset time is unknown
    Fallback(Duration),
}

impl Pause {
    pub fn duration(&self) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Soft(d) | Self::UntilReset(d) | Self::Fallback(d) => Some(*d),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateGovernor {
    low_water_mark: u32,
    soft_threshold: u32,
    safety_margin: chrono::Duration,
    fallback_pause: Duration,
    soft_pause: Duration,
}

impl RateGovernor {
    pub fn new(config: &QuotaConfig) -> Self {
        Self {
            low_water_mark: config.low_water_mark,
            soft_threshold: config.soft_threshold,
            safety_margin: chrono::Duration::from_std(Duration::from_secs(
                config.safety_margin_secs,
            ))
            .unwrap_or_else(|_| chrono::Duration::zero()),
            fallback_pause: Duration::from_secs(config.fallback_pause_secs),
            soft_pause: Duration::from_millis(config.soft_pause_ms),
        }
    }

    /// Decides the pause owed before the next request
    ///
    /// Telemetry without a remaining count never causes a pause.
    pub fn evaluate(&self, quota: &QuotaTelemetry, now: DateTime<Utc>) -> Pause {
        let Some(remaining) = quota.remaining else {
            return Pause::None;
        };

        if remaining < self.low_water_mark {
            let reset = quota
                .reset_at
                .as_deref()
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));

            return match reset {
                Some(reset) => match (reset - now + self.safety_margin).to_std() {
                    Ok(wait) if !wait.is_zero() => Pause::UntilReset(wait),
                    _ => Pause::None,
                },
                None => Pause::Fallback(self.fallback_pause),
            };
        }

        if remaining < self.soft_threshold {
            return Pause::Soft(self.soft_pause);
        }

        Pause::None
    }
}
