//! Health grading for consumer and producer instances.

use serde::Serialize;

/// Coarse health level derived from an instance's counters and its last
/// analytics window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum HealthLevel {
    /// Analytics are disabled; only totals are available
    Unknown,
    Healthy,
    /// No traffic in the last analytics window
    Risk,
    /// Errors occurred alongside successful traffic
    Warning,
    /// Errors occurred and nothing was processed successfully
    Critical,
}

/// Result of `check_health()`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    pub level: HealthLevel,
    pub message: String,
    /// Total messages processed (consumer) or published (producer)
    pub processed: u64,
    /// Total errors observed by the instance
    pub errors: u64,
}

/// Grade an instance. `window_delta` is the message delta of the last
/// analytics snapshot, if analytics are enabled.
pub(crate) fn grade(
    analytics_enabled: bool,
    window_delta: Option<u64>,
    processed: u64,
    errors: u64,
) -> HealthStatus {
    let (level, message) = if !analytics_enabled {
        (
            HealthLevel::Unknown,
            "analytics disabled, health insight limited".to_string(),
        )
    } else if errors == 0 {
        match window_delta {
            Some(0) => (
                HealthLevel::Risk,
                "no traffic in the last analytics window".to_string(),
            ),
            _ => (HealthLevel::Healthy, "all good".to_string()),
        }
    } else if processed == 0 {
        (
            HealthLevel::Critical,
            format!("{errors} errors and no messages processed"),
        )
    } else {
        (
            HealthLevel::Warning,
            format!("{errors} errors across {processed} messages"),
        )
    };

    HealthStatus {
        level,
        message,
        processed,
        errors,
    }
}
