//! Preference weight accumulation rules shared by the ingestion path and tests

/// Weight an explicit onboarding selection guarantees
pub const ONBOARDING_FLOOR_WEIGHT: f64 = 5.0;

/// Listening time that earns a full increment
pub const FULL_LISTEN_SECS: f64 = 30.0;

/// Weight earned by one passive listen of `duration_secs`
pub fn listen_increment(duration_secs: f64) -> f64 {
    if !duration_secs.is_finite() || duration_secs <= 0.0 {
        return 0.0;
    }
    (duration_secs / FULL_LISTEN_SECS).min(1.0)
}

/// Adds a passive-listening increment to an existing weight
pub fn accumulate(current: f64, increment: f64) -> f64 {
    current.max(0.0) + increment.max(0.0)
}

/// Weight after an explicit onboarding selection; never lowers a weight
pub fn onboarding(current: f64) -> f64 {
    current.max(ONBOARDING_FLOOR_WEIGHT)
}
