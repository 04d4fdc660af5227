use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ─── Referral ───────────────────────────────────────────────────────────────

/// How many users a given user has brought to the bot.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ReferralRecord {
    pub user_id: i64,
    pub ref_count: i64,
}

// ─── User ───────────────────────────────────────────────────────────────────

/// A user who has interacted with the bot at least once.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct UserRecord {
    pub user_id: i64,
    pub first_interaction: NaiveDateTime,
}

// ─── Usage ──────────────────────────────────────────────────────────────────

/// Pool concurrency snapshot written on every checkout.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, FromRow)]
pub struct UsageSample {
    /// Unix seconds.
    pub timestamp: i64,
    pub concurrent_connections: i64,
    pub max_concurrent: i64,
}

/// Aggregated pool usage over a trailing window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    pub current_connections: i64,
    pub peak_concurrent: i64,
    /// Rounded to two decimals.
    pub avg_concurrent: f64,
    pub all_time_max: i64,
}
