use sqlx::{Executor, Sqlite};

use crate::models::*;

// ─── Usage Queries ──────────────────────────────────────────────────────────

/// Append one usage sample.
pub async fn insert_usage_sample<'e, E>(executor: E, sample: &UsageSample) -> Result<(), sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO usage_stats (timestamp, concurrent_connections, max_concurrent)
        VALUES (?, ?, ?)
        "#,
    )
    .bind(sample.timestamp)
    .bind(sample.concurrent_connections)
    .bind(sample.max_concurrent)
    .execute(executor)
    .await?;
    Ok(())
}

/// Aggregate samples newer than `since` (unix seconds).
/// `current_connections` is left at zero; only the pool knows that figure.
pub async fn get_usage_stats_since<'e, E>(executor: E, since: i64) -> Result<UsageStats, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let (peak, avg, max): (Option<i64>, Option<f64>, Option<i64>) = sqlx::query_as(
        r#"
        SELECT
            MAX(concurrent_connections),
            AVG(concurrent_connections),
            MAX(max_concurrent)
        FROM usage_stats
        WHERE timestamp > ?
        "#,
    )
    .bind(since)
    .fetch_one(executor)
    .await?;

    Ok(UsageStats {
        current_connections: 0,
        peak_concurrent: peak.unwrap_or(0),
        avg_concurrent: (avg.unwrap_or(0.0) * 100.0).round() / 100.0,
        all_time_max: max.unwrap_or(0),
    })
}

/// Delete samples older than `cutoff` (unix seconds). Returns the number removed.
pub async fn delete_usage_samples_before<'e, E>(executor: E, cutoff: i64) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM usage_stats WHERE timestamp < ?")
        .bind(cutoff)
        .execute(executor)
        .await?;
    Ok(result.rows_affected())
}

// ─── Referral Queries ───────────────────────────────────────────────────────

/// Create the counter at 1 or bump it by one, in a single statement.
/// Returns the new count.
pub async fn increment_referral<'e, E>(executor: E, user_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as(
        r#"
        INSERT INTO referral_counts (user_id, ref_count)
        VALUES (?, 1)
        ON CONFLICT (user_id) DO UPDATE SET ref_count = ref_count + 1
        RETURNING ref_count
        "#,
    )
    .bind(user_id)
    .fetch_one(executor)
    .await?;
    Ok(row.0)
}

/// Get the referral record for a user, if one exists.
pub async fn get_referral<'e, E>(executor: E, user_id: i64) -> Result<Option<ReferralRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, ReferralRecord>(
        "SELECT user_id, ref_count FROM referral_counts WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Referral count for a user; zero when the user has no record.
pub async fn get_referral_count<'e, E>(executor: E, user_id: i64) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    Ok(get_referral(executor, user_id)
        .await?
        .map(|r| r.ref_count)
        .unwrap_or(0))
}

// ─── User Queries ───────────────────────────────────────────────────────────

/// Register a user (ignore if already exists). Returns `true` if a row was inserted.
pub async fn insert_user<'e, E>(executor: E, user_id: i64) -> Result<bool, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query("INSERT INTO users (user_id) VALUES (?) ON CONFLICT (user_id) DO NOTHING")
        .bind(user_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// Get a single user by id.
pub async fn get_user<'e, E>(executor: E, user_id: i64) -> Result<Option<UserRecord>, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    sqlx::query_as::<_, UserRecord>(
        "SELECT user_id, first_interaction FROM users WHERE user_id = ?",
    )
    .bind(user_id)
    .fetch_optional(executor)
    .await
}

/// Number of distinct registered users.
pub async fn get_user_count<'e, E>(executor: E) -> Result<i64, sqlx::Error>
where
    E: Executor<'e, Database = Sqlite>,
{
    let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM users")
        .fetch_one(executor)
        .await?;
    Ok(row.0)
}
