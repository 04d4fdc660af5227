//! Pooled access to referral counts, registered users and usage samples.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::models::{UsageSample, UsageStats, UserRecord};
use crate::pool::{Checkout, ConnectionPool, PoolStatus, PooledConnection};
use crate::{MIGRATOR, SqliteConnector, StorageError, repos};

pub type DbPool = ConnectionPool<SqliteConnector>;
pub type DbConnection = PooledConnection<SqliteConnector>;

/// Samples older than this are removed by [`Store::cleanup_old_stats`].
pub const USAGE_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

/// Default trailing window for [`Store::usage_stats`].
pub const DEFAULT_USAGE_WINDOW: Duration = Duration::from_secs(60 * 60);

pub struct Store {
    pool: Arc<DbPool>,
    /// Serialises referral upserts.
    referral_lock: Mutex<()>,
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// `now` minus `window`, clamped instead of overflowing.
fn window_start(now: i64, window: Duration) -> i64 {
    now.saturating_sub(i64::try_from(window.as_secs()).unwrap_or(i64::MAX))
}

/// Convert a query result, discarding the connection if it failed at the transport level.
fn settle<T>(conn: &mut DbConnection, result: Result<T, sqlx::Error>) -> Result<T, StorageError> {
    result.map_err(|e| {
        let e = StorageError::from(e);
        if e.is_connection_fault() {
            conn.invalidate();
        }
        e
    })
}

impl Store {
    /// Open (creating if needed) the database at `path` with `pool_size`
    /// long-lived connections and apply pending migrations.
    pub async fn open(path: impl AsRef<Path>, pool_size: usize) -> Result<Self, StorageError> {
        let pool = ConnectionPool::new(SqliteConnector::new(path), pool_size).await?;

        {
            let mut conn = pool.acquire().await?;
            MIGRATOR.run(&mut *conn).await?;
        }

        tracing::info!(pool_size, "Database ready");

        Ok(Self {
            pool,
            referral_lock: Mutex::new(()),
        })
    }

    pub fn pool_status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Check out a connection and record a usage sample on it.
    ///
    /// A failed sample write is logged and otherwise ignored unless it shows
    /// the connection itself is broken.
    pub async fn connection(&self) -> Result<DbConnection, StorageError> {
        let mut conn = self.pool.acquire().await?;

        let Checkout {
            active,
            max_concurrent,
        } = conn.checkout();
        let sample = UsageSample {
            timestamp: now(),
            concurrent_connections: active.into(),
            max_concurrent: max_concurrent.into(),
        };

        let result = repos::insert_usage_sample(&mut *conn, &sample).await;
        if let Err(e) = settle(&mut conn, result) {
            if e.is_connection_fault() {
                return Err(e);
            }
            tracing::warn!(error = %e, "Failed to record usage sample");
        }

        Ok(conn)
    }

    // ─── Usage ──────────────────────────────────────────────────────────────

    /// Peak, average and all-time-max concurrency over the trailing `window`.
    pub async fn try_usage_stats(&self, window: Duration) -> Result<UsageStats, StorageError> {
        let since = window_start(now(), window);
        let mut conn = self.connection().await?;
        let result = repos::get_usage_stats_since(&mut *conn, since).await;
        let mut stats = settle(&mut conn, result)?;
        stats.current_connections = self.pool.status().active.into();
        Ok(stats)
    }

    /// Like [`Store::try_usage_stats`], but reports zeros when storage fails.
    pub async fn usage_stats(&self, window: Duration) -> UsageStats {
        self.try_usage_stats(window).await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to read usage stats");
            UsageStats::default()
        })
    }

    /// Delete usage samples older than [`USAGE_RETENTION`]. Returns the number removed.
    pub async fn cleanup_old_stats(&self) -> Result<u64, StorageError> {
        let cutoff = window_start(now(), USAGE_RETENTION);
        let mut conn = self.connection().await?;
        let result = repos::delete_usage_samples_before(&mut *conn, cutoff).await;
        settle(&mut conn, result)
    }

    // ─── Referrals ──────────────────────────────────────────────────────────

    /// Add one referral to `referrer_id`. Returns the new count.
    pub async fn try_increment_referral_count(&self, referrer_id: i64) -> Result<i64, StorageError> {
        let mut conn = self.connection().await?;
        let _guard = self.referral_lock.lock().await;
        let result = repos::increment_referral(&mut *conn, referrer_id).await;
        settle(&mut conn, result)
    }

    /// Add one referral to `referrer_id`; `false` means nothing was written.
    pub async fn increment_referral_count(&self, referrer_id: i64) -> bool {
        match self.try_increment_referral_count(referrer_id).await {
            Ok(ref_count) => {
                tracing::debug!(user_id = referrer_id, ref_count, "Referral recorded");
                true
            }
            Err(e) => {
                tracing::error!(user_id = referrer_id, error = %e, "Failed to increment referral count");
                false
            }
        }
    }

    /// Referral count for `user_id`; `Ok(0)` for users never referred.
    pub async fn try_get_referral_count(&self, user_id: i64) -> Result<i64, StorageError> {
        let mut conn = self.connection().await?;
        let result = repos::get_referral_count(&mut *conn, user_id).await;
        settle(&mut conn, result)
    }

    /// Referral count for `user_id`, or zero when unknown or storage fails.
    pub async fn get_referral_count(&self, user_id: i64) -> i64 {
        self.try_get_referral_count(user_id).await.unwrap_or_else(|e| {
            tracing::error!(user_id, error = %e, "Failed to read referral count");
            0
        })
    }

    // ─── Users ──────────────────────────────────────────────────────────────

    /// Register `user_id` if unseen. `true` only when this call inserted the row;
    /// duplicates and failures both yield `false`.
    pub async fn add_new_user(&self, user_id: i64) -> bool {
        self.try_add_new_user(user_id).await.unwrap_or_else(|e| {
            tracing::error!(user_id, error = %e, "Failed to add new user");
            false
        })
    }

    pub async fn try_add_new_user(&self, user_id: i64) -> Result<bool, StorageError> {
        let mut conn = self.connection().await?;
        let result = repos::insert_user(&mut *conn, user_id).await;
        settle(&mut conn, result)
    }

    pub async fn get_user(&self, user_id: i64) -> Result<Option<UserRecord>, StorageError> {
        let mut conn = self.connection().await?;
        let result = repos::get_user(&mut *conn, user_id).await;
        settle(&mut conn, result)
    }

    pub async fn try_unique_users_count(&self) -> Result<i64, StorageError> {
        let mut conn = self.connection().await?;
        let result = repos::get_user_count(&mut *conn).await;
        settle(&mut conn, result)
    }

    /// Number of distinct registered users, or zero when storage fails.
    pub async fn get_unique_users_count(&self) -> i64 {
        self.try_unique_users_count().await.unwrap_or_else(|e| {
            tracing::error!(error = %e, "Failed to count unique users");
            0
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn open_store(pool_size: usize) -> (TempDir, Store) {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path().join("bot.db"), pool_size).await.unwrap();
        (dir, store)
    }

    async fn seed_sample(store: &Store, timestamp: i64, concurrent: i64, max: i64) {
        let mut conn = store.connection().await.unwrap();
        let sample = UsageSample {
            timestamp,
            concurrent_connections: concurrent,
            max_concurrent: max,
        };
        repos::insert_usage_sample(&mut *conn, &sample).await.unwrap();
    }

    async fn execute(store: &Store, sql: &str) {
        let mut conn = store.connection().await.unwrap();
        sqlx::query(sql).execute(&mut *conn).await.unwrap();
    }

    async fn timestamps(store: &Store) -> Vec<i64> {
        let mut conn = store.pool.acquire().await.unwrap();
        sqlx::query_as::<_, (i64,)>("SELECT timestamp FROM usage_stats ORDER BY timestamp")
            .fetch_all(&mut *conn)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.0)
            .collect()
    }

    #[tokio::test]
    async fn increment_creates_then_bumps() {
        let (_dir, store) = open_store(2).await;

        assert!(store.increment_referral_count(42).await);
        assert_eq!(store.get_referral_count(42).await, 1);

        assert!(store.increment_referral_count(42).await);
        assert_eq!(store.get_referral_count(42).await, 2);
    }

    #[tokio::test]
    async fn unknown_user_has_zero_referrals() {
        let (_dir, store) = open_store(1).await;
        assert_eq!(store.try_get_referral_count(7).await.unwrap(), 0);
        assert_eq!(store.get_referral_count(7).await, 0);
    }

    #[tokio::test]
    async fn referral_count_is_zero_on_error() {
        let (_dir, store) = open_store(1).await;
        assert!(store.increment_referral_count(8).await);
        execute(&store, "DROP TABLE referral_counts").await;

        assert!(store.try_get_referral_count(8).await.is_err());
        assert_eq!(store.get_referral_count(8).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_increments_are_not_lost() {
        let (_dir, store) = open_store(4).await;
        let store = Arc::new(store);

        let tasks: Vec<_> = (0..40)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.increment_referral_count(99).await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap());
        }

        assert_eq!(store.get_referral_count(99).await, 40);
        assert_eq!(store.get_referral_count(100).await, 0);
    }

    #[tokio::test]
    async fn failed_increment_leaves_count_unchanged() {
        let (_dir, store) = open_store(1).await;
        assert!(store.increment_referral_count(5).await);

        execute(
            &store,
            "CREATE TRIGGER reject_update BEFORE UPDATE ON referral_counts \
             BEGIN SELECT RAISE(ABORT, 'rejected'); END",
        )
        .await;

        assert!(!store.increment_referral_count(5).await);
        assert_eq!(store.try_get_referral_count(5).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_user_is_ignored() {
        let (_dir, store) = open_store(2).await;

        assert!(store.add_new_user(1001).await);
        assert_eq!(store.get_unique_users_count().await, 1);

        assert!(!store.add_new_user(1001).await);
        assert_eq!(store.get_unique_users_count().await, 1);

        assert!(store.add_new_user(1002).await);
        assert_eq!(store.get_unique_users_count().await, 2);

        let user = store.get_user(1001).await.unwrap().unwrap();
        assert_eq!(user.user_id, 1001);
        assert!(store.get_user(3).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn connection_fault_discards_connection() {
        let (_dir, store) = open_store(2).await;
        assert_eq!(store.pool_status().idle, 2);

        let mut conn = store.pool.acquire().await.unwrap();
        let failure: Result<(), sqlx::Error> = Err(sqlx::Error::WorkerCrashed);
        let err = settle(&mut conn, failure).unwrap_err();
        assert!(err.is_connection_fault());
        drop(conn);
        assert_eq!(store.pool_status().idle, 1);

        let mut conn = store.pool.acquire().await.unwrap();
        let failure: Result<(), sqlx::Error> = Err(sqlx::Error::RowNotFound);
        assert!(!settle(&mut conn, failure).unwrap_err().is_connection_fault());
        drop(conn);
        assert_eq!(store.pool_status().idle, 1);

        // Both slots usable again, one through a fresh connection.
        let a = store.connection().await.unwrap();
        let b = store.connection().await.unwrap();
        drop((a, b));
        assert_eq!(store.pool_status().idle, 2);
        assert!(store.increment_referral_count(3).await);
    }

    #[test]
    fn window_start_saturates() {
        assert_eq!(window_start(1_000, Duration::from_secs(400)), 600);
        assert_eq!(window_start(1_000, Duration::from_secs(u64::MAX)), 1_000 - i64::MAX);
        assert_eq!(window_start(-10, Duration::from_secs(u64::MAX)), i64::MIN);
        assert_eq!(window_start(0, Duration::ZERO), 0);
    }

    #[tokio::test]
    async fn usage_stats_with_huge_window() {
        let (_dir, store) = open_store(1).await;
        let stats = store.try_usage_stats(Duration::from_secs(u64::MAX)).await.unwrap();
        assert!(stats.all_time_max >= 1);
    }

    #[tokio::test]
    async fn unique_users_count_is_zero_on_error() {
        let (_dir, store) = open_store(1).await;
        store.add_new_user(1).await;
        execute(&store, "DROP TABLE users").await;

        assert!(store.try_unique_users_count().await.is_err());
        assert_eq!(store.get_unique_users_count().await, 0);
    }

    #[tokio::test]
    async fn checkouts_are_sampled() {
        let (_dir, store) = open_store(2).await;
        let now = now();
        seed_sample(&store, now - 10, 5, 7).await;

        let stats = store.usage_stats(DEFAULT_USAGE_WINDOW).await;
        assert_eq!(stats.peak_concurrent, 5);
        assert_eq!(stats.all_time_max, 7);
        assert!(stats.avg_concurrent > 0.0);
        assert_eq!(stats.current_connections, 1);
    }

    #[tokio::test]
    async fn usage_stats_are_zero_on_error() {
        let (_dir, store) = open_store(1).await;
        execute(&store, "DROP TABLE usage_stats").await;

        assert!(store.try_usage_stats(DEFAULT_USAGE_WINDOW).await.is_err());
        assert_eq!(
            store.usage_stats(DEFAULT_USAGE_WINDOW).await,
            UsageStats::default()
        );
        // Sampling failures never block normal traffic.
        assert!(store.increment_referral_count(1).await);
    }

    #[tokio::test]
    async fn cleanup_prunes_only_expired_samples() {
        let (_dir, store) = open_store(1).await;
        let now = now();
        let day = USAGE_RETENTION.as_secs() as i64;

        seed_sample(&store, now - 2 * day, 1, 1).await;
        seed_sample(&store, now - day - 3600, 1, 1).await;
        seed_sample(&store, now - day + 3600, 2, 2).await;
        seed_sample(&store, now - 10, 3, 3).await;

        assert_eq!(store.cleanup_old_stats().await.unwrap(), 2);
        let retained = timestamps(&store).await;
        assert!(retained.iter().all(|ts| *ts >= now - day));
        assert!(retained.contains(&(now - day + 3600)));
        assert!(retained.contains(&(now - 10)));

        assert_eq!(store.cleanup_old_stats().await.unwrap(), 0);
        let again = timestamps(&store).await;
        assert!(retained.iter().all(|ts| again.contains(ts)));
    }
}
