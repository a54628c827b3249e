// Per-job run locks: an in-process set and a Redis SET NX variant

use crate::config::RedisConfig;
use crate::errors::StorageError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Client;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Atomic check-and-set "running" marker per job
#[async_trait]
pub trait JobLock: Send + Sync {
    /// Take the marker for `job_id`. `Ok(None)` means a run is already in
    /// flight. The marker is cleared when the guard drops.
    async fn try_acquire(&self, job_id: Uuid) -> Result<Option<LockGuard>, StorageError>;
}

type Release = Box<dyn FnOnce() + Send>;

/// Releases the run marker on drop, whether the run succeeded or not
pub struct LockGuard {
    job_id: Uuid,
    release: Option<Release>,
}

impl LockGuard {
    fn new(job_id: Uuid, release: Release) -> Self {
        Self {
            job_id,
            release: Some(release),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// Run lock for a single scheduler process
#[derive(Clone, Default)]
pub struct LocalJobLock {
    running: Arc<Mutex<HashSet<Uuid>>>,
}

impl LocalJobLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, job_id: Uuid) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .contains(&job_id)
    }
}

#[async_trait]
impl JobLock for LocalJobLock {
    async fn try_acquire(&self, job_id: Uuid) -> Result<Option<LockGuard>, StorageError> {
        let inserted = self
            .running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(job_id);

        if !inserted {
            return Ok(None);
        }

        let running = Arc::clone(&self.running);
        Ok(Some(LockGuard::new(
            job_id,
            Box::new(move || {
                running
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .remove(&job_id);
            }),
        )))
    }
}

/// Run lock shared by several scheduler processes through Redis
///
/// The key expires after `ttl` so a crashed holder cannot block the job
/// forever. While a guard is alive its key is extended every `ttl / 3`.
#[derive(Clone)]
pub struct RedLock {
    manager: ConnectionManager,
    ttl: Duration,
}

impl RedLock {
    #[instrument(skip(config), fields(redis_url = %config.url))]
    pub async fn connect(config: &RedisConfig, ttl: Duration) -> Result<Self, StorageError> {
        info!("Connecting run lock to Redis");

        let client = Client::open(config.url.as_str()).map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to create Redis client: {}", e))
        })?;
        let manager = ConnectionManager::new(client).await.map_err(|e| {
            StorageError::ConnectionFailed(format!("Failed to create connection manager: {}", e))
        })?;

        Ok(Self { manager, ttl })
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), StorageError> {
        let mut conn = self.manager.clone();

        let response: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Health check failed: {}", e)))?;

        if response != "PONG" {
            return Err(StorageError::RedisError(format!(
                "Unexpected PING response: {}",
                response
            )));
        }

        Ok(())
    }

    fn key(job_id: Uuid) -> String {
        format!("lock:job:{}", job_id)
    }

    fn ttl_millis(&self) -> u64 {
        (self.ttl.as_millis() as u64).max(1)
    }
}

#[async_trait]
impl JobLock for RedLock {
    #[instrument(skip(self), fields(ttl_seconds = self.ttl.as_secs()))]
    async fn try_acquire(&self, job_id: Uuid) -> Result<Option<LockGuard>, StorageError> {
        let mut conn = self.manager.clone();
        let key = Self::key(job_id);
        let lock_value = Uuid::new_v4().to_string();

        let result: Option<String> = redis::cmd("SET")
            .arg(&key)
            .arg(&lock_value)
            .arg("NX")
            .arg("PX")
            .arg(self.ttl_millis())
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::RedisError(format!("Failed to acquire lock: {}", e)))?;

        if result.is_none() {
            debug!(job_id = %job_id, "Run lock already held");
            return Ok(None);
        }

        let renewal = CancellationToken::new();
        tokio::spawn(renew_lock(
            self.manager.clone(),
            key.clone(),
            lock_value.clone(),
            self.ttl_millis(),
            renewal.clone(),
        ));

        let manager = self.manager.clone();
        Ok(Some(LockGuard::new(
            job_id,
            Box::new(move || {
                renewal.cancel();
                // Drop is synchronous; release on the runtime if one is running
                if let Ok(handle) = tokio::runtime::Handle::try_current() {
                    handle.spawn(async move {
                        if let Err(e) = release_lock(manager, &key, &lock_value).await {
                            warn!(key = %key, error = %e, "Failed to release run lock");
                        }
                    });
                }
            }),
        )))
    }
}

/// Extend the key while it still holds our value, until `stop` fires
async fn renew_lock(
    mut conn: ConnectionManager,
    key: String,
    lock_value: String,
    ttl_millis: u64,
    stop: CancellationToken,
) {
    let script = redis::Script::new(
        r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("pexpire", KEYS[1], ARGV[2])
        else
            return 0
        end
    "#,
    );
    let period = Duration::from_millis((ttl_millis / 3).max(1));

    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }

        let renewed: Result<i32, _> = script
            .key(&key)
            .arg(&lock_value)
            .arg(ttl_millis)
            .invoke_async(&mut conn)
            .await;

        match renewed {
            Ok(1) => debug!(key = %key, "Run lock renewed"),
            Ok(_) => {
                warn!(key = %key, "Run lock lost before the run finished");
                return;
            }
            // The next tick retries; the key survives until its TTL
            Err(e) => warn!(key = %key, error = %e, "Failed to renew run lock"),
        }
    }
}

/// Delete the key only if it still holds our value
async fn release_lock(
    mut conn: ConnectionManager,
    key: &str,
    lock_value: &str,
) -> Result<(), StorageError> {
    let script = r#"
        if redis.call("get", KEYS[1]) == ARGV[1] then
            return redis.call("del", KEYS[1])
        else
            return 0
        end
    "#;

    let result: i32 = redis::Script::new(script)
        .key(key)
        .arg(lock_value)
        .invoke_async(&mut conn)
        .await
        .map_err(|e| StorageError::RedisError(format!("Failed to release lock: {}", e)))?;

    if result == 1 {
        debug!(key = %key, "Run lock released");
    } else {
        warn!(key = %key, "Run lock was not owned or already expired");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIS_URL: &str = "redis://localhost:6379";

    fn redis_config(url: &str) -> RedisConfig {
        RedisConfig {
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_local_lock_is_exclusive() {
        let lock = LocalJobLock::new();
        let job_id = Uuid::new_v4();

        let guard = lock.try_acquire(job_id).await.unwrap();
        assert!(guard.is_some());
        assert!(lock.try_acquire(job_id).await.unwrap().is_none());

        // Other jobs are independent
        assert!(lock.try_acquire(Uuid::new_v4()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_lock_released_on_drop() {
        let lock = LocalJobLock::new();
        let job_id = Uuid::new_v4();

        {
            let _guard = lock.try_acquire(job_id).await.unwrap().unwrap();
            assert!(lock.is_held(job_id));
        }

        assert!(!lock.is_held(job_id));
        assert!(lock.try_acquire(job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_local_lock_concurrent_acquire_single_winner() {
        let lock = LocalJobLock::new();
        let job_id = Uuid::new_v4();

        let attempts = (0..16).map(|_| {
            let lock = lock.clone();
            tokio::spawn(async move { lock.try_acquire(job_id).await.unwrap() })
        });
        let guards: Vec<Option<LockGuard>> = futures::future::join_all(attempts)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(guards.iter().filter(|g| g.is_some()).count(), 1);
    }

    #[tokio::test]
    async fn test_redlock_invalid_url() {
        let result =
            RedLock::connect(&redis_config("not-a-redis-url"), Duration::from_secs(10)).await;
        assert!(matches!(result, Err(StorageError::ConnectionFailed(_))));
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redlock_health_check() {
        let lock = RedLock::connect(&redis_config(REDIS_URL), Duration::from_secs(10))
            .await
            .unwrap();
        assert!(lock.health_check().await.is_ok());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redlock_exclusivity_and_release() {
        let lock = RedLock::connect(&redis_config(REDIS_URL), Duration::from_secs(10))
            .await
            .unwrap();
        let job_id = Uuid::new_v4();

        let guard = lock.try_acquire(job_id).await.unwrap();
        assert!(guard.is_some());
        assert!(lock.try_acquire(job_id).await.unwrap().is_none());

        drop(guard);
        // Release runs on a spawned task
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(lock.try_acquire(job_id).await.unwrap().is_some());
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redlock_renewed_while_run_outlives_ttl() {
        let lock = RedLock::connect(&redis_config(REDIS_URL), Duration::from_millis(600))
            .await
            .unwrap();
        let job_id = Uuid::new_v4();

        let guard = lock.try_acquire(job_id).await.unwrap().unwrap();

        // Hold well past the original TTL
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(lock.try_acquire(job_id).await.unwrap().is_none());

        drop(guard);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(lock.try_acquire(job_id).await.unwrap().is_some());
    }
}
