//! Process-local session-operation locks.
//!
//! Exactly one compression, import, export, or composition may run on a
//! session at a time. Acquire is non-blocking by default; callers that can
//! wait use [`SessionLocks::acquire_with_timeout`], which backs off
//! exponentially (100 ms, ×2, capped at 2 s). Entries older than the
//! staleness window are reaped on the next acquire or by the sweeper.

use crate::error::{EngramError, Result};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The operation classes that serialize per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Compression,
    Import,
    Export,
    Composition,
}

impl OperationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Compression => "compression",
            Self::Import => "import",
            Self::Export => "export",
            Self::Composition => "composition",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LockKey {
    project_id: String,
    session_id: String,
}

/// Initial backoff step for [`SessionLocks::acquire_with_timeout`].
const BACKOFF_START: Duration = Duration::from_millis(100);
/// Backoff ceiling.
const BACKOFF_CAP: Duration = Duration::from_secs(2);

/// In-process lock table. Cheap to clone; clones share the table.
#[derive(Debug, Clone)]
pub struct SessionLocks {
    held: Arc<Mutex<HashMap<LockKey, HeldLock>>>,
    staleness: Duration,
}

#[derive(Debug)]
struct HeldLock {
    operation: OperationType,
    acquired_at: Instant,
}

impl SessionLocks {
    pub fn new(staleness: Duration) -> Self {
        Self {
            held: Arc::new(Mutex::new(HashMap::new())),
            staleness,
        }
    }

    /// Non-blocking acquire. Fails with `OperationInProgress` when any
    /// operation currently holds the session.
    pub fn acquire(
        &self,
        project_id: &str,
        session_id: &str,
        operation: OperationType,
    ) -> Result<SessionLockGuard> {
        let key = LockKey {
            project_id: project_id.to_string(),
            session_id: session_id.to_string(),
        };
        let mut held = self.held.lock().expect("session lock table poisoned");

        if let Some(existing) = held.get(&key) {
            if existing.acquired_at.elapsed() > self.staleness {
                tracing::warn!(
                    session_id,
                    operation = %existing.operation,
                    "releasing stale session lock"
                );
                held.remove(&key);
            } else {
                return Err(EngramError::OperationInProgress {
                    session_id: session_id.to_string(),
                    operation: existing.operation.as_str().to_string(),
                });
            }
        }

        held.insert(
            key.clone(),
            HeldLock { operation, acquired_at: Instant::now() },
        );
        tracing::debug!(session_id, operation = %operation, "session lock acquired");
        Ok(SessionLockGuard {
            table: Arc::clone(&self.held),
            key,
        })
    }

    /// Acquire with bounded exponential backoff. Surfaces `LockTimeout`
    /// once `max_wait` elapses without success.
    pub async fn acquire_with_timeout(
        &self,
        project_id: &str,
        session_id: &str,
        operation: OperationType,
        max_wait: Duration,
    ) -> Result<SessionLockGuard> {
        let deadline = Instant::now() + max_wait;
        let mut backoff = BACKOFF_START;

        loop {
            match self.acquire(project_id, session_id, operation) {
                Ok(guard) => return Ok(guard),
                Err(err) if Instant::now() + backoff > deadline => {
                    tracing::debug!(session_id, %err, "session lock wait exhausted");
                    return Err(EngramError::LockTimeout {
                        what: format!("session {session_id} ({operation})"),
                    });
                }
                Err(_) => {
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(BACKOFF_CAP);
                }
            }
        }
    }

    /// Drop all entries past the staleness window. Returns how many were
    /// reaped.
    pub fn sweep_stale(&self) -> usize {
        let mut held = self.held.lock().expect("session lock table poisoned");
        let before = held.len();
        held.retain(|key, lock| {
            let keep = lock.acquired_at.elapsed() <= self.staleness;
            if !keep {
                tracing::warn!(
                    session_id = %key.session_id,
                    operation = %lock.operation,
                    "sweeping stale session lock"
                );
            }
            keep
        });
        before - held.len()
    }

    /// Spawn the periodic stale-lock sweeper. The only background task the
    /// engine ever starts; abort the handle to stop it.
    pub fn spawn_sweeper(&self, interval: Duration) -> tokio::task::JoinHandle<()> {
        let locks = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                locks.sweep_stale();
            }
        })
    }

    #[cfg(test)]
    fn held_count(&self) -> usize {
        self.held.lock().unwrap().len()
    }
}

/// RAII guard; dropping releases the session lock.
#[derive(Debug)]
pub struct SessionLockGuard {
    table: Arc<Mutex<HashMap<LockKey, HeldLock>>>,
    key: LockKey,
}

impl Drop for SessionLockGuard {
    fn drop(&mut self) {
        if let Ok(mut held) = self.table.lock() {
            held.remove(&self.key);
            tracing::debug!(session_id = %self.key.session_id, "session lock released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    fn locks() -> SessionLocks {
        SessionLocks::new(Duration::from_secs(300))
    }

    #[test]
    fn second_acquire_conflicts() {
        let locks = locks();
        let _guard = locks.acquire("p", "s", OperationType::Compression).unwrap();

        let err = locks
            .acquire("p", "s", OperationType::Compression)
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationInProgress);

        // A different operation type on the same session also conflicts.
        let err = locks.acquire("p", "s", OperationType::Export).unwrap_err();
        assert_eq!(err.code(), ErrorCode::OperationInProgress);
    }

    #[test]
    fn different_sessions_do_not_conflict() {
        let locks = locks();
        let _a = locks.acquire("p", "s1", OperationType::Compression).unwrap();
        let _b = locks.acquire("p", "s2", OperationType::Compression).unwrap();
        assert_eq!(locks.held_count(), 2);
    }

    #[test]
    fn drop_releases() {
        let locks = locks();
        {
            let _guard = locks.acquire("p", "s", OperationType::Import).unwrap();
            assert_eq!(locks.held_count(), 1);
        }
        assert_eq!(locks.held_count(), 0);
        locks.acquire("p", "s", OperationType::Import).unwrap();
    }

    #[test]
    fn stale_entry_is_reaped_on_acquire() {
        let locks = SessionLocks::new(Duration::from_millis(0));
        let guard = locks.acquire("p", "s", OperationType::Compression).unwrap();
        // The zero-staleness table treats the held entry as already stale.
        std::mem::forget(guard);
        locks.acquire("p", "s", OperationType::Compression).unwrap();
    }

    #[test]
    fn sweep_reaps_only_stale() {
        let locks = SessionLocks::new(Duration::from_millis(0));
        let guard = locks.acquire("p", "s", OperationType::Compression).unwrap();
        std::mem::forget(guard);
        assert_eq!(locks.sweep_stale(), 1);
        assert_eq!(locks.held_count(), 0);
    }

    #[tokio::test]
    async fn acquire_with_timeout_succeeds_after_release() {
        let locks = locks();
        let guard = locks.acquire("p", "s", OperationType::Composition).unwrap();

        let locks2 = locks.clone();
        let waiter = tokio::spawn(async move {
            locks2
                .acquire_with_timeout("p", "s", OperationType::Composition, Duration::from_secs(5))
                .await
        });

        tokio::time::sleep(Duration::from_millis(150)).await;
        drop(guard);

        let result = waiter.await.unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn acquire_with_timeout_times_out() {
        let locks = locks();
        let _guard = locks.acquire("p", "s", OperationType::Compression).unwrap();

        let err = locks
            .acquire_with_timeout("p", "s", OperationType::Compression, Duration::from_millis(250))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::LockTimeout);
    }
}
