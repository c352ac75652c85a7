//! Control loop plumbing
//!
//! Loops are level triggered: a reconcile reads everything it needs from the
//! store, acts, and returns when it wants to run again. Runs for the same
//! object never overlap, and every run is bounded by a deadline.

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::error::{ErrorClass, KubeError, Result};

/// When a reconcile wants to run again
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub requeue_after: Option<Duration>,
}

impl ReconcileOutcome {
    /// Nothing to do until the object changes
    pub fn done() -> Self {
        Self {
            requeue_after: None,
        }
    }

    /// Run again after `after`
    pub fn requeue(after: Duration) -> Self {
        Self {
            requeue_after: Some(after),
        }
    }
}

impl From<ReconcileOutcome> for kube::runtime::controller::Action {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome.requeue_after {
            Some(after) => Self::requeue(after),
            None => Self::await_change(),
        }
    }
}

/// One object kind's reconcile function
#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Kind of the objects this reconciler drives
    fn kind(&self) -> &'static str;

    /// Reconcile the object named `name`
    async fn reconcile(&self, name: &str) -> Result<ReconcileOutcome>;
}

/// Serializes work per object key
///
/// At most one holder of a key's guard exists at any time; other callers
/// wait. Distinct keys never block each other. A key's entry is dropped once
/// its last guard is released and nobody is waiting on it.
#[derive(Clone, Default)]
pub struct KeyedSerializer {
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
}

impl KeyedSerializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `key`
    pub async fn lock(&self, key: &str) -> KeyGuard {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        KeyGuard {
            key: key.to_string(),
            locks: Arc::clone(&self.locks),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Number of keys currently tracked
    pub fn tracked(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Exclusive access to one key of a [`KeyedSerializer`]
pub struct KeyGuard {
    key: String,
    locks: Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard {
    fn drop(&mut self) {
        drop(self.guard.take());

        // Waiters clone the entry under the map lock, so a count of one here
        // means the map holds the only reference
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if locks
            .get(&self.key)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.key);
        }
    }
}

/// Run `fut`, abandoning it once `deadline` has passed
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(deadline, fut)
        .await
        .map_err(|_| KubeError::Timeout(format!("{:?}", deadline)))?
}

/// Serialized, deadline-bounded reconcile of one object
pub async fn run_once(
    reconciler: &dyn Reconciler,
    serializer: &KeyedSerializer,
    deadline: Duration,
    name: &str,
) -> Result<ReconcileOutcome> {
    let _guard = serializer
        .lock(&format!("{}/{}", reconciler.kind(), name))
        .await;
    with_deadline(deadline, reconciler.reconcile(name)).await
}

/// Requeue decision for a failed reconcile
pub fn backoff_for(error: &KubeError, error_backoff: Duration, invalid_backoff: Duration) -> Duration {
    if error.is_conflict() {
        // Restart from a fresh read right away
        return Duration::ZERO;
    }
    match error.class() {
        ErrorClass::ContentInvalid => invalid_backoff,
        ErrorClass::ResourceExhaustion => error_backoff * 4,
        ErrorClass::Transient | ErrorClass::DependencyInvalid => error_backoff,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Slow {
        running: AtomicUsize,
        overlaps: AtomicUsize,
    }

    #[async_trait]
    impl Reconciler for Slow {
        fn kind(&self) -> &'static str {
            "Slow"
        }

        async fn reconcile(&self, _name: &str) -> Result<ReconcileOutcome> {
            if self.running.fetch_add(1, Ordering::SeqCst) > 0 {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            Ok(ReconcileOutcome::done())
        }
    }

    #[tokio::test]
    async fn test_same_key_never_overlaps() {
        let reconciler = Arc::new(Slow {
            running: AtomicUsize::new(0),
            overlaps: AtomicUsize::new(0),
        });
        let serializer = KeyedSerializer::new();

        let tasks: Vec<_> = (0..5)
            .map(|_| {
                let reconciler = Arc::clone(&reconciler);
                let serializer = serializer.clone();
                tokio::spawn(async move {
                    run_once(reconciler.as_ref(), &serializer, Duration::from_secs(5), "a").await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(reconciler.overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(serializer.tracked(), 0);
    }

    #[tokio::test]
    async fn test_released_keys_are_forgotten() {
        let serializer = KeyedSerializer::new();
        for i in 0..100 {
            let _guard = serializer.lock(&format!("Provider/p{}", i)).await;
            assert_eq!(serializer.tracked(), 1);
        }
        assert_eq!(serializer.tracked(), 0);
    }

    #[tokio::test]
    async fn test_key_kept_while_waiter_queued() {
        let serializer = KeyedSerializer::new();
        let first = serializer.lock("Provider/aws").await;

        let waiter = {
            let serializer = serializer.clone();
            tokio::spawn(async move {
                let _guard = serializer.lock("Provider/aws").await;
            })
        };
        // Let the waiter clone the entry and park on it
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(serializer.tracked(), 1);

        waiter.await.unwrap();
        assert_eq!(serializer.tracked(), 0);
    }

    #[tokio::test]
    async fn test_deadline_abandons_run() {
        let result: Result<()> = with_deadline(Duration::from_millis(5), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(matches!(err, KubeError::Timeout(_)));
        assert_eq!(err.class(), ErrorClass::Transient);
    }

    #[test]
    fn test_backoff_for() {
        let error = Duration::from_secs(15);
        let invalid = Duration::from_secs(300);

        let conflict = KubeError::Conflict {
            kind: "Provider".to_string(),
            name: "aws".to_string(),
            expected: "1".to_string(),
        };
        assert_eq!(backoff_for(&conflict, error, invalid), Duration::ZERO);

        let content = KubeError::from(xpkg_core::CoreError::InvalidContents {
            message: "bad".to_string(),
        });
        assert_eq!(backoff_for(&content, error, invalid), invalid);

        let storage = KubeError::Storage("down".to_string());
        assert_eq!(backoff_for(&storage, error, invalid), error);
    }

    #[test]
    fn test_outcome_to_action() {
        use kube::runtime::controller::Action;
        assert_eq!(
            Action::from(ReconcileOutcome::requeue(Duration::from_secs(30))),
            Action::requeue(Duration::from_secs(30))
        );
        assert_eq!(Action::from(ReconcileOutcome::done()), Action::await_change());
    }
}
