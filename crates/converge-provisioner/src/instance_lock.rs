use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

type LockMap = Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>;

/// In-process mutexes keyed by remote object identity.
///
/// Distinct logical resources that mutate the same remote object (several
/// databases and users on one SQL instance) take the instance's lock around
/// each provider call so their mutations do not race on the provider side.
#[derive(Debug, Default)]
pub struct InstanceLocks {
    locks: LockMap,
}

impl InstanceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`. Released when the guard drops.
    pub async fn lock(&self, key: &str) -> InstanceGuard {
        let mutex = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.entry(key.to_string()).or_default().clone()
        };
        tracing::trace!(key, "waiting for instance lock");
        let guard = mutex.clone().lock_owned().await;
        InstanceGuard {
            key: key.to_string(),
            mutex,
            guard: Some(guard),
            locks: self.locks.clone(),
        }
    }

    /// Keys with a holder or a waiter.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exclusive use of one key. The key's entry is dropped with the last
/// holder or waiter.
pub struct InstanceGuard {
    key: String,
    mutex: Arc<tokio::sync::Mutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
    locks: LockMap,
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // New waiters clone under the map lock, so the count is stable here:
        // one reference in the map and ours.
        if Arc::strong_count(&self.mutex) == 2
            && locks
                .get(&self.key)
                .is_some_and(|m| Arc::ptr_eq(m, &self.mutex))
        {
            locks.remove(&self.key);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn same_key_is_serialized() {
        let locks = Arc::new(InstanceLocks::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let (locks, inside, peak) = (locks.clone(), inside.clone(), peak.clone());
            tasks.push(tokio::spawn(async move {
                let _guard = locks.lock("db-main").await;
                let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                inside.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert_eq!(peak.load(Ordering::SeqCst), 1);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn different_keys_do_not_block() {
        let locks = InstanceLocks::new();
        let a = locks.lock("db-a").await;
        let b = locks.lock("db-b").await;
        assert_eq!(locks.len(), 2);
        drop(a);
        assert_eq!(locks.len(), 1);
        drop(b);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn entry_survives_while_someone_waits() {
        let locks = Arc::new(InstanceLocks::new());
        let held = locks.lock("db-main").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock("db-main").await;
            })
        };
        // Map, guard and our handle, plus the waiter.
        while Arc::strong_count(&held.mutex) < 4 {
            tokio::task::yield_now().await;
        }

        drop(held);
        assert_eq!(locks.len(), 1);
        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
