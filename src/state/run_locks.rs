//! Per-user advisory locks
//!
//! Two provisioning runs for the same user would race to create the same
//! logical paths. Each user id maps to one async mutex; holding its guard
//! is the right to touch that user's mailbox and identifier map.
//!
//! A user's entry lives only while a run holds or waits for it, so the
//! table is bounded by the number of concurrent runs.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

type LockTable = HashMap<String, Arc<Mutex<()>>>;

#[derive(Default)]
pub struct RunLocks {
    locks: Arc<StdMutex<LockTable>>,
}

/// Held for the duration of one run; releases and prunes on drop
pub struct RunGuard {
    guard: Option<OwnedMutexGuard<()>>,
    lock: Arc<Mutex<()>>,
    user_id: String,
    table: Arc<StdMutex<LockTable>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> StdMutexGuard<'_, LockTable> {
        lock_table(&self.locks)
    }

    fn lock_for(&self, user_id: &str) -> Arc<Mutex<()>> {
        self.table()
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn guard(&self, user_id: &str, lock: Arc<Mutex<()>>, guard: OwnedMutexGuard<()>) -> RunGuard {
        RunGuard {
            guard: Some(guard),
            lock,
            user_id: user_id.to_string(),
            table: self.locks.clone(),
        }
    }

    /// Wait until no other run holds the user's lock
    pub async fn acquire(&self, user_id: &str) -> RunGuard {
        let lock = self.lock_for(user_id);
        debug!("Waiting for run lock of {}", user_id);
        let guard = lock.clone().lock_owned().await;
        self.guard(user_id, lock, guard)
    }

    /// The user's lock, or `None` if a run is in progress
    pub async fn try_acquire(&self, user_id: &str) -> Option<RunGuard> {
        let lock = self.lock_for(user_id);
        match lock.clone().try_lock_owned() {
            Ok(guard) => Some(self.guard(user_id, lock, guard)),
            Err(_) => {
                drop(lock);
                prune(&self.locks, user_id);
                None
            }
        }
    }

    /// Users with a run holding or waiting for their lock
    pub fn len(&self) -> usize {
        self.table().len()
    }

    pub fn is_empty(&self) -> bool {
        self.table().is_empty()
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut table = lock_table(&self.table);
        // Ours plus the table's; anyone else is still waiting
        let idle = table
            .get(&self.user_id)
            .map_or(false, |l| Arc::ptr_eq(l, &self.lock) && Arc::strong_count(l) == 2);
        if idle {
            table.remove(&self.user_id);
        }
    }
}

fn lock_table(table: &StdMutex<LockTable>) -> StdMutexGuard<'_, LockTable> {
    table.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Drop the user's entry when nothing references it but the table
fn prune(table: &StdMutex<LockTable>, user_id: &str) {
    let mut table = lock_table(table);
    if table.get(user_id).map_or(false, |l| Arc::strong_count(l) == 1) {
        table.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_user_serialized() {
        let locks = RunLocks::new();

        let guard = locks.acquire("user-1").await;
        assert!(locks.try_acquire("user-1").await.is_none());

        drop(guard);
        assert!(locks.try_acquire("user-1").await.is_some());
    }

    #[tokio::test]
    async fn test_users_independent() {
        let locks = RunLocks::new();

        let _first = locks.acquire("user-1").await;
        assert!(locks.try_acquire("user-2").await.is_some());
    }

    #[tokio::test]
    async fn test_waiter_proceeds_after_release() {
        let locks = Arc::new(RunLocks::new());
        let guard = locks.acquire("user-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("user-1").await;
                true
            })
        };

        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(guard);
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn test_released_locks_pruned() {
        let locks = RunLocks::new();

        for i in 0..50 {
            let _guard = locks.acquire(&format!("user-{}", i)).await;
        }
        assert!(locks.is_empty());

        let held = locks.acquire("user-1").await;
        assert!(locks.try_acquire("user-1").await.is_none());
        assert_eq!(locks.len(), 1);
        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_entry_kept_while_waiter_queued() {
        let locks = Arc::new(RunLocks::new());
        let guard = locks.acquire("user-1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("user-1").await;
            })
        };
        tokio::task::yield_now().await;

        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
