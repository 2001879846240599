use crate::error::{Error, Result};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

type LockTable = Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>;

/// Single-writer lock per exam id. Different exams never contend.
#[derive(Clone, Default)]
pub struct ExamLocks {
    table: LockTable,
}

pub struct ExamLockGuard {
    exam_id: Uuid,
    table: LockTable,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ExamLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, exam_id: Uuid, timeout: Duration) -> Result<ExamLockGuard> {
        let lock = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table.entry(exam_id).or_default().clone()
        };

        let guard = match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => guard,
            Err(_) => {
                return Err(Error::Conflict(format!(
                    "Exam {} is being recomputed by another run; gave up after {:?}",
                    exam_id, timeout
                )))
            }
        };

        tracing::debug!("Acquired recompute lock for exam {}", exam_id);
        Ok(ExamLockGuard {
            exam_id,
            table: self.table.clone(),
            guard: Some(guard),
        })
    }

    pub fn is_locked(&self, exam_id: Uuid) -> bool {
        let table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        table
            .get(&exam_id)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

impl ExamLockGuard {
    pub fn exam_id(&self) -> Uuid {
        self.exam_id
    }
}

impl Drop for ExamLockGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        self.guard.take();
        // only the table still references the mutex: nobody is waiting
        if let Some(lock) = table.get(&self.exam_id) {
            if Arc::strong_count(lock) == 1 {
                table.remove(&self.exam_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_drop_clears_table_entry() {
        let locks = ExamLocks::new();
        let exam_id = Uuid::new_v4();

        tokio_test::block_on(async {
            let guard = tokio_test::assert_ok!(locks.acquire(exam_id, Duration::from_millis(10)).await);
            assert_eq!(guard.exam_id(), exam_id);
            assert!(locks.is_locked(exam_id));
        });

        assert!(!locks.is_locked(exam_id));
        assert!(locks.table.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn second_acquire_times_out_with_conflict() {
        let locks = ExamLocks::new();
        let exam_id = Uuid::new_v4();
        let _held = locks.acquire(exam_id, Duration::from_millis(10)).await.unwrap();

        let err = locks
            .acquire(exam_id, Duration::from_millis(20))
            .await
            .err()
            .expect("second acquire must fail");
        assert!(matches!(err, Error::Conflict(_)));

        locks
            .acquire(Uuid::new_v4(), Duration::from_millis(20))
            .await
            .expect("other exams are independent");
    }

    #[tokio::test]
    async fn waiter_gets_lock_after_release() {
        let locks = ExamLocks::new();
        let exam_id = Uuid::new_v4();
        let held = locks.acquire(exam_id, Duration::from_millis(10)).await.unwrap();

        let waiter = tokio::spawn({
            let locks = locks.clone();
            async move { locks.acquire(exam_id, Duration::from_secs(2)).await.map(|g| g.exam_id()) }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), exam_id);
        assert!(!locks.is_locked(exam_id));
    }
}
