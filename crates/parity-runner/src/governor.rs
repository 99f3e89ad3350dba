use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

pub const DEFAULT_CONCURRENCY: usize = 5;

/// Upper bound on simultaneous calls into the rate-limited backend services.
/// Waiters are not served in any promised order.
#[derive(Debug, Clone)]
pub struct ConcurrencyGovernor {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

/// Slot held for the duration of one backend call; released on drop.
#[derive(Debug)]
pub struct GovernorPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyGovernor {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub async fn acquire(&self) -> Result<GovernorPermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;
        Ok(GovernorPermit { _permit: permit })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_flight(&self) -> usize {
        self.capacity
            .saturating_sub(self.semaphore.available_permits())
    }
}

impl Default for ConcurrencyGovernor {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

#[cfg(test)]
mod tests {
    use super::ConcurrencyGovernor;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn unit_permits_are_counted_and_released_on_drop() {
        let governor = ConcurrencyGovernor::new(2);
        assert_eq!(governor.capacity(), 2);
        let first = governor.acquire().await.expect("permit");
        let second = governor.acquire().await.expect("permit");
        assert_eq!(governor.in_flight(), 2);
        drop(first);
        assert_eq!(governor.in_flight(), 1);
        drop(second);
        assert_eq!(governor.in_flight(), 0);
    }

    #[test]
    fn unit_zero_capacity_is_raised_to_one() {
        assert_eq!(ConcurrencyGovernor::new(0).capacity(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn functional_concurrent_holders_never_exceed_capacity() {
        let governor = ConcurrencyGovernor::new(5);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for index in 0..20_u64 {
            let governor = governor.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = governor.acquire().await.expect("permit");
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(100 + index * 7)).await;
                active.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }

        assert_eq!(peak.load(Ordering::SeqCst), 5);
        assert_eq!(governor.in_flight(), 0);
    }
}
