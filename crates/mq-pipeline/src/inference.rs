//! Shared inference resource
//!
//! Some scorers wrap a model that must not run two inferences at once.
//! `InferenceResource` owns such a model, creates it on first use and hands
//! out one `InferenceLease` at a time. Work before and after the call
//! (loading audio, parsing output) stays outside the lease.

use crate::{PipelineError, Result};
use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};

type Init<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Lazily created, mutually exclusive resource
pub struct InferenceResource<T> {
    slot: Mutex<Option<T>>,

    init: Init<T>,

    /// Leases handed out so far
    acquisitions: AtomicU64,
}

impl<T> InferenceResource<T> {
    /// Already-initialized resource
    pub fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(Some(value)),
            init: Box::new(|| Err(PipelineError::Config("inference resource was released".into()))),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Resource created by `init` on the first `acquire`
    pub fn lazy<F>(init: F) -> Self
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        Self {
            slot: Mutex::new(None),
            init: Box::new(init),
            acquisitions: AtomicU64::new(0),
        }
    }

    /// Block until the resource is free, creating it if needed.
    ///
    /// A failed initialization leaves the slot empty so a later call retries.
    pub fn acquire(&self) -> Result<InferenceLease<'_, T>> {
        let mut slot = self.slot.lock();
        if slot.is_none() {
            log::debug!("Initializing inference resource");
            *slot = Some((self.init)()?);
        }
        self.acquisitions.fetch_add(1, Ordering::Relaxed);

        MutexGuard::try_map(slot, Option::as_mut)
            .map(|guard| InferenceLease { guard })
            .map_err(|_| PipelineError::Config("inference resource unavailable".into()))
    }

    pub fn is_initialized(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }
}

impl<T> std::fmt::Debug for InferenceResource<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferenceResource")
            .field("acquisitions", &self.acquisitions())
            .finish()
    }
}

/// Exclusive access to the resource; released on drop
pub struct InferenceLease<'a, T> {
    guard: MappedMutexGuard<'a, T>,
}

impl<T> InferenceLease<'_, T> {
    /// Release early
    pub fn release(self) {}
}

impl<T> Deref for InferenceLease<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for InferenceLease<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_lazy_init_runs_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resource = InferenceResource::lazy(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(vec![1.0f32, 2.0])
        });

        assert!(!resource.is_initialized());
        {
            let lease = resource.acquire().unwrap();
            assert_eq!(lease.len(), 2);
        }
        resource.acquire().unwrap().release();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(resource.acquisitions(), 2);
        assert!(resource.is_initialized());
    }

    #[test]
    fn test_failed_init_retries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let resource = InferenceResource::lazy(move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(PipelineError::Config("model missing".into()))
            } else {
                Ok(7u32)
            }
        });

        assert!(resource.acquire().is_err());
        assert_eq!(*resource.acquire().unwrap(), 7);
    }

    #[test]
    fn test_leases_are_exclusive() {
        let resource = Arc::new(InferenceResource::new(0usize));
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resource = resource.clone();
                let active = active.clone();
                let max_active = max_active.clone();
                thread::spawn(move || {
                    let mut lease = resource.acquire().unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    thread::sleep(Duration::from_millis(5));
                    *lease += 1;
                    active.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert_eq!(*resource.acquire().unwrap(), 8);
    }
}
