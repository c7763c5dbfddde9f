//! Memoizing cache with TTL and manual reset

use crate::error::Result;
use crate::plugin::Getter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Entry<T> {
    valid: bool,
    value: Option<T>,
    err: Option<crate::error::HestiaError>,
    expiry: Instant,
}

/// Caches the result of a getter, including its error, for `ttl`.
///
/// The refresh runs while holding the entry lock, so concurrent callers
/// share a single in-flight request.
pub struct Cached<T> {
    getter: Getter<T>,
    ttl: Duration,
    reset: AtomicBool,
    entry: Mutex<Entry<T>>,
}

impl<T: Clone + Send + 'static> Cached<T> {
    pub fn new(getter: Getter<T>, ttl: Duration) -> Self {
        Self {
            getter,
            ttl,
            reset: AtomicBool::new(false),
            entry: Mutex::new(Entry {
                valid: false,
                value: None,
                err: None,
                expiry: Instant::now(),
            }),
        }
    }

    /// Return the cached value, refreshing on first access after expiry or reset
    pub async fn get(&self) -> Result<T> {
        let mut entry = self.entry.lock().await;

        let reset = self.reset.swap(false, Ordering::AcqRel);
        if reset || !entry.valid || Instant::now() >= entry.expiry {
            match (self.getter)().await {
                Ok(v) => {
                    entry.value = Some(v);
                    entry.err = None;
                }
                Err(e) => {
                    entry.value = None;
                    entry.err = Some(e);
                }
            }
            entry.valid = true;
            entry.expiry = Instant::now() + self.ttl;
        }

        match (&entry.value, &entry.err) {
            (_, Some(err)) => Err(err.clone()),
            (Some(v), None) => Ok(v.clone()),
            (None, None) => Err(crate::error::HestiaError::generic("cache empty")),
        }
    }

    /// Force the next access to refresh regardless of expiry
    pub fn reset(&self) {
        self.reset.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HestiaError;
    use crate::plugin::getter_fn;
    use std::sync::Arc;
    use std::sync::atomic::AtomicI64;

    fn counting() -> (Arc<AtomicI64>, Getter<i64>) {
        let calls = Arc::new(AtomicI64::new(0));
        let c = calls.clone();
        let g = getter_fn(move || {
            let c = c.clone();
            async move { Ok(c.fetch_add(1, Ordering::SeqCst) + 1) }
        });
        (calls, g)
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_until_expiry() {
        let (calls, g) = counting();
        let cache = Cached::new(g, Duration::from_secs(5));

        assert_eq!(cache.get().await.unwrap(), 1);
        assert_eq!(cache.get().await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.get().await.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_forces_refresh() {
        let (_, g) = counting();
        let cache = Cached::new(g, Duration::from_secs(60));

        assert_eq!(cache.get().await.unwrap(), 1);
        cache.reset();
        assert_eq!(cache.get().await.unwrap(), 2);
        assert_eq!(cache.get().await.unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_cached() {
        let calls = Arc::new(AtomicI64::new(0));
        let c = calls.clone();
        let g: Getter<i64> = getter_fn(move || {
            c.fetch_add(1, Ordering::SeqCst);
            async { Err(HestiaError::network("down")) }
        });
        let cache = Cached::new(g, Duration::from_secs(5));

        assert!(cache.get().await.is_err());
        assert!(cache.get().await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_single_inflight_request() {
        let calls = Arc::new(AtomicI64::new(0));
        let c = calls.clone();
        let g: Getter<i64> = getter_fn(move || {
            let c = c.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(c.fetch_add(1, Ordering::SeqCst))
            }
        });
        let cache = Arc::new(Cached::new(g, Duration::from_secs(60)));

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get().await })
            })
            .collect();
        for h in handles {
            assert_eq!(h.await.unwrap().unwrap(), 0);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
