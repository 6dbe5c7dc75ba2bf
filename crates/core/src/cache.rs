use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, Mutex};

/// A single TTL-bounded cache slot with single-flight refresh: concurrent
/// callers that observe a stale or empty slot while a refresh is already
/// in flight await that refresh's result instead of issuing their own.
pub struct Cache<T: Clone + Send + 'static> {
    ttl: Duration,
    inner: Mutex<Inner<T>>,
}

struct Inner<T> {
    value: Option<(T, Instant)>,
    in_flight: Option<broadcast::Sender<()>>,
}

impl<T: Clone + Send + 'static> Cache<T> {
    pub fn new(ttl: Duration) -> Self {
        Cache {
            ttl,
            inner: Mutex::new(Inner {
                value: None,
                in_flight: None,
            }),
        }
    }

    /// Returns the cached value if it is still within the TTL, without
    /// triggering a refresh.
    pub async fn peek(&self) -> Option<T> {
        let guard = self.inner.lock().await;
        guard
            .value
            .as_ref()
            .filter(|(_, at)| at.elapsed() < self.ttl)
            .map(|(v, _)| v.clone())
    }

    /// Returns the cached value if fresh; otherwise calls `refresh` to
    /// compute a new one. If another caller's refresh is already in
    /// flight, awaits that refresh's completion instead of calling
    /// `refresh` itself, then re-reads the cache.
    pub async fn get_or_refresh<F, Fut, E>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        loop {
            let mut guard = self.inner.lock().await;
            if let Some((value, at)) = &guard.value {
                if at.elapsed() < self.ttl {
                    return Ok(value.clone());
                }
            }
            if let Some(sender) = &guard.in_flight {
                let mut receiver = sender.subscribe();
                drop(guard);
                let _ = receiver.recv().await;
                continue;
            }
            let (tx, _rx) = broadcast::channel(1);
            guard.in_flight = Some(tx.clone());
            drop(guard);

            let result = refresh().await;
            let mut guard = self.inner.lock().await;
            guard.in_flight = None;
            let outcome = match result {
                Ok(value) => {
                    guard.value = Some((value.clone(), Instant::now()));
                    Ok(value)
                }
                // A failed refresh still serves the stale entry if one
                // exists, rather than surfacing a transient RPC error to
                // every caller waiting on this slot.
                Err(e) => match &guard.value {
                    Some((stale, _)) => Ok(stale.clone()),
                    None => Err(e),
                },
            };
            drop(guard);
            let _ = tx.send(());
            return outcome;
        }
    }

    /// Force the next read to refresh, regardless of remaining TTL.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.lock().await;
        guard.value = None;
    }

    pub async fn set(&self, value: T) {
        let mut guard = self.inner.lock().await;
        guard.value = Some((value, Instant::now()));
    }
}

pub type SharedCache<T> = Arc<Cache<T>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn refresh_is_called_once_when_empty() {
        let cache: Cache<u32> = Cache::new(Duration::from_millis(50));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let value = cache
            .get_or_refresh(|| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(42)
            })
            .await
            .unwrap();
        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_value_skips_refresh() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        cache.set(7).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        let value = cache
            .get_or_refresh(|| async move {
                calls2.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ()>(999)
            })
            .await
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn concurrent_refreshes_single_flight() {
        let cache: Arc<Cache<u32>> = Arc::new(Cache::new(Duration::from_millis(10)));
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_refresh(|| async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok::<_, ()>(1)
                    })
                    .await
                    .unwrap()
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stale_value_is_served_when_refresh_errors() {
        let cache: Cache<u32> = Cache::new(Duration::from_millis(10));
        cache.set(11).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        let value = cache
            .get_or_refresh(|| async { Err::<u32, &'static str>("rpc down") })
            .await
            .unwrap();
        assert_eq!(value, 11);
    }

    #[tokio::test]
    async fn error_propagates_when_no_stale_value_exists() {
        let cache: Cache<u32> = Cache::new(Duration::from_millis(10));
        let err = cache
            .get_or_refresh(|| async { Err::<u32, &'static str>("rpc down") })
            .await
            .unwrap_err();
        assert_eq!(err, "rpc down");
    }

    #[tokio::test]
    async fn invalidate_forces_refresh() {
        let cache: Cache<u32> = Cache::new(Duration::from_secs(60));
        cache.set(1).await;
        cache.invalidate().await;
        let value = cache.get_or_refresh(|| async { Ok::<_, ()>(2) }).await.unwrap();
        assert_eq!(value, 2);
    }
}
