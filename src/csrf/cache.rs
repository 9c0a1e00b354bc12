//! CSRF token cache with single-flight refresh.
//!
//! # Responsibilities
//! - Hand out a fresh token + session cookies per backend service path
//! - Collapse concurrent refreshes for the same service into one fetch
//! - Never cache a failed refresh
//!
//! # State per key
//! ```text
//! (absent) ──get──▶ Refreshing ──ok──▶ Ready ──stale + get──▶ Refreshing
//!                        │                 │
//!                        └──err──▶ (absent)└──invalidate──▶ (absent)
//! ```
//!
//! # Design Decisions
//! - The check-and-set happens under the map's per-shard entry lock; no
//!   lock is ever held across an await
//! - An in-flight refresh is a `Shared` future: every concurrent caller
//!   polls the same fetch and sees the same `Ok`/`Err`
//! - The refresh runs on its own task, publishes its result and clears the
//!   marker whether or not anyone is still waiting

use std::sync::Arc;
use std::time::Duration;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;

use crate::backend::error::BackendError;
use crate::observability::metrics;

/// A CSRF token together with the session cookies it is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    pub value: String,
    /// `Set-Cookie` values in the order the backend sent them.
    pub cookies: Vec<String>,
    pub fetched_at: Instant,
}

impl CsrfToken {
    pub fn new(value: impl Into<String>, cookies: Vec<String>) -> Self {
        Self {
            value: value.into(),
            cookies,
            fetched_at: Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.fetched_at.elapsed()
    }

    pub fn is_fresh(&self, window: Duration) -> bool {
        self.age() < window
    }

    /// Rebuild a `Cookie` request header: `name=value` pairs in original order,
    /// with `Set-Cookie` attributes (path, expiry, flags) stripped.
    pub fn cookie_header(&self) -> Option<String> {
        let pairs: Vec<&str> = self
            .cookies
            .iter()
            .filter_map(|c| c.split(';').next())
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect();

        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }
}

/// Fetches a new token for a backend service path.
pub trait TokenFetcher: Send + Sync {
    fn fetch<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<CsrfToken, BackendError>>;
}

type Refresh = Shared<BoxFuture<'static, Result<CsrfToken, BackendError>>>;

enum Slot {
    Ready(CsrfToken),
    Refreshing(Refresh),
}

/// Summary of one cached entry, safe to expose (no token value).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CachedTokenInfo {
    pub service: String,
    pub age_ms: u64,
    pub fresh: bool,
    pub cookies: usize,
}

/// Per-service CSRF token cache.
#[derive(Clone)]
pub struct CsrfTokenCache {
    slots: Arc<DashMap<String, Slot>>,
    fetcher: Arc<dyn TokenFetcher>,
    freshness: Duration,
}

impl CsrfTokenCache {
    pub fn new(fetcher: Arc<dyn TokenFetcher>, freshness: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            fetcher,
            freshness,
        }
    }

    /// Return a fresh token for `service`, fetching at most once per key at a time.
    pub async fn get(&self, service: &str) -> Result<CsrfToken, BackendError> {
        let refresh = match self.slots.entry(service.to_string()) {
            Entry::Occupied(mut occupied) => {
                let in_flight = match occupied.get() {
                    Slot::Ready(token) if token.is_fresh(self.freshness) => {
                        metrics::record_csrf_lookup("hit");
                        return Ok(token.clone());
                    }
                    Slot::Refreshing(refresh) => Some(refresh.clone()),
                    Slot::Ready(token) => {
                        tracing::debug!(
                            service = %service,
                            age_ms = token.age().as_millis() as u64,
                            "Cached CSRF token is stale, refreshing"
                        );
                        None
                    }
                };

                match in_flight {
                    Some(refresh) => {
                        metrics::record_csrf_lookup("joined");
                        refresh
                    }
                    None => {
                        metrics::record_csrf_lookup("stale");
                        let refresh = self.start_refresh(service);
                        occupied.insert(Slot::Refreshing(refresh.clone()));
                        refresh
                    }
                }
            }
            Entry::Vacant(vacant) => {
                metrics::record_csrf_lookup("miss");
                let refresh = self.start_refresh(service);
                vacant.insert(Slot::Refreshing(refresh.clone()));
                refresh
            }
        };

        refresh.await
    }

    /// Drop the cached token so the next `get` fetches a new one.
    ///
    /// A refresh already in flight is left alone, so there is still at most
    /// one fetch per service at a time.
    pub fn invalidate(&self, service: &str) -> bool {
        let removed = self
            .slots
            .remove_if(service, |_, slot| matches!(slot, Slot::Ready(_)))
            .is_some();
        if removed {
            tracing::info!(service = %service, "CSRF token invalidated");
        }
        removed
    }

    /// Drop the cached token only if it is still `rejected`. A newer token
    /// or a refresh in flight is kept.
    pub fn invalidate_rejected(&self, service: &str, rejected: &CsrfToken) -> bool {
        let removed = self
            .slots
            .remove_if(service, |_, slot| {
                matches!(slot, Slot::Ready(token) if token.value == rejected.value)
            })
            .is_some();
        if removed {
            tracing::info!(service = %service, "Rejected CSRF token dropped");
        }
        removed
    }

    /// Cached tokens and their age.
    pub fn snapshot(&self) -> Vec<CachedTokenInfo> {
        let mut entries: Vec<_> = self
            .slots
            .iter()
            .filter_map(|slot| match slot.value() {
                Slot::Ready(token) => Some(CachedTokenInfo {
                    service: slot.key().clone(),
                    age_ms: token.age().as_millis() as u64,
                    fresh: token.is_fresh(self.freshness),
                    cookies: token.cookies.len(),
                }),
                Slot::Refreshing(_) => None,
            })
            .collect();
        entries.sort_by(|a, b| a.service.cmp(&b.service));
        entries
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    fn start_refresh(&self, service: &str) -> Refresh {
        let slots = self.slots.clone();
        let fetcher = self.fetcher.clone();
        let service = service.to_string();

        // The fetch runs on its own task so it finishes (and frees its
        // dispatcher slot) even when every waiter goes away.
        let task = tokio::spawn({
            let slots = slots.clone();
            let service = service.clone();
            async move {
                tracing::debug!(service = %service, "Fetching CSRF token");
                let result = fetcher.fetch(&service).await;

                match &result {
                    Ok(token) => {
                        slots.insert(service.clone(), Slot::Ready(token.clone()));
                        metrics::record_csrf_fetch("success");
                        tracing::info!(
                            service = %service,
                            cookies = token.cookies.len(),
                            "CSRF token refreshed"
                        );
                    }
                    Err(e) => {
                        slots.remove_if(&service, |_, slot| matches!(slot, Slot::Refreshing(_)));
                        metrics::record_csrf_fetch("failure");
                        tracing::warn!(service = %service, error = %e, "CSRF token refresh failed");
                    }
                }

                result
            }
        });

        task.map(move |joined| {
            joined.unwrap_or_else(|e| {
                slots.remove_if(&service, |_, slot| matches!(slot, Slot::Refreshing(_)));
                metrics::record_csrf_fetch("failure");
                tracing::error!(service = %service, error = %e, "CSRF token refresh task died");
                Err(BackendError::TokenFetch {
                    service: service.clone(),
                    source: Box::new(BackendError::Aborted(e.to_string())),
                })
            })
        })
        .boxed()
        .shared()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::error::NetworkCode;
    use crate::backend::transport::{BackendRequest, BackendResponse, Transport};
    use crate::csrf::fetcher::{BackendTokenFetcher, CSRF_HEADER};
    use crate::resilience::Dispatcher;
    use axum::http::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Fetcher that counts calls and returns scripted outcomes.
    struct CountingFetcher {
        calls: AtomicUsize,
        delay: Duration,
        failures: Mutex<Vec<BackendError>>,
    }

    impl CountingFetcher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                delay,
                failures: Mutex::new(Vec::new()),
            })
        }

        fn failing_once(delay: Duration, err: BackendError) -> Arc<Self> {
            let fetcher = Self::new(delay);
            fetcher.failures.lock().unwrap().push(err);
            fetcher
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl TokenFetcher for CountingFetcher {
        fn fetch<'a>(&'a self, service: &'a str) -> BoxFuture<'a, Result<CsrfToken, BackendError>> {
            Box::pin(async move {
                let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(self.delay).await;
                if let Some(err) = self.failures.lock().unwrap().pop() {
                    return Err(BackendError::TokenFetch {
                        service: service.to_string(),
                        source: Box::new(err),
                    });
                }
                Ok(CsrfToken::new(
                    format!("token-{}", n),
                    vec![format!("SAP_SESSIONID_S4H_100=s{}; path=/; secure; HttpOnly", n)],
                ))
            })
        }
    }

    const PO: &str = "/sap/opu/odata/sap/API_PURCHASEORDER_PROCESS_SRV";
    const WINDOW: Duration = Duration::from_millis(300_000);

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_gets_share_one_fetch() {
        let fetcher = CountingFetcher::new(Duration::from_millis(100));
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        let (a, b) = tokio::join!(cache.get(PO), cache.get(PO));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(a, b);
        assert_eq!(a.value, "token-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_many_spawned_callers_share_one_fetch() {
        let fetcher = CountingFetcher::new(Duration::from_millis(100));
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get(PO).await })
            })
            .collect();

        for h in handles {
            assert_eq!(h.await.unwrap().unwrap().value, "token-1");
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_freshness_boundary() {
        let fetcher = CountingFetcher::new(Duration::ZERO);
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        cache.get(PO).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_millis(299_999)).await;
        let token = cache.get(PO).await.unwrap();
        assert_eq!(token.value, "token-1");
        assert_eq!(fetcher.calls(), 1);

        tokio::time::advance(Duration::from_millis(2)).await;
        let token = cache.get(PO).await.unwrap();
        assert_eq!(token.value, "token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_exactly_one_fetch() {
        let fetcher = CountingFetcher::new(Duration::from_millis(10));
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        cache.get(PO).await.unwrap();
        assert!(cache.invalidate(PO));
        assert!(!cache.invalidate(PO));

        let (a, b) = tokio::join!(cache.get(PO), cache.get(PO));
        assert_eq!(a.unwrap().value, "token-2");
        assert_eq!(b.unwrap().value, "token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_reaches_all_waiters_and_is_not_cached() {
        let fetcher = CountingFetcher::failing_once(
            Duration::from_millis(50),
            BackendError::network(NetworkCode::TimedOut, "token fetch timed out"),
        );
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        let (a, b, c) = tokio::join!(cache.get(PO), cache.get(PO), cache.get(PO));
        for result in [a, b, c] {
            let err = result.unwrap_err();
            assert!(matches!(err, BackendError::TokenFetch { .. }));
            assert_eq!(err.network_code(), Some(NetworkCode::TimedOut));
        }
        assert_eq!(fetcher.calls(), 1);
        assert!(cache.snapshot().is_empty());

        // Next access starts over
        assert_eq!(cache.get(PO).await.unwrap().value, "token-2");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_refresh_independently() {
        let fetcher = CountingFetcher::new(Duration::from_millis(10));
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        let pr = "/sap/opu/odata/sap/API_PURCHASEREQ_PROCESS_SRV";
        let (a, b) = tokio::join!(cache.get(PO), cache.get(pr));
        assert_ne!(a.unwrap().value, b.unwrap().value);
        assert_eq!(fetcher.calls(), 2);

        let services: Vec<_> = cache.snapshot().into_iter().map(|i| i.service).collect();
        assert_eq!(services, vec![PO.to_string(), pr.to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_during_refresh_keeps_single_flight() {
        let fetcher = CountingFetcher::new(Duration::from_millis(100));
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        let c = cache.clone();
        let first = tokio::spawn(async move { c.get(PO).await });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        assert!(!cache.invalidate(PO));
        let second = cache.get(PO).await.unwrap();
        assert_eq!(first.await.unwrap().unwrap(), second);
        assert_eq!(fetcher.calls(), 1);
    }

    /// Backend whose token endpoint answers after 100 ms.
    struct SlowTokenEndpoint;

    impl Transport for SlowTokenEndpoint {
        fn send(&self, _request: BackendRequest) -> BoxFuture<'_, Result<BackendResponse, BackendError>> {
            Box::pin(async {
                tokio::time::sleep(Duration::from_millis(100)).await;
                let mut response = BackendResponse::new(200, "");
                response.headers.insert(CSRF_HEADER, HeaderValue::from_static("late-token"));
                Ok(response)
            })
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_completes_after_its_only_waiter_is_aborted() {
        let dispatcher = Arc::new(Dispatcher::new(1));
        let fetcher = BackendTokenFetcher::new(
            dispatcher.clone(),
            Arc::new(SlowTokenEndpoint),
            Duration::from_secs(30),
        );
        let cache = CsrfTokenCache::new(Arc::new(fetcher), WINDOW);

        let c = cache.clone();
        let waiter = tokio::spawn(async move { c.get(PO).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(dispatcher.in_flight(), 1);

        waiter.abort();
        assert!(waiter.await.unwrap_err().is_cancelled());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(dispatcher.in_flight(), 0);
        assert_eq!(cache.snapshot().len(), 1);

        let admitted = tokio::time::timeout(Duration::from_secs(1), dispatcher.submit(|| async { 7 })).await;
        assert_eq!(admitted.unwrap(), 7);
        assert_eq!(cache.get(PO).await.unwrap().value, "late-token");
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_rejected_spares_newer_token() {
        let fetcher = CountingFetcher::new(Duration::from_millis(10));
        let cache = CsrfTokenCache::new(fetcher.clone(), WINDOW);

        let first = cache.get(PO).await.unwrap();
        assert!(cache.invalidate_rejected(PO, &first));
        let second = cache.get(PO).await.unwrap();
        assert_eq!(second.value, "token-2");

        // A late refusal of the old token leaves the new one in place
        assert!(!cache.invalidate_rejected(PO, &first));
        assert_eq!(cache.get(PO).await.unwrap(), second);
        assert_eq!(fetcher.calls(), 2);
    }

    #[test]
    fn test_cookie_header_keeps_order_and_strips_attributes() {
        let token = CsrfToken {
            value: "abc".into(),
            cookies: vec![
                "sap-usercontext=sap-client=100; path=/".into(),
                "SAP_SESSIONID_S4H_100=xyz%3d; path=/; secure; HttpOnly".into(),
            ],
            fetched_at: Instant::now(),
        };
        assert_eq!(
            token.cookie_header().as_deref(),
            Some("sap-usercontext=sap-client=100; SAP_SESSIONID_S4H_100=xyz%3d")
        );

        let bare = CsrfToken {
            value: "abc".into(),
            cookies: Vec::new(),
            fetched_at: Instant::now(),
        };
        assert!(bare.cookie_header().is_none());
    }
}
