//! Service registry with a time-bounded health cache.
//!
//! The registry maps logical service names to base URLs. The table is fixed
//! at startup; only the cached availability of each route changes.
//!
//! Availability is memoized per route for `health_check_interval`. When the
//! cached value expires, exactly one caller probes the backend while the
//! others keep answering from the stale value. Callers only wait when no
//! value has ever been recorded, and never longer than the probe timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use citadel_middleware::{BoxFuture, Rejection};
use futures_util::future::join_all;
use parking_lot::RwLock;
use reqwest::Client;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{RegistrySettings, ServiceTable};
use crate::error::{GatewayError, GatewayResult};

/// Checks whether a backend is healthy.
pub trait HealthProbe: Send + Sync + 'static {
    /// Probe the backend at `base_url`. Any failure counts as unhealthy.
    fn probe<'a>(&'a self, base_url: &'a str) -> BoxFuture<'a, bool>;
}

/// Probes `GET <base_url><health_path>`; healthy iff the status is 200.
#[derive(Debug, Clone)]
pub struct HttpHealthProbe {
    client: Client,
    health_path: String,
}

impl HttpHealthProbe {
    /// Create a probe.
    pub fn new(settings: &RegistrySettings) -> GatewayResult<Self> {
        let client = Client::builder()
            .timeout(settings.probe_timeout)
            .build()
            .map_err(GatewayError::Client)?;

        Ok(Self {
            client,
            health_path: settings.health_path.clone(),
        })
    }
}

impl HealthProbe for HttpHealthProbe {
    fn probe<'a>(&'a self, base_url: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let url = format!("{}{}", base_url.trim_end_matches('/'), self.health_path);
            match self.client.get(&url).send().await {
                Ok(resp) => resp.status() == reqwest::StatusCode::OK,
                Err(e) => {
                    debug!(url = %url, error = %e, "health probe failed");
                    false
                }
            }
        })
    }
}

#[derive(Debug, Clone, Copy)]
struct HealthSnapshot {
    available: bool,
    checked_at: Instant,
}

/// A registered backend.
#[derive(Debug)]
pub struct RouteEntry {
    name: String,
    base_url: String,
    health: RwLock<Option<HealthSnapshot>>,
    probe_guard: tokio::sync::Mutex<()>,
}

impl RouteEntry {
    fn new(name: &str, base_url: &str) -> Self {
        Self {
            name: name.to_string(),
            base_url: base_url.to_string(),
            health: RwLock::new(None),
            probe_guard: tokio::sync::Mutex::new(()),
        }
    }

    /// Logical service name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Last recorded availability, fresh or not.
    pub fn cached(&self) -> Option<bool> {
        (*self.health.read()).map(|s| s.available)
    }

    fn fresh(&self, ttl: Duration) -> Option<bool> {
        (*self.health.read())
            .filter(|s| s.checked_at.elapsed() < ttl)
            .map(|s| s.available)
    }

    fn store(&self, available: bool) {
        *self.health.write() = Some(HealthSnapshot {
            available,
            checked_at: Instant::now(),
        });
    }
}

/// Live and cached health of one service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStatus {
    /// Logical service name.
    pub name: String,
    /// Backend base URL.
    pub url: String,
    /// Availability according to the cache.
    pub available: bool,
    /// Result of a live probe.
    pub healthy: bool,
}

/// Name to backend table plus health cache.
pub struct ServiceRegistry {
    routes: HashMap<String, Arc<RouteEntry>>,
    probe: Arc<dyn HealthProbe>,
    ttl: Duration,
    probe_timeout: Duration,
}

impl ServiceRegistry {
    /// Create a registry over `services`.
    pub fn new(
        services: &ServiceTable,
        settings: &RegistrySettings,
        probe: Arc<dyn HealthProbe>,
    ) -> Self {
        let routes = services
            .iter()
            .map(|(name, url)| (name.clone(), Arc::new(RouteEntry::new(name, url))))
            .collect();

        Self {
            routes,
            probe,
            ttl: settings.health_check_interval,
            probe_timeout: settings.probe_timeout,
        }
    }

    /// Look up a service.
    pub fn resolve(&self, name: &str) -> Result<&RouteEntry, Rejection> {
        self.routes
            .get(name)
            .map(|entry| &**entry)
            .ok_or_else(|| Rejection::route_not_found(name))
    }

    /// Registered service names, sorted.
    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.routes.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Cached availability of a service. Unknown names are unavailable.
    pub async fn is_available(&self, name: &str) -> bool {
        let Some(entry) = self.routes.get(name) else {
            return false;
        };

        if let Some(available) = entry.fresh(self.ttl) {
            return available;
        }

        if let Ok(_guard) = entry.probe_guard.try_lock() {
            // Another probe may have finished between the check and the lock.
            if let Some(available) = entry.fresh(self.ttl) {
                return available;
            }
            return self.probe_and_store(entry).await;
        }

        // A probe is in flight.
        if let Some(stale) = entry.cached() {
            return stale;
        }

        let _guard = entry.probe_guard.lock().await;
        match entry.cached() {
            Some(available) => available,
            // The prober was cancelled before recording a result.
            None => self.probe_and_store(entry).await,
        }
    }

    /// Live health of `url`, bypassing the cache.
    pub async fn health_of(&self, url: &str) -> bool {
        tokio::time::timeout(self.probe_timeout, self.probe.probe(url))
            .await
            .unwrap_or(false)
    }

    /// Live health of every service, probed concurrently.
    pub async fn probe_all(&self) -> Vec<(String, bool)> {
        let names = self.service_names();
        let checks = names.iter().map(|name| async move {
            let healthy = match self.routes.get(*name) {
                Some(entry) => self.health_of(entry.base_url()).await,
                None => false,
            };
            ((*name).to_string(), healthy)
        });
        join_all(checks).await
    }

    /// Cached availability and live health of every service.
    pub async fn statuses(&self) -> Vec<ServiceStatus> {
        let names = self.service_names();
        let checks = names.iter().map(|name| async move {
            let url = self
                .routes
                .get(*name)
                .map(|e| e.base_url().to_string())
                .unwrap_or_default();
            let (available, healthy) =
                tokio::join!(self.is_available(name), self.health_of(&url));
            ServiceStatus {
                name: (*name).to_string(),
                url,
                available,
                healthy,
            }
        });
        join_all(checks).await
    }

    async fn probe_and_store(&self, entry: &RouteEntry) -> bool {
        let available = self.health_of(entry.base_url()).await;
        if entry.cached() != Some(available) {
            if available {
                debug!(service = entry.name(), "backend available");
            } else {
                warn!(service = entry.name(), url = entry.base_url(), "backend unavailable");
            }
        }
        entry.store(available);
        available
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.service_names())
            .field("ttl", &self.ttl)
            .field("probe_timeout", &self.probe_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Health flag that tests flip, with a probe counter.
    struct FlagProbe {
        healthy: AtomicBool,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl FlagProbe {
        fn new(healthy: bool) -> Arc<Self> {
            Self::slow(healthy, Duration::ZERO)
        }

        fn slow(healthy: bool, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                healthy: AtomicBool::new(healthy),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl HealthProbe for FlagProbe {
        fn probe<'a>(&'a self, _base_url: &'a str) -> BoxFuture<'a, bool> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.healthy.load(Ordering::SeqCst)
            })
        }
    }

    fn services() -> ServiceTable {
        [("data", "http://data:8002"), ("auth", "http://auth:8001")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn registry(probe: Arc<FlagProbe>) -> ServiceRegistry {
        ServiceRegistry::new(&services(), &RegistrySettings::default(), probe)
    }

    #[test]
    fn test_resolve() {
        let registry = registry(FlagProbe::new(true));
        assert_eq!(registry.resolve("data").unwrap().base_url(), "http://data:8002");

        let err = registry.resolve("payments").unwrap_err();
        assert_eq!(err.status(), http::StatusCode::NOT_FOUND);
        assert_eq!(registry.service_names(), vec!["auth", "data"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unknown_name_is_unavailable() {
        let probe = FlagProbe::new(true);
        let registry = registry(probe.clone());
        assert!(!registry.is_available("payments").await);
        assert_eq!(probe.calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_within_ttl_despite_backend_change() {
        let probe = FlagProbe::new(true);
        let registry = registry(probe.clone());

        assert!(registry.is_available("data").await);
        probe.healthy.store(false, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(29)).await;
        assert!(registry.is_available("data").await);
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reprobe_after_ttl() {
        let probe = FlagProbe::new(true);
        let registry = registry(probe.clone());

        assert!(registry.is_available("data").await);
        probe.healthy.store(false, Ordering::SeqCst);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(!registry.is_available("data").await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_timeout_is_bounded() {
        let probe = FlagProbe::slow(true, Duration::from_secs(60));
        let registry = registry(probe);

        let start = Instant::now();
        assert!(!registry.is_available("data").await);
        assert!(start.elapsed() <= Duration::from_secs(5) + Duration::from_millis(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_probe() {
        let probe = FlagProbe::slow(true, Duration::from_secs(1));
        let registry = Arc::new(registry(probe.clone()));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.is_available("data").await })
            })
            .collect();

        for handle in handles {
            assert!(handle.await.unwrap());
        }
        assert_eq!(probe.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_value_served_during_probe() {
        let probe = FlagProbe::slow(true, Duration::from_secs(2));
        let registry = Arc::new(registry(probe.clone()));

        assert!(registry.is_available("data").await);
        tokio::time::advance(Duration::from_secs(31)).await;
        probe.healthy.store(false, Ordering::SeqCst);

        let prober = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.is_available("data").await })
        };
        while probe.calls() < 2 {
            tokio::task::yield_now().await;
        }

        // The refresh is in flight; the stale value answers immediately.
        let start = Instant::now();
        assert!(registry.is_available("data").await);
        assert_eq!(start.elapsed(), Duration::ZERO);

        assert!(!prober.await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_health_of_is_uncached() {
        let probe = FlagProbe::new(true);
        let registry = registry(probe.clone());

        assert!(registry.health_of("http://data:8002").await);
        assert!(registry.health_of("http://data:8002").await);
        assert_eq!(probe.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_statuses() {
        let registry = registry(FlagProbe::new(true));
        let statuses = registry.statuses().await;
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].name, "auth");
        assert!(statuses.iter().all(|s| s.available && s.healthy));

        let all = registry.probe_all().await;
        assert_eq!(all, vec![("auth".to_string(), true), ("data".to_string(), true)]);
    }
}
