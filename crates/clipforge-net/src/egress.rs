//! Admin-API-backed pool of outbound egress identities used by the platform-id fetcher.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use clipforge_core::{EgressIdentity, EgressPool, sort_identities};
use reqwest::Client;
use serde::Deserialize;

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);
const HEADER_INTERNAL_SECRET: &str = "x-internal-secret";

/// Identities used when the admin API is unreachable. Never reported on, per
/// the `hardcoded-` id prefix convention in [`clipforge_core::EgressIdentity::is_fallback`].
pub const HARDCODED_FALLBACK_IDENTITIES: &[(&str, &str)] = &[
    ("hardcoded-direct", ""),
    ("hardcoded-backup-1", "http://127.0.0.1:0"),
];

#[derive(Debug, Deserialize)]
struct AdminProxyRow {
    id: String,
    url: String,
    priority: i32,
    #[serde(rename = "successRate")]
    success_rate: f64,
}

struct CachedList {
    identities: Vec<EgressIdentity>,
    fetched_at: Option<Instant>,
}

#[derive(Default)]
struct LocalHealth {
    successes: u64,
    attempts: u64,
}

/// Egress identity pool that fetches its list from an internal admin endpoint,
/// caches it for [`CACHE_TTL`], and falls back to a hardcoded list when the
/// admin API is unreachable.
///
/// `report_result` observations are tracked locally and blended into the
/// sort order until the next successful admin refresh overwrites them with
/// server-reported truth.
pub struct AdminEgressPool {
    client: Client,
    admin_base: String,
    internal_secret: String,
    cache: Mutex<CachedList>,
    local_health: Mutex<HashMap<String, LocalHealth>>,
}

impl AdminEgressPool {
    /// Construct a pool against `admin_base` (e.g. `https://admin.internal`),
    /// authenticating with `internal_secret`.
    #[must_use]
    pub fn new(admin_base: impl Into<String>, internal_secret: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            admin_base: admin_base.into(),
            internal_secret: internal_secret.into(),
            cache: Mutex::new(CachedList {
                identities: fallback_identities(),
                fetched_at: None,
            }),
            local_health: Mutex::new(HashMap::new()),
        }
    }

    async fn refresh(&self) -> Option<Vec<EgressIdentity>> {
        let url = format!("{}/api/internal/proxies", self.admin_base.trim_end_matches('/'));
        let response = self
            .client
            .get(url)
            .header(HEADER_INTERNAL_SECRET, &self.internal_secret)
            .send()
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "egress identity admin fetch failed"))
            .ok()?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "egress identity admin returned non-2xx");
            return None;
        }

        let rows = response
            .json::<Vec<AdminProxyRow>>()
            .await
            .inspect_err(|err| tracing::warn!(error = %err, "egress identity admin body undecodable"))
            .ok()?;

        Some(
            rows.into_iter()
                .map(|row| EgressIdentity {
                    id: row.id,
                    url: row.url,
                    priority: row.priority,
                    success_rate: row.success_rate,
                })
                .collect(),
        )
    }

    fn apply_local_health(&self, identities: &mut [EgressIdentity]) {
        let health = self.local_health.lock().expect("lock poisoned");
        for identity in identities.iter_mut() {
            if identity.is_fallback() {
                continue;
            }
            if let Some(observed) = health.get(&identity.id) {
                if observed.attempts > 0 {
                    #[allow(clippy::cast_precision_loss)]
                    let rate = observed.successes as f64 / observed.attempts as f64;
                    identity.success_rate = rate;
                }
            }
        }
    }
}

fn fallback_identities() -> Vec<EgressIdentity> {
    HARDCODED_FALLBACK_IDENTITIES
        .iter()
        .enumerate()
        .map(|(index, (id, url))| EgressIdentity {
            id: (*id).to_string(),
            url: (*url).to_string(),
            #[allow(clippy::cast_possible_wrap)]
            priority: -(index as i32),
            success_rate: 1.0,
        })
        .collect()
}

#[async_trait]
impl EgressPool for AdminEgressPool {
    async fn list(&self) -> Vec<EgressIdentity> {
        let stale = {
            let cache = self.cache.lock().expect("lock poisoned");
            cache.fetched_at.is_none_or(|fetched_at| fetched_at.elapsed() >= CACHE_TTL)
        };

        if stale {
            if let Some(mut fresh) = self.refresh().await {
                sort_identities(&mut fresh);
                let mut cache = self.cache.lock().expect("lock poisoned");
                cache.identities = fresh;
                cache.fetched_at = Some(Instant::now());
            } else {
                let mut cache = self.cache.lock().expect("lock poisoned");
                if cache.fetched_at.is_none() {
                    cache.identities = fallback_identities();
                }
            }
        }

        let mut identities = {
            let cache = self.cache.lock().expect("lock poisoned");
            cache.identities.clone()
        };
        self.apply_local_health(&mut identities);
        sort_identities(&mut identities);
        identities
    }

    async fn report_result(&self, identity_url: &str, success: bool, _response_ms: Option<u64>) {
        let id = {
            let cache = self.cache.lock().expect("lock poisoned");
            cache
                .identities
                .iter()
                .find(|identity| identity.url == identity_url)
                .map(|identity| identity.id.clone())
        };

        let Some(id) = id else {
            return;
        };
        if id.starts_with("hardcoded-") {
            return;
        }

        let mut health = self.local_health.lock().expect("lock poisoned");
        let entry = health.entry(id).or_default();
        entry.attempts += 1;
        if success {
            entry.successes += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::MockServer;
    use httpmock::prelude::*;

    #[test]
    fn fallback_identities_are_all_hardcoded_prefixed() {
        for identity in fallback_identities() {
            assert!(identity.is_fallback());
        }
    }

    #[tokio::test]
    async fn list_falls_back_when_admin_unreachable() {
        let pool = AdminEgressPool::new("http://127.0.0.1:0", "secret");
        let identities = pool.list().await;
        assert!(!identities.is_empty());
        assert!(identities.iter().all(EgressIdentity::is_fallback));
    }

    #[tokio::test]
    async fn list_fetches_and_sorts_from_admin_api() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/api/internal/proxies")
                    .header(HEADER_INTERNAL_SECRET, "secret");
                then.status(200).json_body(serde_json::json!([
                    {"id": "id-low", "url": "http://a", "host": "a", "port": 80, "username": "", "password": "", "type": "http", "status": "up", "priority": 1, "successRate": 0.5},
                    {"id": "id-high", "url": "http://b", "host": "b", "port": 80, "username": "", "password": "", "type": "http", "status": "up", "priority": 5, "successRate": 0.9},
                ]));
            })
            .await;

        let pool = AdminEgressPool::new(server.base_url(), "secret");
        let identities = pool.list().await;
        assert_eq!(identities.len(), 2);
        assert_eq!(identities[0].id, "id-high");
    }

    #[tokio::test]
    async fn report_result_is_dropped_for_fallback_identities() {
        let pool = AdminEgressPool::new("http://127.0.0.1:0", "secret");
        pool.report_result("", true, Some(10)).await;
        assert!(pool.local_health.lock().expect("lock poisoned").is_empty());
    }
}
