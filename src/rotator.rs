//! Rotating hand-out of validated proxies.
//!
//! The rotator serves every entry of its working list exactly once per
//! cycle, in the pool's current filtered and sorted order. When the cycle
//! completes (or a stale entry is about to be served) it re-validates the
//! pool, drops everything that is no longer alive, and starts a fresh
//! cycle.

use crate::config::SortKey;
use crate::error::Error;
use crate::pool::{PoolQuery, ProxyPool};
use crate::proxy::{ProxyKey, ValidatedProxy};
use crate::validator::Validator;
use log::{debug, info};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotatorState {
    /// A working list is built and entries remain to be served.
    Ready,
    /// Every entry of the current working list has been served.
    Exhausted,
    /// A re-validation pass is in progress.
    Refreshing,
    /// The pool has nothing to offer.
    Empty,
}

/// Tracks the current cycle: the ordered working list and the keys already
/// served from it.
#[derive(Debug, Default)]
struct RotationCursor {
    order: Vec<ProxyKey>,
    served: HashSet<ProxyKey>,
}

impl RotationCursor {
    fn reset(&mut self, order: Vec<ProxyKey>) {
        self.order = order;
        self.served.clear();
    }

    fn next_unserved(&self) -> Option<ProxyKey> {
        self.order
            .iter()
            .find(|key| !self.served.contains(*key))
            .cloned()
    }

    fn mark_served(&mut self, key: ProxyKey) {
        self.served.insert(key);
    }

    fn cycle_complete(&self) -> bool {
        self.order.iter().all(|key| self.served.contains(key))
    }
}

pub struct Rotator {
    pool: Arc<ProxyPool>,
    validator: Validator,
    query: PoolQuery,
    freshness: Duration,
    cursor: RotationCursor,
    state: RotatorState,
}

impl Rotator {
    pub fn new(
        pool: Arc<ProxyPool>,
        validator: Validator,
        query: PoolQuery,
        freshness: Duration,
    ) -> Self {
        let mut rotator = Self {
            pool,
            validator,
            query,
            freshness,
            cursor: RotationCursor::default(),
            state: RotatorState::Empty,
        };
        rotator.rebuild();
        rotator
    }

    pub fn state(&self) -> RotatorState {
        self.state
    }

    /// Rebuild the working list from the pool under the current criteria
    /// and restart the cycle.
    pub fn rebuild(&mut self) {
        let order: Vec<ProxyKey> = self
            .pool
            .query(&self.query)
            .into_iter()
            .map(|p| p.key)
            .collect();
        self.state = if order.is_empty() {
            RotatorState::Empty
        } else {
            RotatorState::Ready
        };
        self.cursor.reset(order);
    }

    /// Change the sort criterion. The working list is rebuilt and rotation
    /// restarts under the new order.
    pub fn set_sort(&mut self, sort: SortKey) {
        self.query.sort = sort;
        self.rebuild();
    }

    /// Replace the filter/sort criteria wholesale and restart rotation.
    pub fn set_query(&mut self, query: PoolQuery) {
        self.query = query;
        self.rebuild();
    }

    /// Serve the next proxy in rotation order.
    ///
    /// Returns `Error::PoolEmpty` when there is nothing to serve, instead
    /// of blocking.
    pub async fn next(&mut self) -> Result<ValidatedProxy, Error> {
        if self.state == RotatorState::Empty {
            // The pool may have been refilled since the last rebuild.
            self.rebuild();
        }
        let mut refreshed = false;
        loop {
            match self.state {
                RotatorState::Empty => return Err(Error::PoolEmpty),
                RotatorState::Exhausted | RotatorState::Refreshing => {
                    if refreshed {
                        return Err(Error::PoolEmpty);
                    }
                    self.refresh().await;
                    refreshed = true;
                }
                RotatorState::Ready => {
                    let Some(key) = self.cursor.next_unserved() else {
                        self.state = RotatorState::Exhausted;
                        continue;
                    };
                    let Some(proxy) = self.pool.get(&key) else {
                        // Removed from the pool since the list was built;
                        // drop it from this cycle.
                        self.cursor.mark_served(key);
                        if self.cursor.cycle_complete() {
                            self.state = RotatorState::Exhausted;
                        }
                        continue;
                    };
                    if !refreshed && proxy.is_stale(self.freshness) {
                        debug!("{} is stale; re-validating pool before serving", proxy.key);
                        self.refresh().await;
                        refreshed = true;
                        continue;
                    }
                    self.pool.mark_exhausted(&key);
                    self.cursor.mark_served(key);
                    if self.cursor.cycle_complete() {
                        self.state = RotatorState::Exhausted;
                    }
                    return Ok(proxy);
                }
            }
        }
    }

    /// Re-validate everything in the pool, permanently dropping entries
    /// that are no longer alive, then start a fresh cycle.
    async fn refresh(&mut self) {
        self.state = RotatorState::Refreshing;
        let entries = self.pool.snapshot();
        info!("re-validating {} pooled proxies", entries.len());

        let candidates = entries.iter().map(ValidatedProxy::to_candidate).collect();
        let results = self.validator.validate(candidates).await;
        for result in results {
            match ValidatedProxy::from_result(&result) {
                Some(proxy) => self.pool.upsert(proxy),
                None => {
                    debug!(
                        "dropping {} after failed re-validation ({:?})",
                        result.candidate,
                        result.verdict
                    );
                    self.pool.remove(&result.candidate.key());
                }
            }
        }
        self.rebuild();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FinderConfig;
    use crate::proxy::{Anonymity, ProxyCandidate, ValidationResult};
    use crate::validator::{ProbeOutcome, Prober};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Alive with a per-address latency unless the address is marked dead.
    struct PoolProber {
        dead: Mutex<HashSet<String>>,
        latencies: Mutex<std::collections::HashMap<String, u64>>,
    }

    impl PoolProber {
        fn new() -> Self {
            Self {
                dead: Mutex::new(HashSet::new()),
                latencies: Mutex::new(std::collections::HashMap::new()),
            }
        }

        fn kill(&self, address: &str) {
            self.dead.lock().insert(address.to_string());
        }
    }

    #[async_trait]
    impl Prober for PoolProber {
        async fn probe(&self, candidate: &ProxyCandidate, _timeout: Duration) -> ProbeOutcome {
            if self.dead.lock().contains(&candidate.address) {
                return ProbeOutcome::Dead;
            }
            let latency_ms = self
                .latencies
                .lock()
                .get(&candidate.address)
                .copied()
                .unwrap_or(100);
            ProbeOutcome::Alive {
                latency_ms,
                anonymity: Anonymity::Elite,
            }
        }
    }

    fn proxy(address: &str, latency_ms: u64) -> ValidatedProxy {
        ValidatedProxy::from_result(&ValidationResult::alive(
            ProxyCandidate::new(address, 8080).with_country("US"),
            latency_ms,
            Anonymity::Elite,
        ))
        .unwrap()
    }

    fn setup(entries: &[(&str, u64)]) -> (Arc<ProxyPool>, Arc<PoolProber>, Rotator) {
        let pool = Arc::new(ProxyPool::new());
        let prober = Arc::new(PoolProber::new());
        for (address, latency) in entries {
            pool.upsert(proxy(address, *latency));
            prober
                .latencies
                .lock()
                .insert(address.to_string(), *latency);
        }
        let config = FinderConfig::builder().build().unwrap();
        let validator =
            Validator::with_prober(&config, Arc::clone(&prober) as Arc<dyn Prober>);
        let query = PoolQuery {
            sort: SortKey::Speed,
            ..PoolQuery::default()
        };
        let rotator = Rotator::new(
            Arc::clone(&pool),
            validator,
            query,
            Duration::from_secs(3600),
        );
        (pool, prober, rotator)
    }

    #[tokio::test]
    async fn serves_each_proxy_exactly_once_per_cycle() {
        let (_pool, _prober, mut rotator) =
            setup(&[("1.1.1.1", 300), ("2.2.2.2", 100), ("3.3.3.3", 200)]);

        let mut served = Vec::new();
        for _ in 0..3 {
            served.push(rotator.next().await.unwrap().key.address);
        }
        // Ascending latency order, no repeats.
        assert_eq!(served, vec!["2.2.2.2", "3.3.3.3", "1.1.1.1"]);
        assert_eq!(rotator.state(), RotatorState::Exhausted);
    }

    #[tokio::test]
    async fn exhaustion_triggers_refresh_and_a_new_cycle() {
        let (pool, _prober, mut rotator) = setup(&[("1.1.1.1", 100), ("2.2.2.2", 200)]);

        for _ in 0..2 {
            rotator.next().await.unwrap();
        }
        // Further calls roll into a second cycle after a refresh.
        let first_of_new_cycle = rotator.next().await.unwrap();
        assert_eq!(first_of_new_cycle.key.address, "1.1.1.1");
        let second = rotator.next().await.unwrap();
        assert_eq!(second.key.address, "2.2.2.2");
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn dead_proxies_never_reappear() {
        let (pool, prober, mut rotator) = setup(&[("1.1.1.1", 100), ("2.2.2.2", 200)]);

        for _ in 0..2 {
            rotator.next().await.unwrap();
        }
        prober.kill("1.1.1.1");

        // The refresh on the next call drops the dead proxy permanently.
        for _ in 0..4 {
            let served = rotator.next().await.unwrap();
            assert_eq!(served.key.address, "2.2.2.2");
        }
        assert_eq!(pool.len(), 1);
    }

    #[tokio::test]
    async fn empty_pool_signals_instead_of_blocking() {
        let (_pool, _prober, mut rotator) = setup(&[]);
        assert_eq!(rotator.state(), RotatorState::Empty);
        assert!(matches!(rotator.next().await, Err(Error::PoolEmpty)));
    }

    #[tokio::test]
    async fn all_dead_on_refresh_ends_with_pool_empty() {
        let (pool, prober, mut rotator) = setup(&[("1.1.1.1", 100)]);
        rotator.next().await.unwrap();
        prober.kill("1.1.1.1");

        assert!(matches!(rotator.next().await, Err(Error::PoolEmpty)));
        assert!(pool.is_empty());
        assert_eq!(rotator.state(), RotatorState::Empty);
    }

    #[tokio::test]
    async fn changing_sort_restarts_the_cycle_under_the_new_order() {
        let (_pool, _prober, mut rotator) =
            setup(&[("1.1.1.1", 300), ("2.2.2.2", 100), ("3.3.3.3", 200)]);

        // Serve one under speed order, then switch to insertion order.
        assert_eq!(rotator.next().await.unwrap().key.address, "2.2.2.2");
        rotator.set_sort(SortKey::None);

        let mut served = Vec::new();
        for _ in 0..3 {
            served.push(rotator.next().await.unwrap().key.address);
        }
        // The served-set was reset: 2.2.2.2 comes around again.
        assert_eq!(served, vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]);
    }

    #[tokio::test]
    async fn stale_entries_are_revalidated_before_serving() {
        let (pool, _prober, mut rotator) = setup(&[("1.1.1.1", 100)]);

        let mut aged = pool.snapshot().remove(0);
        aged.last_checked_at = chrono::Utc::now() - chrono::Duration::hours(5);
        pool.upsert(aged);

        let served = rotator.next().await.unwrap();
        assert_eq!(served.key.address, "1.1.1.1");
        // The refresh stamped a new check time.
        assert!(!served.is_stale(Duration::from_secs(3600)));
    }

    #[tokio::test]
    async fn pool_refilled_after_empty_is_picked_up() {
        let (pool, _prober, mut rotator) = setup(&[]);
        assert!(matches!(rotator.next().await, Err(Error::PoolEmpty)));

        pool.upsert(proxy("9.9.9.9", 50));
        let served = rotator.next().await.unwrap();
        assert_eq!(served.key.address, "9.9.9.9");
    }
}
