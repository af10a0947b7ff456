//! Core proxy pool implementation.

use crate::config::SortKey;
use crate::proxy::{Anonymity, ProxyKey, ProxyStatus, ValidatedProxy};
use log::debug;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::time::Duration;

/// Filter and sort criteria for pool queries.
#[derive(Debug, Clone, Default)]
pub struct PoolQuery {
    /// Country codes to keep; empty means no country filter.
    pub countries: Vec<String>,
    /// Minimum anonymity level: entries at least this anonymous are kept.
    pub anonymity: Option<Anonymity>,
    pub sort: SortKey,
}

impl PoolQuery {
    /// Match everything, insertion order.
    pub fn any() -> Self {
        Self {
            sort: SortKey::None,
            ..Self::default()
        }
    }

    pub fn matches(&self, proxy: &ValidatedProxy) -> bool {
        if !self.countries.is_empty() {
            match proxy.country.as_deref() {
                Some(code) => {
                    if !self.countries.iter().any(|c| c.eq_ignore_ascii_case(code)) {
                        return false;
                    }
                }
                None => return false,
            }
        }
        if let Some(min) = self.anonymity {
            if proxy.anonymity.rank() > min.rank() {
                return false;
            }
        }
        true
    }
}

/// The authoritative in-memory collection of validated proxies.
///
/// Entries keep their insertion order across updates, which is the stable
/// default ordering for queries and rotation.
pub struct ProxyPool {
    entries: RwLock<Vec<ValidatedProxy>>,
}

impl ProxyPool {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Insert the proxy, or update it in place if the key is already
    /// present, preserving its original position.
    pub fn upsert(&self, proxy: ValidatedProxy) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|p| p.key == proxy.key) {
            Some(existing) => *existing = proxy,
            None => entries.push(proxy),
        }
    }

    /// Delete the entry; a no-op if the key is absent.
    pub fn remove(&self, key: &ProxyKey) {
        self.entries.write().retain(|p| &p.key != key);
    }

    pub fn get(&self, key: &ProxyKey) -> Option<ValidatedProxy> {
        self.entries.read().iter().find(|p| &p.key == key).cloned()
    }

    /// All keys in insertion order.
    pub fn keys(&self) -> Vec<ProxyKey> {
        self.entries.read().iter().map(|p| p.key.clone()).collect()
    }

    /// All entries in insertion order.
    pub fn snapshot(&self) -> Vec<ValidatedProxy> {
        self.entries.read().clone()
    }

    /// Record that the rotator has handed this proxy out.
    pub fn mark_exhausted(&self, key: &ProxyKey) {
        let mut entries = self.entries.write();
        if let Some(proxy) = entries.iter_mut().find(|p| &p.key == key) {
            proxy.status = ProxyStatus::Exhausted;
        }
    }

    /// Mark entries whose last check predates the freshness window.
    /// Returns how many were marked.
    pub fn mark_stale(&self, freshness: Duration) -> usize {
        let mut entries = self.entries.write();
        let mut marked = 0;
        for proxy in entries.iter_mut() {
            if proxy.status != ProxyStatus::Stale && proxy.is_stale(freshness) {
                proxy.status = ProxyStatus::Stale;
                marked += 1;
            }
        }
        if marked > 0 {
            debug!("marked {marked} pool entries stale");
        }
        marked
    }

    pub fn count_matching(&self, query: &PoolQuery) -> usize {
        self.entries
            .read()
            .iter()
            .filter(|p| query.matches(p))
            .count()
    }

    /// Filtered, sorted view of the pool. Never mutates.
    pub fn query(&self, query: &PoolQuery) -> Vec<ValidatedProxy> {
        let entries = self.entries.read();
        let mut out: Vec<ValidatedProxy> = entries
            .iter()
            .filter(|p| query.matches(p))
            .cloned()
            .collect();
        drop(entries);

        match query.sort {
            SortKey::Speed => out.sort_by_key(|p| p.latency_ms),
            SortKey::Country => out.sort_by(|a, b| {
                cmp_country(a, b).then_with(|| a.latency_ms.cmp(&b.latency_ms))
            }),
            SortKey::Anonymity => out.sort_by(|a, b| {
                a.anonymity
                    .rank()
                    .cmp(&b.anonymity.rank())
                    .then_with(|| a.latency_ms.cmp(&b.latency_ms))
            }),
            SortKey::None => {}
        }
        out
    }
}

impl Default for ProxyPool {
    fn default() -> Self {
        Self::new()
    }
}

/// Known countries sort lexicographically; entries without one sort last.
fn cmp_country(a: &ValidatedProxy, b: &ValidatedProxy) -> Ordering {
    match (a.country.as_deref(), b.country.as_deref()) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}
