//! Top-level orchestration: fetch, validate, pool, rotate, deliver.

use crate::config::{FinderConfig, SortKey};
use crate::error::{Error, Result};
use crate::fallback::CountryFallback;
use crate::pool::{PoolQuery, ProxyPool};
use crate::proxy::{ProbeTally, ValidatedProxy};
use crate::rotator::{Rotator, RotatorState};
use crate::sink::{CountryCount, ResultSink, RunReport};
use crate::source::Sources;
use crate::validator::Validator;
use log::info;
use std::sync::Arc;
use std::time::Instant;

/// Owns one run's pool, validator and rotator, and drives the lifecycle
/// against the configured sources.
pub struct ProxyFinder {
    config: FinderConfig,
    sources: Sources,
    pool: Arc<ProxyPool>,
    validator: Validator,
    rotator: Rotator,
}

impl ProxyFinder {
    pub fn new(config: FinderConfig, sources: Sources) -> Self {
        let validator = Validator::new(&config);
        Self::with_validator(config, sources, validator)
    }

    /// Use a pre-built validator (e.g. one with a custom prober).
    pub fn with_validator(config: FinderConfig, sources: Sources, validator: Validator) -> Self {
        let pool = Arc::new(ProxyPool::new());
        let rotator = Rotator::new(
            Arc::clone(&pool),
            validator.clone(),
            Self::query_spec(&config),
            config.freshness,
        );
        Self {
            config,
            sources,
            pool,
            validator,
            rotator,
        }
    }

    fn query_spec(config: &FinderConfig) -> PoolQuery {
        PoolQuery {
            countries: config.countries.clone(),
            anonymity: config.anonymity,
            sort: config.sort,
        }
    }

    /// Fetch and validate until the per-country quotas are met or the
    /// fallback plan is exhausted, then restart rotation over the result.
    ///
    /// A shortfall is reported in the returned counts, never as an error;
    /// the only fatal conditions are an empty source registry and caller
    /// misconfiguration.
    pub async fn refresh(&mut self) -> Result<RunReport> {
        if self.sources.is_empty() {
            return Err(Error::NoSources);
        }
        let started = Instant::now();
        self.pool.mark_stale(self.config.freshness);

        let fallback =
            CountryFallback::new(&self.config, &self.sources, &self.validator, &self.pool);
        let mut countries = Vec::new();
        let mut tally = ProbeTally::default();
        let mut first_failure: Option<(String, String)> = None;

        if self.config.countries.is_empty() {
            let outcome = fallback.acquire(None, self.config.count).await;
            tally.merge(&outcome.tally);
            first_failure = outcome.failed_sources.into_iter().next();
            countries.push(CountryCount {
                country: None,
                requested: outcome.requested,
                found: outcome.found,
            });
        } else {
            // One requested country at a time; a scarce country cannot
            // block delivery for the others.
            let requested: Vec<String> = self.config.countries.clone();
            for country in &requested {
                let outcome = fallback.acquire(Some(country), self.config.count).await;
                tally.merge(&outcome.tally);
                if first_failure.is_none() {
                    first_failure = outcome.failed_sources.into_iter().next();
                }
                countries.push(CountryCount {
                    country: outcome.country,
                    requested: outcome.requested,
                    found: outcome.found,
                });
            }
        }

        // Per-source failures are absorbed as long as anything produced
        // data; nothing fetched, nothing pooled and a transport failure
        // means there was no data source at all this run.
        if tally.total() == 0 && self.pool.is_empty() {
            if let Some((name, reason)) = first_failure {
                return Err(Error::SourceUnavailable { name, reason });
            }
        }

        self.rotator.rebuild();
        let report = RunReport {
            requested: self.config.count,
            elapsed: started.elapsed(),
            countries,
            tally,
        };
        info!(
            "refresh finished in {:.1}s: {} in pool ({})",
            report.elapsed.as_secs_f64(),
            self.pool.len(),
            report.tally
        );
        Ok(report)
    }

    /// The current selection: filtered and sorted per the configuration,
    /// truncated to the requested count.
    pub fn results(&self) -> Vec<ValidatedProxy> {
        let mut proxies = self.pool.query(&Self::query_spec(&self.config));
        proxies.truncate(self.config.count);
        proxies
    }

    /// Hand the current selection and the run metadata to a sink.
    pub fn deliver<S: ResultSink>(&self, sink: &mut S, report: &RunReport) {
        sink.deliver(&self.results(), report);
    }

    /// Serve the next proxy in rotation.
    pub async fn next(&mut self) -> Result<ValidatedProxy> {
        self.rotator.next().await
    }

    /// Change the sort criterion; rotation restarts under the new order.
    pub fn set_sort(&mut self, sort: SortKey) {
        self.config.sort = sort;
        self.rotator.set_sort(sort);
    }

    pub fn pool(&self) -> &ProxyPool {
        &self.pool
    }

    pub fn rotator_state(&self) -> RotatorState {
        self.rotator.state()
    }

    pub fn config(&self) -> &FinderConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Anonymity, ProxyCandidate};
    use crate::source::StaticSource;
    use crate::validator::{ProbeOutcome, Prober};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Alive with scripted latencies; everything else is dead.
    struct LatencyProber {
        latencies: HashMap<String, u64>,
    }

    impl LatencyProber {
        fn new(latencies: &[(&str, u64)]) -> Self {
            Self {
                latencies: latencies
                    .iter()
                    .map(|(a, l)| (a.to_string(), *l))
                    .collect(),
            }
        }
    }

    #[async_trait]
    impl Prober for LatencyProber {
        async fn probe(&self, candidate: &ProxyCandidate, _timeout: Duration) -> ProbeOutcome {
            match self.latencies.get(&candidate.address) {
                Some(latency_ms) => ProbeOutcome::Alive {
                    latency_ms: *latency_ms,
                    anonymity: Anonymity::Elite,
                },
                None => ProbeOutcome::Dead,
            }
        }
    }

    fn us_candidates(n: usize) -> Vec<ProxyCandidate> {
        (0..n)
            .map(|i| ProxyCandidate::new(format!("10.0.0.{i}"), 8080).with_country("US"))
            .collect()
    }

    fn finder_with(
        config: FinderConfig,
        sources: Sources,
        prober: LatencyProber,
    ) -> ProxyFinder {
        let validator = Validator::with_prober(&config, Arc::new(prober));
        ProxyFinder::with_validator(config, sources, validator)
    }

    #[tokio::test]
    async fn refresh_without_sources_is_fatal() {
        let config = FinderConfig::builder().build().unwrap();
        let mut finder = finder_with(config, Sources::new(), LatencyProber::new(&[]));
        assert!(matches!(finder.refresh().await, Err(Error::NoSources)));
    }

    /// Always fails at the transport level.
    struct BrokenSource;

    #[async_trait]
    impl crate::source::CandidateSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        async fn fetch(
            &self,
            _country: Option<&str>,
            _count_hint: usize,
        ) -> std::result::Result<Vec<ProxyCandidate>, crate::error::SourceError> {
            Err(crate::error::SourceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )))
        }
    }

    #[tokio::test]
    async fn all_sources_failing_with_no_data_is_fatal() {
        let config = FinderConfig::builder().build().unwrap();
        let sources = Sources::new().with_primary(BrokenSource);
        let mut finder = finder_with(config, sources, LatencyProber::new(&[]));

        match finder.refresh().await {
            Err(Error::SourceUnavailable { name, .. }) => assert_eq!(name, "broken"),
            other => panic!("expected SourceUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failing_source_is_absorbed_when_another_delivers() {
        let config = FinderConfig::builder().count(1).build().unwrap();
        let sources = Sources::new()
            .with_primary(BrokenSource)
            .with_primary(StaticSource::new(
                "good",
                vec![ProxyCandidate::new("10.0.0.0", 8080)],
            ));
        let mut finder = finder_with(config, sources, LatencyProber::new(&[("10.0.0.0", 90)]));

        let report = finder.refresh().await.unwrap();
        assert_eq!(report.total_found(), 1);
    }

    #[tokio::test]
    async fn five_fastest_of_twelve_alive() {
        // 20 candidates fetched, 12 alive: the selection is the 5 fastest,
        // and rotation serves exactly those 5, ascending by latency.
        let alive: Vec<(String, u64)> = (0..12)
            .map(|i| (format!("10.0.0.{i}"), 1000 - (i as u64) * 50))
            .collect();
        let alive_refs: Vec<(&str, u64)> =
            alive.iter().map(|(a, l)| (a.as_str(), *l)).collect();

        let config = FinderConfig::builder()
            .count(5)
            .countries(vec!["US"])
            .sort(SortKey::Speed)
            .build()
            .unwrap();
        let sources =
            Sources::new().with_primary(StaticSource::new("primary", us_candidates(20)));
        let mut finder = finder_with(config, sources, LatencyProber::new(&alive_refs));

        let report = finder.refresh().await.unwrap();
        assert_eq!(report.tally.alive, 12);
        assert_eq!(report.tally.dead, 8);
        assert_eq!(report.countries[0].found, 12);

        let results = finder.results();
        assert_eq!(results.len(), 5);
        let latencies: Vec<u64> = results.iter().map(|p| p.latency_ms).collect();
        assert_eq!(latencies, vec![450, 500, 550, 600, 650]);

        let mut served = Vec::new();
        for _ in 0..5 {
            served.push(finder.next().await.unwrap().latency_ms);
        }
        assert_eq!(served, latencies);
    }

    #[tokio::test]
    async fn scarce_country_reports_shortfall() {
        let config = FinderConfig::builder()
            .count(3)
            .countries(vec!["SA"])
            .build()
            .unwrap();
        let sources = Sources::new().with_primary(StaticSource::new(
            "primary",
            vec![
                ProxyCandidate::new("5.0.0.1", 8080).with_country("SA"),
                ProxyCandidate::new("5.0.0.2", 8080).with_country("SA"),
            ],
        ));
        // Only one of the two SA candidates is reachable.
        let mut finder = finder_with(config, sources, LatencyProber::new(&[("5.0.0.1", 200)]));

        let report = finder.refresh().await.unwrap();
        assert!(report.has_shortfall());
        assert_eq!(report.countries[0].country.as_deref(), Some("SA"));
        assert_eq!(report.countries[0].found, 1);
        assert_eq!(report.countries[0].requested, 3);
        assert_eq!(finder.results().len(), 1);
    }

    #[tokio::test]
    async fn one_scarce_country_does_not_block_another() {
        let config = FinderConfig::builder()
            .count(2)
            .countries(vec!["SA", "US"])
            .build()
            .unwrap();
        let sources = Sources::new().with_primary(StaticSource::new(
            "primary",
            vec![
                ProxyCandidate::new("10.0.0.0", 8080).with_country("US"),
                ProxyCandidate::new("10.0.0.1", 8080).with_country("US"),
            ],
        ));
        let mut finder = finder_with(
            config,
            sources,
            LatencyProber::new(&[("10.0.0.0", 100), ("10.0.0.1", 150)]),
        );

        let report = finder.refresh().await.unwrap();
        let by_country: HashMap<Option<String>, usize> = report
            .countries
            .iter()
            .map(|c| (c.country.clone(), c.found))
            .collect();
        assert_eq!(by_country[&Some("SA".to_string())], 0);
        assert_eq!(by_country[&Some("US".to_string())], 2);
    }

    #[tokio::test]
    async fn set_sort_reorders_results_and_rotation() {
        let config = FinderConfig::builder()
            .count(3)
            .sort(SortKey::Speed)
            .build()
            .unwrap();
        let sources = Sources::new().with_primary(StaticSource::new(
            "primary",
            vec![
                ProxyCandidate::new("1.1.1.1", 8080).with_country("US"),
                ProxyCandidate::new("2.2.2.2", 8080).with_country("GB"),
                ProxyCandidate::new("3.3.3.3", 8080).with_country("DE"),
            ],
        ));
        let mut finder = finder_with(
            config,
            sources,
            LatencyProber::new(&[("1.1.1.1", 300), ("2.2.2.2", 100), ("3.3.3.3", 200)]),
        );
        finder.refresh().await.unwrap();

        let speeds: Vec<u64> = finder.results().iter().map(|p| p.latency_ms).collect();
        assert_eq!(speeds, vec![100, 200, 300]);

        finder.set_sort(SortKey::Country);
        let countries: Vec<Option<String>> = finder
            .results()
            .iter()
            .map(|p| p.country.clone())
            .collect();
        assert_eq!(
            countries,
            vec![
                Some("DE".to_string()),
                Some("GB".to_string()),
                Some("US".to_string())
            ]
        );
        let first = finder.next().await.unwrap();
        assert_eq!(first.country.as_deref(), Some("DE"));
    }
}
