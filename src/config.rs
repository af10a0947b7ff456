//! Configuration for the proxy finder.

use crate::error::Error;
use crate::proxy::Anonymity;
use std::time::Duration;
use url::Url;

/// Per-probe timeouts are clamped to this ceiling, including the relaxed
/// timeouts used by the fallback strategy.
pub const HARD_TIMEOUT_CEILING: Duration = Duration::from_secs(20);

/// Sort order applied to pool queries and to the rotation working list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Ascending by measured latency.
    #[default]
    Speed,
    /// Lexicographic by country code, ties broken by latency.
    Country,
    /// Elite first, ties broken by latency.
    Anonymity,
    /// Preserve pool insertion order.
    None,
}

/// Configuration consumed by the core lifecycle.
#[derive(Debug, Clone)]
pub struct FinderConfig {
    /// Number of proxies requested per country (or overall without a filter).
    pub count: usize,
    /// Requested country codes; empty means no country filter.
    pub countries: Vec<String>,
    /// Minimum anonymity level, if any.
    pub anonymity: Option<Anonymity>,
    /// Per-probe connection timeout.
    pub probe_timeout: Duration,
    /// Global deadline for one validation batch.
    pub batch_deadline: Duration,
    /// Maximum number of probes in flight.
    pub concurrency: usize,
    /// Sort order for results and rotation.
    pub sort: SortKey,
    /// Extra secondary-source passes before relaxing the timeout.
    pub extra_passes: usize,
    /// Pool entries older than this are considered stale.
    pub freshness: Duration,
    /// Endpoint probed through each candidate; should echo request headers.
    pub judge_url: String,
}

impl FinderConfig {
    /// Create a new configuration builder.
    pub fn builder() -> FinderConfigBuilder {
        FinderConfigBuilder::new()
    }
}

/// Builder for `FinderConfig`.
pub struct FinderConfigBuilder {
    count: Option<usize>,
    countries: Vec<String>,
    anonymity: Option<Anonymity>,
    probe_timeout: Option<Duration>,
    batch_deadline: Option<Duration>,
    concurrency: Option<usize>,
    sort: Option<SortKey>,
    extra_passes: Option<usize>,
    freshness: Option<Duration>,
    judge_url: Option<String>,
}

impl FinderConfigBuilder {
    /// Create a new builder with default values.
    pub fn new() -> Self {
        Self {
            count: None,
            countries: Vec::new(),
            anonymity: None,
            probe_timeout: None,
            batch_deadline: None,
            concurrency: None,
            sort: None,
            extra_passes: None,
            freshness: None,
            judge_url: None,
        }
    }

    /// Set the number of proxies requested per country.
    pub fn count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Set the requested country codes.
    pub fn countries(mut self, countries: Vec<impl Into<String>>) -> Self {
        self.countries = countries.into_iter().map(Into::into).collect();
        self
    }

    /// Set the minimum anonymity level.
    pub fn anonymity(mut self, anonymity: Anonymity) -> Self {
        self.anonymity = Some(anonymity);
        self
    }

    /// Set the per-probe connection timeout.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = Some(timeout);
        self
    }

    /// Set the global deadline for a validation batch.
    pub fn batch_deadline(mut self, deadline: Duration) -> Self {
        self.batch_deadline = Some(deadline);
        self
    }

    /// Set the maximum number of probes in flight.
    pub fn concurrency(mut self, width: usize) -> Self {
        self.concurrency = Some(width);
        self
    }

    /// Set the sort order for results and rotation.
    pub fn sort(mut self, sort: SortKey) -> Self {
        self.sort = Some(sort);
        self
    }

    /// Set how many extra secondary-source passes to attempt.
    pub fn extra_passes(mut self, passes: usize) -> Self {
        self.extra_passes = Some(passes);
        self
    }

    /// Set the freshness window for pool entries.
    pub fn freshness(mut self, freshness: Duration) -> Self {
        self.freshness = Some(freshness);
        self
    }

    /// Set the judge endpoint probed through each candidate.
    pub fn judge_url(mut self, url: impl Into<String>) -> Self {
        self.judge_url = Some(url.into());
        self
    }

    /// Build the configuration, validating caller-supplied values.
    pub fn build(self) -> Result<FinderConfig, Error> {
        let probe_timeout = self.probe_timeout.unwrap_or(Duration::from_secs(15));
        if probe_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "probe timeout must be positive".into(),
            ));
        }
        let probe_timeout = probe_timeout.min(HARD_TIMEOUT_CEILING);

        let batch_deadline = self.batch_deadline.unwrap_or(Duration::from_secs(60));
        if batch_deadline.is_zero() {
            return Err(Error::InvalidConfig(
                "batch deadline must be positive".into(),
            ));
        }

        let concurrency = self.concurrency.unwrap_or(16);
        if concurrency == 0 {
            return Err(Error::InvalidConfig(
                "concurrency width must be positive".into(),
            ));
        }

        let judge_url = self
            .judge_url
            .unwrap_or_else(|| "http://httpbin.org/headers".to_string());
        Url::parse(&judge_url)
            .map_err(|e| Error::InvalidConfig(format!("judge url: {e}")))?;

        Ok(FinderConfig {
            count: self.count.unwrap_or(5),
            countries: self
                .countries
                .into_iter()
                .map(|c| c.trim().to_uppercase())
                .collect(),
            anonymity: self.anonymity,
            probe_timeout,
            batch_deadline,
            concurrency,
            sort: self.sort.unwrap_or_default(),
            extra_passes: self.extra_passes.unwrap_or(2),
            freshness: self.freshness.unwrap_or(Duration::from_secs(600)),
            judge_url,
        })
    }
}

impl Default for FinderConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
