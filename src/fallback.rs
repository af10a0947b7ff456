//! Staged country fallback: escalate sources and timeouts until the quota
//! is met or every stage is exhausted.
//!
//! The escalation policy is plain data (`FallbackStage::plan`), so the
//! sequence of attempted stages is deterministic for a given configuration
//! and testable in isolation.

use crate::config::{FinderConfig, HARD_TIMEOUT_CEILING};
use crate::pool::{PoolQuery, ProxyPool};
use crate::proxy::{ProbeTally, ProxyCandidate, ProxyKey, ValidatedProxy};
use crate::source::{SourceTier, Sources};
use crate::validator::Validator;
use futures::future;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::time::Duration;

/// How far a relaxed stage raises the per-probe timeout.
const TIMEOUT_RELAX_STEP: Duration = Duration::from_secs(5);

/// Fetch this many times the quota; validation kills most candidates.
const OVERSAMPLE: usize = 8;

/// One escalation step: which sources to draw from, with what probe
/// timeout, and how many passes to spend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FallbackStage {
    pub tier: SourceTier,
    pub probe_timeout: Duration,
    pub max_passes: usize,
}

impl FallbackStage {
    /// The ordered escalation plan for a configuration:
    /// primary sources first, then secondary passes, then one final pass
    /// over everything with the timeout relaxed (never past the ceiling).
    pub fn plan(config: &FinderConfig) -> Vec<FallbackStage> {
        let base = config.probe_timeout;
        let relaxed = (base + TIMEOUT_RELAX_STEP).min(HARD_TIMEOUT_CEILING);
        vec![
            FallbackStage {
                tier: SourceTier::Primary,
                probe_timeout: base,
                max_passes: 1,
            },
            FallbackStage {
                tier: SourceTier::Secondary,
                probe_timeout: base,
                max_passes: config.extra_passes,
            },
            FallbackStage {
                tier: SourceTier::All,
                probe_timeout: relaxed,
                max_passes: 1,
            },
        ]
    }
}

/// What one country's acquisition run produced.
#[derive(Debug, Clone)]
pub struct CountryOutcome {
    pub country: Option<String>,
    pub requested: usize,
    /// Validated proxies now in the pool for this country; may be zero,
    /// which is a legitimate terminal outcome, not an error.
    pub found: usize,
    pub tally: ProbeTally,
    /// Sources that failed at the transport level, with the reason.
    pub failed_sources: Vec<(String, String)>,
}

/// Drives fetch and validate passes for one requested country at a time.
pub struct CountryFallback<'a> {
    config: &'a FinderConfig,
    sources: &'a Sources,
    validator: &'a Validator,
    pool: &'a ProxyPool,
}

impl<'a> CountryFallback<'a> {
    pub fn new(
        config: &'a FinderConfig,
        sources: &'a Sources,
        validator: &'a Validator,
        pool: &'a ProxyPool,
    ) -> Self {
        Self {
            config,
            sources,
            validator,
            pool,
        }
    }

    /// Escalate through the stage plan until `quota` validated proxies for
    /// `country` are in the pool, or the plan is exhausted. Always
    /// terminates; a shortfall is reported as a count.
    pub async fn acquire(&self, country: Option<&str>, quota: usize) -> CountryOutcome {
        let query = self.country_query(country);
        let mut tally = ProbeTally::default();
        let mut failed_sources = Vec::new();
        // Never probe the same endpoint twice in one run, dead or alive.
        let mut seen: HashSet<ProxyKey> = self.pool.keys().into_iter().collect();

        for stage in FallbackStage::plan(self.config) {
            for pass in 0..stage.max_passes {
                if self.pool.count_matching(&query) >= quota {
                    break;
                }
                let candidates = self
                    .fetch_tier(stage.tier, country, quota, &mut seen, &mut failed_sources)
                    .await;
                if candidates.is_empty() {
                    debug!(
                        "no new candidates from {:?} sources on pass {}",
                        stage.tier,
                        pass + 1
                    );
                    break;
                }
                info!(
                    "validating {} candidates ({:?} tier, timeout {:?})",
                    candidates.len(),
                    stage.tier,
                    stage.probe_timeout
                );
                let results = self
                    .validator
                    .validate_with_timeout(candidates, stage.probe_timeout)
                    .await;
                for result in results {
                    tally.record(result.verdict);
                    if let Some(proxy) = ValidatedProxy::from_result(&result) {
                        self.pool.upsert(proxy);
                    }
                }
            }
            if self.pool.count_matching(&query) >= quota {
                break;
            }
        }

        let found = self.pool.count_matching(&query);
        if found < quota {
            info!(
                "coverage shortfall for {}: {found} of {quota} requested ({tally})",
                country.unwrap_or("any country"),
            );
        }
        CountryOutcome {
            country: country.map(str::to_uppercase),
            requested: quota,
            found,
            tally,
            failed_sources,
        }
    }

    fn country_query(&self, country: Option<&str>) -> PoolQuery {
        PoolQuery {
            countries: country.map(|c| vec![c.to_uppercase()]).unwrap_or_default(),
            anonymity: self.config.anonymity,
            ..PoolQuery::any()
        }
    }

    /// Fetch concurrently from every eligible source of the tier, absorbing
    /// per-source transport failures, and deduplicate against everything
    /// already seen this run.
    async fn fetch_tier(
        &self,
        tier: SourceTier,
        country: Option<&str>,
        quota: usize,
        seen: &mut HashSet<ProxyKey>,
        failed_sources: &mut Vec<(String, String)>,
    ) -> Vec<ProxyCandidate> {
        let hint = quota.saturating_mul(OVERSAMPLE);
        let sources: Vec<_> = self
            .sources
            .tier(tier)
            .into_iter()
            .filter(|source| {
                if country.is_some() && !source.supports_country_filter() {
                    debug!("{} cannot filter by country; skipping", source.name());
                    return false;
                }
                true
            })
            .collect();

        let fetches = sources.iter().map(|source| source.fetch(country, hint));
        let batches = future::join_all(fetches).await;

        let mut candidates = Vec::new();
        for (source, batch) in sources.iter().zip(batches) {
            match batch {
                Ok(fetched) => {
                    debug!("fetched {} candidates from {}", fetched.len(), source.name());
                    candidates.extend(fetched);
                }
                Err(err) => {
                    warn!("source {} unavailable: {err}", source.name());
                    failed_sources.push((source.name().to_string(), err.to_string()));
                }
            }
        }
        candidates.retain(|c| seen.insert(c.key()));
        candidates
    }
}
