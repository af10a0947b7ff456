//! Candidate sources: where raw proxy records come from.
//!
//! Every provider implements the same small `fetch` capability. "No
//! results" is an empty vector; `Err` is reserved for transport-level
//! failure.

use crate::error::SourceError;
use crate::proxy::{ProxyCandidate, ValidatedProxy};
use async_trait::async_trait;
use log::debug;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// `host:port` with an optional scheme prefix, one proxy per line.
static PROXY_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:https?://)?(\d{1,3}(?:\.\d{1,3}){3}):(\d{1,5})$")
        .expect("proxy line regex is valid")
});

const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// A provider of raw proxy candidates.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Whether this source can restrict results to a country. Sources that
    /// cannot are skipped for country-scoped passes.
    fn supports_country_filter(&self) -> bool {
        false
    }

    /// Fetch up to `count_hint` candidates, optionally restricted to a
    /// country. May return fewer than requested; returns `Ok(vec![])` on
    /// "no results".
    async fn fetch(
        &self,
        country: Option<&str>,
        count_hint: usize,
    ) -> Result<Vec<ProxyCandidate>, SourceError>;
}

/// Parse a plain-text proxy list, one `host:port` per line.
pub(crate) fn parse_proxy_list(content: &str, claimed_country: Option<&str>) -> Vec<ProxyCandidate> {
    content
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let caps = PROXY_LINE.captures(line)?;
            let port: u32 = caps[2].parse().ok()?;
            if port == 0 || port > u32::from(u16::MAX) {
                return None;
            }
            let mut candidate = ProxyCandidate::new(&caps[1], port as u16);
            if let Some(country) = claimed_country {
                candidate = candidate.with_country(country);
            }
            Some(candidate)
        })
        .collect()
}

/// Tier a fetch pass draws from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTier {
    Primary,
    Secondary,
    All,
}

/// Registry of configured sources, split into a primary tier and a
/// secondary (backup) tier.
#[derive(Default)]
pub struct Sources {
    primary: Vec<Arc<dyn CandidateSource>>,
    secondary: Vec<Arc<dyn CandidateSource>>,
}

impl Sources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_primary(mut self, source: impl CandidateSource + 'static) -> Self {
        self.primary.push(Arc::new(source));
        self
    }

    pub fn with_secondary(mut self, source: impl CandidateSource + 'static) -> Self {
        self.secondary.push(Arc::new(source));
        self
    }

    /// Sources of the given tier, in registration order.
    pub fn tier(&self, tier: SourceTier) -> Vec<Arc<dyn CandidateSource>> {
        match tier {
            SourceTier::Primary => self.primary.clone(),
            SourceTier::Secondary => self.secondary.clone(),
            SourceTier::All => self
                .primary
                .iter()
                .chain(self.secondary.iter())
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.secondary.is_empty()
    }

    pub fn len(&self) -> usize {
        self.primary.len() + self.secondary.len()
    }
}

/// Fetches a plain-text proxy list over HTTP.
///
/// A `{country}` placeholder in the URL scopes the list server-side; without
/// the placeholder the source cannot restrict by country.
pub struct UrlListSource {
    name: String,
    url_template: String,
}

impl UrlListSource {
    pub fn new(name: impl Into<String>, url_template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url_template: url_template.into(),
        }
    }

    fn scoped_url(&self, country: Option<&str>) -> (String, bool) {
        if !self.url_template.contains("{country}") {
            return (self.url_template.clone(), false);
        }
        match country {
            Some(code) => (
                self.url_template.replace("{country}", &code.to_uppercase()),
                true,
            ),
            None => (self.url_template.replace("{country}", "all"), false),
        }
    }
}

#[async_trait]
impl CandidateSource for UrlListSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_country_filter(&self) -> bool {
        self.url_template.contains("{country}")
    }

    async fn fetch(
        &self,
        country: Option<&str>,
        count_hint: usize,
    ) -> Result<Vec<ProxyCandidate>, SourceError> {
        let (url, scoped) = self.scoped_url(country);
        let client = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()?;
        let response = client.get(&url).send().await?.error_for_status()?;
        let content = response.text().await?;

        let claimed = if scoped { country } else { None };
        let mut candidates = parse_proxy_list(&content, claimed);
        if count_hint > 0 {
            candidates.truncate(count_hint);
        }
        debug!("{}: parsed {} candidates", self.name, candidates.len());
        Ok(candidates)
    }
}

/// Reads the same line format from a local file.
pub struct FileSource {
    name: String,
    path: PathBuf,
}

impl FileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

#[async_trait]
impl CandidateSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(
        &self,
        _country: Option<&str>,
        count_hint: usize,
    ) -> Result<Vec<ProxyCandidate>, SourceError> {
        let content = tokio::fs::read_to_string(&self.path).await?;
        let mut candidates = parse_proxy_list(&content, None);
        if count_hint > 0 {
            candidates.truncate(count_hint);
        }
        Ok(candidates)
    }
}

/// An in-memory candidate list.
///
/// Doubles as the load-as-candidates hook for the persisted cache and as a
/// deterministic source for tests.
pub struct StaticSource {
    name: String,
    candidates: Vec<ProxyCandidate>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, candidates: Vec<ProxyCandidate>) -> Self {
        Self {
            name: name.into(),
            candidates,
        }
    }

    /// Wrap previously validated proxies (e.g. loaded from the cache) as
    /// candidates for re-validation.
    pub fn from_validated(name: impl Into<String>, proxies: &[ValidatedProxy]) -> Self {
        Self::new(name, proxies.iter().map(ValidatedProxy::to_candidate).collect())
    }
}

#[async_trait]
impl CandidateSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_country_filter(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        country: Option<&str>,
        count_hint: usize,
    ) -> Result<Vec<ProxyCandidate>, SourceError> {
        let mut candidates: Vec<ProxyCandidate> = self
            .candidates
            .iter()
            .filter(|c| match country {
                Some(code) => c
                    .claimed_country
                    .as_deref()
                    .is_some_and(|cc| cc.eq_ignore_ascii_case(code)),
                None => true,
            })
            .cloned()
            .collect();
        if count_hint > 0 {
            candidates.truncate(count_hint);
        }
        Ok(candidates)
    }
}
