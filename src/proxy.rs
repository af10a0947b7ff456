//! Proxy data model: candidates, validation results and pool entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Anonymity level of a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Anonymity {
    /// The proxy forwards the client address.
    Transparent,
    /// The proxy hides the client address but identifies itself as a proxy.
    Anonymous,
    /// The proxy hides both the client address and its own presence.
    Elite,
    /// Not yet determined.
    #[default]
    Unknown,
}

impl Anonymity {
    /// Fixed rank used for sorting and filtering: `Elite` is best (0),
    /// `Unknown` worst (3).
    pub fn rank(&self) -> u8 {
        match self {
            Anonymity::Elite => 0,
            Anonymity::Anonymous => 1,
            Anonymity::Transparent => 2,
            Anonymity::Unknown => 3,
        }
    }

    /// Parse a level name as reported by proxy list providers.
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "transparent" => Anonymity::Transparent,
            "anonymous" => Anonymity::Anonymous,
            "elite" | "high anonymity" => Anonymity::Elite,
            _ => Anonymity::Unknown,
        }
    }
}

impl fmt::Display for Anonymity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anonymity::Transparent => write!(f, "transparent"),
            Anonymity::Anonymous => write!(f, "anonymous"),
            Anonymity::Elite => write!(f, "elite"),
            Anonymity::Unknown => write!(f, "unknown"),
        }
    }
}

/// Identity of a proxy endpoint. Two records with the same address and port
/// are the same proxy regardless of where they were fetched from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProxyKey {
    pub address: String,
    pub port: u16,
}

impl fmt::Display for ProxyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// A raw, unvalidated proxy record as yielded by a candidate source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyCandidate {
    pub address: String,
    pub port: u16,
    /// ISO two-letter country code claimed by the source, if any.
    pub claimed_country: Option<String>,
    /// Anonymity level claimed by the source.
    pub claimed_anonymity: Anonymity,
}

impl ProxyCandidate {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            claimed_country: None,
            claimed_anonymity: Anonymity::Unknown,
        }
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.claimed_country = Some(country.into().to_uppercase());
        self
    }

    pub fn with_anonymity(mut self, anonymity: Anonymity) -> Self {
        self.claimed_anonymity = anonymity;
        self
    }

    pub fn key(&self) -> ProxyKey {
        ProxyKey {
            address: self.address.clone(),
            port: self.port,
        }
    }

    /// URL used to route a probe through this proxy.
    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

impl fmt::Display for ProxyCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

/// Outcome of probing one candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Alive,
    Dead,
    Timeout,
    Error,
}

/// Result of validating a single candidate.
///
/// The measured latency is kept private so that "latency is present if and
/// only if the verdict is `Alive`" holds by construction.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub candidate: ProxyCandidate,
    pub verdict: Verdict,
    latency_ms: Option<u64>,
    pub confirmed_anonymity: Anonymity,
    pub checked_at: DateTime<Utc>,
}

impl ValidationResult {
    pub fn alive(candidate: ProxyCandidate, latency_ms: u64, anonymity: Anonymity) -> Self {
        Self {
            candidate,
            verdict: Verdict::Alive,
            latency_ms: Some(latency_ms),
            confirmed_anonymity: anonymity,
            checked_at: Utc::now(),
        }
    }

    pub fn dead(candidate: ProxyCandidate) -> Self {
        Self::not_alive(candidate, Verdict::Dead)
    }

    pub fn timed_out(candidate: ProxyCandidate) -> Self {
        Self::not_alive(candidate, Verdict::Timeout)
    }

    pub fn failed(candidate: ProxyCandidate) -> Self {
        Self::not_alive(candidate, Verdict::Error)
    }

    fn not_alive(candidate: ProxyCandidate, verdict: Verdict) -> Self {
        Self {
            candidate,
            verdict,
            latency_ms: None,
            confirmed_anonymity: Anonymity::Unknown,
            checked_at: Utc::now(),
        }
    }

    pub fn is_alive(&self) -> bool {
        self.verdict == Verdict::Alive
    }

    /// Measured round-trip latency; `Some` exactly when the verdict is `Alive`.
    pub fn latency_ms(&self) -> Option<u64> {
        self.latency_ms
    }
}

/// Counts of probe verdicts across a validation run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeTally {
    pub alive: usize,
    pub dead: usize,
    pub timeout: usize,
    pub error: usize,
}

impl ProbeTally {
    pub fn record(&mut self, verdict: Verdict) {
        match verdict {
            Verdict::Alive => self.alive += 1,
            Verdict::Dead => self.dead += 1,
            Verdict::Timeout => self.timeout += 1,
            Verdict::Error => self.error += 1,
        }
    }

    pub fn merge(&mut self, other: &ProbeTally) {
        self.alive += other.alive;
        self.dead += other.dead;
        self.timeout += other.timeout;
        self.error += other.error;
    }

    pub fn total(&self) -> usize {
        self.alive + self.dead + self.timeout + self.error
    }
}

impl fmt::Display for ProbeTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} alive, {} dead, {} timeout, {} error",
            self.alive, self.dead, self.timeout, self.error
        )
    }
}

/// Status of a proxy held in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProxyStatus {
    /// Validated and not yet handed out in the current rotation cycle.
    Available,
    /// Served by the rotator and not re-validated since.
    Exhausted,
    /// Last check is older than the configured freshness window.
    Stale,
}

/// A proxy confirmed reachable, held in the pool with its last-known state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedProxy {
    pub key: ProxyKey,
    pub country: Option<String>,
    pub anonymity: Anonymity,
    pub latency_ms: u64,
    pub last_checked_at: DateTime<Utc>,
    pub status: ProxyStatus,
}

impl ValidatedProxy {
    /// Build a pool entry from an `Alive` validation result. Returns `None`
    /// for any other verdict.
    ///
    /// Confirmed values win over claimed ones; the claim is kept only when
    /// the probe could not determine the confirmed value.
    pub fn from_result(result: &ValidationResult) -> Option<Self> {
        let latency_ms = result.latency_ms()?;
        let candidate = &result.candidate;
        let anonymity = match result.confirmed_anonymity {
            Anonymity::Unknown => candidate.claimed_anonymity,
            confirmed => confirmed,
        };
        Some(Self {
            key: candidate.key(),
            country: candidate.claimed_country.clone(),
            anonymity,
            latency_ms,
            last_checked_at: result.checked_at,
            status: ProxyStatus::Available,
        })
    }

    /// Whether the last check is older than the given freshness window.
    pub fn is_stale(&self, freshness: Duration) -> bool {
        match Utc::now()
            .signed_duration_since(self.last_checked_at)
            .to_std()
        {
            Ok(age) => age > freshness,
            // A timestamp in the future counts as fresh.
            Err(_) => false,
        }
    }

    /// Convert back into a candidate for re-validation or cache reload.
    pub fn to_candidate(&self) -> ProxyCandidate {
        let mut candidate = ProxyCandidate::new(self.key.address.clone(), self.key.port)
            .with_anonymity(self.anonymity);
        candidate.claimed_country = self.country.clone();
        candidate
    }

    pub fn proxy_url(&self) -> String {
        format!("http://{}:{}", self.key.address, self.key.port)
    }
}
