//! Concurrent candidate validation under a global time budget.

use crate::config::{FinderConfig, HARD_TIMEOUT_CEILING};
use crate::proxy::{Anonymity, ProxyCandidate, ValidationResult};
use async_trait::async_trait;
use log::{debug, warn};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time;

/// What a single probe observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive {
        latency_ms: u64,
        anonymity: Anonymity,
    },
    Dead,
    Timeout,
    Error,
}

/// Probes one candidate. The production implementation issues an HTTP
/// request through the candidate; tests substitute scripted probers.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, candidate: &ProxyCandidate, timeout: Duration) -> ProbeOutcome;
}

/// Probes by requesting a judge endpoint through the candidate proxy and
/// classifying anonymity from the headers the judge echoes back.
pub struct HttpProber {
    judge_url: String,
}

impl HttpProber {
    pub fn new(judge_url: impl Into<String>) -> Self {
        Self {
            judge_url: judge_url.into(),
        }
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, candidate: &ProxyCandidate, timeout: Duration) -> ProbeOutcome {
        let proxy = match reqwest::Proxy::all(candidate.proxy_url()) {
            Ok(proxy) => proxy,
            Err(err) => {
                debug!("{candidate}: unusable proxy url: {err}");
                return ProbeOutcome::Error;
            }
        };
        let client = match reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
        {
            Ok(client) => client,
            Err(err) => {
                debug!("{candidate}: client build failed: {err}");
                return ProbeOutcome::Error;
            }
        };

        let started = Instant::now();
        match client.get(&self.judge_url).send().await {
            Ok(response) if response.status().is_success() => {
                let latency_ms = started.elapsed().as_millis() as u64;
                let anonymity = match response.text().await {
                    Ok(body) => classify_anonymity(&body),
                    Err(_) => Anonymity::Unknown,
                };
                ProbeOutcome::Alive {
                    latency_ms,
                    anonymity,
                }
            }
            Ok(response) => {
                debug!("{candidate}: judge returned {}", response.status());
                ProbeOutcome::Error
            }
            Err(err) if err.is_timeout() => ProbeOutcome::Timeout,
            Err(err) if err.is_connect() => ProbeOutcome::Dead,
            Err(err) => {
                debug!("{candidate}: probe failed: {err}");
                ProbeOutcome::Error
            }
        }
    }
}

/// Classify anonymity from a judge response that echoes request headers as
/// JSON (httpbin-style `{"headers": {...}}`).
///
/// A forwarded client address means transparent; a `Via` marker alone means
/// the proxy announces itself; neither means elite.
fn classify_anonymity(body: &str) -> Anonymity {
    let headers = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| value.get("headers").cloned());
    match headers {
        Some(serde_json::Value::Object(map)) => {
            let has = |name: &str| map.keys().any(|k| k.eq_ignore_ascii_case(name));
            if has("x-forwarded-for") {
                Anonymity::Transparent
            } else if has("via") {
                Anonymity::Anonymous
            } else {
                Anonymity::Elite
            }
        }
        _ => Anonymity::Unknown,
    }
}

/// Validates batches of candidates with bounded parallelism.
///
/// At most `width` probes run at a time; the whole batch is bounded by
/// `batch_deadline`. The output has the same cardinality and order as the
/// input: probes still outstanding at the deadline are recorded as
/// `Timeout`.
#[derive(Clone)]
pub struct Validator {
    width: usize,
    probe_timeout: Duration,
    batch_deadline: Duration,
    prober: Arc<dyn Prober>,
}

impl Validator {
    pub fn new(config: &FinderConfig) -> Self {
        Self::with_prober(config, Arc::new(HttpProber::new(config.judge_url.clone())))
    }

    /// Use a custom prober; the seam tests rely on.
    pub fn with_prober(config: &FinderConfig, prober: Arc<dyn Prober>) -> Self {
        Self {
            width: config.concurrency,
            probe_timeout: config.probe_timeout,
            batch_deadline: config.batch_deadline,
            prober,
        }
    }

    /// Validate with the configured per-probe timeout.
    pub async fn validate(&self, candidates: Vec<ProxyCandidate>) -> Vec<ValidationResult> {
        self.validate_with_timeout(candidates, self.probe_timeout).await
    }

    /// Validate with an explicit per-probe timeout (used by the fallback
    /// strategy's timeout escalation).
    pub async fn validate_with_timeout(
        &self,
        candidates: Vec<ProxyCandidate>,
        probe_timeout: Duration,
    ) -> Vec<ValidationResult> {
        if candidates.is_empty() {
            return Vec::new();
        }
        let probe_timeout = probe_timeout.min(HARD_TIMEOUT_CEILING);

        let slots: Arc<Mutex<Vec<Option<ValidationResult>>>> =
            Arc::new(Mutex::new((0..candidates.len()).map(|_| None).collect()));
        let semaphore = Arc::new(Semaphore::new(self.width));
        let mut tasks = JoinSet::new();

        for (slot, candidate) in candidates.iter().cloned().enumerate() {
            let semaphore = Arc::clone(&semaphore);
            let prober = Arc::clone(&self.prober);
            let slots = Arc::clone(&slots);
            tasks.spawn(async move {
                // The semaphore is never closed while tasks hold the Arc.
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("semaphore closed unexpectedly");
                let outcome = match time::timeout(probe_timeout, prober.probe(&candidate, probe_timeout)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::Timeout,
                };
                let result = match outcome {
                    ProbeOutcome::Alive {
                        latency_ms,
                        anonymity,
                    } => ValidationResult::alive(candidate, latency_ms, anonymity),
                    ProbeOutcome::Dead => ValidationResult::dead(candidate),
                    ProbeOutcome::Timeout => ValidationResult::timed_out(candidate),
                    ProbeOutcome::Error => ValidationResult::failed(candidate),
                };
                slots.lock()[slot] = Some(result);
            });
        }

        let drain = async {
            while tasks.join_next().await.is_some() {}
        };
        if time::timeout(self.batch_deadline, drain).await.is_err() {
            warn!(
                "validation deadline of {:?} elapsed; abandoning outstanding probes",
                self.batch_deadline
            );
            tasks.abort_all();
        }

        let slots = slots.lock();
        candidates
            .into_iter()
            .zip(slots.iter())
            .map(|(candidate, slot)| {
                slot.clone()
                    .unwrap_or_else(|| ValidationResult::timed_out(candidate))
            })
            .collect()
    }
}
