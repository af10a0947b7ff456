//! Persisted proxy cache.
//!
//! The pool itself is in-memory and rebuilt each run; this is the optional
//! save-as-validated / load-as-candidates hook around it. Entries are kept
//! as a JSON file and filtered by age on load, so a later run can seed its
//! candidate set from proxies that were recently alive.

use crate::error::StorageError;
use crate::proxy::{ProxyCandidate, ValidatedProxy};
use chrono::Utc;
use log::{debug, info};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

pub struct ProxyStorage {
    path: PathBuf,
}

impl ProxyStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Persist the given proxies, replacing any previous cache.
    pub fn save(&self, proxies: &[ValidatedProxy]) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(proxies)?;
        fs::write(&self.path, json)?;
        info!("saved {} proxies to {}", proxies.len(), self.path.display());
        Ok(())
    }

    /// Load cached proxies no older than `max_age`. A missing cache file
    /// is an empty cache, not an error.
    pub fn load(&self, max_age: Duration) -> Result<Vec<ValidatedProxy>, StorageError> {
        if !self.path.exists() {
            debug!("no proxy cache at {}", self.path.display());
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)?;
        let cached: Vec<ValidatedProxy> = serde_json::from_str(&content)?;
        let total = cached.len();

        let now = Utc::now();
        let fresh: Vec<ValidatedProxy> = cached
            .into_iter()
            .filter(|proxy| {
                match now.signed_duration_since(proxy.last_checked_at).to_std() {
                    Ok(age) => age <= max_age,
                    // A future timestamp counts as fresh.
                    Err(_) => true,
                }
            })
            .collect();
        info!(
            "loaded {} cached proxies ({} expired) from {}",
            fresh.len(),
            total - fresh.len(),
            self.path.display()
        );
        Ok(fresh)
    }

    /// Load the cache as candidates for re-validation.
    pub fn load_as_candidates(&self, max_age: Duration) -> Result<Vec<ProxyCandidate>, StorageError> {
        Ok(self
            .load(max_age)?
            .iter()
            .map(ValidatedProxy::to_candidate)
            .collect())
    }
}
