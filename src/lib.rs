//! # proxy-finder
//!
//! A country-aware proxy pool.
//!
//! This library fetches candidate proxies from configurable sources,
//! validates them concurrently under a global time budget, and serves the
//! validated pool through a rotating cursor. When a requested country has
//! too few working proxies, a staged fallback escalates across source
//! tiers and relaxed timeouts before settling for a shortfall.

pub mod config;
pub mod error;
pub mod fallback;
pub mod finder;
pub mod pool;
pub mod proxy;
pub mod rotator;
pub mod sink;
pub mod source;
pub mod storage;
pub mod validator;

pub use config::{FinderConfig, FinderConfigBuilder, SortKey, HARD_TIMEOUT_CEILING};
pub use error::{Error, Result, SourceError, StorageError};
pub use fallback::{CountryFallback, CountryOutcome, FallbackStage};
pub use finder::ProxyFinder;
pub use pool::{PoolQuery, ProxyPool};
pub use proxy::{
    Anonymity, ProbeTally, ProxyCandidate, ProxyKey, ProxyStatus, ValidatedProxy,
    ValidationResult, Verdict,
};
pub use rotator::{Rotator, RotatorState};
pub use sink::{CountryCount, ResultSink, RunReport, WriterSink};
pub use source::{CandidateSource, FileSource, SourceTier, Sources, StaticSource, UrlListSource};
pub use storage::ProxyStorage;
pub use validator::{HttpProber, ProbeOutcome, Prober, Validator};
