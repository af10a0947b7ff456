//! Delivery of results to the caller.
//!
//! The core hands a sequence of validated proxies plus run metadata to a
//! `ResultSink`; how they are rendered is the sink's business. The one
//! obligation carried here is that a shortfall is always visible: the
//! report says how many were requested and how many were found, per
//! country.

use crate::proxy::{ProbeTally, ValidatedProxy};
use log::warn;
use std::io::{self, Write};
use std::time::Duration;

/// Requested-versus-found count for one requested country (or for the
/// whole run when no country filter was set).
#[derive(Debug, Clone)]
pub struct CountryCount {
    pub country: Option<String>,
    pub requested: usize,
    pub found: usize,
}

/// Metadata describing one refresh run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Proxies requested per country.
    pub requested: usize,
    pub elapsed: Duration,
    pub countries: Vec<CountryCount>,
    pub tally: ProbeTally,
}

impl RunReport {
    /// Whether any requested country came up short.
    pub fn has_shortfall(&self) -> bool {
        self.countries.iter().any(|c| c.found < c.requested)
    }

    pub fn total_found(&self) -> usize {
        self.countries.iter().map(|c| c.found).sum()
    }
}

/// Receives the final proxy selection and the run metadata.
pub trait ResultSink {
    fn deliver(&mut self, proxies: &[ValidatedProxy], report: &RunReport);
}

/// Writes one plain line per proxy plus the per-country counts.
pub struct WriterSink<W: Write> {
    writer: W,
}

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl WriterSink<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> ResultSink for WriterSink<W> {
    fn deliver(&mut self, proxies: &[ValidatedProxy], report: &RunReport) {
        let mut write = || -> io::Result<()> {
            for proxy in proxies {
                writeln!(
                    self.writer,
                    "{}  {}  {}  {}ms",
                    proxy.key,
                    proxy.country.as_deref().unwrap_or("--"),
                    proxy.anonymity,
                    proxy.latency_ms
                )?;
            }
            for count in &report.countries {
                writeln!(
                    self.writer,
                    "{}: found {} of {} requested",
                    count.country.as_deref().unwrap_or("any country"),
                    count.found,
                    count.requested
                )?;
            }
            writeln!(
                self.writer,
                "checked {} candidates in {:.1}s ({})",
                report.tally.total(),
                report.elapsed.as_secs_f64(),
                report.tally
            )?;
            Ok(())
        };
        if let Err(err) = write() {
            warn!("failed to write results: {err}");
        }
    }
}
