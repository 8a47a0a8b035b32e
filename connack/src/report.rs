//! Run report, console output and verification.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::outcome::{AttemptOutcome, AttemptRecord, Tally};

/// Everything a run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    pub started_at: String,
    pub finished_at: String,
    /// Broker address as `host:port`.
    pub broker: String,
    /// Attempts the config asked for.
    pub planned: u32,
    /// The run stopped before all planned attempts.
    pub cancelled: bool,
    pub tally: Tally,
    pub attempts: Vec<AttemptRecord>,
}

impl ProbeReport {
    /// At least one attempt got no CONNACK.
    pub fn defect_detected(&self) -> bool {
        self.tally.defect_detected()
    }

    /// Check the run for missing CONNACKs.
    ///
    /// Fails when an attempt is missing from the tally (or, for a run that was
    /// not cancelled, when fewer attempts ran than planned), and when any
    /// attempt landed in the no-acknowledgment bucket.
    pub fn verify(&self) -> Result<()> {
        let accounted = self.tally.total();
        let expected = if self.cancelled {
            self.attempts.len()
        } else {
            self.planned as usize
        };
        if accounted != expected || accounted != self.attempts.len() {
            return Err(Error::Unaccounted { accounted, expected });
        }

        if self.tally.failed_without_ack > 0 {
            return Err(Error::MissingConnAck {
                failed: self.tally.failed_without_ack,
                total: accounted,
            });
        }
        Ok(())
    }

    /// Save report to file.
    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        std::fs::write(path, data)?;
        Ok(())
    }

    /// Load report from file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }
}

/// Format the console line for one attempt.
pub fn format_attempt(record: &AttemptRecord, planned: u32) -> String {
    let mut line = format!("[{}/{}] ", record.index, planned);

    match &record.outcome {
        AttemptOutcome::Connected => {
            line.push_str("SUCCESS - Connected successfully.");
        }
        AttemptOutcome::RefusedWithAck { kind } => {
            line.push_str(&format!("FAILED (CONNACK) - {}", kind));
        }
        AttemptOutcome::RefusedWithoutAck { kind, .. } => {
            line.push_str(&format!("FAILED (no CONNACK) - {}", kind));
        }
    }

    line.push_str(&format!(" client_id={}", record.client_id));
    if let Some(code) = record.code {
        line.push_str(&format!(" code={}", code));
    }
    if let Some(message) = &record.message {
        line.push_str(&format!(" message={:?}", message));
    }
    if record.transport_refusal {
        line.push_str("\n    >>> TCP-level connection failure - likely no CONNACK was received.");
    }
    line
}

/// Print the console line for one attempt.
pub fn print_attempt(record: &AttemptRecord, planned: u32) {
    println!("{}", format_attempt(record, planned));
}

/// Print the run summary.
pub fn print_summary(report: &ProbeReport) {
    println!("\n{}", "=".repeat(60));
    println!("CONNACK PROBE SUMMARY ({})", report.broker);
    println!("{}", "=".repeat(60));

    if report.cancelled {
        println!(
            "Run cancelled after {} of {} attempts",
            report.attempts.len(),
            report.planned
        );
    }
    println!("Successful connections:                       {:>6}", report.tally.successful);
    println!(
        "Failed connections WITH CONNACK (refused):    {:>6}",
        report.tally.failed_with_ack
    );
    println!(
        "Failed connections WITHOUT CONNACK (silent):  {:>6}",
        report.tally.failed_without_ack
    );
    println!("{}", "-".repeat(60));

    if report.defect_detected() {
        println!(">>> ISSUE CONFIRMED: Some connection attempts received no CONNACK.");
    } else {
        println!(">>> No missing CONNACK packets detected in this run.");
    }
}
