//! Attempt outcomes and the running tally.

use serde::{Deserialize, Serialize};

use crate::reason::{ReasonCode, ReasonKind};

/// Result of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// CONNACK accepted the connection.
    Connected,
    /// The broker refused with an explicit CONNACK.
    RefusedWithAck { kind: ReasonKind },
    /// The attempt failed and no acknowledgment could be identified.
    RefusedWithoutAck { kind: ReasonKind, message: String },
}

impl AttemptOutcome {
    /// Classify a failure by its reason code.
    pub fn from_failure(code: ReasonCode, message: impl Into<String>) -> Self {
        let kind = ReasonKind::from_code(code);
        if kind.acknowledged() {
            Self::RefusedWithAck { kind }
        } else {
            Self::RefusedWithoutAck {
                kind,
                message: message.into(),
            }
        }
    }

    pub fn bucket(&self) -> Bucket {
        match self {
            Self::Connected => Bucket::Successful,
            Self::RefusedWithAck { .. } => Bucket::FailedWithAck,
            Self::RefusedWithoutAck { .. } => Bucket::FailedWithoutAck,
        }
    }

    pub fn kind(&self) -> Option<ReasonKind> {
        match self {
            Self::Connected => None,
            Self::RefusedWithAck { kind } | Self::RefusedWithoutAck { kind, .. } => Some(*kind),
        }
    }
}

/// Tally bucket of an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    Successful,
    FailedWithAck,
    FailedWithoutAck,
}

/// Log entry for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt number.
    pub index: u32,
    pub client_id: String,
    pub outcome: AttemptOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ReasonCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Failure looked like a TCP-level refusal.
    #[serde(default)]
    pub transport_refusal: bool,
    pub duration_ms: u64,
}

/// Outcome counters for one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub successful: usize,
    pub failed_with_ack: usize,
    pub failed_without_ack: usize,
}

impl Tally {
    /// Count one completed attempt.
    pub fn record(&mut self, outcome: &AttemptOutcome) {
        match outcome.bucket() {
            Bucket::Successful => self.successful += 1,
            Bucket::FailedWithAck => self.failed_with_ack += 1,
            Bucket::FailedWithoutAck => self.failed_without_ack += 1,
        }
    }

    /// Number of attempts counted.
    pub fn total(&self) -> usize {
        self.successful + self.failed_with_ack + self.failed_without_ack
    }

    /// At least one attempt got no CONNACK.
    pub fn defect_detected(&self) -> bool {
        self.failed_without_ack > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_failure_buckets() {
        let acked = AttemptOutcome::from_failure(ReasonCode::FAILED_AUTHENTICATION, "bad user");
        assert_eq!(
            acked,
            AttemptOutcome::RefusedWithAck {
                kind: ReasonKind::FailedAuthentication
            }
        );
        assert_eq!(acked.bucket(), Bucket::FailedWithAck);

        let lost = AttemptOutcome::from_failure(ReasonCode::CONNECTION_LOST, "closed by peer");
        assert_eq!(lost.bucket(), Bucket::FailedWithoutAck);
        assert_eq!(lost.kind(), Some(ReasonKind::ConnectionLost));

        let unknown = AttemptOutcome::from_failure(ReasonCode(0x42), "what");
        assert_eq!(unknown.bucket(), Bucket::FailedWithoutAck);
        assert_eq!(unknown.kind(), Some(ReasonKind::Other(ReasonCode(0x42))));

        assert_eq!(AttemptOutcome::Connected.kind(), None);
    }

    #[test]
    fn test_tally_sums_to_attempts() {
        let outcomes = [
            AttemptOutcome::Connected,
            AttemptOutcome::from_failure(ReasonCode::NOT_AUTHORIZED, ""),
            AttemptOutcome::from_failure(ReasonCode::CLIENT_TIMEOUT, "timeout"),
            AttemptOutcome::from_failure(ReasonCode(999), "odd"),
            AttemptOutcome::Connected,
        ];

        let mut tally = Tally::default();
        for (i, outcome) in outcomes.iter().enumerate() {
            tally.record(outcome);
            assert_eq!(tally.total(), i + 1);
        }

        assert_eq!(tally.successful, 2);
        assert_eq!(tally.failed_with_ack, 1);
        assert_eq!(tally.failed_without_ack, 2);
        assert!(tally.defect_detected());
    }

    #[test]
    fn test_outcome_json_shape() {
        let outcome = AttemptOutcome::from_failure(ReasonCode::CLIENT_TIMEOUT, "no connack");
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["result"], "refused_without_ack");
        assert_eq!(json["kind"], "ClientTimeout");
        assert_eq!(json["message"], "no connack");
    }
}
