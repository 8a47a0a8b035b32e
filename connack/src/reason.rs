//! Reason codes and the classification table.
//!
//! Every failed CONNECT ends up with a [`ReasonCode`]. The code maps to exactly
//! one [`ReasonKind`] and the kind decides whether the broker acknowledged the
//! refusal.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Numeric reason reported for a failed connection attempt.
///
/// Values 1-5 are the MQTT 3.1.1 CONNACK return codes. Client-side conditions
/// use values above the one-byte CONNACK range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReasonCode(pub u16);

impl ReasonCode {
    pub const INVALID_PROTOCOL_VERSION: Self = Self(0x01);
    pub const INVALID_CLIENT_ID: Self = Self(0x02);
    pub const BROKER_UNAVAILABLE: Self = Self(0x03);
    pub const FAILED_AUTHENTICATION: Self = Self(0x04);
    pub const NOT_AUTHORIZED: Self = Self(0x05);

    /// No CONNACK arrived before the connect timeout.
    pub const CLIENT_TIMEOUT: Self = Self(0x100);
    /// The connection closed before a CONNACK was read.
    pub const CONNECTION_LOST: Self = Self(0x101);
    /// The TCP connection to the broker could not be established.
    pub const SERVER_CONNECT_ERROR: Self = Self(0x102);
    /// Any other client-side failure.
    pub const CLIENT_EXCEPTION: Self = Self(0x1FF);

    /// Whether the code came from a CONNACK rather than from the client.
    pub fn is_connack(&self) -> bool {
        self.0 <= u8::MAX as u16
    }

    /// Code carried by a refusing CONNACK.
    pub fn from_connack(code: rumqttc::ConnectReturnCode) -> Self {
        use rumqttc::ConnectReturnCode;

        match code {
            // Success never reaches the failure path.
            ConnectReturnCode::Success => Self::CLIENT_EXCEPTION,
            ConnectReturnCode::RefusedProtocolVersion => Self::INVALID_PROTOCOL_VERSION,
            ConnectReturnCode::BadClientId => Self::INVALID_CLIENT_ID,
            ConnectReturnCode::ServiceUnavailable => Self::BROKER_UNAVAILABLE,
            ConnectReturnCode::BadUserNamePassword => Self::FAILED_AUTHENTICATION,
            ConnectReturnCode::NotAuthorized => Self::NOT_AUTHORIZED,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReasonKind {
    InvalidProtocolVersion,
    InvalidClientId,
    BrokerUnavailable,
    FailedAuthentication,
    NotAuthorized,
    ClientTimeout,
    ConnectionLost,
    /// Code not present in the table.
    Other(ReasonCode),
}

impl ReasonKind {
    /// Look up the kind for a reason code.
    pub fn from_code(code: ReasonCode) -> Self {
        match code {
            ReasonCode::INVALID_PROTOCOL_VERSION => Self::InvalidProtocolVersion,
            ReasonCode::INVALID_CLIENT_ID => Self::InvalidClientId,
            ReasonCode::BROKER_UNAVAILABLE => Self::BrokerUnavailable,
            ReasonCode::FAILED_AUTHENTICATION => Self::FailedAuthentication,
            ReasonCode::NOT_AUTHORIZED => Self::NotAuthorized,
            ReasonCode::CLIENT_TIMEOUT => Self::ClientTimeout,
            ReasonCode::CONNECTION_LOST => Self::ConnectionLost,
            other => Self::Other(other),
        }
    }

    /// Whether the broker explicitly answered the CONNECT.
    ///
    /// Only authentication and authorization refusals count. Anything else
    /// could not be told apart from a transport failure and is treated as a
    /// missing acknowledgment.
    pub fn acknowledged(&self) -> bool {
        matches!(self, Self::FailedAuthentication | Self::NotAuthorized)
    }

    /// Human-readable description for console output.
    pub fn describe(&self) -> String {
        match self {
            Self::InvalidProtocolVersion => "Invalid Protocol Version".to_string(),
            Self::InvalidClientId => "Invalid Client Identifier".to_string(),
            Self::BrokerUnavailable => "Broker Unavailable (No CONNACK Received)".to_string(),
            Self::FailedAuthentication => {
                "Failed Authentication (Bad Username/Password)".to_string()
            }
            Self::NotAuthorized => "Not Authorized".to_string(),
            Self::ClientTimeout => "Client Timeout (No CONNACK Received)".to_string(),
            Self::ConnectionLost => "Connection Lost (No CONNACK Received)".to_string(),
            Self::Other(code) => format!("Other Error ({})", code),
        }
    }
}

impl fmt::Display for ReasonKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

/// Reports whether a failure looks like a TCP-level refusal.
///
/// Matches "unable to connect" or "connection refused" anywhere in the
/// message, ignoring case, or the server connect error code. A CONNACK code
/// is never a transport refusal, whatever the message says.
pub fn is_transport_refusal(code: ReasonCode, message: &str) -> bool {
    if code.is_connack() {
        return false;
    }
    if code == ReasonCode::SERVER_CONNECT_ERROR {
        return true;
    }
    let message = message.to_lowercase();
    message.contains("unable to connect") || message.contains("connection refused")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &[(ReasonCode, ReasonKind)] = &[
        (ReasonCode::INVALID_PROTOCOL_VERSION, ReasonKind::InvalidProtocolVersion),
        (ReasonCode::INVALID_CLIENT_ID, ReasonKind::InvalidClientId),
        (ReasonCode::BROKER_UNAVAILABLE, ReasonKind::BrokerUnavailable),
        (ReasonCode::FAILED_AUTHENTICATION, ReasonKind::FailedAuthentication),
        (ReasonCode::NOT_AUTHORIZED, ReasonKind::NotAuthorized),
        (ReasonCode::CLIENT_TIMEOUT, ReasonKind::ClientTimeout),
        (ReasonCode::CONNECTION_LOST, ReasonKind::ConnectionLost),
    ];

    #[test]
    fn test_table_is_deterministic() {
        for (code, kind) in TABLE {
            assert_eq!(ReasonKind::from_code(*code), *kind);
            assert_eq!(ReasonKind::from_code(*code), ReasonKind::from_code(*code));
        }
    }

    #[test]
    fn test_only_auth_refusals_are_acknowledged() {
        for (_, kind) in TABLE {
            let expected = matches!(
                kind,
                ReasonKind::FailedAuthentication | ReasonKind::NotAuthorized
            );
            assert_eq!(kind.acknowledged(), expected, "{:?}", kind);
        }
    }

    #[test]
    fn test_unknown_code_is_other_without_ack() {
        for raw in [0u16, 6, 0x80, 0x87, 0x102, 0x1FF, u16::MAX] {
            let kind = ReasonKind::from_code(ReasonCode(raw));
            assert_eq!(kind, ReasonKind::Other(ReasonCode(raw)));
            assert!(!kind.acknowledged());
        }
    }

    #[test]
    fn test_from_connack() {
        use rumqttc::ConnectReturnCode;

        assert_eq!(
            ReasonCode::from_connack(ConnectReturnCode::BadUserNamePassword),
            ReasonCode::FAILED_AUTHENTICATION
        );
        assert_eq!(
            ReasonCode::from_connack(ConnectReturnCode::NotAuthorized),
            ReasonCode::NOT_AUTHORIZED
        );
        assert_eq!(
            ReasonCode::from_connack(ConnectReturnCode::ServiceUnavailable),
            ReasonCode::BROKER_UNAVAILABLE
        );
        assert_eq!(
            ReasonCode::from_connack(ConnectReturnCode::Success),
            ReasonCode::CLIENT_EXCEPTION
        );
    }

    #[test]
    fn test_transport_refusal_patterns() {
        assert!(is_transport_refusal(
            ReasonCode::CLIENT_EXCEPTION,
            "I/O: Connection refused (os error 111)"
        ));
        assert!(is_transport_refusal(
            ReasonCode::CLIENT_EXCEPTION,
            "Unable to connect to server"
        ));
        assert!(is_transport_refusal(ReasonCode::SERVER_CONNECT_ERROR, ""));
        assert!(!is_transport_refusal(
            ReasonCode::CLIENT_TIMEOUT,
            "timed out waiting for CONNACK"
        ));
        assert!(!is_transport_refusal(
            ReasonCode::BROKER_UNAVAILABLE,
            "Connection refused, return code: `ServiceUnavailable`"
        ));
    }

    #[test]
    fn test_describe() {
        assert_eq!(
            ReasonKind::Other(ReasonCode(258)).to_string(),
            "Other Error (258)"
        );
        assert!(ReasonKind::ClientTimeout.describe().contains("No CONNACK"));
    }
}
