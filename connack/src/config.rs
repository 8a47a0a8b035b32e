//! Probe configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Longest client id the MQTT string encoding can carry.
const MAX_CLIENT_ID_LEN: usize = u16::MAX as usize;

/// Probe configuration.
///
/// Fields default to a run against a local broker with credentials that a
/// stock broker should refuse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Broker host name or IP.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Connect over TLS.
    pub tls: bool,
    /// Fixed client id. A random id is generated when unset.
    pub client_id: Option<String>,
    /// Generate a new random client id for every attempt.
    pub fresh_client_id: bool,
    /// Username for authentication.
    pub username: Option<String>,
    /// Password for authentication.
    pub password: Option<String>,
    /// Seconds to wait for the CONNACK.
    pub connect_timeout_secs: u64,
    /// Keep-alive interval in seconds (0 disables).
    pub keep_alive_secs: u16,
    /// Number of connection attempts.
    pub attempts: u32,
    /// Milliseconds between attempts.
    pub delay_ms: u64,
    /// Clean session flag.
    pub clean_session: bool,
    /// Retry transport failures inside the connect timeout.
    pub auto_reconnect: bool,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            tls: false,
            client_id: None,
            fresh_client_id: false,
            username: Some("none".to_string()),
            password: Some("wrongpassword".to_string()),
            connect_timeout_secs: 10,
            keep_alive_secs: 60,
            attempts: 20,
            delay_ms: 500,
            clean_session: true,
            auto_reconnect: false,
        }
    }
}

impl ProbeConfig {
    /// Create a config for the given broker with default settings.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Load a config file (JSON or YAML, by extension).
    ///
    /// `username` and `password` may name environment variables as `$VAR` or
    /// `${VAR}`.
    pub fn load(path: &Path) -> Result<Self> {
        let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("");
        let data = std::fs::read(path)?;

        let mut cfg: ProbeConfig = match ext {
            "json" => serde_json::from_slice(&data)?,
            "yaml" | "yml" => serde_yaml::from_slice(&data)?,
            _ => return Err(Error::UnsupportedConfigFormat(path.display().to_string())),
        };

        cfg.username = cfg.username.as_deref().map(expand_env);
        cfg.password = cfg.password.as_deref().map(expand_env);
        Ok(cfg)
    }

    /// Set credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Connect without credentials.
    pub fn without_credentials(mut self) -> Self {
        self.username = None;
        self.password = None;
        self
    }

    /// Use a fixed client id.
    pub fn with_client_id(mut self, id: impl Into<String>) -> Self {
        self.client_id = Some(id.into());
        self
    }

    /// Generate a new client id for every attempt.
    pub fn with_fresh_client_id(mut self, fresh: bool) -> Self {
        self.fresh_client_id = fresh;
        self
    }

    /// Set the number of attempts.
    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    /// Set the delay between attempts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the connect timeout in seconds.
    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout_secs = seconds;
        self
    }

    /// Set the keep-alive interval in seconds.
    pub fn with_keep_alive(mut self, seconds: u16) -> Self {
        self.keep_alive_secs = seconds;
        self
    }

    /// Set the clean session flag.
    pub fn with_clean_session(mut self, clean: bool) -> Self {
        self.clean_session = clean;
        self
    }

    /// Enable or disable retrying transport failures.
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    /// Enable or disable TLS.
    pub fn with_tls(mut self, tls: bool) -> Self {
        self.tls = tls;
        self
    }

    /// Broker address as `host:port`.
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs as u64)
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Check values the client library would reject or panic on.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port must not be 0".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::InvalidConfig(
                "connect timeout must be at least 1 second".to_string(),
            ));
        }
        if let Some(id) = &self.client_id {
            if self.fresh_client_id {
                return Err(Error::InvalidConfig(
                    "a fixed client id cannot be combined with fresh client ids".to_string(),
                ));
            }
            if id.is_empty() || id.starts_with(' ') {
                return Err(Error::InvalidConfig(
                    "client id must not be empty or start with a space".to_string(),
                ));
            }
            if id.len() > MAX_CLIENT_ID_LEN {
                return Err(Error::InvalidConfig(format!(
                    "client id longer than {} bytes",
                    MAX_CLIENT_ID_LEN
                )));
            }
        }
        Ok(())
    }
}

/// Generate a random client id.
///
/// 22 characters, inside the 23-byte length every MQTT 3.1.1 broker must accept.
pub fn generate_client_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("probe-{}", &id[..16])
}

/// Expand environment variables in a string.
fn expand_env(s: &str) -> String {
    if s.is_empty() {
        return s.to_string();
    }

    if s.starts_with('$') {
        // $VAR or ${VAR}
        let var_name = if s.starts_with("${") && s.ends_with('}') {
            &s[2..s.len() - 1]
        } else {
            &s[1..]
        };
        std::env::var(var_name).unwrap_or_default()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let cfg = ProbeConfig::default();
        assert_eq!(cfg.broker_addr(), "localhost:1883");
        assert_eq!(cfg.attempts, 20);
        assert_eq!(cfg.delay(), Duration::from_millis(500));
        assert_eq!(cfg.connect_timeout(), Duration::from_secs(10));
        assert_eq!(cfg.keep_alive(), Duration::from_secs(60));
        assert!(cfg.clean_session);
        assert!(!cfg.auto_reconnect);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let cfg = ProbeConfig::new("10.0.0.7", 11883)
            .with_credentials("artemis", "artemis")
            .with_client_id("probe-fixed")
            .with_attempts(3)
            .with_delay(Duration::from_millis(200))
            .with_connect_timeout(2)
            .with_keep_alive(30);

        assert_eq!(cfg.broker_addr(), "10.0.0.7:11883");
        assert_eq!(cfg.username.as_deref(), Some("artemis"));
        assert_eq!(cfg.client_id.as_deref(), Some("probe-fixed"));
        assert_eq!(cfg.delay_ms, 200);
        assert_eq!(cfg.keep_alive_secs, 30);

        let anonymous = cfg.without_credentials();
        assert!(anonymous.username.is_none());
        assert!(anonymous.password.is_none());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        assert!(ProbeConfig::new("", 1883).validate().is_err());
        assert!(ProbeConfig::new("localhost", 0).validate().is_err());
        assert!(ProbeConfig::default().with_connect_timeout(0).validate().is_err());
        assert!(ProbeConfig::default().with_client_id("").validate().is_err());
        assert!(
            ProbeConfig::default()
                .with_client_id("probe-fixed")
                .with_fresh_client_id(true)
                .validate()
                .is_err()
        );
        assert!(ProbeConfig::default().with_attempts(0).validate().is_ok());
    }

    #[test]
    fn test_generate_client_id() {
        let a = generate_client_id();
        let b = generate_client_id();
        assert_eq!(a.len(), 22);
        assert!(a.starts_with("probe-"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_load_yaml() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "host: broker.local\nport: 2883\nattempts: 5\ndelay_ms: 50\nusername: wronguser"
        )
        .unwrap();

        let cfg = ProbeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.host, "broker.local");
        assert_eq!(cfg.port, 2883);
        assert_eq!(cfg.attempts, 5);
        assert_eq!(cfg.delay_ms, 50);
        assert_eq!(cfg.username.as_deref(), Some("wronguser"));
        // Unset fields keep their defaults.
        assert_eq!(cfg.connect_timeout_secs, 10);
        assert_eq!(cfg.password.as_deref(), Some("wrongpassword"));
    }

    #[test]
    fn test_load_json() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, r#"{{"port": 1884, "clean_session": false, "tls": true}}"#).unwrap();

        let cfg = ProbeConfig::load(file.path()).unwrap();
        assert_eq!(cfg.port, 1884);
        assert!(!cfg.clean_session);
        assert!(cfg.tls);
    }

    #[test]
    fn test_load_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        let err = ProbeConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedConfigFormat(_)));
    }

    #[test]
    fn test_expand_env() {
        // SAFETY: test-local variable name, not read by other tests.
        unsafe { std::env::set_var("CONNACK_TEST_SECRET", "s3cret") };
        assert_eq!(expand_env("$CONNACK_TEST_SECRET"), "s3cret");
        assert_eq!(expand_env("${CONNACK_TEST_SECRET}"), "s3cret");
        assert_eq!(expand_env("plain"), "plain");
        assert_eq!(expand_env(""), "");
        assert_eq!(expand_env("$CONNACK_TEST_UNSET_VAR"), "");
    }
}
