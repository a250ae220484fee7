mod admin;
mod heartbeat;
mod mcp_relay;
mod oauth;
mod observability;
mod persistence;
mod rate_limit;
mod server;

pub use admin::*;
pub use heartbeat::*;
pub use mcp_relay::*;
pub use oauth::*;
pub use observability::*;
pub use persistence::*;
pub use rate_limit::*;
pub use server::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub mcp_relay: McpRelayConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.oauth.issuer_url.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "oauth.issuer_url".into(),
                message: "issuer_url must not be empty".into(),
            });
        } else if !self.oauth.issuer_url.starts_with("http://")
            && !self.oauth.issuer_url.starts_with("https://")
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "oauth.issuer_url".into(),
                message: format!(
                    "issuer_url must start with http:// or https:// (got \"{}\")",
                    self.oauth.issuer_url
                ),
            });
        } else if self.oauth.issuer_url.ends_with('/') {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "oauth.issuer_url".into(),
                message: "issuer_url must not have a trailing slash".into(),
            });
        }

        if self.oauth.signing_secret == "dev-insecure-signing-secret-change-me" {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "oauth.signing_secret".into(),
                message: "using the built-in development signing secret; set AUTH_SIGNING_SECRET in production".into(),
            });
        }

        if self.oauth.access_token_ttl_secs <= 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "oauth.access_token_ttl_secs".into(),
                message: "access_token_ttl_secs must be greater than 0".into(),
            });
        }

        for (field, value) in [
            ("rate_limit.register_per_hour", self.rate_limit.register_per_hour),
            ("rate_limit.token_per_min", self.rate_limit.token_per_min),
            ("rate_limit.mcp_per_min_connection", self.rate_limit.mcp_per_min_connection),
            ("rate_limit.mcp_per_min_ip", self.rate_limit.mcp_per_min_ip),
        ] {
            if value == 0 {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: field.into(),
                    message: "must be greater than 0".into(),
                });
            }
        }

        if self.heartbeat.active_ms == 0
            || self.heartbeat.passive_ms == 0
            || self.heartbeat.sleep_ms == 0
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "heartbeat".into(),
                message: "active_ms, passive_ms and sleep_ms must all be greater than 0".into(),
            });
        }

        if self.heartbeat.active_ms >= self.heartbeat.passive_ms
            || self.heartbeat.passive_ms >= self.heartbeat.sleep_ms
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "heartbeat".into(),
                message: "expected active_ms < passive_ms < sleep_ms for a meaningful power-state ladder".into(),
            });
        }

        if self.server.cors.allowed_origins.len() == 1 && self.server.cors.allowed_origins[0] == "*"
        {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard \"*\" allows all origins (not recommended for production)".into(),
            });
        }

        if self.persistence.data_dir.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "persistence.data_dir".into(),
                message: "data_dir must not be empty".into(),
            });
        }

        errors
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            server: ServerConfig {
                port: 3210,
                host: "127.0.0.1".into(),
                ..ServerConfig::default()
            },
            oauth: OAuthConfig {
                issuer_url: "https://fleet.example.com".into(),
                signing_secret: "a-real-production-secret".into(),
                ..OAuthConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigError], field_prefix: &str) -> Option<&'a ConfigError> {
        issues.iter().find(|e| e.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|e| e.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn server_port_zero_is_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        let issue = find_issue(&cfg.validate(), "server.port").expect("error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn issuer_url_without_scheme_is_error() {
        let mut cfg = valid_config();
        cfg.oauth.issuer_url = "fleet.example.com".into();
        let issue = find_issue(&cfg.validate(), "oauth.issuer_url").expect("error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn issuer_url_with_trailing_slash_is_error() {
        let mut cfg = valid_config();
        cfg.oauth.issuer_url = "https://fleet.example.com/".into();
        let issue = find_issue(&cfg.validate(), "oauth.issuer_url").expect("error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn default_signing_secret_is_warning() {
        let mut cfg = valid_config();
        cfg.oauth.signing_secret = "dev-insecure-signing-secret-change-me".into();
        let issue = find_issue(&cfg.validate(), "oauth.signing_secret").expect("warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn rate_limit_zero_is_error() {
        let mut cfg = valid_config();
        cfg.rate_limit.token_per_min = 0;
        let issue = find_issue(&cfg.validate(), "rate_limit.token_per_min").expect("error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn heartbeat_ladder_out_of_order_is_warning() {
        let mut cfg = valid_config();
        cfg.heartbeat.passive_ms = 1;
        cfg.heartbeat.active_ms = 100;
        let issue = find_issue(&cfg.validate(), "heartbeat").expect("warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn cors_wildcard_is_warning() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issue = find_issue(&cfg.validate(), "server.cors.allowed_origins").expect("warning");
        assert_eq!(issue.severity, ConfigSeverity::Warning);
    }

    #[test]
    fn config_error_display_format() {
        let err = ConfigError {
            severity: ConfigSeverity::Error,
            field: "server.port".into(),
            message: "port must be greater than 0".into(),
        };
        assert_eq!(
            format!("{err}"),
            "[ERROR] server.port: port must be greater than 0"
        );
    }
}
