//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the upstream is a bare authority
//! - Check the metrics address when metrics are enabled
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use axum::http::uri::Authority;
use thiserror::Error;

use crate::config::schema::ProxyConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream.host must not be empty")]
    EmptyUpstreamHost,

    #[error("upstream.host '{0}' must be a bare host[:port] without scheme or path")]
    InvalidUpstreamHost(String),

    #[error("listener.host must not be empty")]
    EmptyListenerHost,

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let host = config.upstream.host.trim();
    if host.is_empty() {
        errors.push(ValidationError::EmptyUpstreamHost);
    } else if host.contains("://") || host.contains('/') || host.parse::<Authority>().is_err() {
        errors.push(ValidationError::InvalidUpstreamHost(config.upstream.host.clone()));
    }

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::EmptyListenerHost);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(validate_config(&ProxyConfig::default()).is_ok());
    }

    #[test]
    fn upstream_with_port_is_valid() {
        let mut config = ProxyConfig::default();
        config.upstream.host = "127.0.0.1:3000".into();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn upstream_with_scheme_is_rejected() {
        let mut config = ProxyConfig::default();
        config.upstream.host = "https://example.com".into();
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidUpstreamHost("https://example.com".into())])
        );
    }

    #[test]
    fn reports_every_error() {
        let mut config = ProxyConfig::default();
        config.upstream.host = "".into();
        config.listener.host = " ".into();
        config.observability.metrics_enabled = true;
        config.observability.metrics_address = "nowhere".into();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(errors.contains(&ValidationError::EmptyUpstreamHost));
        assert!(errors.contains(&ValidationError::EmptyListenerHost));
        assert!(errors.contains(&ValidationError::InvalidMetricsAddress("nowhere".into())));
    }

    #[test]
    fn metrics_address_ignored_when_disabled() {
        let mut config = ProxyConfig::default();
        config.observability.metrics_address = "nowhere".into();
        assert!(validate_config(&config).is_ok());
    }
}
