//! Top-level configuration.

use serde::{Deserialize, Serialize};

use crate::{ConfigError, HandlerConf, SidecarMode, SidecarSection, TelemetrySection};

/// Complete Gatehouse configuration.
///
/// # Example
///
/// ```
/// use gatehouse_config::GatewayConfig;
///
/// let config = GatewayConfig::default();
/// assert_eq!(config.sidecar.listen_addr, "0.0.0.0:8090");
/// assert_eq!(config.handler.cookie_name, "lemonldap");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    /// Sidecar server configuration.
    #[serde(default)]
    pub sidecar: SidecarSection,

    /// Telemetry configuration (metrics, logging).
    #[serde(default)]
    pub telemetry: TelemetrySection,

    /// Access-control handler configuration.
    #[serde(default)]
    pub handler: HandlerConf,
}

impl GatewayConfig {
    /// Create a new configuration builder.
    #[must_use]
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if an address is malformed, proxy
    /// mode lacks an upstream, or the handler section is inconsistent.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .sidecar
            .listen_addr
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::invalid_value(
                "sidecar.listen_addr",
                format!("invalid socket address: {}", self.sidecar.listen_addr),
            ));
        }

        if self.sidecar.mode == SidecarMode::Proxy {
            match &self.sidecar.upstream_url {
                None => {
                    return Err(ConfigError::invalid_value(
                        "sidecar.upstream_url",
                        "required in proxy mode",
                    ))
                }
                Some(url) if !url.starts_with("http://") && !url.starts_with("https://") => {
                    return Err(ConfigError::invalid_value(
                        "sidecar.upstream_url",
                        "must start with http:// or https://",
                    ))
                }
                Some(_) => {}
            }
        }

        if self.telemetry.metrics.enabled
            && self
                .telemetry
                .metrics
                .addr
                .parse::<std::net::SocketAddr>()
                .is_err()
        {
            return Err(ConfigError::invalid_value(
                "telemetry.metrics.addr",
                format!("invalid socket address: {}", self.telemetry.metrics.addr),
            ));
        }

        self.handler.validate()
    }

    /// Development preset: pretty debug logs.
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.telemetry.logging.level = "debug".to_string();
        config.telemetry.logging.format = crate::LogFormat::Pretty;
        config.telemetry.logging.ansi_enabled = true;
        config.telemetry.logging.include_location = true;
        config
    }
}

/// Builder for [`GatewayConfig`].
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    sidecar: Option<SidecarSection>,
    telemetry: Option<TelemetrySection>,
    handler: Option<HandlerConf>,
}

impl GatewayConfigBuilder {
    /// Set the sidecar section.
    #[must_use]
    pub fn sidecar(mut self, sidecar: SidecarSection) -> Self {
        self.sidecar = Some(sidecar);
        self
    }

    /// Set the telemetry section.
    #[must_use]
    pub fn telemetry(mut self, telemetry: TelemetrySection) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Set the handler section.
    #[must_use]
    pub fn handler(mut self, handler: HandlerConf) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Build the configuration. Unset sections use their defaults.
    #[must_use]
    pub fn build(self) -> GatewayConfig {
        GatewayConfig {
            sidecar: self.sidecar.unwrap_or_default(),
            telemetry: self.telemetry.unwrap_or_default(),
            handler: self.handler.unwrap_or_default(),
        }
    }

    /// Build and validate the configuration.
    pub fn build_validated(self) -> Result<GatewayConfig, ConfigError> {
        let config = self.build();
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(GatewayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = GatewayConfig::builder()
            .sidecar(SidecarSection {
                listen_addr: "127.0.0.1:3000".to_string(),
                ..Default::default()
            })
            .build();
        assert_eq!(config.sidecar.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.telemetry.service_name, "gatehouse");
    }

    #[test]
    fn test_proxy_mode_requires_upstream() {
        let result = GatewayConfig::builder()
            .sidecar(SidecarSection {
                mode: SidecarMode::Proxy,
                ..Default::default()
            })
            .build_validated();
        assert!(matches!(result, Err(ConfigError::InvalidValue { field, .. }) if field == "sidecar.upstream_url"));
    }

    #[test]
    fn test_invalid_listen_addr() {
        let config = GatewayConfig::builder()
            .sidecar(SidecarSection {
                listen_addr: "nowhere".to_string(),
                ..Default::default()
            })
            .build();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_development_preset() {
        let config = GatewayConfig::development();
        assert_eq!(config.telemetry.logging.level, "debug");
        assert_eq!(config.telemetry.logging.format, crate::LogFormat::Pretty);
    }
}
