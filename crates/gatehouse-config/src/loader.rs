//! Configuration loader with layered approach.
//!
//! This module provides the [`ConfigLoader`] for loading configuration from
//! multiple sources: defaults, files, and environment variables.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{ConfigError, GatewayConfig, HandlerConf, HandlerKind, LogFormat, SidecarMode};

/// Configuration loader with layered approach.
///
/// The loader applies configuration in layers, with later layers overriding
/// earlier ones:
/// 1. Default values (built into the code)
/// 2. Configuration file (TOML or JSON)
/// 3. An optional LemonLDAP::NG `lmConf` JSON export for the handler section
/// 4. Environment variables
///
/// # Example
///
/// ```no_run
/// use gatehouse_config::ConfigLoader;
///
/// # fn main() -> Result<(), gatehouse_config::ConfigError> {
/// let config = ConfigLoader::new()
///     .with_file("gatehouse.toml")?
///     .with_env_prefix("GATEHOUSE")
///     .load()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct ConfigLoader {
    config: GatewayConfig,
    env_prefix: Option<String>,
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigLoader {
    /// Create a new configuration loader starting from defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: GatewayConfig::default(),
            env_prefix: None,
        }
    }

    /// Start with development preset configuration.
    #[must_use]
    pub fn with_development(mut self) -> Self {
        self.config = GatewayConfig::development();
        self
    }

    /// Load configuration from a file.
    ///
    /// Supports TOML (.toml) and JSON (.json) formats, chosen by extension.
    pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        self.config = read_file(path.as_ref())?;
        Ok(self)
    }

    /// Load configuration from a file if it exists.
    pub fn with_optional_file<P: AsRef<Path>>(self, path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            self.with_file(path)
        } else {
            Ok(self)
        }
    }

    /// Replace the handler section with a LemonLDAP::NG configuration export.
    pub fn with_handler_file<P: AsRef<Path>>(mut self, path: P) -> Result<Self, ConfigError> {
        self.config.handler = read_file::<HandlerConf>(path.as_ref())?;
        Ok(self)
    }

    /// Load configuration from a string.
    ///
    /// # Example
    ///
    /// ```
    /// use gatehouse_config::ConfigLoader;
    ///
    /// let toml = r#"
    ///     [sidecar]
    ///     listen_addr = "127.0.0.1:3000"
    /// "#;
    ///
    /// let config = ConfigLoader::new()
    ///     .with_string(toml, "toml")
    ///     .unwrap()
    ///     .load()
    ///     .unwrap();
    ///
    /// assert_eq!(config.sidecar.listen_addr, "127.0.0.1:3000");
    /// ```
    pub fn with_string(mut self, content: &str, format: &str) -> Result<Self, ConfigError> {
        self.config = parse(content, &format.to_lowercase(), format)?;
        Ok(self)
    }

    /// Set environment variable prefix for overrides.
    ///
    /// Environment variables use the format `PREFIX__SECTION__KEY`, e.g.
    /// `GATEHOUSE__HANDLER__PORTAL=https://auth.example.com/`.
    #[must_use]
    pub fn with_env_prefix(mut self, prefix: &str) -> Self {
        self.env_prefix = Some(prefix.to_uppercase());
        self
    }

    /// Load a `.env` file for environment variables, if present.
    #[must_use]
    pub fn with_dotenv(self) -> Self {
        let _ = dotenvy::dotenv();
        self
    }

    /// Apply environment overrides and validate.
    pub fn load(mut self) -> Result<GatewayConfig, ConfigError> {
        if let Some(prefix) = self.env_prefix.take() {
            self.apply_env_overrides(&prefix)?;
        }
        self.config.validate()?;
        Ok(self.config)
    }

    /// Finalize without validation.
    #[must_use]
    pub fn load_unvalidated(self) -> GatewayConfig {
        self.config
    }

    fn apply_env_overrides(&mut self, prefix: &str) -> Result<(), ConfigError> {
        let env_vars: HashMap<String, String> = env::vars()
            .filter(|(k, _)| k.starts_with(prefix))
            .collect();

        for (key, value) in env_vars {
            self.apply_env_var(&key, &value, prefix)?;
        }

        Ok(())
    }

    fn apply_env_var(&mut self, key: &str, value: &str, prefix: &str) -> Result<(), ConfigError> {
        let key_without_prefix = key
            .strip_prefix(prefix)
            .and_then(|k| k.strip_prefix("__"))
            .ok_or_else(|| ConfigError::env_parse_error(key, "invalid key format"))?;

        let parts: Vec<&str> = key_without_prefix.split("__").collect();
        let sidecar = &mut self.config.sidecar;
        let telemetry = &mut self.config.telemetry;
        let handler = &mut self.config.handler;

        match parts.as_slice() {
            // Sidecar section
            ["SIDECAR", "LISTEN_ADDR"] => sidecar.listen_addr = value.to_string(),
            ["SIDECAR", "MODE"] => {
                sidecar.mode = match value.to_lowercase().as_str() {
                    "auth_request" => SidecarMode::AuthRequest,
                    "proxy" => SidecarMode::Proxy,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'auth_request' or 'proxy'",
                        ))
                    }
                };
            }
            ["SIDECAR", "UPSTREAM_URL"] => sidecar.upstream_url = non_empty(value),
            ["SIDECAR", "UPSTREAM_TIMEOUT_SECS"] => sidecar.upstream_timeout_secs = integer(key, value)?,
            ["SIDECAR", "SHUTDOWN_TIMEOUT_SECS"] => sidecar.shutdown_timeout_secs = integer(key, value)?,

            // Telemetry section
            ["TELEMETRY", "SERVICE_NAME"] => telemetry.service_name = value.to_string(),
            ["TELEMETRY", "METRICS", "ENABLED"] => telemetry.metrics.enabled = boolean(key, value)?,
            ["TELEMETRY", "METRICS", "ADDR"] => telemetry.metrics.addr = value.to_string(),
            ["TELEMETRY", "LOGGING", "LEVEL"] => telemetry.logging.level = value.to_string(),
            ["TELEMETRY", "LOGGING", "FORMAT"] => {
                telemetry.logging.format = match value.to_lowercase().as_str() {
                    "json" => LogFormat::Json,
                    "pretty" => LogFormat::Pretty,
                    _ => {
                        return Err(ConfigError::env_parse_error(
                            key,
                            "expected 'json' or 'pretty'",
                        ))
                    }
                };
            }
            ["TELEMETRY", "LOGGING", "ANSI_ENABLED"] => {
                telemetry.logging.ansi_enabled = boolean(key, value)?;
            }

            // Handler section
            ["HANDLER", "PORTAL"] => handler.portal = value.to_string(),
            ["HANDLER", "COOKIE_NAME"] => handler.cookie_name = value.to_string(),
            ["HANDLER", "DOMAIN"] => handler.domain = value.to_string(),
            ["HANDLER", "TIMEOUT"] => handler.timeout = integer(key, value)?,
            ["HANDLER", "TIMEOUT_ACTIVITY"] => handler.timeout_activity = integer(key, value)?,
            ["HANDLER", "KEY"] => handler.key = non_empty(value),
            ["HANDLER", "LOOP_BACK_URL"] => handler.loop_back_url = value.to_string(),
            ["HANDLER", "MAINTENANCE"] => handler.maintenance = boolean(key, value)?,
            ["HANDLER", "CDA"] => handler.cda = boolean(key, value)?,
            ["HANDLER", "WHAT_TO_TRACE"] => handler.what_to_trace = value.to_string(),
            ["HANDLER", "SERVICE_TOKEN_TTL"] => handler.service_token_ttl = integer(key, value)?,
            ["HANDLER", "COLLABORATOR_TIMEOUT"] => {
                handler.collaborator_timeout = integer(key, value)?;
            }
            ["HANDLER", "HANDLER_TYPE"] => {
                handler.handler_type = serde_json::from_value::<HandlerKind>(
                    serde_json::Value::String(value.to_string()),
                )
                .map_err(|_| ConfigError::env_parse_error(key, "unknown handler type"))?;
            }

            // Unknown key - ignore
            _ => {}
        }

        Ok(())
    }
}

fn read_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::file_not_found(path));
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::read_error(path, e))?;
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .unwrap_or_default();
    parse(&content, &extension, &path.display().to_string())
}

fn parse<T: DeserializeOwned>(content: &str, format: &str, origin: &str) -> Result<T, ConfigError> {
    match format {
        "toml" => Ok(toml::from_str(content)?),
        "json" => Ok(serde_json::from_str(content)?),
        _ => Err(ConfigError::invalid_value(
            "format",
            format!("unsupported configuration format: {origin}"),
        )),
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn integer<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .parse()
        .map_err(|_| ConfigError::env_parse_error(key, "expected integer"))
}

fn boolean(key: &str, value: &str) -> Result<bool, ConfigError> {
    parse_bool(value).ok_or_else(|| ConfigError::env_parse_error(key, "expected boolean"))
}

/// Parse a boolean from a string.
fn parse_bool(s: &str) -> Option<bool> {
    match s.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_loader_new() {
        let config = ConfigLoader::new().load().unwrap();
        assert_eq!(config.sidecar.listen_addr, "0.0.0.0:8090");
    }

    #[test]
    fn test_loader_with_string_toml() {
        let toml = r#"
            [sidecar]
            listen_addr = "127.0.0.1:3000"

            [handler]
            portal = "https://auth.example.com/"
            cookieName = "llng"

            [handler.locationRules."app.example.com"]
            "^/admin" = "$uid eq 'root'"
            default = "accept"
        "#;

        let config = ConfigLoader::new()
            .with_string(toml, "toml")
            .unwrap()
            .load()
            .unwrap();

        assert_eq!(config.sidecar.listen_addr, "127.0.0.1:3000");
        assert_eq!(config.handler.cookie_name, "llng");
        let rules = &config.handler.location_rules["app.example.com"];
        assert_eq!(rules.get_index(0).map(|(k, _)| k.as_str()), Some("^/admin"));
    }

    #[test]
    fn test_loader_with_string_json() {
        let json = r#"{"handler": {"timeout": 600, "timeoutActivity": 60}}"#;
        let config = ConfigLoader::new()
            .with_string(json, "json")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.handler.timeout, 600);
        assert_eq!(config.handler.timeout_activity, 60);
    }

    #[test]
    fn test_loader_unsupported_format() {
        assert!(ConfigLoader::new().with_string("", "yaml").is_err());
    }

    #[test]
    fn test_loader_with_file_not_found() {
        let result = ConfigLoader::new().with_file("/nonexistent/gatehouse.toml");
        assert!(matches!(result, Err(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_loader_with_optional_file_not_found() {
        let config = ConfigLoader::new()
            .with_optional_file("/nonexistent/gatehouse.toml")
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.sidecar.listen_addr, "0.0.0.0:8090");
    }

    #[test]
    fn test_loader_with_handler_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"portal": "https://sso.example.org/", "handlerType": "AuthBasic"}}"#
        )
        .unwrap();

        let config = ConfigLoader::new()
            .with_handler_file(file.path())
            .unwrap()
            .load()
            .unwrap();
        assert_eq!(config.handler.portal, "https://sso.example.org/");
        assert_eq!(config.handler.handler_type, HandlerKind::AuthBasic);
    }

    #[test]
    fn test_loader_rejects_storage_without_options() {
        let json = r#"{"handler": {"globalStorage": "rest"}}"#;
        let result = ConfigLoader::new().with_string(json, "json").unwrap().load();
        assert!(matches!(result, Err(ConfigError::MissingStorageOptions { .. })));
    }

    #[test]
    fn test_parse_bool() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool("on"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn test_apply_env_var_sidecar() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__SIDECAR__LISTEN_ADDR", "192.168.1.1:9000", "TEST")
            .unwrap();
        loader.apply_env_var("TEST__SIDECAR__MODE", "proxy", "TEST").unwrap();
        assert_eq!(loader.config.sidecar.listen_addr, "192.168.1.1:9000");
        assert_eq!(loader.config.sidecar.mode, SidecarMode::Proxy);
    }

    #[test]
    fn test_apply_env_var_handler() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__HANDLER__PORTAL", "https://auth.example.net/", "TEST")
            .unwrap();
        loader.apply_env_var("TEST__HANDLER__TIMEOUT_ACTIVITY", "900", "TEST").unwrap();
        loader.apply_env_var("TEST__HANDLER__HANDLER_TYPE", "DevOpsST", "TEST").unwrap();
        loader.apply_env_var("TEST__HANDLER__CDA", "yes", "TEST").unwrap();
        assert_eq!(loader.config.handler.portal, "https://auth.example.net/");
        assert_eq!(loader.config.handler.timeout_activity, 900);
        assert_eq!(loader.config.handler.handler_type, HandlerKind::DevOpsSt);
        assert!(loader.config.handler.cda);
    }

    #[test]
    fn test_apply_env_var_invalid_integer() {
        let mut loader = ConfigLoader::new();
        let result = loader.apply_env_var("TEST__HANDLER__TIMEOUT", "soon", "TEST");
        assert!(result.is_err());
    }

    #[test]
    fn test_apply_env_var_log_format() {
        let mut loader = ConfigLoader::new();
        loader
            .apply_env_var("TEST__TELEMETRY__LOGGING__FORMAT", "pretty", "TEST")
            .unwrap();
        assert_eq!(loader.config.telemetry.logging.format, LogFormat::Pretty);
    }
}
