//! TOML configuration for the form access middleware.
//!
//! Settings can be compiled in or read from a file at start-up. An optional
//! `[[forms]]` list seeds a static registry, which is handy for small
//! deployments and tests; production registries come from a store.
//!
//! # Example TOML Format
//!
//! ```toml
//! [settings]
//! default_allow = true
//! log_access = false
//! on_pipeline_error = "allow"
//! cache_ttl_secs = 300
//! fetch_timeout_ms = 2000
//! login_path = "/login"
//! home_path = "/dashboard"
//! bypass = ["/admin", "/dashboard", "/auth", "/api/me", "/api/notifications"]
//!
//! [[forms]]
//! FormCode = "OHS"
//! FormName = "OHS Inspection"
//! ModuleName = "Inspections"
//! FormUrl = "/ohs-inspection"
//! ```

use crate::error::DefaultDeniedHandler;
use crate::form::FormRegistryEntry;
use crate::middleware::{FormAccessOptions, PipelineErrorPolicy, DEFAULT_BYPASS};
use crate::registry::{FormRegistryCache, FormRegistryStore, StaticFormStore, DEFAULT_CACHE_TTL};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormAccessConfig {
    /// Global settings.
    #[serde(default)]
    pub settings: FormAccessSettings,
    /// Seed registry entries.
    #[serde(default)]
    pub forms: Vec<FormRegistryEntry>,
}

/// Middleware and cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormAccessSettings {
    /// Allow requests matching no registered form.
    #[serde(default = "default_true")]
    pub default_allow: bool,
    /// Log every decision at `info`.
    #[serde(default)]
    pub log_access: bool,
    /// Outcome when the access pipeline fails.
    #[serde(default)]
    pub on_pipeline_error: PipelineErrorPolicy,
    /// Registry cache time-to-live in seconds.
    #[serde(default = "default_ttl_secs")]
    pub cache_ttl_secs: u64,
    /// Registry fetch timeout in milliseconds. Omitted means no timeout.
    #[serde(default)]
    pub fetch_timeout_ms: Option<u64>,
    /// Login route for unauthenticated page requests.
    #[serde(default = "default_login_path")]
    pub login_path: String,
    /// Route denial pages link back to.
    #[serde(default = "default_home_path")]
    pub home_path: String,
    /// Path prefixes exempt from form checks.
    #[serde(default = "default_bypass")]
    pub bypass: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_ttl_secs() -> u64 {
    DEFAULT_CACHE_TTL.as_secs()
}

fn default_login_path() -> String {
    "/login".to_string()
}

fn default_home_path() -> String {
    "/dashboard".to_string()
}

fn default_bypass() -> Vec<String> {
    DEFAULT_BYPASS.iter().map(|p| p.to_string()).collect()
}

impl Default for FormAccessSettings {
    fn default() -> Self {
        Self {
            default_allow: true,
            log_access: false,
            on_pipeline_error: PipelineErrorPolicy::default(),
            cache_ttl_secs: default_ttl_secs(),
            fetch_timeout_ms: None,
            login_path: default_login_path(),
            home_path: default_home_path(),
            bypass: default_bypass(),
        }
    }
}

/// Error type for configuration parsing.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parsing error.
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// File I/O error.
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl FormAccessConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Example
    /// ```
    /// use axum_form_access::FormAccessConfig;
    ///
    /// let toml = r#"
    /// [settings]
    /// default_allow = false
    /// bypass = ["/health"]
    ///
    /// [[forms]]
    /// FormCode = "THEFT"
    /// FormName = "Theft Report"
    /// FormUrl = "/theft-report"
    /// "#;
    ///
    /// let config = FormAccessConfig::from_toml(toml).unwrap();
    /// assert!(!config.settings.default_allow);
    /// assert_eq!(config.forms.len(), 1);
    /// ```
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: FormAccessConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let settings = &self.settings;

        if settings.cache_ttl_secs == 0 {
            return Err(ConfigError::Invalid(
                "cache_ttl_secs must be greater than 0".to_string(),
            ));
        }
        if settings.fetch_timeout_ms == Some(0) {
            return Err(ConfigError::Invalid(
                "fetch_timeout_ms must be greater than 0".to_string(),
            ));
        }
        let paths = [
            ("login_path", &settings.login_path),
            ("home_path", &settings.home_path),
        ];
        for (name, value) in paths {
            if !value.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "{} '{}' must start with '/'",
                    name, value
                )));
            }
        }
        for prefix in &settings.bypass {
            if !prefix.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "bypass prefix '{}' must start with '/'",
                    prefix
                )));
            }
        }

        let mut codes = HashSet::new();
        for (i, form) in self.forms.iter().enumerate() {
            if form.form_code.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("Form {}: FormCode is empty", i)));
            }
            if !codes.insert(form.form_code.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "Form {}: duplicate FormCode '{}'",
                    i, form.form_code
                )));
            }
            if !form.form_url.starts_with('/') {
                return Err(ConfigError::Invalid(format!(
                    "Form {}: FormUrl '{}' must start with '/'",
                    i, form.form_url
                )));
            }
        }
        Ok(())
    }

    /// Middleware options from the settings.
    pub fn options(&self) -> FormAccessOptions {
        FormAccessOptions::new()
            .bypass(self.settings.bypass.iter().cloned())
            .default_allow(self.settings.default_allow)
            .log_access(self.settings.log_access)
            .on_pipeline_error(self.settings.on_pipeline_error)
    }

    /// Denied handler linking back to `home_path`.
    pub fn denied_handler(&self) -> DefaultDeniedHandler {
        DefaultDeniedHandler::new().with_home_path(self.settings.home_path.clone())
    }

    /// A registry cache over `store` with the configured TTL and timeout.
    pub fn cache(&self, store: impl FormRegistryStore + 'static) -> FormRegistryCache {
        let cache = FormRegistryCache::new(store)
            .with_ttl(Duration::from_secs(self.settings.cache_ttl_secs));
        match self.settings.fetch_timeout_ms {
            Some(ms) => cache.with_fetch_timeout(Duration::from_millis(ms)),
            None => cache,
        }
    }

    /// A static store over the `[[forms]]` entries.
    pub fn static_store(&self) -> StaticFormStore {
        StaticFormStore::new(self.forms.clone())
    }
}
