//! Engine configuration, read from TOML.
//!
//! Every section is optional; missing keys take the defaults below.

use std::path::Path;

use serde::Deserialize;

use crate::error::EngineError;

/// Path that opens a private in-memory store.
pub const IN_MEMORY: &str = ":memory:";

/// Hard ceiling on `audit.max_window_days`, about ten years.
pub const MAX_WINDOW_DAYS: u32 = 3660;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub database: DatabaseConfig,
    pub audit: AuditConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "devcat.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuditConfig {
    /// Change listing size when the caller gives no limit.
    pub default_limit: usize,
    /// Trailing days for change-count series when the caller gives no window.
    pub default_window_days: u32,
    /// Upper bound applied to caller-supplied limits.
    pub max_limit: usize,
    /// Widest change-count series a caller may ask for.
    pub max_window_days: u32,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            default_limit: 1000,
            default_window_days: 7,
            max_limit: 10_000,
            max_window_days: 366,
        }
    }
}

impl AuditConfig {
    pub fn effective_limit(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.default_limit).min(self.max_limit)
    }

    /// `requested` or the default window, rejected when wider than the maximum.
    pub fn window_days(&self, requested: Option<u32>) -> Result<u32, EngineError> {
        let days = requested.unwrap_or(self.default_window_days);
        if days > self.max_window_days {
            return Err(EngineError::WindowTooLarge {
                requested: days,
                max: self.max_window_days,
            });
        }
        Ok(days)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn in_memory() -> Self {
        Self {
            database: DatabaseConfig {
                path: IN_MEMORY.to_string(),
            },
            ..Self::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self, EngineError> {
        let config: Self =
            toml::from_str(content).map_err(|e| EngineError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.database.path.trim().is_empty() {
            return Err(EngineError::Config("database.path must not be empty".into()));
        }
        if self.audit.max_limit == 0 {
            return Err(EngineError::Config("audit.max_limit must be positive".into()));
        }
        if self.audit.max_window_days == 0 || self.audit.max_window_days > MAX_WINDOW_DAYS {
            return Err(EngineError::Config(format!(
                "audit.max_window_days must be between 1 and {MAX_WINDOW_DAYS}"
            )));
        }
        if self.audit.default_window_days > self.audit.max_window_days {
            return Err(EngineError::Config(
                "audit.default_window_days exceeds audit.max_window_days".into(),
            ));
        }
        Ok(())
    }

    pub fn is_in_memory(&self) -> bool {
        self.database.path == IN_MEMORY
    }
}
