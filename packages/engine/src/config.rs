//! Session configuration.

use crate::SyncError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_DEBOUNCE_MS: u64 = 200;

/// Settings for one [`crate::SyncSession`]. Missing keys take defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Quiet period after the last keystroke before a text field is sent
    pub text_debounce_ms: u64,

    /// Quiet period after the last discrete set under a parent
    pub discrete_debounce_ms: u64,

    /// Stamped as `sheetID` on outgoing messages
    pub sheet_id: Option<String>,

    /// Stamped as `clientID` on outgoing messages
    pub client_id: Option<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            text_debounce_ms: DEFAULT_DEBOUNCE_MS,
            discrete_debounce_ms: DEFAULT_DEBOUNCE_MS,
            sheet_id: None,
            client_id: None,
        }
    }
}

impl SyncConfig {
    pub fn from_json(raw: &str) -> Result<Self, SyncError> {
        serde_json::from_str(raw).map_err(|e| SyncError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SyncError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_sheet_id(mut self, sheet_id: impl Into<String>) -> Self {
        self.sheet_id = Some(sheet_id.into());
        self
    }

    pub fn text_window(&self) -> Duration {
        Duration::from_millis(self.text_debounce_ms)
    }

    pub fn discrete_window(&self) -> Duration {
        Duration::from_millis(self.discrete_debounce_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let config = SyncConfig::from_json(r#"{"sheet_id": "42"}"#).unwrap();
        assert_eq!(config.text_debounce_ms, 200);
        assert_eq!(config.discrete_window(), Duration::from_millis(200));
        assert_eq!(config.sheet_id.as_deref(), Some("42"));
        assert_eq!(config.client_id, None);
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = SyncConfig::from_json(r#"{"text_debounce_ms": "soon"}"#).unwrap_err();
        assert!(matches!(err, SyncError::Config(_)));
    }
}
