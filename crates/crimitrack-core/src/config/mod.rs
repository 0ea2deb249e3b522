//! Sync configuration.
//!
//! `SyncConfig` gathers every tunable of the store, the connectivity probes
//! and the sync engine. Every field has a default so partial JSON documents
//! are accepted; unknown fields are rejected.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

/// Tunables for the sync engine and its collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    /// Base URL of the application endpoint on the peer
    pub server_url: Option<String>,
    /// Tried when the primary URL is unreachable
    pub fallback_url: Option<String>,
    pub request_timeout_ms: u64,
    pub probe_timeout_ms: u64,
    /// Largest snapshot accepted for import, in bytes
    pub max_file_size: u64,
    pub allowed_extensions: Vec<String>,
    pub allowed_mime_types: Vec<String>,
    pub backup_before_import: bool,
    pub backups_to_keep: usize,
    pub batch_size: usize,
    /// Delivery attempts before an item becomes `failed`
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    /// Pause between two successful batches
    pub cooldown_ms: u64,
    /// Payloads above this many bytes are gzip + base64 encoded
    pub compression_threshold: usize,
    /// Require `ONLINE_SERVER` rather than `ONLINE_PEER` before pushing
    pub require_server_for_push: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            fallback_url: None,
            request_timeout_ms: 30_000,
            probe_timeout_ms: 3_000,
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: vec![".json".to_string()],
            allowed_mime_types: vec!["application/json".to_string(), "text/json".to_string()],
            backup_before_import: true,
            backups_to_keep: 3,
            batch_size: 10,
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 60_000,
            cooldown_ms: 1_000,
            compression_threshold: 1024,
            require_server_for_push: false,
        }
    }
}

impl SyncConfig {
    /// Parse and validate a JSON configuration document.
    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(payload)
            .map_err(|error| Error::Config(format!("invalid sync configuration: {error}")))?;
        config.validated()
    }

    /// Normalize URLs and check numeric bounds.
    pub fn validated(mut self) -> Result<Self> {
        self.server_url = normalize_url(self.server_url, "server_url")?;
        self.fallback_url = normalize_url(self.fallback_url, "fallback_url")?;

        if self.batch_size == 0 {
            return Err(Error::Config("batch_size must be at least 1".to_string()));
        }
        if self.max_attempts == 0 {
            return Err(Error::Config("max_attempts must be at least 1".to_string()));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(Error::Config(format!(
                "base_delay_ms ({}) exceeds max_delay_ms ({})",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_file_size == 0 {
            return Err(Error::Config("max_file_size must be positive".to_string()));
        }

        self.allowed_extensions = self
            .allowed_extensions
            .into_iter()
            .filter_map(|extension| normalize_text_option(Some(extension)))
            .map(|extension| {
                let extension = extension.to_ascii_lowercase();
                if extension.starts_with('.') {
                    extension
                } else {
                    format!(".{extension}")
                }
            })
            .collect();

        Ok(self)
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub const fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }
}

fn normalize_url(raw: Option<String>, field: &str) -> Result<Option<String>> {
    let Some(value) = normalize_text_option(raw) else {
        return Ok(None);
    };
    if is_http_url(&value) {
        Ok(Some(value.trim_end_matches('/').to_string()))
    } else {
        Err(Error::Config(format!(
            "{field} must include http:// or https://"
        )))
    }
}
