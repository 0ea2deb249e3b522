//! Guarding and parsing inbound snapshots

use std::path::Path;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::models::Snapshot;

/// Raw snapshot bytes plus what is known about where they came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInput {
    pub bytes: Vec<u8>,
    /// File name, used for the extension check
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    /// Recorded as `importSource`
    pub source: String,
}

impl SnapshotInput {
    /// Read a snapshot file from disk, refusing files over `max_size` bytes
    /// before reading them.
    pub async fn from_path(path: impl AsRef<Path>, max_size: u64) -> Result<Self> {
        let path = path.as_ref();
        ensure_within_limit(tokio::fs::metadata(path).await?.len(), max_size)?;
        let bytes = tokio::fs::read(path).await?;
        Ok(Self {
            bytes,
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            content_type: None,
            source: path.display().to_string(),
        })
    }
}

/// Snapshot that passed every check, with the records dropped on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedSnapshot {
    pub snapshot: Snapshot,
    pub warnings: Vec<String>,
}

pub(crate) fn ensure_within_limit(size: u64, max_size: u64) -> Result<()> {
    if size > max_size {
        return Err(Error::InputRejected(format!(
            "file too large: {size} bytes (max {max_size})"
        )));
    }
    Ok(())
}

/// Check size, extension and content type before parsing anything.
pub fn check_input(input: &SnapshotInput, config: &SyncConfig) -> Result<()> {
    ensure_within_limit(input.bytes.len() as u64, config.max_file_size)?;

    if let Some(name) = input.file_name.as_deref() {
        let extension = Path::new(name)
            .extension()
            .map(|extension| format!(".{}", extension.to_string_lossy().to_ascii_lowercase()))
            .unwrap_or_default();
        if !config.allowed_extensions.contains(&extension) {
            return Err(Error::InputRejected(format!(
                "file extension not allowed: '{extension}'"
            )));
        }
    }

    if let Some(content_type) = input.content_type.as_deref() {
        let essence = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let allowed = essence.is_empty()
            || essence.ends_with("+json")
            || config.allowed_mime_types.contains(&essence);
        if !allowed {
            return Err(Error::InputRejected(format!(
                "unexpected content type '{essence}'"
            )));
        }
    }

    Ok(())
}

/// Guard, parse and validate a snapshot.
///
/// Invalid records are dropped with a warning. A snapshot without any agenda
/// or expertise record left is refused.
pub fn validate(input: &SnapshotInput, config: &SyncConfig) -> Result<ValidatedSnapshot> {
    check_input(input, config)?;

    let value: serde_json::Value = serde_json::from_slice(&input.bytes)
        .map_err(|error| Error::InputRejected(format!("invalid JSON: {error}")))?;
    let (snapshot, warnings) = Snapshot::from_value(value)?;

    if snapshot.agenda.is_empty() && snapshot.expertises.is_empty() {
        return Err(Error::EmptySnapshot);
    }

    let counts = snapshot.counts();
    tracing::info!(
        "Validated snapshot: {} agenda, {} waitlist, {} expertises, {} documents, {} dropped",
        counts.agenda,
        counts.waitlist,
        counts.expertises,
        counts.documents,
        warnings.len()
    );
    Ok(ValidatedSnapshot { snapshot, warnings })
}
