//! Credential file persistence
//!
//! The store exclusively owns the on-disk representation: a JSON-serialized
//! [`CredentialRecord`] in a file readable only by its owner. Nothing here
//! coordinates between processes; the tool assumes at most one process uses
//! a given credential file at a time.

use std::{error, io, path::{Path, PathBuf}};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs::OpenOptions;

use crate::tokens::{CredentialRecord, RefreshToken};

/// An error while loading the credential file
#[derive(Debug, Error)]
pub enum StoreError {
    /// The credential file is missing or unreadable
    #[error("unable to read credential file {}", path.display())]
    Unreadable {
        /// The path that could not be read
        path: PathBuf,
        /// The underlying I/O error
        source: io::Error,
    },
    /// The credential file does not contain a credential record
    #[error("credential file {} does not contain a credential record", path.display())]
    Malformed {
        /// The path whose contents could not be parsed
        path: PathBuf,
        /// The underlying parse error
        source: serde_json::Error,
    },
}

/// Loads a credential record from a file
///
/// The file normally holds a JSON object, but the earliest acquisition
/// tooling wrote the bare refresh-token string with no JSON wrapping; such a
/// file is read back as a record with only the refresh token set.
pub async fn load(path: &Path) -> Result<CredentialRecord, StoreError> {
    let data = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| StoreError::Unreadable {
            path: path.to_owned(),
            source,
        })?;
    parse_record(&data).map_err(|source| StoreError::Malformed {
        path: path.to_owned(),
        source,
    })
}

fn parse_record(data: &str) -> Result<CredentialRecord, serde_json::Error> {
    match serde_json::from_str(data) {
        Ok(record) => Ok(record),
        Err(err) => {
            let bare = data.trim();
            if !bare.is_empty() && !bare.starts_with('{') {
                // legacy format: the file is the refresh token itself
                Ok(CredentialRecord::from_refresh_token(RefreshToken::new(bare)))
            } else {
                Err(err)
            }
        }
    }
}

/// Saves a credential record to a file readable only by its owner
///
/// The owner-only restriction is attached to the open call itself, so a
/// write that fails partway can never leave the file more permissive than
/// mode 600.
pub async fn save(path: &Path, record: &CredentialRecord) -> Result<(), io::Error> {
    use tokio::io::AsyncWriteExt;

    let mut file_opts = OpenOptions::new();

    file_opts.create(true).truncate(true).write(true);

    #[cfg(unix)]
    file_opts.mode(0o600);

    let mut file = file_opts.open(path).await?;
    let data = serde_json::to_string_pretty(record)?;
    file.write_all(data.as_bytes()).await?;
    Ok(())
}

/// A destination for newly obtained credentials
///
/// Acquisition flows and the refresh gate hand every successful result to a
/// sink rather than opening the credential file themselves, so storage
/// policy stays out of the protocol logic and tests can capture records in
/// memory.
#[async_trait]
pub trait CredentialSink: Send {
    /// Persists a credential record
    async fn persist(
        &mut self,
        record: &CredentialRecord,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>>;
}

/// A credential sink that writes to the credential file
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
}

impl FileSink {
    /// Constructs a sink writing to the given path
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// The path this sink writes to
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialSink for FileSink {
    async fn persist(
        &mut self,
        record: &CredentialRecord,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        save(&self.path, record).await?;
        tracing::info!(path = %self.path.display(), "saved credentials");
        Ok(())
    }
}

/// A credential sink that keeps records in memory
///
/// Useful for tests and for callers that manage their own persistence.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<CredentialRecord>,
}

impl MemorySink {
    /// Constructs an empty in-memory sink
    pub const fn new() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// The most recently persisted record, if any
    pub fn last(&self) -> Option<&CredentialRecord> {
        self.records.last()
    }

    /// How many times a record has been persisted
    pub fn persist_count(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl CredentialSink for MemorySink {
    async fn persist(
        &mut self,
        record: &CredentialRecord,
    ) -> Result<(), Box<dyn error::Error + Send + Sync + 'static>> {
        self.records.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{DurationSecs, UnixTime};
    use crate::tokens::AccessToken;

    fn sample_record() -> CredentialRecord {
        let mut record = CredentialRecord::from_refresh_token(RefreshToken::new("refresh-abc"));
        record.access_token = Some(AccessToken::new("access-xyz"));
        record.expires_at = Some(UnixTime(1700000300));
        record.token_type = Some("Bearer".to_owned());
        record
    }

    #[tokio::test]
    async fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.token");

        let record = sample_record();
        save(&path, &record).await.unwrap();
        let loaded = load(&path).await.unwrap();
        assert_eq!(loaded, record);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.token");

        save(&path, &sample_record()).await.unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0, "group/other bits must be clear: {mode:o}");
    }

    #[tokio::test]
    async fn load_missing_file_is_unreadable() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.token")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unreadable { .. }));
    }

    #[tokio::test]
    async fn load_corrupt_json_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.token");
        std::fs::write(&path, "{\"refresh_token\": tru").unwrap();

        let err = load(&path).await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed { .. }));
    }

    #[tokio::test]
    async fn load_accepts_legacy_bare_token() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.token");
        std::fs::write(&path, "eyJhb.payload.sig\n").unwrap();

        let record = load(&path).await.unwrap();
        assert_eq!(record.refresh_token, RefreshToken::new("eyJhb.payload.sig"));
        assert_eq!(record.access_token, None);
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn save_overwrites_previous_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.token");

        save(&path, &sample_record()).await.unwrap();

        let mut updated = sample_record();
        updated.expires_at = Some(UnixTime(1700000300) + DurationSecs(60));
        save(&path, &updated).await.unwrap();

        assert_eq!(load(&path).await.unwrap(), updated);
    }

    #[tokio::test]
    async fn memory_sink_records_every_persist() {
        let mut sink = MemorySink::new();
        sink.persist(&sample_record()).await.unwrap();
        sink.persist(&sample_record()).await.unwrap();
        assert_eq!(sink.persist_count(), 2);
        assert_eq!(sink.last(), Some(&sample_record()));
    }
}
