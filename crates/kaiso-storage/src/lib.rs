//! Whole-file storage for directory snapshots and staging collections, plus
//! the link health checker.

pub mod health;

use std::path::{Path, PathBuf};

use kaiso_core::{DirectoryEntry, DirectorySnapshot, JisCode, StagingRecord, StagingSet};
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

pub use health::{
    HealthCheckConfig, HealthCheckError, LinkHealth, LinkHealthChecker, LinkHealthReport,
};

pub const CRATE_NAME: &str = "kaiso-storage";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("required input file not found: {}", path.display())]
    MissingInput { path: PathBuf },
    #[error("reading {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing {}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("writing {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("serializing staging collection")]
    Serialize(#[from] serde_json::Error),
    #[error(transparent)]
    DuplicateDirectoryCode(#[from] kaiso_core::DuplicateCode),
    #[error("duplicate staging record for JIS code {code} in {}", path.display())]
    DuplicateStagingCode { path: PathBuf, code: JisCode },
    #[error("staging file {} already exists", path.display())]
    StagingExists { path: PathBuf },
    #[error(
        "staging file {} changed on disk since it was read; rerun against the new contents",
        path.display()
    )]
    StagingChanged { path: PathBuf },
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

async fn read_required(path: &Path) -> Result<Vec<u8>, StorageError> {
    match fs::read(path).await {
        Ok(bytes) => Ok(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(StorageError::MissingInput {
            path: path.to_path_buf(),
        }),
        Err(source) => Err(StorageError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Read a required JSON file. A missing file is a [`StorageError::MissingInput`].
pub async fn read_json_file<T: DeserializeOwned>(
    path: impl AsRef<Path>,
) -> Result<T, StorageError> {
    let path = path.as_ref();
    let bytes = read_required(path).await?;
    serde_json::from_slice(&bytes).map_err(|source| StorageError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a required text file.
pub async fn read_text_file(path: impl AsRef<Path>) -> Result<String, StorageError> {
    let path = path.as_ref();
    let bytes = read_required(path).await?;
    String::from_utf8(bytes).map_err(|err| StorageError::Read {
        path: path.to_path_buf(),
        source: std::io::Error::new(std::io::ErrorKind::InvalidData, err),
    })
}

pub async fn load_directory_snapshot(
    path: impl AsRef<Path>,
) -> Result<DirectorySnapshot, StorageError> {
    let path = path.as_ref();
    let entries: Vec<DirectoryEntry> = read_json_file(path).await?;
    let snapshot = DirectorySnapshot::from_entries(entries)?;
    info!(path = %path.display(), entries = snapshot.len(), "loaded directory snapshot");
    Ok(snapshot)
}

async fn write_temp(temp_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(temp_path)
        .await?;
    file.write_all(bytes).await?;
    file.flush().await?;
    file.sync_all().await
}

/// Write bytes next to `dest` under a temp name, then rename over it.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .await
        .map_err(|source| StorageError::Write {
            path: parent.to_path_buf(),
            source,
        })?;

    let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
    if let Err(source) = write_temp(&temp_path, bytes).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::Write {
            path: temp_path,
            source,
        });
    }

    if let Err(source) = fs::rename(&temp_path, dest).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(StorageError::Write {
            path: dest.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Staging collection as read from disk, with the hash of the bytes it came from.
#[derive(Debug, Clone)]
pub struct LoadedStaging {
    pub records: StagingSet,
    pub content_hash: String,
}

/// The staging artifact. Each run reads it whole and writes it back whole;
/// the content hash taken at read time guards the write.
#[derive(Debug, Clone)]
pub struct StagingFile {
    path: PathBuf,
}

impl StagingFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn exists(&self) -> bool {
        fs::try_exists(&self.path).await.unwrap_or(false)
    }

    pub async fn load(&self) -> Result<LoadedStaging, StorageError> {
        let bytes = read_required(&self.path).await?;
        let content_hash = sha256_hex(&bytes);
        let rows: Vec<StagingRecord> =
            serde_json::from_slice(&bytes).map_err(|source| StorageError::Parse {
                path: self.path.clone(),
                source,
            })?;

        let mut records = StagingSet::new();
        for row in rows {
            if records.contains_key(&row.jis_code) {
                return Err(StorageError::DuplicateStagingCode {
                    path: self.path.clone(),
                    code: row.jis_code,
                });
            }
            records.insert(row.jis_code.clone(), row);
        }
        info!(path = %self.path.display(), records = records.len(), "loaded staging file");
        Ok(LoadedStaging {
            records,
            content_hash,
        })
    }

    /// Create the file with an empty collection. Refuses to overwrite.
    pub async fn init(&self) -> Result<(), StorageError> {
        if self.exists().await {
            return Err(StorageError::StagingExists {
                path: self.path.clone(),
            });
        }
        write_atomic(&self.path, &encode_staging(&StagingSet::new())?).await
    }

    /// Write `records` back, provided the file still hashes to `expected_hash`.
    pub async fn save(
        &self,
        records: &StagingSet,
        expected_hash: &str,
    ) -> Result<String, StorageError> {
        let current = read_required(&self.path).await?;
        if sha256_hex(&current) != expected_hash {
            return Err(StorageError::StagingChanged {
                path: self.path.clone(),
            });
        }
        let bytes = encode_staging(records)?;
        let new_hash = sha256_hex(&bytes);
        if new_hash == expected_hash {
            debug!(path = %self.path.display(), "staging unchanged; skipping write");
            return Ok(new_hash);
        }
        write_atomic(&self.path, &bytes).await?;
        info!(path = %self.path.display(), records = records.len(), "wrote staging file");
        Ok(new_hash)
    }
}

/// Pretty JSON array sorted by JIS code, newline terminated.
pub fn encode_staging(records: &StagingSet) -> Result<Vec<u8>, StorageError> {
    let rows: Vec<&StagingRecord> = records.values().collect();
    let mut bytes = serde_json::to_vec_pretty(&rows)?;
    bytes.push(b'\n');
    Ok(bytes)
}
