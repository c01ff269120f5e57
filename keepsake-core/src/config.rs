//! Configuration module for storage, quota and compression settings
//!
//! This module provides configuration structures for selecting a storage
//! backend and tuning the quota guard and compression engine. Every structure
//! has a `Default` matching the values the save store uses when nothing is
//! configured, and can be loaded from a JSON file.

use crate::compression::{CompressionLevel, CompressionMethod, PayloadEncoding};
use crate::storage::KeyLayout;
use crate::{KeepsakeError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Namespace prefixed to every storage key unless configured otherwise
pub const DEFAULT_NAMESPACE: &str = "keepsake";

/// Conservative quota assumed when the backend cannot report one (5 MiB)
pub const DEFAULT_QUOTA_BYTES: u64 = 5 * 1024 * 1024;

/// Enumeration of supported storage backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory; nothing survives a restart
    Memory,
    /// One file per key under `base_path`
    File,
}

/// Configuration structure for storage backend settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// The storage backend to use
    pub backend: StorageBackend,
    /// Directory for the file backend (defaults to `./saves`)
    pub base_path: Option<PathBuf>,
    /// Prefix of every key written by the save store
    pub namespace: String,
}

impl StorageConfig {
    pub fn memory<S: Into<String>>(namespace: S) -> Self {
        StorageConfig {
            backend: StorageBackend::Memory,
            base_path: None,
            namespace: namespace.into(),
        }
    }

    pub fn file<P: Into<PathBuf>>(base_path: P) -> Self {
        StorageConfig {
            backend: StorageBackend::File,
            base_path: Some(base_path.into()),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Parse a storage URI and create the matching configuration
    ///
    /// Supports formats:
    /// - `memory://namespace` for an in-process store
    /// - `/local/path` or `./relative/path` for a file-backed store
    pub fn from_uri(uri: &str) -> Result<StorageConfig> {
        if let Some(namespace) = uri.strip_prefix("memory://") {
            if namespace.is_empty() {
                return Ok(StorageConfig::memory(DEFAULT_NAMESPACE));
            }
            if namespace.contains('/') {
                return Err(KeepsakeError::validation(
                    "Invalid memory URI: namespace cannot contain '/'",
                ));
            }
            Ok(StorageConfig::memory(namespace))
        } else if uri.is_empty() {
            Err(KeepsakeError::validation("Invalid storage URI: empty path"))
        } else {
            Ok(StorageConfig::file(uri))
        }
    }

    /// Directory used by the file backend
    pub fn resolved_base_path(&self) -> PathBuf {
        self.base_path
            .clone()
            .unwrap_or_else(|| PathBuf::from("saves"))
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        KeyLayout::check_namespace(&self.namespace)?;
        if self.backend == StorageBackend::File
            && self.base_path.as_ref().is_some_and(|p| p.as_os_str().is_empty())
        {
            return Err(KeepsakeError::validation(
                "File backend requires a non-empty base path",
            ));
        }
        Ok(())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::memory(DEFAULT_NAMESPACE)
    }
}

/// Thresholds applied by the quota guard before every write
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Quota assumed when the backend cannot report its own
    pub quota_bytes: u64,
    /// Fraction of the quota at which stale backups are evicted
    pub soft_limit: f64,
    /// Fraction of the quota at which writes are refused
    pub hard_limit: f64,
    /// Backups older than this many days may be evicted
    pub backup_retention_days: u32,
    /// Free space wanted per byte about to be written
    pub headroom_factor: f64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        QuotaConfig {
            quota_bytes: DEFAULT_QUOTA_BYTES,
            soft_limit: 0.80,
            hard_limit: 0.95,
            backup_retention_days: 30,
            headroom_factor: 2.0,
        }
    }
}

impl QuotaConfig {
    pub fn validate(&self) -> Result<()> {
        let in_unit = |limit: f64| limit > 0.0 && limit <= 1.0;
        if self.quota_bytes == 0 {
            return Err(KeepsakeError::validation("Quota must be greater than zero"));
        }
        if !in_unit(self.soft_limit) || !in_unit(self.hard_limit) {
            return Err(KeepsakeError::validation(
                "Quota limits must lie in (0, 1]",
            ));
        }
        if self.soft_limit > self.hard_limit {
            return Err(KeepsakeError::validation(format!(
                "Soft limit {} exceeds hard limit {}",
                self.soft_limit, self.hard_limit
            )));
        }
        if !self.headroom_factor.is_finite() || self.headroom_factor < 1.0 {
            return Err(KeepsakeError::validation(
                "Headroom factor must be a finite value of at least 1.0",
            ));
        }
        Ok(())
    }
}

/// Compression engine settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Inputs shorter than this many bytes are stored as plain text
    pub threshold: usize,
    pub level: CompressionLevel,
    pub encoding: PayloadEncoding,
    /// Methods in preference order; deflate is always appended as the last resort
    pub methods: Vec<CompressionMethod>,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        CompressionConfig {
            threshold: 1024,
            level: CompressionLevel::Default,
            encoding: PayloadEncoding::Base64,
            methods: CompressionMethod::RANKED.to_vec(),
        }
    }
}

/// Top-level configuration for a persistence service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeepsakeConfig {
    pub storage: StorageConfig,
    pub quota: QuotaConfig,
    pub compression: CompressionConfig,
    /// Maximum number of in-memory snapshots kept by the ledger
    pub snapshot_capacity: usize,
}

impl Default for KeepsakeConfig {
    fn default() -> Self {
        KeepsakeConfig {
            storage: StorageConfig::default(),
            quota: QuotaConfig::default(),
            compression: CompressionConfig::default(),
            snapshot_capacity: 20,
        }
    }
}

impl KeepsakeConfig {
    /// Load and validate a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: KeepsakeConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.quota.validate()?;
        if self.snapshot_capacity == 0 {
            return Err(KeepsakeError::validation(
                "Snapshot capacity must be at least 1",
            ));
        }
        Ok(())
    }
}
