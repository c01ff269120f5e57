/*!
Local filesystem storage adapter implementation.
*/

use super::{KeyValueStore, QuotaEstimate};
use crate::{KeepsakeError, Result};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

const ENTRY_EXTENSION: &str = "kv";

/// Local filesystem storage adapter
///
/// Each entry is one file under the base directory, written atomically via a
/// temporary file and rename. Keys are escaped so any string is a valid key.
///
/// # Example
/// ```rust
/// use keepsake_core::storage::{FileStore, KeyValueStore};
///
/// # let dir = tempfile::TempDir::new().unwrap();
/// let store = FileStore::new(dir.path());
/// store.set("game_main", r#"{"version":"1.0.0"}"#)?;
/// assert!(store.get("game_main")?.is_some());
/// # Ok::<(), keepsake_core::KeepsakeError>(())
/// ```
#[derive(Debug, Clone)]
pub struct FileStore {
    base_dir: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(base_dir: P) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            quota: None,
        }
    }

    /// Report a native quota estimate measured from file sizes
    pub fn with_quota(mut self, quota: u64) -> Self {
        self.quota = Some(quota);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.{}", escape_key(key), ENTRY_EXTENSION))
    }

    /// Ensure the base directory exists, creating it if necessary
    fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            fs::create_dir_all(&self.base_dir).map_err(|e| {
                KeepsakeError::unavailable(format!(
                    "Failed to create directory {}: {}",
                    self.base_dir.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Bytes held by committed entries; interrupted temp writes are not counted
    fn usage_bytes(&self) -> u64 {
        let Ok(entries) = fs::read_dir(&self.base_dir) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|entry| {
                entry.path().extension().and_then(|ext| ext.to_str()) == Some(ENTRY_EXTENSION)
            })
            .filter_map(|entry| entry.metadata().ok())
            .filter(|meta| meta.is_file())
            .map(|meta| meta.len())
            .sum()
    }
}

fn map_io(context: String, e: std::io::Error) -> KeepsakeError {
    match e.kind() {
        ErrorKind::PermissionDenied => KeepsakeError::unavailable(format!("{context}: {e}")),
        _ => KeepsakeError::storage(format!("{context}: {e}")),
    }
}

impl KeyValueStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(key);
        match fs::read_to_string(&path) {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(map_io(format!("Failed to read entry {}", path.display()), e)),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.ensure_base_dir()?;

        let path = self.entry_path(key);
        let tmp_path = path.with_extension(format!("{ENTRY_EXTENSION}.tmp"));

        fs::write(&tmp_path, value)
            .map_err(|e| map_io(format!("Failed to write entry {}", tmp_path.display()), e))?;
        fs::rename(&tmp_path, &path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            map_io(format!("Failed to commit entry {}", path.display()), e)
        })
    }

    fn remove(&self, key: &str) -> Result<()> {
        let path = self.entry_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(map_io(format!("Failed to delete entry {}", path.display()), e)),
        }
    }

    fn keys(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.base_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(map_io(
                    format!("Failed to list {}", self.base_dir.display()),
                    e,
                ))
            }
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if let Some(stem) = name.strip_suffix(&format!(".{ENTRY_EXTENSION}")) {
                if let Some(key) = unescape_key(stem) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn quota_estimate(&self) -> Option<QuotaEstimate> {
        self.quota.map(|quota| QuotaEstimate {
            quota,
            usage: self.usage_bytes(),
        })
    }

    fn backend_name(&self) -> &str {
        "file"
    }
}

fn is_plain(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-')
}

/// Percent-escape every byte outside `[A-Za-z0-9_-]`
fn escape_key(key: &str) -> String {
    let mut escaped = String::with_capacity(key.len());
    for byte in key.bytes() {
        if is_plain(byte) {
            escaped.push(byte as char);
        } else {
            escaped.push_str(&format!("%{byte:02X}"));
        }
    }
    escaped
}

fn unescape_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}
