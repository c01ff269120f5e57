/*!
Durable envelope written for every save.

```text
{"version":"1.2.0","timestamp":1760000000000,"checksum":"<sha256 hex>","compressed":true,"data":"COMP:{...}:H4sI..."}
```
*/

use crate::{KeepsakeError, Result};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Versioned, checksummed envelope around a serialized state document
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SaveRecord {
    /// Schema version the document was written against
    pub version: String,

    /// Milliseconds since the Unix epoch at save time
    pub timestamp: i64,

    /// SHA-256 of `payload`, lowercase hex
    pub checksum: String,

    /// Whether `payload` carries a compression header. Older records omit the field.
    #[serde(default)]
    pub compressed: bool,

    /// Serialized document, compressed or plain
    #[serde(rename = "data")]
    pub payload: String,
}

impl SaveRecord {
    /// Create a record stamped with the current time
    ///
    /// # Example
    /// ```rust
    /// use keepsake_core::SaveRecord;
    ///
    /// let record = SaveRecord::new("1.0.0", r#"{"jade":10}"#.to_string(), false);
    /// assert!(record.verify("game_main").is_ok());
    /// ```
    pub fn new<V: Into<String>>(version: V, payload: String, compressed: bool) -> Self {
        Self::with_timestamp(version, payload, compressed, Utc::now().timestamp_millis())
    }

    pub fn with_timestamp<V: Into<String>>(
        version: V,
        payload: String,
        compressed: bool,
        timestamp: i64,
    ) -> Self {
        Self {
            version: version.into(),
            timestamp,
            checksum: Self::compute_checksum(&payload),
            compressed,
            payload,
        }
    }

    /// Compute SHA-256 of `payload` as lowercase hex
    pub fn compute_checksum(payload: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(payload.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Check the payload against the stored checksum
    ///
    /// `key` only labels the error.
    pub fn verify(&self, key: &str) -> Result<()> {
        let actual = Self::compute_checksum(&self.payload);
        if actual == self.checksum {
            Ok(())
        } else {
            Err(KeepsakeError::ChecksumMismatch {
                key: key.to_string(),
                expected: self.checksum.clone(),
                actual,
            })
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| KeepsakeError::invalid_format(format!("unreadable save record: {e}")))
    }

    /// Save time as a UTC datetime, if the stored timestamp is representable
    pub fn timestamp_utc(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Age of the record at `now`, in whole milliseconds (negative if written
    /// in the future). Saturates for timestamps at the edge of the `i64` range.
    pub fn age_millis(&self, now: DateTime<Utc>) -> i64 {
        now.timestamp_millis().saturating_sub(self.timestamp)
    }
}
