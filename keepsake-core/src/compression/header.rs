/*!
Self-describing prefix written in front of every compressed payload.

```text
COMP:{"method":"gzip","encoding":"base64","level":"default","version":"1.0"}:<payload>
```
*/

use crate::{KeepsakeError, Result};
use serde::{Deserialize, Serialize};

pub const HEADER_PREFIX: &str = "COMP:";
pub const HEADER_VERSION: &str = "1.0";

/// Marker of the previous, header-less generation: `LZ:` + base64(raw deflate)
pub const LEGACY_PREFIX: &str = "LZ:";

/// Fields are plain strings so a payload written by a build that knows more
/// methods still parses here; unknown names are rejected at decode time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompressionHeader {
    pub method: String,
    pub encoding: String,
    pub level: String,
    pub version: String,
}

impl CompressionHeader {
    pub fn new(method: &str, encoding: &str, level: &str) -> Self {
        Self {
            method: method.to_string(),
            encoding: encoding.to_string(),
            level: level.to_string(),
            version: HEADER_VERSION.to_string(),
        }
    }

    /// Render as `COMP:<json>:`
    pub fn encode(&self) -> Result<String> {
        Ok(format!("{HEADER_PREFIX}{}:", serde_json::to_string(self)?))
    }

    /// Split `text` into its header and the payload that follows it
    pub fn parse(text: &str) -> Result<(Self, &str)> {
        let rest = text
            .strip_prefix(HEADER_PREFIX)
            .ok_or_else(|| KeepsakeError::invalid_format("missing compression header prefix"))?;

        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<CompressionHeader>();
        let header = match stream.next() {
            Some(Ok(header)) => header,
            Some(Err(e)) => {
                return Err(KeepsakeError::invalid_format(format!(
                    "malformed compression header: {e}"
                )))
            }
            None => return Err(KeepsakeError::invalid_format("empty compression header")),
        };

        let payload = rest[stream.byte_offset()..]
            .strip_prefix(':')
            .ok_or_else(|| KeepsakeError::invalid_format("compression header is not terminated by ':'"))?;

        Ok((header, payload))
    }
}
