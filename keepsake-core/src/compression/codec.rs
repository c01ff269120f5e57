/*!
Byte-level codecs and the enums that name them in compression headers.
*/

use crate::{KeepsakeError, Result};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

/// Compression algorithms in default rank order (best first)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionMethod {
    Gzip,
    Zlib,
    Deflate,
}

impl CompressionMethod {
    /// Default ranking. `Deflate` is last and is the guaranteed fallback.
    pub const RANKED: [CompressionMethod; 3] = [
        CompressionMethod::Gzip,
        CompressionMethod::Zlib,
        CompressionMethod::Deflate,
    ];

    pub fn name(&self) -> &'static str {
        self.codec().algorithm_name()
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::RANKED.into_iter().find(|method| method.name() == name)
    }

    pub fn codec(&self) -> &'static dyn Codec {
        match self {
            CompressionMethod::Gzip => &GzipCodec,
            CompressionMethod::Zlib => &ZlibCodec,
            CompressionMethod::Deflate => &DeflateCodec,
        }
    }
}

/// Effort level, mapped onto the codec's native scale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Fast,
    #[default]
    Default,
    Best,
}

impl CompressionLevel {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionLevel::Fast => "fast",
            CompressionLevel::Default => "default",
            CompressionLevel::Best => "best",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "fast" => Some(CompressionLevel::Fast),
            "default" => Some(CompressionLevel::Default),
            "best" => Some(CompressionLevel::Best),
            _ => None,
        }
    }

    fn flate2(&self) -> Compression {
        match self {
            CompressionLevel::Fast => Compression::fast(),
            CompressionLevel::Default => Compression::default(),
            CompressionLevel::Best => Compression::best(),
        }
    }
}

/// Text-safe encoding of the compressed bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadEncoding {
    #[default]
    Base64,
    Base64Url,
}

impl PayloadEncoding {
    pub fn name(&self) -> &'static str {
        match self {
            PayloadEncoding::Base64 => "base64",
            PayloadEncoding::Base64Url => "base64url",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "base64" => Some(PayloadEncoding::Base64),
            "base64url" => Some(PayloadEncoding::Base64Url),
            _ => None,
        }
    }

    pub fn encode(&self, bytes: &[u8]) -> String {
        match self {
            PayloadEncoding::Base64 => STANDARD.encode(bytes),
            PayloadEncoding::Base64Url => URL_SAFE_NO_PAD.encode(bytes),
        }
    }

    pub fn decode(&self, text: &str) -> Result<Vec<u8>> {
        let decoded = match self {
            PayloadEncoding::Base64 => STANDARD.decode(text),
            PayloadEncoding::Base64Url => URL_SAFE_NO_PAD.decode(text),
        };
        decoded.map_err(|e| {
            KeepsakeError::compression(format!("invalid {} payload: {e}", self.name()))
        })
    }
}

/// Compression abstraction for payload bytes
///
/// Implementations must either produce the full output or fail; a partially
/// drained stream is never returned as a result.
pub trait Codec: Send + Sync {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>>;

    /// Name written into the compression header
    fn algorithm_name(&self) -> &'static str;
}

fn finish<W: Write>(mut encoder: W, data: &[u8], name: &str) -> Result<W> {
    encoder.write_all(data).map_err(|e| {
        KeepsakeError::compression(format!("{name}: failed to write data for compression: {e}"))
    })?;
    Ok(encoder)
}

fn drain<R: Read>(mut decoder: R, name: &str) -> Result<Vec<u8>> {
    let mut decompressed = Vec::new();
    decoder.read_to_end(&mut decompressed).map_err(|e| {
        KeepsakeError::compression(format!("{name}: failed to decompress data: {e}"))
    })?;
    Ok(decompressed)
}

/// Gzip (DEFLATE with gzip framing and CRC32 trailer)
#[derive(Debug, Clone, Copy, Default)]
pub struct GzipCodec;

impl Codec for GzipCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        finish(GzEncoder::new(Vec::new(), level.flate2()), data, "gzip")?
            .finish()
            .map_err(|e| KeepsakeError::compression(format!("gzip: failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        drain(GzDecoder::new(compressed_data), "gzip")
    }

    fn algorithm_name(&self) -> &'static str {
        "gzip"
    }
}

/// Zlib (DEFLATE with zlib framing and Adler-32 trailer)
#[derive(Debug, Clone, Copy, Default)]
pub struct ZlibCodec;

impl Codec for ZlibCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        finish(ZlibEncoder::new(Vec::new(), level.flate2()), data, "zlib")?
            .finish()
            .map_err(|e| KeepsakeError::compression(format!("zlib: failed to finish compression: {e}")))
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        drain(ZlibDecoder::new(compressed_data), "zlib")
    }

    fn algorithm_name(&self) -> &'static str {
        "zlib"
    }
}

/// Raw DEFLATE, no framing. Always available; also backs the legacy `LZ:` format.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeflateCodec;

impl Codec for DeflateCodec {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        finish(DeflateEncoder::new(Vec::new(), level.flate2()), data, "deflate")?
            .finish()
            .map_err(|e| {
                KeepsakeError::compression(format!("deflate: failed to finish compression: {e}"))
            })
    }

    fn decompress(&self, compressed_data: &[u8]) -> Result<Vec<u8>> {
        drain(DeflateDecoder::new(compressed_data), "deflate")
    }

    fn algorithm_name(&self) -> &'static str {
        "deflate"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_codec_roundtrips() {
        let original = b"This is some test data that should compress well because it repeats. ".repeat(10);
        for method in CompressionMethod::RANKED {
            let codec = method.codec();
            let compressed = codec.compress(&original, CompressionLevel::Default).unwrap();
            assert!(compressed.len() < original.len(), "{} did not shrink", codec.algorithm_name());
            assert_eq!(codec.decompress(&compressed).unwrap(), original);
        }
    }

    #[test]
    fn test_levels() {
        let data = b"Some test data to compress with different levels".repeat(20);
        let codec = GzipCodec;
        let fast = codec.compress(&data, CompressionLevel::Fast).unwrap();
        let best = codec.compress(&data, CompressionLevel::Best).unwrap();
        assert!(best.len() <= fast.len());
        assert_eq!(codec.decompress(&fast).unwrap(), data);
        assert_eq!(codec.decompress(&best).unwrap(), data);
    }

    #[test]
    fn test_invalid_compressed_data() {
        assert!(GzipCodec.decompress(b"this is not gzip data").is_err());
        assert!(ZlibCodec.decompress(b"this is not zlib data").is_err());
    }

    #[test]
    fn test_names_roundtrip() {
        for method in CompressionMethod::RANKED {
            assert_eq!(CompressionMethod::from_name(method.name()), Some(method));
        }
        assert_eq!(CompressionMethod::from_name("brotli"), None);
        assert_eq!(CompressionLevel::from_name("best"), Some(CompressionLevel::Best));
        assert_eq!(PayloadEncoding::from_name("base64url"), Some(PayloadEncoding::Base64Url));
    }

    #[test]
    fn test_encodings() {
        let bytes = [0u8, 250, 251, 252, 253, 254, 255];
        for encoding in [PayloadEncoding::Base64, PayloadEncoding::Base64Url] {
            let text = encoding.encode(&bytes);
            assert_eq!(encoding.decode(&text).unwrap(), bytes);
        }
        assert!(PayloadEncoding::Base64.decode("not base64!!").is_err());
    }
}
