/*!
Compression of serialized state with a self-describing header.

Compression is an optimisation, never a correctness dependency: every public
entry point on [`CompressionEngine`] falls back to returning its input when
anything goes wrong, so callers always get usable text back.
*/

mod codec;
mod header;

pub use codec::{
    Codec, CompressionLevel, CompressionMethod, DeflateCodec, GzipCodec, PayloadEncoding, ZlibCodec,
};
pub use header::{CompressionHeader, HEADER_PREFIX, HEADER_VERSION, LEGACY_PREFIX};

use crate::config::CompressionConfig;
use crate::{KeepsakeError, Result};
use serde::Serialize;
use tracing::{debug, warn};

const PROBE_TEXT: &str = "keepsake compression probe keepsake compression probe keepsake";

/// Per-call knobs; defaults come from [`CompressionConfig`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    /// Inputs shorter than this many bytes are returned unchanged
    pub threshold: usize,
    pub level: CompressionLevel,
    pub encoding: PayloadEncoding,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self::from(&CompressionConfig::default())
    }
}

impl From<&CompressionConfig> for CompressOptions {
    fn from(config: &CompressionConfig) -> Self {
        Self {
            threshold: config.threshold,
            level: config.level,
            encoding: config.encoding,
        }
    }
}

/// Size comparison for a would-be compression
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionStats {
    pub original_size: usize,
    pub stored_size: usize,
    pub ratio: f64,
    pub method: Option<String>,
}

/// Ranked-strategy compressor resolved once at construction
///
/// # Example
/// ```rust
/// use keepsake_core::CompressionEngine;
///
/// let engine = CompressionEngine::with_defaults();
/// let text = r#"{"log":"#.to_string() + &"the same line again ".repeat(200) + r#""}"#;
///
/// let stored = engine.compress(&text);
/// assert!(CompressionEngine::is_compressed(&stored));
/// assert_eq!(engine.decompress(&stored), text);
/// ```
#[derive(Debug, Clone)]
pub struct CompressionEngine {
    methods: Vec<CompressionMethod>,
    options: CompressOptions,
}

impl CompressionEngine {
    /// Probe every configured method and keep the working ones in rank order.
    /// Raw deflate is appended as a last resort if the configuration omits it.
    pub fn new(config: &CompressionConfig) -> Self {
        let mut candidates = config.methods.clone();
        if !candidates.contains(&CompressionMethod::Deflate) {
            candidates.push(CompressionMethod::Deflate);
        }

        let methods: Vec<CompressionMethod> = candidates
            .into_iter()
            .filter(|method| match probe(*method) {
                Ok(()) => true,
                Err(e) => {
                    warn!(method = method.name(), error = %e, "compression method failed self-test; skipping");
                    false
                }
            })
            .collect();

        match methods.first() {
            Some(selected) => debug!(method = selected.name(), "compression method selected"),
            None => warn!("no compression method passed self-test; payloads will be stored as plain text"),
        }

        Self {
            methods,
            options: CompressOptions::from(config),
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(&CompressionConfig::default())
    }

    pub fn selected_method(&self) -> Option<CompressionMethod> {
        self.methods.first().copied()
    }

    pub fn available_methods(&self) -> &[CompressionMethod] {
        &self.methods
    }

    pub fn options(&self) -> CompressOptions {
        self.options
    }

    /// Pure prefix check for either header generation
    pub fn is_compressed(text: &str) -> bool {
        text.starts_with(HEADER_PREFIX) || text.starts_with(LEGACY_PREFIX)
    }

    /// Compress with the engine's configured options
    pub fn compress(&self, text: &str) -> String {
        self.compress_with(text, &self.options)
    }

    /// Compress `text`, or return it unchanged when it is below the threshold,
    /// when compression would not make it strictly smaller, or when every
    /// method fails.
    pub fn compress_with(&self, text: &str, options: &CompressOptions) -> String {
        if text.len() < options.threshold {
            return text.to_string();
        }

        for method in &self.methods {
            match encode(*method, text, options) {
                Ok(encoded) if encoded.len() < text.len() => return encoded,
                Ok(encoded) => {
                    debug!(
                        method = method.name(),
                        original = text.len(),
                        compressed = encoded.len(),
                        "compression gave no gain; storing plain text"
                    );
                    return text.to_string();
                }
                Err(e) => {
                    warn!(method = method.name(), error = %e, "compression failed; trying next method");
                }
            }
        }

        if !self.methods.is_empty() {
            warn!("all compression methods failed; storing plain text");
        }
        text.to_string()
    }

    /// Decompress `text`; plain text and undecodable payloads come back unchanged
    pub fn decompress(&self, text: &str) -> String {
        if !Self::is_compressed(text) {
            return text.to_string();
        }
        match self.try_decompress(text) {
            Ok(plain) => plain,
            Err(e) => {
                warn!(error = %e, "decompression failed; treating payload as plain text");
                text.to_string()
            }
        }
    }

    /// Decompress, surfacing the failure instead of passing the input through
    pub fn try_decompress(&self, text: &str) -> Result<String> {
        if let Some(legacy) = text.strip_prefix(LEGACY_PREFIX) {
            let bytes = PayloadEncoding::Base64.decode(legacy)?;
            return into_text(DeflateCodec.decompress(&bytes)?);
        }
        if !text.starts_with(HEADER_PREFIX) {
            return Ok(text.to_string());
        }

        let (header, payload) = CompressionHeader::parse(text)?;
        if header.version != HEADER_VERSION {
            warn!(version = %header.version, "unexpected compression header version; attempting decode anyway");
        }
        let method = CompressionMethod::from_name(&header.method).ok_or_else(|| {
            KeepsakeError::compression(format!("unknown compression method '{}'", header.method))
        })?;
        let encoding = PayloadEncoding::from_name(&header.encoding).ok_or_else(|| {
            KeepsakeError::compression(format!("unknown payload encoding '{}'", header.encoding))
        })?;

        let bytes = encoding.decode(payload)?;
        into_text(method.codec().decompress(&bytes)?)
    }

    pub fn stats(&self, text: &str) -> CompressionStats {
        let stored = self.compress(text);
        let method = CompressionHeader::parse(&stored).ok().map(|(header, _)| header.method);
        CompressionStats {
            original_size: text.len(),
            stored_size: stored.len(),
            ratio: if text.is_empty() {
                1.0
            } else {
                stored.len() as f64 / text.len() as f64
            },
            method,
        }
    }
}

impl Default for CompressionEngine {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn encode(method: CompressionMethod, text: &str, options: &CompressOptions) -> Result<String> {
    let compressed = method.codec().compress(text.as_bytes(), options.level)?;
    let header = CompressionHeader::new(method.name(), options.encoding.name(), options.level.name());
    Ok(header.encode()? + &options.encoding.encode(&compressed))
}

fn into_text(bytes: Vec<u8>) -> Result<String> {
    String::from_utf8(bytes)
        .map_err(|e| KeepsakeError::compression(format!("decompressed payload is not UTF-8: {e}")))
}

fn probe(method: CompressionMethod) -> Result<()> {
    let codec = method.codec();
    let compressed = codec.compress(PROBE_TEXT.as_bytes(), CompressionLevel::Fast)?;
    if codec.decompress(&compressed)? == PROBE_TEXT.as_bytes() {
        Ok(())
    } else {
        Err(KeepsakeError::compression("probe round-trip mismatch"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn large_text() -> String {
        serde_json::json!({
            "history": vec!["cultivated for one hour and gained qi"; 200],
        })
        .to_string()
    }

    #[test]
    fn test_roundtrip_above_threshold() {
        let engine = CompressionEngine::with_defaults();
        let text = large_text();
        let stored = engine.compress(&text);
        assert!(CompressionEngine::is_compressed(&stored));
        assert!(stored.len() < text.len());
        assert_eq!(engine.decompress(&stored), text);
    }

    #[test]
    fn test_below_threshold_is_unchanged() {
        let engine = CompressionEngine::with_defaults();
        let text = r#"{"jade":1}"#;
        assert_eq!(engine.compress(text), text);
        assert_eq!(engine.compress(&engine.compress(text)), text);
    }

    #[test]
    fn test_incompressible_input_is_unchanged() {
        let engine = CompressionEngine::with_defaults();
        let options = CompressOptions {
            threshold: 0,
            ..engine.options()
        };
        // Short, high-entropy text cannot absorb the header overhead.
        let text = "q7Zp!x2#";
        assert_eq!(engine.compress_with(text, &options), text);
    }

    #[test]
    fn test_ranked_selection_respects_config() {
        let config = CompressionConfig {
            methods: vec![CompressionMethod::Zlib],
            ..CompressionConfig::default()
        };
        let engine = CompressionEngine::new(&config);
        assert_eq!(engine.selected_method(), Some(CompressionMethod::Zlib));
        assert_eq!(
            engine.available_methods(),
            &[CompressionMethod::Zlib, CompressionMethod::Deflate]
        );

        let stored = engine.compress(&large_text());
        let (header, _) = CompressionHeader::parse(&stored).unwrap();
        assert_eq!(header.method, "zlib");
    }

    #[test]
    fn test_decodes_payload_written_with_other_method() {
        let writer = CompressionEngine::new(&CompressionConfig {
            methods: vec![CompressionMethod::Deflate],
            encoding: PayloadEncoding::Base64Url,
            ..CompressionConfig::default()
        });
        let reader = CompressionEngine::with_defaults();
        let text = large_text();
        assert_eq!(reader.decompress(&writer.compress(&text)), text);
    }

    #[test]
    fn test_plain_text_passthrough() {
        let engine = CompressionEngine::with_defaults();
        assert!(!CompressionEngine::is_compressed(r#"{"a":1}"#));
        assert_eq!(engine.decompress(r#"{"a":1}"#), r#"{"a":1}"#);
    }

    #[test]
    fn test_legacy_marker() {
        let engine = CompressionEngine::with_defaults();
        let text = large_text();
        let deflated = DeflateCodec.compress(text.as_bytes(), CompressionLevel::Default).unwrap();
        let legacy = format!("{LEGACY_PREFIX}{}", PayloadEncoding::Base64.encode(&deflated));
        assert!(CompressionEngine::is_compressed(&legacy));
        assert_eq!(engine.decompress(&legacy), text);
    }

    #[test]
    fn test_corrupt_payload_passes_through() {
        let engine = CompressionEngine::with_defaults();
        let broken = r#"COMP:{"method":"gzip","encoding":"base64","level":"default","version":"1.0"}:!!!"#;
        assert_eq!(engine.decompress(broken), broken);
        assert!(engine.try_decompress(broken).is_err());

        let unknown = r#"COMP:{"method":"brotli","encoding":"base64","level":"default","version":"1.0"}:AAAA"#;
        assert_eq!(engine.decompress(unknown), unknown);
    }

    #[test]
    fn test_stats() {
        let engine = CompressionEngine::with_defaults();
        let stats = engine.stats(&large_text());
        assert!(stats.ratio < 1.0);
        assert_eq!(stats.method.as_deref(), Some("gzip"));

        let small = engine.stats("tiny");
        assert_eq!(small.ratio, 1.0);
        assert!(small.method.is_none());
    }
}
