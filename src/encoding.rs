use std::fmt;

use anyhow::{Result, anyhow};
use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8, UTF_16BE, UTF_16LE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingSource {
    Override,
    Bom,
    Detector,
    AssumedUtf8,
}

impl fmt::Display for EncodingSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EncodingSource::Override => "override",
            EncodingSource::Bom => "bom",
            EncodingSource::Detector => "detector",
            EncodingSource::AssumedUtf8 => "assumed-utf8",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone)]
pub struct EncodingDecision {
    pub encoding: &'static Encoding,
    pub source: EncodingSource,
}

#[derive(Debug, Clone)]
pub struct DecodedText {
    pub text: String,
    pub had_errors: bool,
    pub decision: EncodingDecision,
}

#[derive(Debug, Clone)]
pub struct EncodingStrategy {
    override_encoding: Option<&'static Encoding>,
    override_label: Option<String>,
}

impl EncodingStrategy {
    pub fn new(override_label: Option<&str>) -> Result<Self> {
        if let Some(label) = override_label {
            let trimmed = label.trim();
            let encoding = Encoding::for_label(trimmed.as_bytes())
                .ok_or_else(|| anyhow!("unknown encoding override '{trimmed}'"))?;
            Ok(Self {
                override_encoding: Some(encoding),
                override_label: Some(trimmed.to_string()),
            })
        } else {
            Ok(Self {
                override_encoding: None,
                override_label: None,
            })
        }
    }

    pub fn describe(&self) -> String {
        if let (Some(label), Some(enc)) = (&self.override_label, self.override_encoding) {
            format!(
                "override '{}' ({}), auto-detect disabled",
                label,
                enc.name()
            )
        } else {
            "auto-detect (BOM → detector → UTF-8)".to_string()
        }
    }

    pub fn decide(&self, bytes: &[u8]) -> EncodingDecision {
        if let Some(encoding) = self.override_encoding {
            return EncodingDecision {
                encoding,
                source: EncodingSource::Override,
            };
        }

        detect_auto(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> DecodedText {
        let decision = self.decide(bytes);
        let (cow, _encoding_used, had_errors) = decision.encoding.decode(bytes);
        DecodedText {
            text: cow.into_owned(),
            had_errors,
            decision,
        }
    }
}

/// Re-encode transformed text in the encoding the file was decoded with, so
/// a rewrite never silently converts the file to UTF-8. UTF-16 keeps its BOM
/// when one was present on the way in.
pub fn encode(text: &str, decision: &EncodingDecision) -> Vec<u8> {
    if decision.encoding == UTF_16LE || decision.encoding == UTF_16BE {
        let little_endian = decision.encoding == UTF_16LE;
        let mut bytes = Vec::with_capacity(text.len() * 2 + 2);
        if decision.source == EncodingSource::Bom {
            bytes.extend_from_slice(if little_endian {
                &[0xFF, 0xFE]
            } else {
                &[0xFE, 0xFF]
            });
        }
        for unit in text.encode_utf16() {
            let pair = if little_endian {
                unit.to_le_bytes()
            } else {
                unit.to_be_bytes()
            };
            bytes.extend_from_slice(&pair);
        }
        return bytes;
    }

    let (encoded, _, _) = decision.encoding.encode(text);
    let mut bytes = Vec::with_capacity(encoded.len() + 3);
    if decision.source == EncodingSource::Bom && decision.encoding == UTF_8 {
        bytes.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
    }
    bytes.extend_from_slice(&encoded);
    bytes
}

fn detect_auto(bytes: &[u8]) -> EncodingDecision {
    if let Some(encoding) = detect_bom(bytes) {
        return EncodingDecision {
            encoding,
            source: EncodingSource::Bom,
        };
    }

    if std::str::from_utf8(bytes).is_ok() {
        return EncodingDecision {
            encoding: UTF_8,
            source: EncodingSource::AssumedUtf8,
        };
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    let encoding = detector.guess(None, true);

    EncodingDecision {
        encoding,
        source: EncodingSource::Detector,
    }
}

fn detect_bom(bytes: &[u8]) -> Option<&'static Encoding> {
    if bytes.starts_with(&[0xEF, 0xBB, 0xBF]) {
        return Some(UTF_8);
    }
    if bytes.starts_with(&[0xFF, 0xFE]) {
        return Some(UTF_16LE);
    }
    if bytes.starts_with(&[0xFE, 0xFF]) {
        return Some(UTF_16BE);
    }

    None
}
