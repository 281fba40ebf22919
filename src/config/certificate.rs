//! Fleet server certificate reader.
//!
//! A certificate file is accepted when it contains at least one well-formed
//! PEM block: a `-----BEGIN <label>-----` line, a base64 body and the matching
//! `-----END <label>-----` line.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Why a certificate could not be used.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// The file could not be read.
    #[error("{0}")]
    Read(#[from] io::Error),

    /// The file did not contain a decodable PEM block.
    #[error("invalid PEM file")]
    InvalidPem,
}

/// A decoded PEM block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PemBlock {
    /// Label between `BEGIN` and the dashes, e.g. `CERTIFICATE`
    pub label: String,
    /// Decoded DER bytes
    pub contents: Vec<u8>,
}

/// Read `path` and return every PEM block it contains.
///
/// The file is read as bytes; text around the blocks need not be UTF-8.
pub fn read_certificate(path: &Path) -> Result<Vec<PemBlock>, CertificateError> {
    let data = std::fs::read(path)?;
    let blocks = decode_pem(&data);
    if blocks.is_empty() {
        return Err(CertificateError::InvalidPem);
    }
    Ok(blocks)
}

/// Decode all well-formed PEM blocks in `data`, skipping anything malformed.
///
/// An empty body is a valid block with no contents.
pub fn decode_pem(data: &[u8]) -> Vec<PemBlock> {
    let mut blocks = Vec::new();
    let mut lines = data.split(|&b| b == b'\n').map(<[u8]>::trim_ascii);

    while let Some(line) = lines.next() {
        let Some(label) = line
            .strip_prefix(b"-----BEGIN ")
            .and_then(|l| l.strip_suffix(b"-----"))
            .and_then(|l| std::str::from_utf8(l).ok())
        else {
            continue;
        };
        let end = format!("-----END {label}-----");

        let mut body = Vec::new();
        let mut closed = false;
        for line in lines.by_ref() {
            if line == end.as_bytes() {
                closed = true;
                break;
            }
            // Encapsulated headers (RFC 1421) carry no payload.
            if line.contains(&b':') {
                continue;
            }
            body.extend_from_slice(line);
        }
        if !closed {
            break;
        }
        if let Ok(contents) = STANDARD.decode(&body) {
            blocks.push(PemBlock {
                label: label.to_string(),
                contents,
            });
        }
    }

    blocks
}
