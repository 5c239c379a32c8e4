// Arcvet columnar archive validator.

// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

//! The checksum layer: MD5 manifests for files, CRC32 for blobs.
//!
//! Blob data is stored snappy-compressed; the CRC32 covers the uncompressed
//! bytes and is recomputed in a single streaming decompress-and-hash pass,
//! never reading the blob twice.

use std::io::Read;

use bytes::Bytes;
use md5::{Digest, Md5};
use snap::read::FrameDecoder;

use crate::*;

/// Streaming chunk size for the decompress-and-hash pass.
const CRC_CHUNK: usize = 64 * 1024;

/// One `(digest, filename)` line of an MD5 manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ManifestEntry {
    /// Lowercase hex digest, 32 digits.
    pub digest: String,
    pub filename: String,
}

/// Hex MD5 of a byte string.
pub fn md5_hex(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Parse an MD5 manifest: one entry per line, `<hex-digest>  <filename>`.
pub fn parse_manifest(bytes: &[u8], object: &str) -> Result<Vec<ManifestEntry>> {
    let text = std::str::from_utf8(bytes).map_err(|_| Error::BadManifest {
        object: object.to_string(),
        line: 0,
    })?;
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let bad = || Error::BadManifest {
            object: object.to_string(),
            line: idx + 1,
        };
        let (digest, filename) = line.split_once(' ').ok_or_else(bad)?;
        let filename = filename.trim_start();
        if digest.len() != 32
            || !digest.bytes().all(|b| b.is_ascii_hexdigit())
            || filename.is_empty()
        {
            return Err(bad());
        }
        entries.push(ManifestEntry {
            digest: digest.to_ascii_lowercase(),
            filename: filename.to_string(),
        });
    }
    Ok(entries)
}

/// Decompress a snappy blob while hashing it, in one pass.
///
/// Returns the uncompressed bytes together with their CRC32.
pub fn decompress_and_crc(compressed: &[u8]) -> std::io::Result<(Bytes, u32)> {
    let mut decoder = FrameDecoder::new(compressed);
    let mut hasher = crc32fast::Hasher::new();
    let mut out = Vec::new();
    let mut chunk = [0u8; CRC_CHUNK];
    loop {
        let n = decoder.read(&mut chunk)?;
        if n == 0 {
            break;
        }
        hasher.update(&chunk[..n]);
        out.extend_from_slice(&chunk[..n]);
    }
    Ok((Bytes::from(out), hasher.finalize()))
}

/// Verify one manifest entry against the actual file content.
pub fn check_manifest_entry(
    object: &str,
    entry: &ManifestEntry,
    content: &[u8],
) -> (String, Option<Error>) {
    let computed = md5_hex(content);
    if computed == entry.digest {
        (computed, None)
    } else {
        let err = Error::Md5Mismatch {
            object: object.to_string(),
            file: entry.filename.clone(),
            expected: entry.digest.clone(),
            computed: computed.clone(),
        };
        (computed, Some(err))
    }
}
