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

//! Classify a path as a directory archive, a container file, or an encrypted
//! wrapper, and produce an open handle on the logical root object.
//!
//! For encrypted wrappers the whole envelope is validated before the inner
//! stream is re-opened through a seekable reader.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use tracing::{debug, info};

use crate::transport::container::ContainerTransport;
use crate::transport::local::open_local_transport;
use crate::transport::TransportRef;
use crate::*;

/// How many bytes of the target the probe may read to classify it.
const PROBE_HEADER_LEN: usize = 256;

/// Length of the encrypted envelope header; the leading bytes carry the magic.
pub const ENVELOPE_HEADER_LEN: usize = 16;
/// Length of the envelope's trailing CRC32.
const ENVELOPE_TRAILER_LEN: usize = 4;

/// Storage kind of an archive root.
#[derive(Clone, Copy, Debug, Eq, PartialEq, derive_more::Display)]
pub enum ArchiveKind {
    #[display(fmt = "directory")]
    Directory,
    #[display(fmt = "container file")]
    Container,
    #[display(fmt = "encrypted container")]
    Encrypted,
}

/// A typed, open handle on the root of an archive.
#[derive(Debug)]
pub struct RootHandle {
    pub kind: ArchiveKind,
    pub transport: TransportRef,
    pub path: PathBuf,
}

/// A seekable reader over validated plaintext.
pub trait ReadSeek: Read + io::Seek + Send {}
impl<T: Read + io::Seek + Send> ReadSeek for T {}

/// Turn an opaque path into a typed root handle.
pub fn probe(path: &Path) -> Result<RootHandle> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(Error::NotFound {
                path: path.to_owned(),
            })
        }
        Err(source) => {
            return Err(Error::Unreadable {
                path: path.to_owned(),
                source,
            })
        }
    };
    if metadata.is_dir() {
        debug!(?path, "probe: directory archive");
        return Ok(RootHandle {
            kind: ArchiveKind::Directory,
            transport: open_local_transport(path)?,
            path: path.to_owned(),
        });
    }

    let header = read_header(path)?;
    if header.starts_with(ENVELOPE_MAGIC) {
        info!(?path, "probe: encrypted container");
        let mut inner = Vec::new();
        open_envelope(path)?.read_to_end(&mut inner)?;
        let transport = ContainerTransport::from_bytes(
            Bytes::from(inner),
            format!("{}(decrypted)", path.display()),
        )
        .map_err(|err| {
            if err.kind() == io::ErrorKind::InvalidData {
                Error::BadEnvelope {
                    path: path.to_owned(),
                    reason: "plaintext is not a container archive".into(),
                }
            } else {
                err.into()
            }
        })?;
        Ok(RootHandle {
            kind: ArchiveKind::Encrypted,
            transport: std::sync::Arc::new(transport),
            path: path.to_owned(),
        })
    } else if header.starts_with(CONTAINER_MAGIC) {
        debug!(?path, "probe: container file");
        Ok(RootHandle {
            kind: ArchiveKind::Container,
            transport: crate::transport::container::open_container_transport(path)?,
            path: path.to_owned(),
        })
    } else {
        Err(Error::NotAnArchive {
            path: path.to_owned(),
        })
    }
}

fn read_header(path: &Path) -> Result<Vec<u8>> {
    let mut file = File::open(path).map_err(|source| Error::Unreadable {
        path: path.to_owned(),
        source,
    })?;
    let mut header = vec![0u8; PROBE_HEADER_LEN];
    let mut filled = 0;
    while filled < header.len() {
        match file.read(&mut header[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(source) => {
                return Err(Error::Unreadable {
                    path: path.to_owned(),
                    source,
                })
            }
        }
    }
    header.truncate(filled);
    Ok(header)
}

/// Validate an encrypted envelope end-to-end and re-open the plaintext as a
/// seekable reader.
///
/// The envelope is a 16-byte header carrying the magic, the payload, and a
/// trailing little-endian CRC32 of the payload. Any framing damage is a
/// fatal bad-envelope error.
pub fn open_envelope(path: &Path) -> Result<Box<dyn ReadSeek>> {
    let raw = std::fs::read(path).map_err(|source| Error::Unreadable {
        path: path.to_owned(),
        source,
    })?;
    let bad = |reason: &str| Error::BadEnvelope {
        path: path.to_owned(),
        reason: reason.into(),
    };
    if raw.len() < ENVELOPE_HEADER_LEN + ENVELOPE_TRAILER_LEN {
        return Err(bad("file shorter than envelope framing"));
    }
    if !raw.starts_with(ENVELOPE_MAGIC) {
        return Err(bad("missing envelope magic"));
    }
    let payload = &raw[ENVELOPE_HEADER_LEN..raw.len() - ENVELOPE_TRAILER_LEN];
    let stored = u32::from_le_bytes(raw[raw.len() - ENVELOPE_TRAILER_LEN..].try_into().unwrap());
    let computed = crc32fast::hash(payload);
    if stored != computed {
        return Err(bad("payload CRC32 mismatch"));
    }
    debug!(?path, len = payload.len(), "envelope validated");
    let payload = Bytes::copy_from_slice(payload);
    Ok(Box::new(io::Cursor::new(payload)))
}

#[cfg(test)]
mod test {
    use std::fs::write;
    use std::io::Seek;

    use tempfile::TempDir;

    use super::*;

    fn envelope_bytes(payload: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(ENVELOPE_MAGIC);
        raw.resize(ENVELOPE_HEADER_LEN, 0);
        raw.extend_from_slice(payload);
        raw.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        raw
    }

    #[test]
    fn missing_path_is_not_found() {
        let tempdir = TempDir::new().unwrap();
        let err = probe(&tempdir.path().join("absent")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn directory_is_classified() {
        let tempdir = TempDir::new().unwrap();
        let root = probe(tempdir.path()).unwrap();
        assert_eq!(root.kind, ArchiveKind::Directory);
    }

    #[test]
    fn unknown_file_is_rejected() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("noise");
        write(&path, b"just some text").unwrap();
        assert!(matches!(
            probe(&path),
            Err(Error::NotAnArchive { .. })
        ));
    }

    #[test]
    fn valid_envelope_reopens_seekable() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("enc");
        write(&path, envelope_bytes(b"plaintext payload")).unwrap();
        let mut reader = open_envelope(&path).unwrap();
        let mut all = String::new();
        reader.read_to_string(&mut all).unwrap();
        assert_eq!(all, "plaintext payload");
        reader.rewind().unwrap();
        let mut byte = [0u8; 1];
        reader.read_exact(&mut byte).unwrap();
        assert_eq!(&byte, b"p");
    }

    #[test]
    fn corrupt_envelope_is_fatal() {
        let tempdir = TempDir::new().unwrap();
        let path = tempdir.path().join("enc");
        let mut raw = envelope_bytes(b"plaintext payload");
        let flip = ENVELOPE_HEADER_LEN + 3;
        raw[flip] ^= 0xff;
        write(&path, raw).unwrap();
        assert!(matches!(
            open_envelope(&path),
            Err(Error::BadEnvelope { .. })
        ));
    }
}
