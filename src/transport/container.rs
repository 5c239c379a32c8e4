// Arcvet columnar archive validator.

//! Read a whole archive tree out of one concatenated container file.
//!
//! The container is a flat member list: an 8-byte magic, a little-endian u32
//! length, a json table of contents, and then the raw member bytes. Member
//! paths are `/`-separated and offsets are relative to the end of the toc.

use std::collections::BTreeMap;
use std::io;
use std::sync::Arc;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::{Kind, ListDir, Metadata, Transport, TransportRef};
use crate::CONTAINER_MAGIC;

/// One member of a container's table of contents.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub path: String,
    pub offset: u64,
    pub len: u64,
}

/// Transport over the members of a single container file.
#[derive(Clone)]
pub struct ContainerTransport {
    members: Arc<BTreeMap<String, (u64, u64)>>,
    data: Bytes,
    /// Subdirectory prefix, empty or ending in '/'.
    prefix: String,
    location: String,
}

fn bad_data(message: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.to_string())
}

impl ContainerTransport {
    /// Parse a container from its full byte content.
    pub fn from_bytes(bytes: Bytes, location: String) -> io::Result<ContainerTransport> {
        if bytes.len() < CONTAINER_MAGIC.len() + 4 || !bytes.starts_with(CONTAINER_MAGIC) {
            return Err(bad_data("not a container file"));
        }
        let toc_start = CONTAINER_MAGIC.len() + 4;
        let toc_len =
            u32::from_le_bytes(bytes[CONTAINER_MAGIC.len()..toc_start].try_into().unwrap())
                as usize;
        let data_start = toc_start
            .checked_add(toc_len)
            .filter(|end| *end <= bytes.len())
            .ok_or_else(|| bad_data("container toc extends beyond file"))?;
        let entries: Vec<TocEntry> = serde_json::from_slice(&bytes[toc_start..data_start])
            .map_err(|_| bad_data("container toc is not valid json"))?;
        let data = bytes.slice(data_start..);
        let mut members = BTreeMap::new();
        for entry in entries {
            entry
                .offset
                .checked_add(entry.len)
                .filter(|end| *end <= data.len() as u64)
                .ok_or_else(|| bad_data("container member extends beyond file"))?;
            members.insert(entry.path, (entry.offset, entry.len));
        }
        Ok(ContainerTransport {
            members: Arc::new(members),
            data,
            prefix: String::new(),
            location,
        })
    }

    fn full_path(&self, relpath: &str) -> String {
        if relpath.is_empty() {
            self.prefix.trim_end_matches('/').to_string()
        } else {
            format!("{}{}", self.prefix, relpath)
        }
    }
}

/// Open a transport on a container file on the local filesystem.
pub fn open_container_transport(path: &std::path::Path) -> io::Result<TransportRef> {
    let bytes = Bytes::from(std::fs::read(path)?);
    Ok(Arc::new(ContainerTransport::from_bytes(
        bytes,
        path.display().to_string(),
    )?))
}

impl Transport for ContainerTransport {
    fn list_dir(&self, relpath: &str) -> io::Result<ListDir> {
        let full = self.full_path(relpath);
        let prefix = if full.is_empty() {
            String::new()
        } else {
            format!("{full}/")
        };
        let mut listing = ListDir::default();
        let mut last_dir: Option<&str> = None;
        for path in self.members.keys() {
            let Some(rest) = path.strip_prefix(&prefix) else {
                continue;
            };
            match rest.split_once('/') {
                None => listing.files.push(rest.to_string()),
                Some((dir, _)) => {
                    if last_dir != Some(dir) {
                        listing.dirs.push(dir.to_string());
                        last_dir = Some(dir);
                    }
                }
            }
        }
        // BTreeMap iteration already yields sorted names.
        if listing.files.is_empty() && listing.dirs.is_empty() && !prefix.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no such member directory {full:?}"),
            ));
        }
        Ok(listing)
    }

    fn read_file(&self, relpath: &str) -> io::Result<Bytes> {
        let full = self.full_path(relpath);
        let (offset, len) = self.members.get(&full).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no member {full:?}"))
        })?;
        Ok(self.data.slice(*offset as usize..(offset + len) as usize))
    }

    fn metadata(&self, relpath: &str) -> io::Result<Metadata> {
        let full = self.full_path(relpath);
        if let Some((_, len)) = self.members.get(&full) {
            return Ok(Metadata {
                kind: Kind::File,
                len: *len,
            });
        }
        let dir_prefix = if full.is_empty() {
            String::new()
        } else {
            format!("{full}/")
        };
        if full.is_empty()
            || self
                .members
                .range(dir_prefix.clone()..)
                .next()
                .map(|(path, _)| path.starts_with(&dir_prefix))
                .unwrap_or(false)
        {
            Ok(Metadata {
                kind: Kind::Dir,
                len: 0,
            })
        } else {
            Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no member {full:?}"),
            ))
        }
    }

    fn sub_transport(&self, relpath: &str) -> TransportRef {
        let full = self.full_path(relpath);
        Arc::new(ContainerTransport {
            members: Arc::clone(&self.members),
            data: self.data.clone(),
            prefix: if full.is_empty() {
                String::new()
            } else {
                format!("{full}/")
            },
            location: self.location.clone(),
        })
    }

    fn describe(&self) -> String {
        if self.prefix.is_empty() {
            self.location.clone()
        } else {
            format!("{}!{}", self.location, self.prefix)
        }
    }
}

impl std::fmt::Debug for ContainerTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContainerTransport")
            .field("location", &self.location)
            .field("prefix", &self.prefix)
            .field("members", &self.members.len())
            .finish()
    }
}
