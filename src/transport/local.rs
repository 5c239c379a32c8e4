// Arcvet columnar archive validator.

//! Read archives from the local filesystem.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;

use super::{Kind, ListDir, Metadata, Transport, TransportRef};

/// Transport over a local directory tree.
#[derive(Clone, Debug)]
pub struct LocalTransport {
    /// Root directory for this transport.
    root: PathBuf,
}

impl LocalTransport {
    pub fn new(path: &Path) -> LocalTransport {
        LocalTransport {
            root: path.to_owned(),
        }
    }

    fn full_path(&self, relpath: &str) -> PathBuf {
        if relpath.is_empty() {
            self.root.clone()
        } else {
            self.root.join(relpath)
        }
    }
}

/// Open a transport on a local directory.
pub fn open_local_transport(path: &Path) -> io::Result<TransportRef> {
    Ok(Arc::new(LocalTransport::new(path)))
}

impl Transport for LocalTransport {
    fn list_dir(&self, relpath: &str) -> io::Result<ListDir> {
        let mut listing = ListDir::default();
        for entry in fs::read_dir(self.full_path(relpath))? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            match entry.file_type()? {
                t if t.is_dir() => listing.dirs.push(name),
                t if t.is_file() => listing.files.push(name),
                _ => (),
            }
        }
        listing.files.sort_unstable();
        listing.dirs.sort_unstable();
        Ok(listing)
    }

    fn read_file(&self, relpath: &str) -> io::Result<Bytes> {
        fs::read(self.full_path(relpath)).map(Bytes::from)
    }

    fn metadata(&self, relpath: &str) -> io::Result<Metadata> {
        let metadata = fs::metadata(self.full_path(relpath))?;
        let kind = if metadata.is_file() {
            Kind::File
        } else if metadata.is_dir() {
            Kind::Dir
        } else {
            Kind::Unknown
        };
        Ok(Metadata {
            kind,
            len: metadata.len(),
        })
    }

    fn sub_transport(&self, relpath: &str) -> TransportRef {
        Arc::new(LocalTransport {
            root: self.full_path(relpath),
        })
    }

    fn describe(&self) -> String {
        self.root.display().to_string()
    }
}
