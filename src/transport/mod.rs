// Arcvet columnar archive validator.

//! Filesystem abstraction to read archives.
//!
//! The validator is strictly read-only, so transports expose only read
//! operations. Transport operations return std::io::Result to reflect their
//! narrower focus.
//!
//! A transport has a root location, typically the top directory of the
//! archive; below that point everything is accessed with a relative path.
//! Files in arcvet archives have bounded size and fit in memory, so this does
//! not need to support streaming or partial reads.

use std::io;
use std::sync::Arc;

use bytes::Bytes;

pub mod container;
pub mod local;

/// Shared handle on an open transport.
pub type TransportRef = Arc<dyn Transport>;

/// Kind of directory entry a transport can report.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Kind {
    File,
    Dir,
    Unknown,
}

/// Abstracted read-only IO to access an archive.
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Read the contents of a directory under this transport, without
    /// recursing down.
    ///
    /// Returned names are sorted, and do not contain "." and "..".
    fn list_dir(&self, relpath: &str) -> io::Result<ListDir>;

    /// Get one complete file.
    fn read_file(&self, relpath: &str) -> io::Result<Bytes>;

    /// Check the kind and size of an entry.
    fn metadata(&self, relpath: &str) -> io::Result<Metadata>;

    /// Make a new transport addressing a subdirectory.
    fn sub_transport(&self, relpath: &str) -> TransportRef;

    /// Human-readable location for messages.
    fn describe(&self) -> String;
}

impl dyn Transport + '_ {
    /// True if the entry exists and is a plain file.
    pub fn is_file(&self, relpath: &str) -> io::Result<bool> {
        match self.metadata(relpath) {
            Ok(metadata) => Ok(metadata.kind == Kind::File),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Directory listing split by entry kind, each sorted by name.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ListDir {
    pub files: Vec<String>,
    pub dirs: Vec<String>,
}

/// Metadata of one directory entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Metadata {
    pub kind: Kind,
    /// Size in bytes.
    pub len: u64,
}
