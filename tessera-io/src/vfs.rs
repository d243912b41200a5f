//! The blob-store abstraction over which all persistence happens.
//!
//! Backends expose offset reads, atomic whole-object appends, sizes,
//! deletion, and prefix listing with one level of directory synthesis. The
//! engine never modifies a byte it has written.

use std::collections::BTreeSet;
use std::fmt::Debug;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use dashmap::DashMap;
use tessera_error::{tessera_bail, tessera_err, TesseraResult};

/// A blob store.
pub trait Vfs: Send + Sync + Debug {
    /// Read `nbytes` starting at `offset`. Short objects yield `Truncated`.
    fn read(&self, uri: &str, offset: u64, nbytes: u64) -> TesseraResult<Bytes>;

    /// Append `data` to the object, creating it if absent.
    fn write(&self, uri: &str, data: &[u8]) -> TesseraResult<()>;

    /// The object's current size in bytes.
    fn size(&self, uri: &str) -> TesseraResult<u64>;

    /// Delete the object. Deleting a missing object is not an error.
    fn remove(&self, uri: &str) -> TesseraResult<()>;

    /// Delete every object under the prefix.
    fn remove_prefix(&self, prefix: &str) -> TesseraResult<()>;

    /// Immediate children under `prefix`, sorted. Nested objects appear as
    /// their first path component below the prefix.
    fn list(&self, prefix: &str) -> TesseraResult<Vec<String>>;

    /// Whether the object exists.
    fn is_file(&self, uri: &str) -> TesseraResult<bool>;
}

/// An in-memory blob store, used by tests and by consolidation scratch space.
#[derive(Debug, Default)]
pub struct MemoryVfs {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryVfs {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Vfs for MemoryVfs {
    fn read(&self, uri: &str, offset: u64, nbytes: u64) -> TesseraResult<Bytes> {
        let object = self
            .objects
            .get(uri)
            .ok_or_else(|| tessera_err!(NotFound: "no object at {}", uri))?;
        let end = offset
            .checked_add(nbytes)
            .ok_or_else(|| tessera_err!(InvalidArgument: "read range overflows"))?;
        if end > object.len() as u64 {
            tessera_bail!(
                Truncated: "read of [{}, {}) past end of {} ({} bytes)",
                offset, end, uri, object.len()
            );
        }
        Ok(Bytes::copy_from_slice(
            &object[offset as usize..end as usize],
        ))
    }

    fn write(&self, uri: &str, data: &[u8]) -> TesseraResult<()> {
        self.objects
            .entry(uri.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn size(&self, uri: &str) -> TesseraResult<u64> {
        self.objects
            .get(uri)
            .map(|o| o.len() as u64)
            .ok_or_else(|| tessera_err!(NotFound: "no object at {}", uri))
    }

    fn remove(&self, uri: &str) -> TesseraResult<()> {
        self.objects.remove(uri);
        Ok(())
    }

    fn remove_prefix(&self, prefix: &str) -> TesseraResult<()> {
        self.objects.retain(|k, _| !k.starts_with(prefix));
        Ok(())
    }

    fn list(&self, prefix: &str) -> TesseraResult<Vec<String>> {
        let prefix = if prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let mut children = BTreeSet::new();
        for entry in self.objects.iter() {
            if let Some(rest) = entry.key().strip_prefix(&prefix) {
                let child = match rest.find('/') {
                    Some(pos) => &rest[..pos],
                    None => rest,
                };
                if !child.is_empty() {
                    children.insert(format!("{prefix}{child}"));
                }
            }
        }
        Ok(children.into_iter().collect())
    }

    fn is_file(&self, uri: &str) -> TesseraResult<bool> {
        Ok(self.objects.contains_key(uri))
    }
}

/// A local-filesystem blob store.
#[derive(Debug)]
pub struct LocalVfs {
    root: PathBuf,
}

impl LocalVfs {
    /// A store rooted at `root`; URIs are joined below it.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_of(&self, uri: &str) -> PathBuf {
        self.root.join(uri.trim_start_matches('/'))
    }
}

impl Vfs for LocalVfs {
    fn read(&self, uri: &str, offset: u64, nbytes: u64) -> TesseraResult<Bytes> {
        let path = self.path_of(uri);
        let mut file = std::fs::File::open(&path)
            .map_err(|e| map_not_found(e, uri))?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; nbytes as usize];
        file.read_exact(&mut buf).map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                tessera_err!(Truncated: "read of {} bytes at {} past end of {}", nbytes, offset, uri)
            } else {
                e.into()
            }
        })?;
        Ok(Bytes::from(buf))
    }

    fn write(&self, uri: &str, data: &[u8]) -> TesseraResult<()> {
        let path = self.path_of(uri);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(data)?;
        Ok(())
    }

    fn size(&self, uri: &str) -> TesseraResult<u64> {
        let meta = std::fs::metadata(self.path_of(uri)).map_err(|e| map_not_found(e, uri))?;
        Ok(meta.len())
    }

    fn remove(&self, uri: &str) -> TesseraResult<()> {
        match std::fs::remove_file(self.path_of(uri)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn remove_prefix(&self, prefix: &str) -> TesseraResult<()> {
        let path = self.path_of(prefix);
        match std::fs::remove_dir_all(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list(&self, prefix: &str) -> TesseraResult<Vec<String>> {
        let dir = self.path_of(prefix);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let base = prefix.trim_end_matches('/');
        let mut children = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = Path::new(&name).to_string_lossy().into_owned();
            children.push(format!("{base}/{name}"));
        }
        children.sort();
        Ok(children)
    }

    fn is_file(&self, uri: &str) -> TesseraResult<bool> {
        Ok(self.path_of(uri).is_file())
    }
}

fn map_not_found(e: std::io::Error, uri: &str) -> tessera_error::TesseraError {
    if e.kind() == std::io::ErrorKind::NotFound {
        tessera_err!(NotFound: "no object at {}", uri)
    } else {
        e.into()
    }
}
