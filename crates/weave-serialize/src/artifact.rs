//! In-memory staging area for serializer file output.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

/// Named byte blobs produced by a serializer's `save` or consumed by its
/// `load`.
///
/// Serializers that can only write to a real filesystem path use
/// [`writeable_file_path`](Self::writeable_file_path), which stages the file
/// in a temporary directory and copies it into the artifact once the
/// closure returns.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MemTraceFilesArtifact {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemTraceFilesArtifact {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_files(files: BTreeMap<String, Vec<u8>>) -> Self {
        Self { files }
    }

    pub fn write(&mut self, name: impl Into<String>, content: impl Into<Vec<u8>>) {
        self.files.insert(name.into(), content.into());
    }

    pub fn read(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.files.contains_key(name)
    }

    pub fn files(&self) -> &BTreeMap<String, Vec<u8>> {
        &self.files
    }

    pub fn into_files(self) -> BTreeMap<String, Vec<u8>> {
        self.files
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Give `write` a filesystem path for `name`, then capture what it wrote.
    ///
    /// The staging directory is removed when this returns, whether or not
    /// `write` succeeded. If `write` fails nothing is recorded.
    pub fn writeable_file_path<T, F>(&mut self, name: &str, write: F) -> io::Result<T>
    where
        F: FnOnce(&Path) -> io::Result<T>,
    {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(staged_name(name));
        let out = write(&path)?;
        let content = fs::read(&path)?;
        tracing::debug!(file = name, bytes = content.len(), "captured staged file");
        self.files.insert(name.to_string(), content);
        Ok(out)
    }

    /// Materialize `name` on disk for a loader that only reads from paths.
    pub fn readable_file_path<T, F>(&self, name: &str, read: F) -> io::Result<T>
    where
        F: FnOnce(&Path) -> io::Result<T>,
    {
        let content = self.read(name).ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no file {name:?} in artifact"))
        })?;
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(staged_name(name));
        fs::write(&path, content)?;
        read(&path)
    }
}

// File names may contain separators; keep staging flat.
fn staged_name(name: &str) -> String {
    name.replace(['/', '\\'], "_")
}
