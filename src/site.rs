//! Defines the [`StaticSite`] trait, the sink for published artifacts, with
//! [`DirectorySite`] writing a servable directory tree and [`MemorySite`]
//! keeping artifacts in memory.
//!
//! Artifacts are addressed by their public path. A path whose last segment
//! has an extension (`/index.html`, `/feed.atom`) names a file; any other
//! path (`/2021/04/hello`, `/about`) names a directory whose `index.html`
//! holds the artifact.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Where rendered artifacts are published.
pub trait StaticSite: Send + Sync {
    /// Atomically replaces the artifact at `path` with `contents`.
    fn replace(&self, path: &str, contents: &[u8]) -> Result<()>;

    /// Removes the artifact at `path`. Removing an absent artifact is a no-op.
    fn remove(&self, path: &str) -> Result<()>;

    /// Reads the artifact at `path`, if any.
    fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Splits `path` into its segments, rejecting anything that could escape
/// the site root.
fn segments(path: &str) -> Result<Vec<&str>> {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if !path.starts_with('/')
        || segments.is_empty()
        || segments
            .iter()
            .any(|s| *s == "." || *s == ".." || s.contains('\\'))
    {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(segments)
}

/// Normalizes an artifact path: `//a/b/` becomes `/a/b`.
pub fn normalize(path: &str) -> Result<String> {
    Ok(format!("/{}", segments(path)?.join("/")))
}

/// A [`StaticSite`] rooted at a directory on disk.
pub struct DirectorySite {
    root: PathBuf,
}

impl DirectorySite {
    pub fn new(root: &Path) -> DirectorySite {
        DirectorySite {
            root: root.to_owned(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The file holding the artifact at `path`.
    pub fn file_path(&self, path: &str) -> Result<PathBuf> {
        let segments = segments(path)?;
        let mut file = self.root.clone();
        file.extend(&segments);
        if !segments.last().map_or(false, |s| s.contains('.')) {
            file.push("index.html");
        }
        Ok(file)
    }
}

impl StaticSite for DirectorySite {
    fn replace(&self, path: &str, contents: &[u8]) -> Result<()> {
        let file = self.file_path(path)?;
        crate::util::write_atomically(&file, contents)
            .map_err(|err| Error::Io { path: file, err })?;
        debug!(path, bytes = contents.len(), "artifact written");
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        let file = self.file_path(path)?;
        crate::util::remove_file_if_exists(&file)
            .map_err(|err| Error::Io { path: file, err })?;
        debug!(path, "artifact removed");
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let file = self.file_path(path)?;
        match std::fs::read(&file) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io { path: file, err }),
        }
    }
}

/// An in-memory [`StaticSite`] that also counts writes.
#[derive(Default)]
pub struct MemorySite {
    artifacts: RwLock<BTreeMap<String, Vec<u8>>>,
    writes: RwLock<BTreeMap<String, usize>>,
}

impl MemorySite {
    pub fn new() -> MemorySite {
        MemorySite::default()
    }

    /// The artifact at `path` as text, if present.
    pub fn get(&self, path: &str) -> Option<String> {
        let path = normalize(path).ok()?;
        self.artifacts
            .read()
            .get(&path)
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Every artifact path currently published.
    pub fn paths(&self) -> Vec<String> {
        self.artifacts.read().keys().cloned().collect()
    }

    /// How many times the artifact at `path` has been written.
    pub fn writes(&self, path: &str) -> usize {
        normalize(path)
            .ok()
            .and_then(|path| self.writes.read().get(&path).copied())
            .unwrap_or(0)
    }
}

impl StaticSite for MemorySite {
    fn replace(&self, path: &str, contents: &[u8]) -> Result<()> {
        let path = normalize(path)?;
        *self.writes.write().entry(path.clone()).or_default() += 1;
        self.artifacts.write().insert(path, contents.to_vec());
        Ok(())
    }

    fn remove(&self, path: &str) -> Result<()> {
        self.artifacts.write().remove(&normalize(path)?);
        Ok(())
    }

    fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.artifacts.read().get(&normalize(path)?).cloned())
    }
}

/// The result of an artifact operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure publishing or removing an artifact.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned for paths that are not rooted or that try to leave the site.
    #[error("invalid artifact path `{0}`")]
    InvalidPath(String),

    /// Returned for I/O problems writing or removing artifact files.
    #[error("writing artifact `{}`: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
}
