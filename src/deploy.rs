//! The post-deploy hook: work that runs once per deployed version of the
//! site (or whenever an administrator forces it), such as publishing the
//! theme's static assets and rebuilding the listings.
//!
//! The version last deployed is recorded as an artifact of its own, so the
//! hook is safe to run any number of times: without `force`, a second run
//! for the same version does nothing.

use crate::regenerate::{self, ListingRegenerator, Listings, Regenerator};
use crate::site::{self, StaticSite};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

/// The artifact holding the last deployed version.
pub const MARKER_PATH: &str = "/.deployed";

/// What a run of the hook did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Deployment {
    /// The version was already deployed and the run was not forced.
    AlreadyDeployed { version: String },

    /// The post-deploy work ran for `version`.
    Deployed { version: String },
}

/// Runs post-deploy work.
pub trait DeployHook: Send + Sync {
    /// Runs the hook. `force` bypasses the "already deployed" check.
    fn run(&self, force: bool) -> Result<Deployment>;
}

/// A [`DeployHook`] that copies static assets into the site under
/// `/static/`, rebuilds the listings, then records `version`.
pub struct DeployMarker {
    version: String,
    site: Arc<dyn StaticSite>,
    static_directory: Option<PathBuf>,
    listings: Arc<ListingRegenerator>,
}

impl DeployMarker {
    pub fn new(
        version: &str,
        site: Arc<dyn StaticSite>,
        static_directory: Option<&Path>,
        listings: Arc<ListingRegenerator>,
    ) -> DeployMarker {
        DeployMarker {
            version: version.to_owned(),
            site,
            static_directory: static_directory.map(Path::to_owned),
            listings,
        }
    }

    fn deployed_version(&self) -> Result<Option<String>> {
        Ok(self
            .site
            .read(MARKER_PATH)?
            .map(|bytes| String::from_utf8_lossy(&bytes).trim().to_owned()))
    }

    fn copy_static(&self, dir: &Path) -> Result<usize> {
        let mut copied = 0;
        for entry in WalkDir::new(dir) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            // strip_prefix() should never fail; `dir` is an ancestor of every
            // entry
            let relative = match entry.path().strip_prefix(dir) {
                Ok(relative) => relative,
                Err(_) => continue,
            };
            let path = format!("/static/{}", relative.to_string_lossy().replace('\\', "/"));
            let contents = std::fs::read(entry.path()).map_err(|err| Error::Io {
                path: entry.path().to_owned(),
                err,
            })?;
            self.site.replace(&path, &contents)?;
            copied += 1;
        }
        Ok(copied)
    }
}

impl DeployHook for DeployMarker {
    fn run(&self, force: bool) -> Result<Deployment> {
        if !force && self.deployed_version()?.as_deref() == Some(self.version.as_str()) {
            debug!(version = %self.version, "already deployed");
            return Ok(Deployment::AlreadyDeployed {
                version: self.version.clone(),
            });
        }

        if let Some(dir) = &self.static_directory {
            let copied = self.copy_static(dir)?;
            debug!(copied, "static assets copied");
        }
        self.listings.regenerate(&Listings)?;

        self.site.replace(MARKER_PATH, self.version.as_bytes())?;
        info!(version = %self.version, force, "post-deploy tasks finished");
        Ok(Deployment::Deployed {
            version: self.version.clone(),
        })
    }
}

/// The result of running the deploy hook.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure in post-deploy work.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the marker or an asset could not be published.
    #[error(transparent)]
    Site(#[from] site::Error),

    /// Returned when rebuilding the listings failed.
    #[error("rebuilding listings: {0}")]
    Regenerate(#[from] regenerate::Error),

    /// Returned for errors walking the static directory.
    #[error("walking static directory: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Returned for I/O problems reading a static asset.
    #[error("reading `{}`: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },
}
