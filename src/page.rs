//! Defines the standalone [`Page`] entity and [`PagePath`], the validated
//! public path that doubles as a page's store key.
//!
//! A `PagePath` is canonical: trailing slashes are dropped on parsing, so
//! `/about/` and `/about` are the same key and the same artifact.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use std::str::FromStr;

static PATH_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(/[a-zA-Z0-9/]+)$").expect("valid page path regex"));

/// First segments under which the site publishes generated artifacts.
pub const RESERVED_PREFIXES: [&str; 3] = ["pages", "static", "tags"];

/// A rooted page path such as `/about` or `/projects/rust`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PagePath(String);

impl PagePath {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Deref for PagePath {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PagePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for PagePath {
    type Err = InvalidPathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = s.trim_end_matches('/');
        if !PATH_PATTERN.is_match(path) || path[1..].split('/').any(str::is_empty) {
            return Err(InvalidPathError::Malformed(s.to_owned()));
        }
        let first = path[1..].split('/').next().unwrap_or_default();
        if let Some(prefix) = RESERVED_PREFIXES
            .iter()
            .find(|prefix| prefix.eq_ignore_ascii_case(first))
        {
            return Err(InvalidPathError::Reserved(s.to_owned(), *prefix));
        }
        Ok(PagePath(path.to_owned()))
    }
}

impl TryFrom<String> for PagePath {
    type Error = InvalidPathError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<PagePath> for String {
    fn from(p: PagePath) -> String {
        p.0
    }
}

/// Returned when a submitted page path cannot be a page's path.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum InvalidPathError {
    /// Returned when the path is not a rooted alphanumeric path.
    #[error("invalid page path `{0}`: must look like `/about` or `/a/b`")]
    Malformed(String),

    /// Returned when the path lies under one of [`RESERVED_PREFIXES`].
    #[error("invalid page path `{0}`: `/{1}` is reserved for generated pages")]
    Reserved(String, &'static str),
}

/// A standalone page, keyed by its path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub path: PagePath,

    pub title: String,

    /// The name of the theme's page template used to render the page.
    pub template: String,

    #[serde(default)]
    pub body: String,

    /// When the page was last published. Absent only before the first save.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<DateTime<Utc>>,
}
