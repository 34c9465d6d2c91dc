//! Defines the [`Post`] entity, its store-assigned [`PostId`], and
//! [`PostState`], the tagged publication state of a post.

use crate::markup::Markup;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::num::ParseIntError;
use std::str::FromStr;

/// The store-assigned identifier of a post. Immutable once assigned.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl fmt::Display for PostId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PostId {
    type Err = ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(PostId(s.parse()?))
    }
}

/// Where a post is in its publication lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PostState {
    /// Persisted but not public. A draft may still hold a `path` if it was
    /// published before and then pulled back.
    Draft,

    /// Public, unchanged since it went live at `since`.
    Published { since: DateTime<Utc> },

    /// Public since `since` and last re-published at `updated`.
    Edited {
        since: DateTime<Utc>,
        updated: DateTime<Utc>,
    },
}

/// A blog post.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Absent until the store first persists the post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PostId>,

    pub title: String,

    #[serde(default)]
    pub body: String,

    #[serde(default)]
    pub body_markup: Markup,

    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// The public address of the post. Assigned on first publication and
    /// kept for the life of the post.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    pub state: PostState,
}

impl Post {
    /// Creates an unsaved draft.
    pub fn new(title: String, body: String, body_markup: Markup, tags: BTreeSet<String>) -> Post {
        Post {
            id: None,
            title,
            body,
            body_markup,
            tags,
            path: None,
            state: PostState::Draft,
        }
    }

    /// The instant the post (most recently) went live, if it is live.
    pub fn published(&self) -> Option<DateTime<Utc>> {
        match self.state {
            PostState::Draft => None,
            PostState::Published { since } | PostState::Edited { since, .. } => Some(since),
        }
    }

    /// The instant the post was last (re-)published, if it is live.
    pub fn updated(&self) -> Option<DateTime<Utc>> {
        match self.state {
            PostState::Draft => None,
            PostState::Published { since } => Some(since),
            PostState::Edited { updated, .. } => Some(updated),
        }
    }

    pub fn is_draft(&self) -> bool {
        self.state == PostState::Draft
    }

    /// Whether the post has been published at least once. Decided by the
    /// presence of a path alone, never by the state.
    pub fn was_published(&self) -> bool {
        self.path.as_deref().map_or(false, |p| !p.is_empty())
    }

    /// Whether the post's artifact should currently be served.
    pub fn is_live(&self) -> bool {
        !self.is_draft() && self.was_published()
    }

    /// Splits the rendered `html` of the post at the fold marker, returning
    /// the part above it and whether anything was cut.
    pub fn summary(html: &str) -> (&str, bool) {
        const FOLD_TAG: &str = "<!-- more -->";
        match html.find(FOLD_TAG) {
            Some(i) => (&html[..i], true),
            None => (html, false),
        }
    }
}
