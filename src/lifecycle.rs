//! The publication state machine for posts and pages. Everything here is
//! pure: functions take the entity (and, for pages, what the store currently
//! holds) and return what happened, leaving persistence and regeneration to
//! [`crate::admin`].
//!
//! Posts move between `NEW`, `DRAFT`, `PUBLISHED` and `REMOVED`:
//!
//! * saving with `draft` set always lands in [`PostState::Draft`]; a post
//!   that was live keeps its path and reports [`PostTransition::Withdrawn`]
//!   so its artifact is taken down;
//! * saving without `draft` publishes: the first publication reports
//!   [`PostTransition::FirstPublished`] and needs a path assigned, a live
//!   post becomes [`PostState::Edited`], and a withdrawn post goes live again
//!   under its old path;
//! * removal deletes the artifact only for posts that hold a path.
//!
//! Pages are keyed by path, so a rename is planned as "create the new page,
//! then retire the old one" by [`plan_page_save`].

use crate::page::{Page, PagePath};
use crate::post::{Post, PostState};
use chrono::{DateTime, Datelike, Utc};
use tracing::debug;

/// The outcome of saving a post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostTransition {
    /// Saved as a draft that is not public; nothing to rebuild.
    Drafted,

    /// A live post pulled back to draft. It keeps `path`, but the artifact
    /// there must be taken down.
    Withdrawn { path: String },

    /// Published for the first time. The caller must assign a path before
    /// persisting.
    FirstPublished,

    /// A withdrawn draft put back on its old path.
    Republished,

    /// A live post published again with new content.
    Updated,
}

impl PostTransition {
    /// Whether the post's artifact (and the listings) must be rebuilt.
    pub fn regenerates(&self) -> bool {
        !matches!(self, PostTransition::Drafted)
    }
}

/// Moves `post` into the state requested by the author at instant `now`.
pub fn save_post(post: &mut Post, draft: bool, now: DateTime<Utc>) -> PostTransition {
    let transition = match (draft, post.state, post.was_published()) {
        (true, PostState::Draft, _) | (true, _, false) => {
            post.state = PostState::Draft;
            PostTransition::Drafted
        }
        (true, _, true) => {
            post.state = PostState::Draft;
            PostTransition::Withdrawn {
                path: post.path.clone().unwrap_or_default(),
            }
        }
        (false, _, false) => {
            post.state = PostState::Published { since: now };
            PostTransition::FirstPublished
        }
        (false, PostState::Draft, true) => {
            post.state = PostState::Published { since: now };
            PostTransition::Republished
        }
        (false, PostState::Published { since }, true)
        | (false, PostState::Edited { since, .. }, true) => {
            post.state = PostState::Edited {
                since,
                updated: now,
            };
            PostTransition::Updated
        }
    };
    debug!(id = ?post.id, ?transition, "post transition");
    transition
}

/// What removing a post entails.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PostRemoval {
    /// The post never went public: only the store record goes.
    Discard,

    /// The artifact at `path` goes first, then the store record.
    Remove { path: String },
}

pub fn remove_post(post: &Post) -> PostRemoval {
    match &post.path {
        Some(path) if post.was_published() => PostRemoval::Remove { path: path.clone() },
        _ => PostRemoval::Discard,
    }
}

/// The path a post gets when it is first published at `since`:
/// `/{year}/{month}/{slug}`.
pub fn post_path(title: &str, since: DateTime<Utc>) -> String {
    let slug = match slug::slugify(title) {
        s if s.is_empty() => "post".to_owned(),
        s => s,
    };
    format!("/{:04}/{:02}/{}", since.year(), since.month(), slug)
}

/// Returns `base` or, when `taken` claims it, the first free `base-N` for
/// `N = 2, 3, ...`.
pub fn unique_path(base: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(base) {
        return base.to_owned();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_owned())
}

/// How a page save lands in the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagePlan {
    /// Where the saved page is stored and published.
    pub path: PagePath,

    /// The previous path of a renamed page, to be retired after the page at
    /// `path` is persisted and scheduled.
    pub replaces: Option<PagePath>,
}

impl PagePlan {
    pub fn is_rename(&self) -> bool {
        self.replaces.is_some()
    }
}

/// Returned when a page save targets a path held by a different page.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("a page already exists at `{0}`")]
pub struct PathConflictError(pub PagePath);

/// Plans saving a page at `submitted`.
///
/// * `editing` is the page being edited (loaded by its current key), or
///   `None` when creating.
/// * `occupant` is whatever the store holds at `submitted`.
///
/// Fails when `occupant` exists and is not the page being edited.
pub fn plan_page_save(
    editing: Option<&Page>,
    submitted: &PagePath,
    occupant: Option<&Page>,
) -> Result<PagePlan, PathConflictError> {
    let same_page = editing.map_or(false, |page| &page.path == submitted);
    if occupant.is_some() && !same_page {
        return Err(PathConflictError(submitted.clone()));
    }
    Ok(PagePlan {
        path: submitted.clone(),
        replaces: editing
            .filter(|page| &page.path != submitted)
            .map(|page| page.path.clone()),
    })
}
