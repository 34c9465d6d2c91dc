//! The authoring actions. Every mutating action runs the same pipeline of
//! named steps, each of which can end the action early:
//!
//! 1. **authorize**: the submitted token is checked by the [`CsrfGuard`];
//!    nothing is read or written before it passes;
//! 2. **load**: the entity being edited is loaded, or the action fails with
//!    [`Error::NotFound`];
//! 3. **validate**: the submitted form is checked; a rejected form comes back
//!    in [`Error::Validation`] untouched and nothing is persisted;
//! 4. **execute**: the lifecycle transition is applied, the result persisted
//!    and regeneration scheduled.
//!
//! Artifacts of removed content are taken down synchronously, and a renamed
//! page is published at its new path before the old one goes. Everything
//! else is rebuilt by the [`Dispatcher`].

use crate::clock::Clock;
use crate::dispatch::{Dispatcher, Job};
use crate::form::{self, FieldError, PageForm, PostForm};
use crate::guard::{CsrfGuard, Forbidden};
use crate::lifecycle::{self, PagePlan, PathConflictError, PostRemoval, PostTransition};
use crate::markup::{self, Markup};
use crate::page::{Page, PagePath};
use crate::post::{Post, PostId, PostState};
use crate::regenerate::{self, Backend, PageRegenerator, Regenerator};
use crate::render::{self, Layout};
use crate::site;
use crate::store::{self, Query};
use crate::value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{info, warn};

/// The authoring backend.
pub struct Admin {
    backend: Backend,
    dispatcher: Arc<Dispatcher>,
    guard: Arc<dyn CsrfGuard>,
    clock: Arc<dyn Clock>,
    default_markup: Markup,
}

/// The outcome of saving a post.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedPost {
    pub id: PostId,

    /// The post's public path, if it has one.
    pub path: Option<String>,

    pub transition: PostTransition,
}

/// One page of an admin listing.
#[derive(Clone, Debug)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub offset: usize,
    pub count: usize,
}

impl<T> Listing<T> {
    pub fn prev_offset(&self) -> usize {
        self.offset.saturating_sub(self.count)
    }

    pub fn next_offset(&self) -> usize {
        self.offset + self.count
    }

    /// The position of the last listed item, if any.
    pub fn last(&self) -> Option<usize> {
        match self.items.len() {
            0 => None,
            len => Some(self.offset + len - 1),
        }
    }
}

impl Admin {
    pub fn new(
        backend: Backend,
        dispatcher: Arc<Dispatcher>,
        guard: Arc<dyn CsrfGuard>,
        clock: Arc<dyn Clock>,
        default_markup: Markup,
    ) -> Admin {
        Admin {
            backend,
            dispatcher,
            guard,
            clock,
            default_markup,
        }
    }

    fn authorize(&self, token: Option<&str>) -> Result<()> {
        Ok(self.guard.verify(token)?)
    }

    fn load_post(&self, id: PostId) -> Result<Post> {
        self.backend
            .store
            .post(id)?
            .ok_or_else(|| Error::NotFound(format!("post {}", id)))
    }

    fn load_page(&self, path: &str) -> Result<Page> {
        let not_found = || Error::NotFound(format!("page {}", path));
        let path: PagePath = path.parse().map_err(|_| not_found())?;
        self.backend.store.page(&path)?.ok_or_else(not_found)
    }

    /// Posts, drafts first and then newest first.
    pub fn posts(&self, offset: usize, count: usize) -> Result<Listing<Post>> {
        let query = Query::range(offset, count);
        Ok(Listing {
            items: self.backend.store.posts(&query)?,
            offset,
            count,
        })
    }

    /// The form for writing a new post.
    pub fn new_post_form(&self) -> PostForm {
        PostForm::blank(self.default_markup)
    }

    /// The form for editing the post `id`.
    pub fn post_form(&self, id: PostId) -> Result<PostForm> {
        Ok(PostForm::from_post(&self.load_post(id)?))
    }

    /// Creates (`id` is `None`) or edits a post.
    pub fn save_post(&self, token: Option<&str>, id: Option<PostId>, form: PostForm) -> Result<SavedPost> {
        self.authorize(token)?;
        let mut post = match id {
            Some(id) => self.load_post(id)?,
            None => Post::new(String::new(), String::new(), self.default_markup, Default::default()),
        };
        let fields = match form.validate() {
            Ok(fields) => fields,
            Err(err) => return Err(Error::rejected(Submission::Post(form), err)),
        };

        let draft = fields.draft;
        fields.apply(&mut post);
        let transition = lifecycle::save_post(&mut post, draft, self.clock.now());
        if let (PostTransition::FirstPublished, PostState::Published { since }) =
            (&transition, post.state)
        {
            post.path = Some(self.free_post_path(&post, since)?);
        }
        let id = self.backend.store.put_post(&mut post)?;
        info!(%id, path = ?post.path, ?transition, "post saved");

        if transition.regenerates() {
            self.dispatcher.schedule(Job::Post(id));
            self.dispatcher.schedule(Job::Listings);
        }
        Ok(SavedPost {
            id,
            path: post.path,
            transition,
        })
    }

    // Derives the path of a post going live at `since`, avoiding the paths
    // of every other post and of every page.
    fn free_post_path(&self, post: &Post, since: chrono::DateTime<chrono::Utc>) -> Result<String> {
        let mut taken: HashSet<String> = self
            .backend
            .store
            .posts(&Query::all())?
            .into_iter()
            .filter(|other| other.id != post.id)
            .filter_map(|other| other.path)
            .collect();
        taken.extend(
            self.backend
                .store
                .pages(&Query::all())?
                .into_iter()
                .map(|page| page.path.to_string()),
        );
        let base = lifecycle::post_path(&post.title, since);
        Ok(lifecycle::unique_path(&base, |candidate| taken.contains(candidate)))
    }

    /// Removes a post. The artifact of a post that was published goes
    /// before its record.
    pub fn delete_post(&self, token: Option<&str>, id: PostId) -> Result<PostRemoval> {
        self.authorize(token)?;
        let post = self.load_post(id)?;
        let removal = lifecycle::remove_post(&post);
        if let PostRemoval::Remove { path } = &removal {
            self.backend.site.remove(path)?;
        }
        self.backend.store.delete_post(id)?;
        if let PostRemoval::Remove { path } = &removal {
            // a job that read the record before the delete may have
            // rewritten the artifact since
            self.backend.site.remove(path)?;
        }
        info!(%id, ?removal, "post removed");
        if let PostRemoval::Remove { .. } = removal {
            self.dispatcher.schedule(Job::Listings);
        }
        Ok(removal)
    }

    /// Renders the submitted post through the post template without saving
    /// anything. A draft is shown as if published now.
    pub fn preview_post(&self, id: Option<PostId>, form: &PostForm) -> Result<Vec<u8>> {
        let mut post = match id {
            Some(id) => self.load_post(id)?,
            None => Post::new(String::new(), String::new(), self.default_markup, Default::default()),
        };
        let fields = match form.validate() {
            Ok(fields) => fields,
            Err(err) => return Err(Error::rejected(Submission::Post(form.clone()), err)),
        };
        fields.apply(&mut post);
        if post.is_draft() {
            let now = self.clock.now();
            post.state = PostState::Published { since: now };
            if !post.was_published() {
                post.path = Some(lifecycle::post_path(&post.title, now));
            }
        }
        Ok(self.backend.renderer.render(
            Layout::Post,
            value::output(value::post(&post, &self.backend.site_root), None, None),
        )?)
    }

    /// Pages, most recently updated first.
    pub fn pages(&self, offset: usize, count: usize) -> Result<Listing<Page>> {
        let query = Query::range(offset, count);
        Ok(Listing {
            items: self.backend.store.pages(&query)?,
            offset,
            count,
        })
    }

    /// The form for editing the page at `path`.
    pub fn page_form(&self, path: &str) -> Result<PageForm> {
        Ok(PageForm::from_page(&self.load_page(path)?))
    }

    /// Creates (`editing` is `None`) or edits a page. Submitting a different
    /// path renames the page: the page is published at the new path first
    /// and the old one retired afterwards.
    pub fn save_page(&self, token: Option<&str>, editing: Option<&str>, form: PageForm) -> Result<PagePlan> {
        self.authorize(token)?;
        let editing = match editing {
            Some(path) => Some(self.load_page(path)?),
            None => None,
        };
        let fields = match form.validate(self.backend.renderer.as_ref()) {
            Ok(fields) => fields,
            Err(err) => return Err(Error::rejected(Submission::Page(form), err)),
        };

        let occupant = self.backend.store.page(&fields.path)?;
        let post_there = self
            .backend
            .store
            .posts(&Query::all())?
            .iter()
            .any(|post| post.path.as_deref() == Some(fields.path.as_str()));
        if post_there {
            return Err(PathConflictError(fields.path).into());
        }
        let plan = lifecycle::plan_page_save(editing.as_ref(), &fields.path, occupant.as_ref())?;
        let page = Page {
            path: plan.path.clone(),
            title: fields.title,
            template: fields.template,
            body: fields.body,
            updated: Some(self.clock.now()),
        };
        self.backend.store.put_page(&page)?;
        self.dispatcher.schedule(Job::Page(page.path.clone()));
        info!(path = %page.path, replaces = ?plan.replaces, "page saved");

        if let Some(old) = &plan.replaces {
            if let Err(err) = PageRegenerator::new(self.backend.clone()).regenerate(&page.path) {
                warn!(old = %old, new = %page.path, error = %err, "renamed page not published, old page kept");
                return Err(err.into());
            }
            if let Err(err) = self.retire(old) {
                warn!(old = %old, new = %page.path, error = %err, "old page left behind after rename");
                return Err(Error::StaleRename {
                    old: old.clone(),
                    source: Box::new(err),
                });
            }
        }
        Ok(plan)
    }

    /// Removes the page at `path` and its artifact. Unlike
    /// [`Admin::delete_page`], a missing page is not an error, so a failed
    /// rename can be finished by calling this again.
    pub fn retire_page(&self, token: Option<&str>, path: &str) -> Result<()> {
        self.authorize(token)?;
        let path: PagePath = path
            .parse()
            .map_err(|_| Error::NotFound(format!("page {}", path)))?;
        self.retire(&path)
    }

    /// Removes the page at `path` and its artifact.
    pub fn delete_page(&self, token: Option<&str>, path: &str) -> Result<()> {
        self.authorize(token)?;
        let page = self.load_page(path)?;
        self.retire(&page.path)
    }

    fn retire(&self, path: &PagePath) -> Result<()> {
        self.backend.site.remove(path)?;
        self.backend.store.delete_page(path)?;
        // as for posts, a running page job may have rewritten it
        self.backend.site.remove(path)?;
        info!(%path, "page removed");
        Ok(())
    }

    /// Schedules a rebuild of the whole site, including a forced run of the
    /// deploy hook.
    pub fn regenerate(&self, token: Option<&str>) -> Result<()> {
        self.authorize(token)?;
        self.dispatcher.regenerate_everything();
        Ok(())
    }

    /// Schedules a run of the deploy hook. Unless `force` is set, the hook
    /// does nothing when this version has already been deployed.
    pub fn deploy(&self, token: Option<&str>, force: bool) -> Result<()> {
        self.authorize(token)?;
        self.dispatcher.schedule(Job::Deploy { force });
        Ok(())
    }
}

/// A form as submitted, returned with its problems when rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Submission {
    Post(PostForm),
    Page(PageForm),
}

/// A rejected submission.
#[derive(Clone, Debug)]
pub struct Rejected {
    pub submission: Submission,
    pub problems: Vec<FieldError>,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("invalid submission")?;
        for (i, problem) in self.problems.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{}", problem)?;
        }
        Ok(())
    }
}

/// The result of an authoring action.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failed authoring action.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the post or page to act on does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Returned when a submitted form is invalid. Nothing was persisted.
    #[error("{0}")]
    Validation(Rejected),

    /// Returned when a page save targets a path held by another page. Both
    /// pages are left untouched.
    #[error(transparent)]
    PathConflict(#[from] PathConflictError),

    /// Returned when the CSRF check fails. Nothing was read or written.
    #[error(transparent)]
    Forbidden(#[from] Forbidden),

    /// Returned when a post names a markup language that is not supported.
    #[error(transparent)]
    UnsupportedMarkup(#[from] markup::Error),

    /// Returned when the content store failed.
    #[error(transparent)]
    Store(#[from] store::Error),

    /// Returned when an artifact could not be removed.
    #[error(transparent)]
    Site(#[from] site::Error),

    /// Returned when a preview could not be rendered.
    #[error(transparent)]
    Render(#[from] render::Error),

    /// Returned when a renamed page could not be published at its new path.
    /// The old page is still up and the new one is rebuilt by its scheduled
    /// job; finish the rename with [`Admin::retire_page`].
    #[error("renamed page not published: {0}")]
    Regenerate(#[from] regenerate::Error),

    /// Returned when a renamed page was published at its new path but the
    /// old page could not be removed. Retry with [`Admin::retire_page`].
    #[error("page renamed, but `{old}` could not be removed: {source}")]
    StaleRename {
        old: PagePath,
        source: Box<Error>,
    },
}

impl Error {
    fn rejected(submission: Submission, err: form::Error) -> Error {
        match err {
            form::Error::Fields(problems) => Error::Validation(Rejected {
                submission,
                problems,
            }),
            form::Error::UnsupportedMarkup(err) => Error::UnsupportedMarkup(err),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::clock::ManualClock;
    use crate::deploy::DeployMarker;
    use crate::dispatch::{Regenerators, RetryPolicy};
    use crate::feed::FeedConfig;
    use crate::guard::SharedSecret;
    use crate::regenerate::{test::backend, ListingRegenerator, PageRegenerator, PostRegenerator};
    use crate::site::{MemorySite, StaticSite};
    use crate::store::{ContentStore, MemoryStore};
    use chrono::{Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};

    const TOKEN: Option<&str> = Some("token");

    struct Fixture {
        admin: Admin,
        store: Arc<MemoryStore>,
        site: Arc<MemorySite>,
        dispatcher: Arc<Dispatcher>,
    }

    fn fixture_with(store: Arc<dyn ContentStore>, memory: Arc<MemoryStore>, site: Arc<MemorySite>) -> Fixture {
        let (mut backend, _, _) = backend();
        backend.store = store;
        backend.site = site.clone();
        let listings = Arc::new(ListingRegenerator::new(
            backend.clone(),
            10,
            FeedConfig {
                title: "Blog".to_owned(),
                author: None,
                home_page: backend.site_root.clone(),
            },
        ));
        let regenerators = Regenerators {
            posts: Arc::new(PostRegenerator::new(backend.clone())),
            pages: Arc::new(PageRegenerator::new(backend.clone())),
            listings: listings.clone(),
            deploy: Arc::new(DeployMarker::new("1", backend.site.clone(), None, listings)),
        };
        let dispatcher = Arc::new(Dispatcher::manual(regenerators, RetryPolicy::default()));
        let clock = ManualClock::new(
            Utc.with_ymd_and_hms(2021, 4, 16, 9, 0, 0).unwrap(),
            Duration::minutes(1),
        );
        Fixture {
            admin: Admin::new(
                backend,
                dispatcher.clone(),
                Arc::new(SharedSecret::new("token")),
                Arc::new(clock),
                Markup::Markdown,
            ),
            store: memory,
            site,
            dispatcher,
        }
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        fixture_with(store.clone(), store, Arc::new(MemorySite::new()))
    }

    fn post_form(title: &str, draft: bool) -> PostForm {
        PostForm {
            title: title.to_owned(),
            body: format!("{} body", title),
            body_markup: "txt".to_owned(),
            tags: String::new(),
            draft,
        }
    }

    fn page_form(path: &str, title: &str) -> PageForm {
        PageForm {
            path: path.to_owned(),
            title: title.to_owned(),
            template: "default".to_owned(),
            body: format!("{} body", title),
        }
    }

    #[test]
    fn test_forbidden_before_anything_else() {
        let f = fixture();
        f.store.set_unavailable(true);
        assert!(matches!(
            f.admin.save_post(None, Some(PostId(1)), post_form("x", false)),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            f.admin.delete_page(Some("wrong"), "/about"),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(f.admin.regenerate(None), Err(Error::Forbidden(_))));
        assert!(matches!(f.admin.deploy(None, true), Err(Error::Forbidden(_))));
        assert!(f.dispatcher.pending().is_empty());
    }

    #[test]
    fn test_publish_post() -> Result<()> {
        let f = fixture();
        let saved = f.admin.save_post(TOKEN, None, post_form("Hello World", false))?;
        assert_eq!(PostTransition::FirstPublished, saved.transition);
        assert_eq!(Some("/2021/04/hello-world".to_owned()), saved.path);
        assert_eq!(2, f.dispatcher.run_pending());
        assert_eq!(
            Some("post:Hello World:<p>Hello World body</p>".to_owned()),
            f.site.get("/2021/04/hello-world")
        );
        assert!(f.site.get("/index.html").is_some());
        Ok(())
    }

    #[test]
    fn test_paths_are_unique_and_stable() -> Result<()> {
        let f = fixture();
        let first = f.admin.save_post(TOKEN, None, post_form("Same", false))?;
        let second = f.admin.save_post(TOKEN, None, post_form("Same", false))?;
        assert_eq!(Some("/2021/04/same-2".to_owned()), second.path);

        let edited = f.admin.save_post(TOKEN, Some(first.id), post_form("Renamed", false))?;
        assert_eq!(first.path, edited.path);
        assert_eq!(PostTransition::Updated, edited.transition);
        Ok(())
    }

    #[test]
    fn test_draft_is_not_scheduled() -> Result<()> {
        let f = fixture();
        let saved = f.admin.save_post(TOKEN, None, post_form("Draft", true))?;
        assert_eq!(None, saved.path);
        assert!(f.dispatcher.pending().is_empty());
        assert!(f.admin.post_form(saved.id)?.draft);
        Ok(())
    }

    #[test]
    fn test_withdraw_takes_artifact_down() -> Result<()> {
        let f = fixture();
        let saved = f.admin.save_post(TOKEN, None, post_form("Live", false))?;
        f.dispatcher.run_pending();
        let path = saved.path.clone().unwrap();
        assert!(f.site.get(&path).is_some());

        let withdrawn = f.admin.save_post(TOKEN, Some(saved.id), post_form("Live", true))?;
        assert_eq!(PostTransition::Withdrawn { path: path.clone() }, withdrawn.transition);
        f.dispatcher.run_pending();
        assert_eq!(None, f.site.get(&path));

        let back = f.admin.save_post(TOKEN, Some(saved.id), post_form("Live", false))?;
        assert_eq!(PostTransition::Republished, back.transition);
        assert_eq!(Some(path.clone()), back.path);
        f.dispatcher.run_pending();
        assert!(f.site.get(&path).is_some());
        Ok(())
    }

    #[test]
    fn test_invalid_post_is_returned_unsaved() {
        let f = fixture();
        let form = post_form("", false);
        match f.admin.save_post(TOKEN, None, form.clone()) {
            Err(Error::Validation(rejected)) => {
                assert_eq!(Submission::Post(form), rejected.submission);
                assert_eq!("title", rejected.problems[0].field);
            }
            other => panic!("expected validation error, got {:?}", other),
        }
        assert!(f.store.posts(&Query::all()).unwrap().is_empty());

        let mut form = post_form("x", false);
        form.body_markup = "textile".to_owned();
        assert!(matches!(
            f.admin.save_post(TOKEN, None, form),
            Err(Error::UnsupportedMarkup(_))
        ));
    }

    #[test]
    fn test_missing_post_is_not_found() {
        let f = fixture();
        assert!(matches!(f.admin.post_form(PostId(7)), Err(Error::NotFound(_))));
        assert!(matches!(
            f.admin.save_post(TOKEN, Some(PostId(7)), post_form("x", false)),
            Err(Error::NotFound(_))
        ));
        assert!(matches!(
            f.admin.delete_post(TOKEN, PostId(7)),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_delete_post() -> Result<()> {
        let f = fixture();
        let draft = f.admin.save_post(TOKEN, None, post_form("Draft", true))?;
        assert_eq!(PostRemoval::Discard, f.admin.delete_post(TOKEN, draft.id)?);
        assert!(f.dispatcher.pending().is_empty());

        let live = f.admin.save_post(TOKEN, None, post_form("Live", false))?;
        f.dispatcher.run_pending();
        let path = live.path.unwrap();
        assert_eq!(
            PostRemoval::Remove { path: path.clone() },
            f.admin.delete_post(TOKEN, live.id)?
        );
        assert_eq!(None, f.site.get(&path));
        assert_eq!(None, f.store.post(live.id)?);
        assert_eq!(vec![Job::Listings], f.dispatcher.pending());
        Ok(())
    }

    #[test]
    fn test_preview_saves_nothing() -> Result<()> {
        let f = fixture();
        let html = f.admin.preview_post(None, &post_form("Peek", true))?;
        assert_eq!("post:Peek:<p>Peek body</p>", String::from_utf8_lossy(&html));
        assert!(f.store.posts(&Query::all())?.is_empty());
        assert!(f.site.paths().is_empty());
        Ok(())
    }

    #[test]
    fn test_listings_paginate() -> Result<()> {
        let f = fixture();
        for i in 0..5 {
            f.admin.save_post(TOKEN, None, post_form(&format!("p{}", i), false))?;
        }
        let listing = f.admin.posts(2, 2)?;
        assert_eq!(
            vec!["p2", "p1"],
            listing.items.iter().map(|p| p.title.as_str()).collect::<Vec<_>>()
        );
        assert_eq!(0, listing.prev_offset());
        assert_eq!(4, listing.next_offset());
        assert_eq!(Some(3), listing.last());
        assert_eq!(None, f.admin.posts(10, 2)?.last());
        Ok(())
    }

    #[test]
    fn test_page_create_and_conflict() -> Result<()> {
        let f = fixture();
        let plan = f.admin.save_page(TOKEN, None, page_form("/about", "About"))?;
        assert!(!plan.is_rename());
        f.dispatcher.run_pending();
        assert_eq!(Some("page:About:About body".to_owned()), f.site.get("/about"));

        assert!(matches!(
            f.admin.save_page(TOKEN, None, page_form("/about", "Other")),
            Err(Error::PathConflict(_))
        ));
        let about: PagePath = "/about".parse().unwrap();
        assert_eq!("About", f.store.page(&about)?.unwrap().title);
        Ok(())
    }

    #[test]
    fn test_invalid_page_path_is_not_persisted() {
        let f = fixture();
        assert!(matches!(
            f.admin.save_page(TOKEN, None, page_form("not-a-path", "x")),
            Err(Error::Validation(_))
        ));
        assert!(f.store.pages(&Query::all()).unwrap().is_empty());
        assert!(f.dispatcher.pending().is_empty());
    }

    #[test]
    fn test_page_rename() -> Result<()> {
        let f = fixture();
        f.admin.save_page(TOKEN, None, page_form("/a", "Page"))?;
        f.dispatcher.run_pending();

        let plan = f.admin.save_page(TOKEN, Some("/a"), page_form("/b", "Moved"))?;
        assert_eq!(Some("/a".parse().unwrap()), plan.replaces);
        assert_eq!(None, f.store.page(&"/a".parse().unwrap())?);
        assert_eq!(None, f.site.get("/a"));
        // published at the new path before the old one was retired
        assert_eq!(Some("page:Moved:Moved body".to_owned()), f.site.get("/b"));
        assert_eq!(vec![Job::Page("/b".parse().unwrap())], f.dispatcher.pending());
        f.dispatcher.run_pending();
        assert_eq!(Some("page:Moved:Moved body".to_owned()), f.site.get("/b"));
        Ok(())
    }

    /// A store that fails to read back the page at `path` once it exists.
    struct Unreadable {
        inner: Arc<MemoryStore>,
        path: PagePath,
    }

    impl ContentStore for Unreadable {
        fn post(&self, id: PostId) -> store::Result<Option<Post>> {
            self.inner.post(id)
        }
        fn posts(&self, query: &Query) -> store::Result<Vec<Post>> {
            self.inner.posts(query)
        }
        fn put_post(&self, post: &mut Post) -> store::Result<PostId> {
            self.inner.put_post(post)
        }
        fn delete_post(&self, id: PostId) -> store::Result<()> {
            self.inner.delete_post(id)
        }
        fn page(&self, path: &PagePath) -> store::Result<Option<Page>> {
            match self.inner.page(path)? {
                Some(_) if *path == self.path => {
                    Err(store::Error::Unavailable("read failed".to_owned()))
                }
                page => Ok(page),
            }
        }
        fn pages(&self, query: &Query) -> store::Result<Vec<Page>> {
            self.inner.pages(query)
        }
        fn put_page(&self, page: &Page) -> store::Result<()> {
            self.inner.put_page(page)
        }
        fn delete_page(&self, path: &PagePath) -> store::Result<()> {
            self.inner.delete_page(path)
        }
    }

    #[test]
    fn test_rename_keeps_old_page_until_new_one_is_published() -> Result<()> {
        let memory = Arc::new(MemoryStore::new());
        let unreadable = Arc::new(Unreadable {
            inner: memory.clone(),
            path: "/b".parse().unwrap(),
        });
        let f = fixture_with(unreadable, memory, Arc::new(MemorySite::new()));
        f.admin.save_page(TOKEN, None, page_form("/a", "Page"))?;
        f.dispatcher.run_pending();

        assert!(matches!(
            f.admin.save_page(TOKEN, Some("/a"), page_form("/b", "Moved")),
            Err(Error::Regenerate(_))
        ));
        assert!(f.store.page(&"/a".parse().unwrap())?.is_some());
        assert_eq!(Some("page:Page:Page body".to_owned()), f.site.get("/a"));
        assert_eq!(None, f.site.get("/b"));
        assert_eq!(vec![Job::Page("/b".parse().unwrap())], f.dispatcher.pending());
        Ok(())
    }

    #[test]
    fn test_trailing_slash_names_the_same_page() -> Result<()> {
        let f = fixture();
        f.admin.save_page(TOKEN, None, page_form("/a", "First"))?;
        assert!(matches!(
            f.admin.save_page(TOKEN, None, page_form("/a/", "Second")),
            Err(Error::PathConflict(_))
        ));
        // editing through either spelling edits the one page in place
        let plan = f.admin.save_page(TOKEN, Some("/a/"), page_form("/a/", "Edited"))?;
        assert!(!plan.is_rename());
        assert_eq!(1, f.store.pages(&Query::all())?.len());
        assert_eq!("Edited", f.admin.page_form("/a")?.title);
        Ok(())
    }

    #[test]
    fn test_pages_and_posts_do_not_share_paths() -> Result<()> {
        let f = fixture();
        let live = f.admin.save_post(TOKEN, None, post_form("Hello", false))?;
        let path = live.path.unwrap();
        assert_eq!("/2021/04/hello", path);
        assert!(matches!(
            f.admin.save_page(TOKEN, None, page_form(&path, "Page")),
            Err(Error::PathConflict(_))
        ));

        f.admin.save_page(TOKEN, None, page_form("/2021/04/taken", "Page"))?;
        let post = f.admin.save_post(TOKEN, None, post_form("Taken", false))?;
        assert_eq!(Some("/2021/04/taken-2".to_owned()), post.path);
        Ok(())
    }

    #[test]
    fn test_deploy_is_scheduled() -> Result<()> {
        let f = fixture();
        f.admin.deploy(TOKEN, false)?;
        assert_eq!(vec![Job::Deploy { force: false }], f.dispatcher.pending());
        f.dispatcher.run_pending();
        assert_eq!(Some("1".to_owned()), f.site.get(crate::deploy::MARKER_PATH));
        Ok(())
    }

    /// Rewrites an artifact just before its record is deleted, the way a
    /// job that rendered the record earlier would.
    struct Racing {
        inner: Arc<MemoryStore>,
        site: Arc<MemorySite>,
    }

    impl ContentStore for Racing {
        fn post(&self, id: PostId) -> store::Result<Option<Post>> {
            self.inner.post(id)
        }
        fn posts(&self, query: &Query) -> store::Result<Vec<Post>> {
            self.inner.posts(query)
        }
        fn put_post(&self, post: &mut Post) -> store::Result<PostId> {
            self.inner.put_post(post)
        }
        fn delete_post(&self, id: PostId) -> store::Result<()> {
            if let Some(path) = self.inner.post(id)?.and_then(|post| post.path) {
                self.site.replace(&path, b"stale").unwrap();
            }
            self.inner.delete_post(id)
        }
        fn page(&self, path: &PagePath) -> store::Result<Option<Page>> {
            self.inner.page(path)
        }
        fn pages(&self, query: &Query) -> store::Result<Vec<Page>> {
            self.inner.pages(query)
        }
        fn put_page(&self, page: &Page) -> store::Result<()> {
            self.inner.put_page(page)
        }
        fn delete_page(&self, path: &PagePath) -> store::Result<()> {
            self.site.replace(path, b"stale").unwrap();
            self.inner.delete_page(path)
        }
    }

    #[test]
    fn test_removal_outlasts_a_racing_rewrite() -> Result<()> {
        let memory = Arc::new(MemoryStore::new());
        let site = Arc::new(MemorySite::new());
        let racing = Arc::new(Racing {
            inner: memory.clone(),
            site: site.clone(),
        });
        let f = fixture_with(racing, memory, site);
        let live = f.admin.save_post(TOKEN, None, post_form("Live", false))?;
        f.admin.save_page(TOKEN, None, page_form("/about", "About"))?;
        f.dispatcher.run_pending();

        f.admin.delete_post(TOKEN, live.id)?;
        assert_eq!(None, f.site.get("/2021/04/live"));
        f.admin.delete_page(TOKEN, "/about")?;
        assert_eq!(None, f.site.get("/about"));
        Ok(())
    }

    /// A store whose page deletes fail while `broken` is set.
    struct Flaky {
        inner: Arc<MemoryStore>,
        broken: AtomicBool,
    }

    impl ContentStore for Flaky {
        fn post(&self, id: PostId) -> store::Result<Option<Post>> {
            self.inner.post(id)
        }
        fn posts(&self, query: &Query) -> store::Result<Vec<Post>> {
            self.inner.posts(query)
        }
        fn put_post(&self, post: &mut Post) -> store::Result<PostId> {
            self.inner.put_post(post)
        }
        fn delete_post(&self, id: PostId) -> store::Result<()> {
            self.inner.delete_post(id)
        }
        fn page(&self, path: &PagePath) -> store::Result<Option<Page>> {
            self.inner.page(path)
        }
        fn pages(&self, query: &Query) -> store::Result<Vec<Page>> {
            self.inner.pages(query)
        }
        fn put_page(&self, page: &Page) -> store::Result<()> {
            self.inner.put_page(page)
        }
        fn delete_page(&self, path: &PagePath) -> store::Result<()> {
            match self.broken.load(Ordering::SeqCst) {
                true => Err(store::Error::Unavailable("delete failed".to_owned())),
                false => self.inner.delete_page(path),
            }
        }
    }

    #[test]
    fn test_failed_rename_is_reported_and_retryable() -> Result<()> {
        let memory = Arc::new(MemoryStore::new());
        let flaky = Arc::new(Flaky {
            inner: memory.clone(),
            broken: AtomicBool::new(false),
        });
        let f = fixture_with(flaky.clone(), memory, Arc::new(MemorySite::new()));
        f.admin.save_page(TOKEN, None, page_form("/a", "Page"))?;

        flaky.broken.store(true, Ordering::SeqCst);
        match f.admin.save_page(TOKEN, Some("/a"), page_form("/b", "Page")) {
            Err(Error::StaleRename { old, .. }) => assert_eq!("/a", old.as_str()),
            other => panic!("expected stale rename, got {:?}", other),
        }
        assert!(f.store.page(&"/b".parse().unwrap())?.is_some());
        assert!(f.store.page(&"/a".parse().unwrap())?.is_some());

        flaky.broken.store(false, Ordering::SeqCst);
        f.admin.retire_page(TOKEN, "/a")?;
        assert_eq!(None, f.store.page(&"/a".parse().unwrap())?);
        // retiring again is a no-op
        f.admin.retire_page(TOKEN, "/a")?;
        Ok(())
    }

    #[test]
    fn test_regenerate_everything() -> Result<()> {
        let f = fixture();
        f.admin.regenerate(TOKEN)?;
        let mut pending = f.dispatcher.pending();
        pending.sort_by_key(|job| job.kind());
        assert_eq!(
            vec![Job::Deploy { force: true }, Job::Pages, Job::Posts],
            pending
        );
        Ok(())
    }
}
