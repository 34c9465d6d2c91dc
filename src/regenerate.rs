//! The regenerators: background jobs that rebuild static artifacts from the
//! current contents of the [`ContentStore`].
//!
//! A regenerator never works from a snapshot handed to it when the job was
//! scheduled. It reads the store when it runs and converges the artifact to
//! what the store says:
//!
//! * a live post or any page is rendered and its artifact atomically
//!   replaced;
//! * a post pulled back to draft has the artifact at its retained path
//!   removed;
//! * a record that no longer exists is left alone (removal takes its
//!   artifact down synchronously);
//! * a record that went away while its artifact was being written has that
//!   artifact taken down again, so a removal racing a job always wins.
//!
//! Listings are re-derived as a whole. The listing pages a run produced are
//! recorded in [`LISTINGS_MANIFEST`] and the next run removes every page it
//! no longer produces.
//!
//! Running a regenerator any number of times, concurrently or not, therefore
//! leaves the same result, which is what at-least-once job delivery needs.
//! Whole-kind runs keep going past failing targets and report every failure
//! in a [`Report`].

use crate::feed::{self, FeedConfig};
use crate::page::PagePath;
use crate::post::{Post, PostId};
use crate::render::{self, Layout, Renderer};
use crate::site::{self, StaticSite};
use crate::store::{self, ContentStore, Query};
use crate::tag::Tag;
use crate::value;
use chrono::Utc;
use gtmpl::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// The collaborators every regenerator works against.
#[derive(Clone)]
pub struct Backend {
    pub store: Arc<dyn ContentStore>,
    pub site: Arc<dyn StaticSite>,
    pub renderer: Arc<dyn Renderer>,

    /// The absolute URL the site is served from, ending in a slash.
    pub site_root: Url,
}

/// Rebuilds the artifacts of one kind of content.
pub trait Regenerator: Send + Sync {
    /// Identifies a single artifact (or group of artifacts) of this kind.
    type Target: fmt::Display;

    /// Converges the artifact(s) for `target` to the current store state.
    fn regenerate(&self, target: &Self::Target) -> Result<()>;

    /// Converges every artifact of this kind, collecting failures instead of
    /// stopping at the first.
    fn regenerate_all(&self) -> Report;
}

/// Rebuilds post artifacts.
pub struct PostRegenerator {
    backend: Backend,
}

impl PostRegenerator {
    pub fn new(backend: Backend) -> PostRegenerator {
        PostRegenerator { backend }
    }

    fn converge(&self, post: &Post) -> Result<()> {
        let path = match post.path.as_deref() {
            Some(path) if post.was_published() => path,
            _ => return Ok(()),
        };
        if post.is_draft() {
            self.backend.site.remove(path)?;
            info!(id = ?post.id, path, "withdrawn post artifact removed");
            return Ok(());
        }
        let contents = self.backend.renderer.render(
            Layout::Post,
            value::output(value::post(post, &self.backend.site_root), None, None),
        )?;
        self.backend.site.replace(path, &contents)?;
        if let Some(id) = post.id {
            let still_live = self.backend.store.post(id)?.map_or(false, |p| p.is_live());
            if !still_live {
                self.backend.site.remove(path)?;
                info!(%id, path, "post went away while regenerating, artifact removed");
                return Ok(());
            }
        }
        info!(id = ?post.id, path, "post regenerated");
        Ok(())
    }
}

impl Regenerator for PostRegenerator {
    type Target = PostId;

    fn regenerate(&self, id: &PostId) -> Result<()> {
        match self.backend.store.post(*id)? {
            Some(post) => self.converge(&post),
            None => {
                debug!(%id, "post gone, nothing to regenerate");
                Ok(())
            }
        }
    }

    fn regenerate_all(&self) -> Report {
        let mut report = Report::default();
        match self.backend.store.posts(&Query::all()) {
            Ok(posts) => {
                for post in &posts {
                    let target = post.id.map_or_else(|| "post".to_owned(), |id| id.to_string());
                    report.record(target, self.converge(post));
                }
            }
            Err(err) => report.record("posts".to_owned(), Err(err.into())),
        }
        report.log("posts");
        report
    }
}

/// Rebuilds standalone page artifacts.
pub struct PageRegenerator {
    backend: Backend,
}

impl PageRegenerator {
    pub fn new(backend: Backend) -> PageRegenerator {
        PageRegenerator { backend }
    }

    fn converge(&self, page: &crate::page::Page) -> Result<()> {
        let contents = self.backend.renderer.render(
            Layout::Page(&page.template),
            value::output(value::page(page, &self.backend.site_root), None, None),
        )?;
        self.backend.site.replace(&page.path, &contents)?;
        if self.backend.store.page(&page.path)?.is_none() {
            self.backend.site.remove(&page.path)?;
            info!(path = %page.path, "page went away while regenerating, artifact removed");
            return Ok(());
        }
        info!(path = %page.path, "page regenerated");
        Ok(())
    }
}

impl Regenerator for PageRegenerator {
    type Target = PagePath;

    fn regenerate(&self, path: &PagePath) -> Result<()> {
        match self.backend.store.page(path)? {
            Some(page) => self.converge(&page),
            None => {
                debug!(%path, "page gone, nothing to regenerate");
                Ok(())
            }
        }
    }

    fn regenerate_all(&self) -> Report {
        let mut report = Report::default();
        match self.backend.store.pages(&Query::all()) {
            Ok(pages) => {
                for page in &pages {
                    report.record(page.path.to_string(), self.converge(page));
                }
            }
            Err(err) => report.record("pages".to_owned(), Err(err.into())),
        }
        report.log("pages");
        report
    }
}

/// The target of the listings regenerator: all listings at once.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Listings;

impl fmt::Display for Listings {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("listings")
    }
}

/// The path of the main index page at `index`.
pub fn index_page_path(index: usize) -> String {
    match index {
        0 => "/index.html".to_owned(),
        i => format!("/pages/{}.html", i),
    }
}

/// The path of the index page at `index` for the tag with slug `slug`.
pub fn tag_page_path(slug: &str, index: usize) -> String {
    match index {
        0 => format!("/tags/{}/index.html", slug),
        i => format!("/tags/{}/{}.html", slug, i),
    }
}

/// The path of the Atom feed.
pub const FEED_PATH: &str = "/feed.atom";

/// Lists, one per line, the listing pages written by the last run.
pub const LISTINGS_MANIFEST: &str = "/.listings";

/// Rebuilds the site-wide listings derived from every live post: the
/// paginated main index, one paginated index per tag, and the Atom feed.
pub struct ListingRegenerator {
    backend: Backend,
    page_size: usize,
    feed: FeedConfig,
}

/// A group of live posts listed together: the main index (empty tag) or the
/// index of one tag.
struct Index<'a> {
    /// Maps a page number to the artifact path of that page.
    page_path: Box<dyn Fn(usize) -> String + 'a>,

    /// What the failure report calls this index.
    name: String,

    posts: Vec<&'a Post>,
}

impl ListingRegenerator {
    pub fn new(backend: Backend, page_size: usize, feed: FeedConfig) -> ListingRegenerator {
        ListingRegenerator {
            backend,
            page_size: page_size.max(1),
            feed,
        }
    }

    /// Groups the live `posts` into the main index plus one index per tag.
    fn indices<'a>(&self, posts: &'a [Post]) -> Vec<Index<'a>> {
        let mut by_tag: BTreeMap<String, Index<'a>> = BTreeMap::new();
        for post in posts {
            for name in &post.tags {
                let tag = Tag::new(name, &self.backend.site_root);
                let slug = tag.slug.clone();
                by_tag
                    .entry(tag.slug)
                    .or_insert_with(|| Index {
                        page_path: Box::new(move |i| tag_page_path(&slug, i)),
                        name: format!("tag `{}`", name),
                        posts: Vec::new(),
                    })
                    .posts
                    .push(post);
            }
        }

        let mut indices = vec![Index {
            page_path: Box::new(index_page_path),
            name: "index".to_owned(),
            posts: posts.iter().collect(),
        }];
        indices.extend(by_tag.into_values());
        indices
    }

    /// How many pages `index` spans. An empty index still gets its first
    /// page.
    fn page_count(&self, index: &Index<'_>) -> usize {
        index.posts.len().div_ceil(self.page_size).max(1)
    }

    /// Renders and writes every page of `index`.
    fn write_index(&self, index: &Index<'_>) -> Result<()> {
        let chunks: Vec<&[&Post]> = match index.posts.is_empty() {
            true => vec![&index.posts[..]],
            false => index.posts.chunks(self.page_size).collect(),
        };
        let url = |i: usize| value::url_for(&self.backend.site_root, &(index.page_path)(i));

        for (i, chunk) in chunks.iter().enumerate() {
            let item = Value::Array(
                chunk
                    .iter()
                    .map(|p| value::post(p, &self.backend.site_root))
                    .collect(),
            );
            let prev = match i {
                0 => None,
                _ => Some(url(i - 1)),
            };
            let next = match i + 1 < chunks.len() {
                true => Some(url(i + 1)),
                false => None,
            };
            let contents = self.backend.renderer.render(
                Layout::Index,
                value::output(item, prev.as_ref(), next.as_ref()),
            )?;
            self.backend.site.replace(&(index.page_path)(i), &contents)?;
        }
        debug!(index = %index.name, pages = chunks.len(), "index regenerated");
        Ok(())
    }

    /// Removes the listing pages named in the manifest that are not in
    /// `published`, then rewrites the manifest. Pages that could not be
    /// removed stay in the manifest for the next run.
    fn prune(&self, published: &BTreeSet<String>) -> Result<()> {
        let previous = self
            .backend
            .site
            .read(LISTINGS_MANIFEST)?
            .unwrap_or_default();
        let previous = String::from_utf8_lossy(&previous);

        let mut manifest = published.clone();
        let mut first_error = None;
        for stale in previous
            .lines()
            .filter(|path| !path.is_empty() && !published.contains(*path))
        {
            match self.backend.site.remove(stale) {
                Ok(()) => info!(path = stale, "stale listing page removed"),
                Err(err) => {
                    warn!(path = stale, error = %err, "stale listing page not removed");
                    manifest.insert(stale.to_owned());
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        let contents: String = manifest.iter().map(|path| format!("{}\n", path)).collect();
        self.backend.site.replace(LISTINGS_MANIFEST, contents.as_bytes())?;
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

impl Regenerator for ListingRegenerator {
    type Target = Listings;

    fn regenerate(&self, _: &Listings) -> Result<()> {
        self.regenerate_all().into_result()
    }

    fn regenerate_all(&self) -> Report {
        let mut report = Report::default();
        let posts: Vec<Post> = match self.backend.store.posts(&Query::all()) {
            Ok(posts) => posts.into_iter().filter(Post::is_live).collect(),
            Err(err) => {
                report.record("listings".to_owned(), Err(err.into()));
                report.log("listings");
                return report;
            }
        };

        let mut published = BTreeSet::new();
        for index in self.indices(&posts) {
            published.extend((0..self.page_count(&index)).map(|i| (index.page_path)(i)));
            report.record(index.name.clone(), self.write_index(&index));
        }
        report.record("stale listings".to_owned(), self.prune(&published));

        let feed = feed::write_feed(&self.feed, &posts, Utc::now())
            .map_err(Error::from)
            .and_then(|xml| Ok(self.backend.site.replace(FEED_PATH, &xml)?));
        report.record("feed".to_owned(), feed);
        report.log("listings");
        report
    }
}

/// A failure regenerating one target.
#[derive(Debug)]
pub struct Failure {
    pub target: String,
    pub error: Error,
}

/// The outcome of a whole-kind regeneration.
#[derive(Debug, Default)]
pub struct Report {
    /// The targets rebuilt successfully.
    pub rebuilt: Vec<String>,
    pub failures: Vec<Failure>,
}

impl Report {
    pub fn record(&mut self, target: String, result: Result<()>) {
        match result {
            Ok(()) => self.rebuilt.push(target),
            Err(error) => {
                warn!(%target, %error, "regeneration failed");
                self.failures.push(Failure { target, error });
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns a report with failures into an [`Error::Incomplete`].
    pub fn into_result(self) -> Result<()> {
        match self.is_complete() {
            true => Ok(()),
            false => Err(Error::Incomplete(self)),
        }
    }

    fn log(&self, kind: &str) {
        info!(
            kind,
            rebuilt = self.rebuilt.len(),
            failed = self.failures.len(),
            "regeneration finished"
        );
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} of {} targets failed",
            self.failures.len(),
            self.failures.len() + self.rebuilt.len()
        )?;
        for failure in &self.failures {
            write!(f, "; {}: {}", failure.target, failure.error)?;
        }
        Ok(())
    }
}

/// The result of a regeneration.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure regenerating artifacts.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the content store could not be read.
    #[error(transparent)]
    Store(#[from] store::Error),

    /// Returned when an artifact could not be rendered.
    #[error(transparent)]
    Render(#[from] render::Error),

    /// Returned when an artifact could not be written or removed.
    #[error(transparent)]
    Site(#[from] site::Error),

    /// Returned when the Atom feed could not be built.
    #[error(transparent)]
    Feed(#[from] feed::Error),

    /// Returned when some targets of a whole-kind run failed.
    #[error("{0}")]
    Incomplete(Report),
}
