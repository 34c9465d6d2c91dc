//! Defines the [`ContentStore`] trait, the persistent home of posts and
//! pages, along with two implementations: [`MemoryStore`] for tests and
//! embedding, and [`DirectoryStore`], which keeps one YAML file per record.
//!
//! Every operation is atomic per record and nothing more: there are no
//! cross-record transactions, and concurrent writers of one record resolve
//! as last-write-wins.

use crate::page::{Page, PagePath};
use crate::post::{Post, PostId};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};
use url::form_urlencoded;

/// Which end of a kind's natural ordering a query starts from. Posts are
/// ordered by publication date (drafts sort as newest), pages by last
/// update.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Order {
    NewestFirst,
    OldestFirst,
}

/// An ordered range query.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Query {
    pub order: Order,
    pub offset: usize,
    pub limit: Option<usize>,
}

impl Query {
    /// Every record, newest first.
    pub fn all() -> Query {
        Query {
            order: Order::NewestFirst,
            offset: 0,
            limit: None,
        }
    }

    /// `count` records starting at `offset`, newest first.
    pub fn range(offset: usize, count: usize) -> Query {
        Query {
            order: Order::NewestFirst,
            offset,
            limit: Some(count),
        }
    }

    fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let items = items.into_iter().skip(self.offset);
        match self.limit {
            Some(limit) => items.take(limit).collect(),
            None => items.collect(),
        }
    }
}

/// Abstract persistent storage for posts (keyed by id) and pages (keyed by
/// path).
pub trait ContentStore: Send + Sync {
    /// Loads a post by id.
    fn post(&self, id: PostId) -> Result<Option<Post>>;

    fn posts(&self, query: &Query) -> Result<Vec<Post>>;

    /// Persists `post`, assigning it an id first if it has none.
    fn put_post(&self, post: &mut Post) -> Result<PostId>;

    /// Deletes a post. Deleting an absent post is a no-op.
    fn delete_post(&self, id: PostId) -> Result<()>;

    /// Loads a page by path.
    fn page(&self, path: &PagePath) -> Result<Option<Page>>;

    fn pages(&self, query: &Query) -> Result<Vec<Page>>;

    fn put_page(&self, page: &Page) -> Result<()>;

    /// Deletes a page. Deleting an absent page is a no-op.
    fn delete_page(&self, path: &PagePath) -> Result<()>;
}

/// Sorts posts by publication date. Drafts have no publication date and
/// sort as if published at the end of time; ties break on id so listings are
/// stable.
pub fn sort_posts(posts: &mut [Post], order: Order) {
    posts.sort_by(|a, b| {
        let key = |p: &Post| (p.published().is_none(), p.published(), p.id);
        match order {
            Order::OldestFirst => key(a).cmp(&key(b)),
            Order::NewestFirst => key(b).cmp(&key(a)),
        }
    });
}

/// Sorts pages by last update, ties broken by path.
pub fn sort_pages(pages: &mut [Page], order: Order) {
    pages.sort_by(|a, b| {
        let key = |p: &Page| (p.updated, p.path.clone());
        match order {
            Order::OldestFirst => key(a).cmp(&key(b)),
            Order::NewestFirst => key(b).cmp(&key(a)),
        }
    });
}

/// An in-process [`ContentStore`].
#[derive(Default)]
pub struct MemoryStore {
    posts: RwLock<BTreeMap<PostId, Post>>,
    pages: RwLock<BTreeMap<PagePath, Page>>,
    next_id: Mutex<u64>,
    unavailable: RwLock<bool>,
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    /// Makes every subsequent operation fail with [`Error::Unavailable`]
    /// until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.write() = unavailable;
    }

    fn check(&self) -> Result<()> {
        match *self.unavailable.read() {
            true => Err(Error::Unavailable("memory store switched off".to_owned())),
            false => Ok(()),
        }
    }
}

impl ContentStore for MemoryStore {
    fn post(&self, id: PostId) -> Result<Option<Post>> {
        self.check()?;
        Ok(self.posts.read().get(&id).cloned())
    }

    fn posts(&self, query: &Query) -> Result<Vec<Post>> {
        self.check()?;
        let mut posts: Vec<Post> = self.posts.read().values().cloned().collect();
        sort_posts(&mut posts, query.order);
        Ok(query.apply(posts))
    }

    fn put_post(&self, post: &mut Post) -> Result<PostId> {
        self.check()?;
        let id = match post.id {
            Some(id) => id,
            None => {
                let mut next = self.next_id.lock();
                *next += 1;
                PostId(*next)
            }
        };
        post.id = Some(id);
        self.posts.write().insert(id, post.clone());
        Ok(id)
    }

    fn delete_post(&self, id: PostId) -> Result<()> {
        self.check()?;
        self.posts.write().remove(&id);
        Ok(())
    }

    fn page(&self, path: &PagePath) -> Result<Option<Page>> {
        self.check()?;
        Ok(self.pages.read().get(path).cloned())
    }

    fn pages(&self, query: &Query) -> Result<Vec<Page>> {
        self.check()?;
        let mut pages: Vec<Page> = self.pages.read().values().cloned().collect();
        sort_pages(&mut pages, query.order);
        Ok(query.apply(pages))
    }

    fn put_page(&self, page: &Page) -> Result<()> {
        self.check()?;
        self.pages.write().insert(page.path.clone(), page.clone());
        Ok(())
    }

    fn delete_page(&self, path: &PagePath) -> Result<()> {
        self.check()?;
        self.pages.write().remove(path);
        Ok(())
    }
}

/// A [`ContentStore`] keeping each record in its own YAML file:
///
/// * posts at `{root}/posts/{id}.yaml`
/// * pages at `{root}/pages/{url-encoded path}.yaml`
///
/// Records are replaced atomically (write to a temporary file, then rename),
/// so a reader never observes a half-written record.
pub struct DirectoryStore {
    root: PathBuf,

    /// Serializes id allocation within this process. Lazily seeded from the
    /// largest id on disk.
    next_id: Mutex<Option<u64>>,
}

impl DirectoryStore {
    /// Opens (creating if needed) a store rooted at `root`.
    pub fn open(root: &Path) -> Result<DirectoryStore> {
        for dir in [root.join(POSTS_DIR), root.join(PAGES_DIR)] {
            std::fs::create_dir_all(&dir).map_err(|err| Error::Io { path: dir, err })?;
        }
        Ok(DirectoryStore {
            root: root.to_owned(),
            next_id: Mutex::new(None),
        })
    }

    fn post_file(&self, id: PostId) -> PathBuf {
        self.root.join(POSTS_DIR).join(format!("{}{}", id, YAML_EXTENSION))
    }

    fn page_file(&self, path: &PagePath) -> PathBuf {
        let encoded: String = form_urlencoded::byte_serialize(path.as_bytes()).collect();
        self.root
            .join(PAGES_DIR)
            .join(format!("{}{}", encoded, YAML_EXTENSION))
    }

    fn read<T: serde::de::DeserializeOwned>(&self, file: &Path) -> Result<Option<T>> {
        match std::fs::read_to_string(file) {
            Ok(contents) => serde_yaml::from_str(&contents)
                .map(Some)
                .map_err(|err| Error::Deserialize {
                    path: file.to_owned(),
                    err,
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Io {
                path: file.to_owned(),
                err,
            }),
        }
    }

    fn write<T: serde::Serialize>(&self, file: &Path, record: &T) -> Result<()> {
        let yaml = serde_yaml::to_string(record)?;
        crate::util::write_atomically(file, yaml.as_bytes()).map_err(|err| Error::Io {
            path: file.to_owned(),
            err,
        })?;
        trace!(file = %file.display(), "record written");
        Ok(())
    }

    fn remove(&self, file: &Path) -> Result<()> {
        crate::util::remove_file_if_exists(file).map_err(|err| Error::Io {
            path: file.to_owned(),
            err,
        })
    }

    /// Reads every record in `dir`, skipping temporary files.
    fn read_all<T: serde::de::DeserializeOwned>(&self, dir: &str) -> Result<Vec<T>> {
        let dir = self.root.join(dir);
        let entries = std::fs::read_dir(&dir).map_err(|err| Error::Io {
            path: dir.clone(),
            err,
        })?;
        let mut records = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| Error::Io {
                path: dir.clone(),
                err,
            })?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if file_name.starts_with('.') || !file_name.ends_with(YAML_EXTENSION) {
                continue;
            }
            // a record deleted between listing and reading is simply skipped
            if let Some(record) = self.read(&entry.path())? {
                records.push(record);
            }
        }
        Ok(records)
    }

    fn allocate_id(&self) -> Result<PostId> {
        let mut next = self.next_id.lock();
        let current = match *next {
            Some(current) => current,
            None => self
                .read_all::<Post>(POSTS_DIR)?
                .iter()
                .filter_map(|p| p.id)
                .map(|id| id.0)
                .max()
                .unwrap_or(0),
        };
        *next = Some(current + 1);
        Ok(PostId(current + 1))
    }
}

const POSTS_DIR: &str = "posts";
const PAGES_DIR: &str = "pages";
const YAML_EXTENSION: &str = ".yaml";

impl ContentStore for DirectoryStore {
    fn post(&self, id: PostId) -> Result<Option<Post>> {
        self.read(&self.post_file(id))
    }

    fn posts(&self, query: &Query) -> Result<Vec<Post>> {
        let mut posts = self.read_all::<Post>(POSTS_DIR)?;
        sort_posts(&mut posts, query.order);
        Ok(query.apply(posts))
    }

    fn put_post(&self, post: &mut Post) -> Result<PostId> {
        let id = match post.id {
            Some(id) => id,
            None => self.allocate_id()?,
        };
        post.id = Some(id);
        self.write(&self.post_file(id), post)?;
        debug!(%id, "post stored");
        Ok(id)
    }

    fn delete_post(&self, id: PostId) -> Result<()> {
        self.remove(&self.post_file(id))?;
        debug!(%id, "post deleted");
        Ok(())
    }

    fn page(&self, path: &PagePath) -> Result<Option<Page>> {
        self.read(&self.page_file(path))
    }

    fn pages(&self, query: &Query) -> Result<Vec<Page>> {
        let mut pages = self.read_all::<Page>(PAGES_DIR)?;
        sort_pages(&mut pages, query.order);
        Ok(query.apply(pages))
    }

    fn put_page(&self, page: &Page) -> Result<()> {
        self.write(&self.page_file(&page.path), page)?;
        debug!(path = %page.path, "page stored");
        Ok(())
    }

    fn delete_page(&self, path: &PagePath) -> Result<()> {
        self.remove(&self.page_file(path))?;
        debug!(%path, "page deleted");
        Ok(())
    }
}

/// The result of a store operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a store failure. A missing record is not an error: lookups
/// return `None` and deletes of absent records succeed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the store cannot serve requests at all.
    #[error("content store unavailable: {0}")]
    Unavailable(String),

    /// Returned for I/O problems reading or writing a record file.
    #[error("accessing `{}`: {err}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    /// Returned when a record file does not hold a valid record.
    #[error("reading record `{}`: {err}", path.display())]
    Deserialize {
        path: PathBuf,
        #[source]
        err: serde_yaml::Error,
    },

    /// Returned when a record cannot be serialized.
    #[error("serializing record: {0}")]
    Serialize(#[from] serde_yaml::Error),
}
