use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use scriptorium::admin::{Admin, Error};
use scriptorium::clock::ManualClock;
use scriptorium::deploy::DeployMarker;
use scriptorium::dispatch::{Dispatcher, Job, Regenerators, RetryPolicy};
use scriptorium::feed::FeedConfig;
use scriptorium::form::{PageForm, PostForm};
use scriptorium::guard::SharedSecret;
use scriptorium::lifecycle::{PostRemoval, PostTransition};
use scriptorium::page::{Page, PagePath};
use scriptorium::post::{Post, PostId};
use scriptorium::regenerate::{Backend, ListingRegenerator, PageRegenerator, PostRegenerator};
use scriptorium::render::Theme;
use scriptorium::site::{self, MemorySite, StaticSite};
use scriptorium::store::{self, ContentStore, MemoryStore, Query};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

const TOKEN: Option<&str> = Some("secret");

struct Blog {
    admin: Admin,
    store: Arc<MemoryStore>,
    site: Arc<MemorySite>,
    dispatcher: Arc<Dispatcher>,
}

fn theme() -> Theme {
    let mut pages = BTreeMap::new();
    pages.insert("default".to_owned(), "{{.item.title}}|{{.item.body}}".to_owned());
    Theme::new(
        "{{.item.title}}|{{.item.body}}",
        "{{range .item}}[{{.title}}]{{end}}",
        pages,
    )
}

fn blog_with(
    store: Arc<dyn ContentStore>,
    memory: Arc<MemoryStore>,
    public: Arc<dyn StaticSite>,
    site: Arc<MemorySite>,
) -> Blog {
    let backend = Backend {
        store,
        site: public,
        renderer: Arc::new(theme()),
        site_root: Url::parse("https://blog.example/").unwrap(),
    };
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
        Duration::seconds(30),
    );
    Blog {
        admin: Admin::new(
            backend,
            dispatcher.clone(),
            Arc::new(SharedSecret::new("secret")),
            Arc::new(clock),
            Default::default(),
        ),
        store: memory,
        site,
        dispatcher,
    }
}

fn blog() -> Blog {
    let store = Arc::new(MemoryStore::new());
    let site = Arc::new(MemorySite::new());
    blog_with(store.clone(), store, site.clone(), site)
}

fn post(title: &str, draft: bool) -> PostForm {
    PostForm {
        title: title.to_owned(),
        body: format!("About {}.", title),
        body_markup: "txt".to_owned(),
        tags: "notes".to_owned(),
        draft,
    }
}

fn page(path: &str, title: &str) -> PageForm {
    PageForm {
        path: path.to_owned(),
        title: title.to_owned(),
        template: "default".to_owned(),
        body: title.to_lowercase(),
    }
}

fn path(s: &str) -> PagePath {
    s.parse().unwrap()
}

fn stored(blog: &Blog, id: PostId) -> Post {
    blog.store.post(id).unwrap().unwrap()
}

#[test]
fn path_is_set_once_the_post_has_been_published() {
    // every sequence of four saves, draft or not
    for mask in 0..16u32 {
        let blog = blog();
        let mut id = None;
        let mut ever_published = false;
        for step in 0..4 {
            let draft = mask & (1 << step) != 0;
            let saved = blog.admin.save_post(TOKEN, id, post("Post", draft)).unwrap();
            id = Some(saved.id);
            ever_published |= !draft;
            let post = stored(&blog, saved.id);
            assert_eq!(ever_published, post.was_published(), "mask {:04b} step {}", mask, step);
            assert_eq!(draft, post.is_draft());
        }
    }
}

#[test]
fn publishing_a_new_post() {
    let blog = blog();
    let saved = blog.admin.save_post(TOKEN, None, post("Hello", false)).unwrap();
    let live = stored(&blog, saved.id);
    assert!(live.published().is_some());
    assert_eq!(live.published(), live.updated());
    assert_eq!(Some("/2021/04/hello"), live.path.as_deref());

    let saved = blog.admin.save_post(TOKEN, None, post("Draft", true)).unwrap();
    let draft = stored(&blog, saved.id);
    assert_eq!(None, draft.published());
    assert_eq!(None, draft.path);
    assert!(!blog.dispatcher.pending().contains(&Job::Post(saved.id)));
}

#[test]
fn editing_a_live_post() {
    let blog = blog();
    let saved = blog.admin.save_post(TOKEN, None, post("Hello", false)).unwrap();
    blog.dispatcher.run_pending();
    let before = stored(&blog, saved.id);

    let edited = blog.admin.save_post(TOKEN, Some(saved.id), post("Hello again", false)).unwrap();
    assert_eq!(PostTransition::Updated, edited.transition);
    let after = stored(&blog, saved.id);
    assert_eq!(before.published(), after.published());
    assert!(after.updated() > before.updated());

    let post_jobs: Vec<Job> = blog
        .dispatcher
        .pending()
        .into_iter()
        .filter(|job| matches!(job, Job::Post(_)))
        .collect();
    assert_eq!(vec![Job::Post(saved.id)], post_jobs);

    blog.dispatcher.run_pending();
    assert_eq!(
        Some("Hello again|<p>About Hello again.</p>".to_owned()),
        blog.site.get("/2021/04/hello")
    );
}

/// Records, for every page delete, whether the rename target was in the
/// store at that moment.
struct Watching {
    inner: Arc<MemoryStore>,
    target: PagePath,
    seen: Mutex<Vec<bool>>,
}

impl ContentStore for Watching {
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
        let present = self.inner.page(&self.target)?.is_some();
        self.seen.lock().push(present);
        self.inner.delete_page(path)
    }
}

/// Records, for every artifact removal, what the site held at the rename
/// target at that moment.
struct WatchingSite {
    inner: Arc<MemorySite>,
    target: String,
    seen: Mutex<Vec<Option<String>>>,
}

impl StaticSite for WatchingSite {
    fn replace(&self, path: &str, contents: &[u8]) -> site::Result<()> {
        self.inner.replace(path, contents)
    }
    fn remove(&self, path: &str) -> site::Result<()> {
        self.seen.lock().push(self.inner.get(&self.target));
        self.inner.remove(path)
    }
    fn read(&self, path: &str) -> site::Result<Option<Vec<u8>>> {
        self.inner.read(path)
    }
}

#[test]
fn renaming_a_page_publishes_before_removing() {
    let memory = Arc::new(MemoryStore::new());
    let watching = Arc::new(Watching {
        inner: memory.clone(),
        target: path("/b"),
        seen: Mutex::new(Vec::new()),
    });
    let site = Arc::new(MemorySite::new());
    let watching_site = Arc::new(WatchingSite {
        inner: site.clone(),
        target: "/b".to_owned(),
        seen: Mutex::new(Vec::new()),
    });
    let blog = blog_with(watching.clone(), memory, watching_site.clone(), site);
    blog.admin.save_page(TOKEN, None, page("/a", "Old")).unwrap();
    blog.dispatcher.run_pending();
    assert!(watching_site.seen.lock().is_empty());

    blog.admin.save_page(TOKEN, Some("/a"), page("/b", "New")).unwrap();
    assert_eq!(vec![true], *watching.seen.lock());
    // every removal of `/a` saw `/b` already published
    let seen = watching_site.seen.lock().clone();
    assert!(!seen.is_empty());
    assert!(seen.iter().all(|b| b.as_deref() == Some("New|new")), "{:?}", seen);
    assert_eq!(None, blog.site.get("/a"));
    assert_eq!(None, blog.store.page(&path("/a")).unwrap());
    assert_eq!("New", blog.store.page(&path("/b")).unwrap().unwrap().title);

    blog.dispatcher.run_pending();
    assert_eq!(None, blog.site.get("/a"));
    assert_eq!(Some("New|new".to_owned()), blog.site.get("/b"));
}

#[test]
fn creating_a_page_over_another_conflicts() {
    let blog = blog();
    blog.admin.save_page(TOKEN, None, page("/a", "First")).unwrap();
    blog.admin.save_page(TOKEN, None, page("/c", "Other")).unwrap();

    assert!(matches!(
        blog.admin.save_page(TOKEN, None, page("/a", "Second")),
        Err(Error::PathConflict(_))
    ));
    // renaming another page onto it is a conflict as well
    assert!(matches!(
        blog.admin.save_page(TOKEN, Some("/c"), page("/a", "Other")),
        Err(Error::PathConflict(_))
    ));
    assert_eq!("First", blog.store.page(&path("/a")).unwrap().unwrap().title);
    assert!(blog.store.page(&path("/c")).unwrap().is_some());
}

#[test]
fn duplicate_triggers_rebuild_from_latest_state() {
    let blog = blog();
    let saved = blog.admin.save_post(TOKEN, None, post("One", false)).unwrap();
    blog.admin.save_post(TOKEN, Some(saved.id), post("Two", false)).unwrap();
    blog.admin.save_post(TOKEN, Some(saved.id), post("Three", false)).unwrap();

    // the three saves collapsed into one post job and one listings job
    assert_eq!(2, blog.dispatcher.run_pending());
    assert_eq!(1, blog.site.writes("/2021/04/one"));
    assert_eq!(
        Some("Three|<p>About Three.</p>".to_owned()),
        blog.site.get("/2021/04/one")
    );

    // a redundant run converges to the same artifact
    blog.dispatcher.schedule(Job::Post(saved.id));
    blog.dispatcher.run_pending();
    assert_eq!(
        Some("Three|<p>About Three.</p>".to_owned()),
        blog.site.get("/2021/04/one")
    );
}

#[test]
fn a_trailing_slash_does_not_make_a_second_page() {
    let blog = blog();
    blog.admin.save_page(TOKEN, None, page("/a", "First")).unwrap();
    assert!(matches!(
        blog.admin.save_page(TOKEN, None, page("/a/", "Second")),
        Err(Error::PathConflict(_))
    ));
    blog.dispatcher.run_pending();

    blog.admin.delete_page(TOKEN, "/a/").unwrap();
    assert!(blog.store.pages(&Query::all()).unwrap().is_empty());
    assert_eq!(None, blog.site.get("/a"));
}

#[test]
fn invalid_page_path_is_rejected() {
    let blog = blog();
    match blog.admin.save_page(TOKEN, None, page("not-a-path", "Nope")) {
        Err(Error::Validation(rejected)) => {
            assert_eq!("path", rejected.problems[0].field);
        }
        other => panic!("expected a validation error, got {:?}", other),
    }
    assert!(blog.store.pages(&Query::all()).unwrap().is_empty());
    assert!(blog.dispatcher.pending().is_empty());
}

#[test]
fn deleting_posts() {
    let blog = blog();
    let draft = blog.admin.save_post(TOKEN, None, post("Draft", true)).unwrap();
    let live = blog.admin.save_post(TOKEN, None, post("Live", false)).unwrap();
    blog.dispatcher.run_pending();
    let artifacts = blog.site.paths();

    assert_eq!(PostRemoval::Discard, blog.admin.delete_post(TOKEN, draft.id).unwrap());
    assert_eq!(None, blog.store.post(draft.id).unwrap());
    assert_eq!(artifacts, blog.site.paths());

    let removal = blog.admin.delete_post(TOKEN, live.id).unwrap();
    assert_eq!(
        PostRemoval::Remove {
            path: "/2021/04/live".to_owned()
        },
        removal
    );
    assert_eq!(None, blog.store.post(live.id).unwrap());
    assert_eq!(None, blog.site.get("/2021/04/live"));

    blog.dispatcher.run_pending();
    assert_eq!(Some("".to_owned()), blog.site.get("/index.html"));
    assert_eq!(None, blog.site.get("/tags/notes/index.html"));
}

#[test]
fn full_regeneration_forces_the_deploy_hook() {
    let blog = blog();
    blog.admin.save_post(TOKEN, None, post("Hello", false)).unwrap();
    blog.admin.save_page(TOKEN, None, page("/about", "About")).unwrap();
    blog.dispatcher.schedule(Job::Deploy { force: false });
    blog.dispatcher.run_pending();
    let index_writes = blog.site.writes("/index.html");

    blog.admin.regenerate(TOKEN).unwrap();
    assert_eq!(3, blog.dispatcher.run_pending());
    assert_eq!(2, blog.site.writes("/about"));
    assert_eq!(2, blog.site.writes("/2021/04/hello"));
    assert_eq!(index_writes + 1, blog.site.writes("/index.html"));
    assert!(blog.dispatcher.take_failures().is_empty());
}
