//! Support for creating Atom feeds from the published posts.

use crate::post::Post;
use crate::value::url_for;
use atom_syndication::{Category, Entry, Error as AtomError, Feed, Link, Person, Text};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Deserialize;
use url::Url;

/// The feed's author, as configured for the site.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct Author {
    pub name: String,

    #[serde(default)]
    pub email: Option<String>,
}

/// Bundled configuration for creating a feed.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    pub title: String,
    pub author: Option<Author>,
    pub home_page: Url,
}

/// Builds the feed for `posts` and serializes it. Posts that are not live
/// are skipped; `now` stamps the feed when there are no entries.
pub fn write_feed(config: &FeedConfig, posts: &[Post], now: DateTime<Utc>) -> Result<Vec<u8>> {
    let feed = feed(config, posts, now);
    Ok(feed.write_to(Vec::new())?)
}

fn fixed(instant: DateTime<Utc>) -> DateTime<FixedOffset> {
    DateTime::<FixedOffset>::from(instant)
}

pub fn feed(config: &FeedConfig, posts: &[Post], now: DateTime<Utc>) -> Feed {
    let entries: Vec<Entry> = posts
        .iter()
        .filter(|p| p.is_live())
        .filter_map(|p| feed_entry(config, p))
        .collect();
    let updated = posts
        .iter()
        .filter(|p| p.is_live())
        .filter_map(Post::updated)
        .max()
        .unwrap_or(now);

    let mut link = Link::default();
    link.set_href(config.home_page.to_string());
    link.set_rel("alternate");

    let mut feed = Feed::default();
    feed.set_title(config.title.clone());
    feed.set_id(config.home_page.to_string());
    feed.set_updated(fixed(updated));
    feed.set_authors(author_to_people(config.author.as_ref()));
    feed.set_links(vec![link]);
    feed.set_entries(entries);
    feed
}

fn feed_entry(config: &FeedConfig, post: &Post) -> Option<Entry> {
    let path = post.path.as_deref()?;
    let url = url_for(&config.home_page, path).to_string();
    let html = post.body_markup.to_html(&post.body);
    let (summary, _) = Post::summary(&html);

    let mut link = Link::default();
    link.set_href(url.clone());
    link.set_rel("alternate");

    let mut entry = Entry::default();
    entry.set_id(url);
    entry.set_title(post.title.clone());
    entry.set_updated(fixed(post.updated()?));
    entry.set_published(post.published().map(fixed));
    entry.set_authors(author_to_people(config.author.as_ref()));
    entry.set_links(vec![link]);
    entry.set_summary(Some(Text::html(summary)));
    entry.set_categories(
        post.tags
            .iter()
            .map(|tag| {
                let mut category = Category::default();
                category.set_term(tag.as_str());
                category
            })
            .collect::<Vec<_>>(),
    );
    Some(entry)
}

fn author_to_people(author: Option<&Author>) -> Vec<Person> {
    match author {
        Some(author) => {
            let mut person = Person::default();
            person.set_name(author.name.as_str());
            person.set_email(author.email.clone());
            vec![person]
        }
        None => Vec::new(),
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Represents a problem creating a feed.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when there is an Atom-related error.
    #[error("writing atom feed: {0}")]
    Atom(#[from] AtomError),
}
