//! Converts posts, pages and listing pages into template [`Value`]s.
//!
//! A post becomes an object with the fields `id`, `title`, `body` (rendered
//! HTML), `summary`, `summarized`, `url`, `path`, `published`, `updated`
//! (both `YYYY-MM-DD`, or nil for drafts), `published_iso`, `draft` and
//! `tags` (a list of `{tag, slug, url}` objects). A page becomes
//! `{title, body, url, path, updated}`.

use crate::page::Page;
use crate::post::Post;
use crate::tag::Tag;
use chrono::{DateTime, Utc};
use gtmpl::Value;
use std::collections::HashMap;
use url::Url;

/// The absolute URL of the artifact at `path`.
pub fn url_for(site_root: &Url, path: &str) -> Url {
    site_root
        .join(path.trim_start_matches('/'))
        .unwrap_or_else(|_| site_root.clone())
}

fn date(instant: Option<DateTime<Utc>>, format: &str) -> Value {
    match instant {
        Some(instant) => Value::String(instant.format(format).to_string()),
        None => Value::Nil,
    }
}

fn string(s: &str) -> Value {
    Value::String(s.to_owned())
}

pub fn post(post: &Post, site_root: &Url) -> Value {
    let html = post.body_markup.to_html(&post.body);
    let (summary, summarized) = Post::summary(&html);

    let mut m: HashMap<String, Value> = HashMap::new();
    m.insert(
        "id".to_owned(),
        post.id.map_or(Value::Nil, |id| Value::String(id.to_string())),
    );
    m.insert("title".to_owned(), string(&post.title));
    m.insert("summary".to_owned(), string(summary));
    m.insert("summarized".to_owned(), Value::Bool(summarized));
    match &post.path {
        Some(path) => {
            m.insert("path".to_owned(), string(path));
            m.insert(
                "url".to_owned(),
                Value::String(url_for(site_root, path).to_string()),
            );
        }
        None => {
            m.insert("path".to_owned(), Value::Nil);
            m.insert("url".to_owned(), Value::Nil);
        }
    }
    m.insert("published".to_owned(), date(post.published(), "%Y-%m-%d"));
    m.insert("updated".to_owned(), date(post.updated(), "%Y-%m-%d"));
    m.insert(
        "published_iso".to_owned(),
        date(post.published(), "%Y-%m-%dT%H:%M:%SZ"),
    );
    m.insert("draft".to_owned(), Value::Bool(post.is_draft()));
    m.insert(
        "tags".to_owned(),
        Value::Array(
            post.tags
                .iter()
                .map(|t| Value::from(&Tag::new(t, site_root)))
                .collect(),
        ),
    );
    m.insert("body".to_owned(), Value::String(html));
    Value::Object(m)
}

pub fn page(page: &Page, site_root: &Url) -> Value {
    let mut m: HashMap<String, Value> = HashMap::new();
    m.insert("title".to_owned(), string(&page.title));
    m.insert("body".to_owned(), string(&page.body));
    m.insert("path".to_owned(), string(page.path.as_str()));
    m.insert(
        "url".to_owned(),
        Value::String(url_for(site_root, &page.path).to_string()),
    );
    m.insert("updated".to_owned(), date(page.updated, "%Y-%m-%d"));
    Value::Object(m)
}

/// Wraps the main `item` of an output file together with the URLs of its
/// neighbours: `{item, prev, next}`.
pub fn output(item: Value, prev: Option<&Url>, next: Option<&Url>) -> Value {
    let option_to_value = |opt: Option<&Url>| match opt {
        Some(url) => Value::String(url.to_string()),
        None => Value::Nil,
    };

    let mut m: HashMap<String, Value> = HashMap::new();
    m.insert("item".to_owned(), item);
    m.insert("prev".to_owned(), option_to_value(prev));
    m.insert("next".to_owned(), option_to_value(next));
    Value::Object(m)
}
