//! Defines [`TagList`], the comma-separated tag input on the post form, and
//! [`Tag`], a tag resolved against the site so it can be linked from
//! templates.

use gtmpl::Value;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::hash::{Hash, Hasher};
use url::Url;

/// An unordered, deduplicated set of tags as entered by an author, e.g.
/// `"rust, web , rust"` is the set `{rust, web}`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TagList(pub BTreeSet<String>);

impl TagList {
    /// Splits `input` on commas, trimming whitespace and dropping empty
    /// entries.
    pub fn parse(input: &str) -> TagList {
        TagList(
            input
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_owned)
                .collect(),
        )
    }

    pub fn into_set(self) -> BTreeSet<String> {
        self.0
    }
}

impl From<&BTreeSet<String>> for TagList {
    fn from(tags: &BTreeSet<String>) -> TagList {
        TagList(tags.clone())
    }
}

impl fmt::Display for TagList {
    /// Joins the tags back into the form's input format.
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for (i, tag) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(tag)?;
        }
        Ok(())
    }
}

/// Represents a post tag together with the URL of its first index page.
#[derive(Clone, Debug)]
pub struct Tag {
    /// The tag as the author wrote it.
    pub name: String,

    /// The slugified tag, used as the tag's directory under `/tags/`, so
    /// e.g. `macOS` and `MacOS` share one index.
    pub slug: String,

    /// The URL for the tag's first index page, i.e.
    /// `{site_root}/tags/{slug}/index.html`.
    pub url: Url,
}

impl Tag {
    pub fn new(name: &str, site_root: &Url) -> Tag {
        let slug = slug::slugify(name);
        Tag {
            name: name.to_owned(),
            url: site_root
                // NOTE: the slug has no trailing slash, so join the whole
                // relative path at once rather than chaining joins
                .join(&format!("tags/{}/index.html", slug))
                .unwrap_or_else(|_| site_root.clone()),
            slug,
        }
    }
}

impl Hash for Tag {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.slug.hash(state)
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.slug == other.slug
    }
}
impl Eq for Tag {}

impl From<&Tag> for Value {
    /// Converts [`Tag`]s into [`Value`]s for templating.
    fn from(t: &Tag) -> Value {
        let mut m: HashMap<String, Value> = HashMap::new();
        m.insert("tag".to_owned(), Value::String(t.name.clone()));
        m.insert("slug".to_owned(), Value::String(t.slug.clone()));
        m.insert("url".to_owned(), Value::String(t.url.to_string()));
        Value::Object(m)
    }
}
