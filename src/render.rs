//! Defines the [`Renderer`] trait, which turns a template value into the
//! bytes of an artifact, and [`Theme`], the template-backed renderer.

use gtmpl::{Context, Template, Value};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

/// Which template renders an artifact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layout<'a> {
    /// A single post.
    Post,

    /// A page of the main index or of a tag index.
    Index,

    /// A standalone page using the named page template.
    Page(&'a str),
}

/// Renders template values into artifact bytes.
pub trait Renderer: Send + Sync {
    fn render(&self, layout: Layout<'_>, value: Value) -> Result<Vec<u8>>;

    /// Whether `name` is a page template this renderer knows.
    fn has_page_template(&self, name: &str) -> bool;
}

/// A set of template sources. Templates are parsed on every render, so a
/// theme holds only strings and can be shared freely between workers.
#[derive(Clone, Debug, Default)]
pub struct Theme {
    post: String,
    index: String,
    pages: BTreeMap<String, String>,

    /// Site-wide values made available to every template, e.g. `home_page`
    /// and `site_title`.
    globals: BTreeMap<String, String>,
}

impl Theme {
    /// Builds a theme from template sources.
    pub fn new(post: &str, index: &str, pages: BTreeMap<String, String>) -> Theme {
        Theme {
            post: post.to_owned(),
            index: index.to_owned(),
            pages,
            globals: BTreeMap::new(),
        }
    }

    /// Loads a theme from template files. Each template may be split over
    /// several files, which are concatenated in order (e.g. a base layout
    /// followed by the `define` blocks that fill it).
    pub fn load(
        post: &[PathBuf],
        index: &[PathBuf],
        pages: &BTreeMap<String, Vec<PathBuf>>,
    ) -> Result<Theme> {
        let mut loaded = BTreeMap::new();
        for (name, files) in pages {
            loaded.insert(name.clone(), read_template(files)?);
        }
        Ok(Theme::new(&read_template(post)?, &read_template(index)?, loaded))
    }

    /// Makes `value` available to every template as `{{.name}}`.
    pub fn with_global(mut self, name: &str, value: &str) -> Theme {
        self.globals.insert(name.to_owned(), value.to_owned());
        self
    }

    /// The names of the page templates, in order.
    pub fn page_templates(&self) -> impl Iterator<Item = &str> {
        self.pages.keys().map(String::as_str)
    }

    fn source(&self, layout: Layout<'_>) -> Result<&str> {
        match layout {
            Layout::Post => Ok(&self.post),
            Layout::Index => Ok(&self.index),
            Layout::Page(name) => self
                .pages
                .get(name)
                .map(String::as_str)
                .ok_or_else(|| Error::UnknownTemplate(name.to_owned())),
        }
    }
}

impl Renderer for Theme {
    fn render(&self, layout: Layout<'_>, mut value: Value) -> Result<Vec<u8>> {
        if let Value::Object(obj) = &mut value {
            for (name, global) in &self.globals {
                obj.insert(name.clone(), Value::String(global.clone()));
            }
        }

        let mut template = Template::default();
        template.parse(self.source(layout)?).map_err(Error::Parse)?;
        let context = Context::from(value).map_err(Error::Execute)?;
        let mut out = Vec::new();
        template
            .execute(&mut out, &context)
            .map_err(Error::Execute)?;
        Ok(out)
    }

    fn has_page_template(&self, name: &str) -> bool {
        self.pages.contains_key(name)
    }
}

// Loads the template file contents and concatenates them into one source.
fn read_template<P: AsRef<Path>>(template_files: &[P]) -> Result<String> {
    let mut contents = String::new();
    for template_file in template_files {
        let template_file = template_file.as_ref();
        File::open(template_file)
            .and_then(|mut f| f.read_to_string(&mut contents))
            .map_err(|err| Error::OpenTemplateFile {
                path: template_file.to_owned(),
                err,
            })?;
        contents.push(' ');
    }
    Ok(contents)
}

/// The result of a rendering operation.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failure rendering an artifact.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a page names a template the theme does not have.
    #[error("unknown template `{0}`")]
    UnknownTemplate(String),

    /// Returned for I/O problems while opening template files.
    #[error("opening template file `{}`: {err}", path.display())]
    OpenTemplateFile {
        path: PathBuf,
        #[source]
        err: std::io::Error,
    },

    /// Returned for errors parsing a template.
    #[error("parsing template: {0}")]
    Parse(String),

    /// Returned for errors executing a template.
    #[error("executing template: {0}")]
    Execute(String),
}
