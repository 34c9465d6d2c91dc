//! The authoring forms and their validation. A form holds the raw submitted
//! strings so a rejected submission can be shown back to the author as it
//! was typed.

use crate::markup::{self, Markup};
use crate::page::{Page, PagePath};
use crate::post::Post;
use crate::render::Renderer;
use crate::tag::TagList;
use std::collections::BTreeSet;
use std::fmt;

/// The submitted fields of a post.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostForm {
    pub title: String,
    pub body: String,

    /// The markup selector, e.g. `markdown`.
    pub body_markup: String,

    /// Comma-separated tags.
    pub tags: String,

    pub draft: bool,
}

impl PostForm {
    /// The form for a new post: an empty draft in `markup`.
    pub fn blank(markup: Markup) -> PostForm {
        PostForm {
            body_markup: markup.name().to_owned(),
            draft: true,
            ..PostForm::default()
        }
    }

    /// The form for editing `post`. A post that has no path yet is shown as
    /// a draft.
    pub fn from_post(post: &Post) -> PostForm {
        PostForm {
            title: post.title.clone(),
            body: post.body.clone(),
            body_markup: post.body_markup.name().to_owned(),
            tags: TagList::from(&post.tags).to_string(),
            draft: !post.was_published() || post.is_draft(),
        }
    }

    pub fn validate(&self) -> Result<PostFields> {
        let body_markup: Markup = self.body_markup.trim().parse()?;
        let mut problems = Vec::new();
        if self.title.trim().is_empty() {
            problems.push(FieldError::new("title", "a title is required"));
        }
        if !problems.is_empty() {
            return Err(Error::Fields(problems));
        }
        Ok(PostFields {
            title: self.title.trim().to_owned(),
            body: self.body.clone(),
            body_markup,
            tags: TagList::parse(&self.tags).into_set(),
            draft: self.draft,
        })
    }
}

/// A validated [`PostForm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PostFields {
    pub title: String,
    pub body: String,
    pub body_markup: Markup,
    pub tags: BTreeSet<String>,
    pub draft: bool,
}

impl PostFields {
    /// Copies the content fields onto `post`. Publication state is left to
    /// the lifecycle.
    pub fn apply(self, post: &mut Post) {
        post.title = self.title;
        post.body = self.body;
        post.body_markup = self.body_markup;
        post.tags = self.tags;
    }
}

/// The submitted fields of a page.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageForm {
    pub path: String,
    pub title: String,

    /// The name of a page template of the theme.
    pub template: String,

    pub body: String,
}

impl PageForm {
    pub fn from_page(page: &Page) -> PageForm {
        PageForm {
            path: page.path.to_string(),
            title: page.title.clone(),
            template: page.template.clone(),
            body: page.body.clone(),
        }
    }

    /// Validates the form; the template must be one `renderer` knows.
    pub fn validate(&self, renderer: &dyn Renderer) -> Result<PageFields> {
        let mut problems = Vec::new();
        let path = match self.path.trim().parse::<PagePath>() {
            Ok(path) => Some(path),
            Err(err) => {
                problems.push(FieldError::new("path", &err.to_string()));
                None
            }
        };
        if self.title.trim().is_empty() {
            problems.push(FieldError::new("title", "a title is required"));
        }
        if !renderer.has_page_template(&self.template) {
            problems.push(FieldError::new(
                "template",
                &format!("unknown template `{}`", self.template),
            ));
        }
        match path {
            Some(path) if problems.is_empty() => Ok(PageFields {
                path,
                title: self.title.trim().to_owned(),
                template: self.template.clone(),
                body: self.body.clone(),
            }),
            _ => Err(Error::Fields(problems)),
        }
    }
}

/// A validated [`PageForm`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageFields {
    pub path: PagePath,
    pub title: String,
    pub template: String,
    pub body: String,
}

/// A problem with one submitted field.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: &str) -> FieldError {
        FieldError {
            field,
            message: message.to_owned(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// The result of validating a form.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a rejected form.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when one or more fields are invalid.
    #[error("invalid fields: {}", join(.0))]
    Fields(Vec<FieldError>),

    /// Returned when the markup selector is not supported.
    #[error(transparent)]
    UnsupportedMarkup(#[from] markup::Error),
}

fn join(problems: &[FieldError]) -> String {
    problems
        .iter()
        .map(FieldError::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}
