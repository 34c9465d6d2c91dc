//! Defines the [`Markup`] selector stored with every post and the conversion
//! of a post body from that markup into HTML.

use pulldown_cmark::{escape::escape_html, html, Options, Parser};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The fixed set of markup languages a post body may be written in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Markup {
    Markdown,
    Html,
    Text,
}

impl Markup {
    /// Every supported selector, in the order offered to authors.
    pub const ALL: [Markup; 3] = [Markup::Markdown, Markup::Html, Markup::Text];

    /// The selector as stored and submitted.
    pub fn name(self) -> &'static str {
        match self {
            Markup::Markdown => "markdown",
            Markup::Html => "html",
            Markup::Text => "txt",
        }
    }

    /// The label shown next to the selector.
    pub fn label(self) -> &'static str {
        match self {
            Markup::Markdown => "Markdown",
            Markup::Html => "HTML",
            Markup::Text => "Plain text",
        }
    }

    /// Renders `body` to HTML.
    pub fn to_html(self, body: &str) -> String {
        let mut out = String::with_capacity(body.len());
        match self {
            Markup::Markdown => {
                let mut options = Options::empty();
                options.insert(Options::ENABLE_FOOTNOTES);
                options.insert(Options::ENABLE_SMART_PUNCTUATION);
                options.insert(Options::ENABLE_STRIKETHROUGH);
                options.insert(Options::ENABLE_TABLES);
                options.insert(Options::ENABLE_TASKLISTS);
                html::push_html(&mut out, Parser::new_ext(body, options));
            }
            Markup::Html => out.push_str(body),
            Markup::Text => {
                for (i, paragraph) in body
                    .split("\n\n")
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .enumerate()
                {
                    if i > 0 {
                        out.push('\n');
                    }
                    out.push_str("<p>");
                    // writing into a String cannot fail
                    let _ = escape_html(&mut out, paragraph);
                    out.push_str("</p>");
                }
            }
        }
        out
    }
}

impl Default for Markup {
    fn default() -> Self {
        Markup::Markdown
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Markup {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Markup::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::Unsupported(s.to_owned()))
    }
}

impl TryFrom<String> for Markup {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Markup> for String {
    fn from(m: Markup) -> String {
        m.name().to_owned()
    }
}

/// Represents a failure selecting a markup language.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the selector names no supported markup language.
    #[error("unsupported markup `{0}`")]
    Unsupported(String),
}
