//! Loads the project configuration from `scriptorium.yaml` and the theme
//! description from `theme/theme.yaml` next to it.

use crate::feed::{Author, FeedConfig};
use crate::markup::Markup;
use crate::render::{self, Theme};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use url::Url;

/// The name of the project file.
pub const PROJECT_FILE: &str = "scriptorium.yaml";

#[derive(Deserialize)]
struct PageSize(usize);
impl Default for PageSize {
    fn default() -> Self {
        PageSize(10)
    }
}

#[derive(Deserialize)]
struct Retries(u32);
impl Default for Retries {
    fn default() -> Self {
        Retries(3)
    }
}

#[derive(Deserialize)]
struct Project {
    pub site_root: Url,
    pub title: String,

    #[serde(default)]
    pub author: Option<Author>,

    #[serde(default)]
    pub default_markup: Markup,

    #[serde(default)]
    pub index_page_size: PageSize,

    #[serde(default)]
    pub threads: Option<usize>,

    #[serde(default)]
    pub retries: Retries,

    #[serde(default)]
    pub deploy_version: Option<String>,

    #[serde(default)]
    pub store_directory: Option<PathBuf>,

    #[serde(default)]
    pub output_directory: Option<PathBuf>,

    #[serde(default)]
    pub csrf_secret: Option<String>,
}

#[derive(Deserialize)]
struct ThemeFile {
    post: Vec<PathBuf>,
    index: Vec<PathBuf>,

    #[serde(default)]
    page_templates: BTreeMap<String, Vec<PathBuf>>,

    #[serde(default, rename = "static")]
    static_directory: Option<PathBuf>,
}

pub struct Config {
    /// The absolute URL the site is served from, ending in a slash.
    pub site_root: Url,
    pub title: String,
    pub author: Option<Author>,
    pub default_markup: Markup,
    pub index_page_size: usize,
    pub threads: usize,
    pub retries: u32,

    /// Compared against the site's deploy marker by the deploy hook.
    pub deploy_version: String,

    pub store_directory: PathBuf,
    pub output_directory: PathBuf,

    /// The token mutating actions must present. `None` rejects them all.
    pub csrf_secret: Option<String>,

    pub post_template: Vec<PathBuf>,
    pub index_template: Vec<PathBuf>,
    pub page_templates: BTreeMap<String, Vec<PathBuf>>,
    pub static_directory: Option<PathBuf>,
}

impl Config {
    /// Loads the configuration from the first `scriptorium.yaml` found in
    /// `dir` or one of its ancestors.
    pub fn from_directory(dir: &Path) -> Result<Config> {
        let path = dir.join(PROJECT_FILE);
        if path.exists() {
            match Config::from_project_file(&path) {
                Ok(config) => Ok(config),
                Err(e) => Err(anyhow!("Loading configuration: {:?}", e)),
            }
        } else {
            match dir.parent() {
                Some(parent) => Config::from_directory(parent),
                None => Err(anyhow!(
                    "Could not find `{}` in any parent directory",
                    PROJECT_FILE
                )),
            }
        }
    }

    pub fn from_project_file(path: &Path) -> Result<Config> {
        use crate::util::open;
        let project: Project = serde_yaml::from_reader(open(path, "project")?)?;
        let project_root = path.parent().ok_or_else(|| {
            anyhow!(
                "Can't get parent directory for provided project file path '{:?}'",
                path
            )
        })?;
        let theme_dir = project_root.join("theme");
        let theme: ThemeFile =
            serde_yaml::from_reader(open(&theme_dir.join("theme.yaml"), "theme")?)?;
        let in_theme = |files: &[PathBuf]| -> Vec<PathBuf> {
            files.iter().map(|relpath| theme_dir.join(relpath)).collect()
        };

        Ok(Config {
            site_root: with_trailing_slash(project.site_root),
            title: project.title,
            author: project.author,
            default_markup: project.default_markup,
            index_page_size: project.index_page_size.0,
            threads: match project.threads {
                Some(threads) => threads,
                None => std::thread::available_parallelism().map_or(1, |n| n.get()),
            },
            retries: project.retries.0,
            deploy_version: project
                .deploy_version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_owned()),
            store_directory: project_root
                .join(project.store_directory.unwrap_or_else(|| PathBuf::from("content"))),
            output_directory: project_root
                .join(project.output_directory.unwrap_or_else(|| PathBuf::from("_site"))),
            csrf_secret: project.csrf_secret,
            post_template: in_theme(&theme.post),
            index_template: in_theme(&theme.index),
            page_templates: theme
                .page_templates
                .iter()
                .map(|(name, files)| (name.clone(), in_theme(files)))
                .collect(),
            static_directory: theme.static_directory.map(|dir| theme_dir.join(dir)),
        })
    }

    /// Loads the theme's templates, exposing `site_title` and `home_page`
    /// to every template.
    pub fn load_theme(&self) -> render::Result<Theme> {
        Ok(
            Theme::load(&self.post_template, &self.index_template, &self.page_templates)?
                .with_global("site_title", &self.title)
                .with_global("home_page", self.site_root.as_str()),
        )
    }

    pub fn feed_config(&self) -> FeedConfig {
        FeedConfig {
            title: self.title.clone(),
            author: self.author.clone(),
            home_page: self.site_root.clone(),
        }
    }
}

// `Url::join` replaces the last path segment unless the base ends in `/`.
fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
