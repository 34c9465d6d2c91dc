use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use scriptorium::admin::{Admin, Listing};
use scriptorium::clock::SystemClock;
use scriptorium::config::Config;
use scriptorium::deploy::DeployMarker;
use scriptorium::dispatch::{Dispatcher, Regenerators, RetryPolicy};
use scriptorium::form::{PageForm, PostForm};
use scriptorium::guard::SharedSecret;
use scriptorium::post::PostId;
use scriptorium::regenerate::{Backend, ListingRegenerator, PageRegenerator, PostRegenerator};
use scriptorium::site::DirectorySite;
use scriptorium::store::DirectoryStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "scriptorium")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to search (upwards) for `scriptorium.yaml`
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Token authorizing mutating actions
    #[arg(long, env = "SCRIPTORIUM_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Run regeneration jobs on this thread instead of a worker pool
    #[arg(long)]
    sync: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, edit, remove and list posts
    #[command(subcommand)]
    Post(PostCommand),

    /// Create, edit, remove and list pages
    #[command(subcommand)]
    Page(PageCommand),

    /// Rebuild every post, every page and rerun the deploy hook
    Regenerate,

    /// Run the deploy hook if this version has not been deployed yet
    Deploy {
        /// Run even if this version was already deployed
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum PostCommand {
    /// Write a new post
    New(PostArgs),

    /// Edit a post; omitted fields keep their current value
    Edit {
        id: PostId,

        #[command(flatten)]
        fields: PostArgs,
    },

    /// Remove a post and take its artifact down
    Delete { id: PostId },

    /// Render a post through the post template without saving it
    Preview {
        /// Preview changes to an existing post
        #[arg(long)]
        id: Option<PostId>,

        #[command(flatten)]
        fields: PostArgs,
    },

    /// List posts, drafts first
    List(Range),
}

#[derive(Args)]
struct PostArgs {
    #[arg(long)]
    title: Option<String>,

    /// File holding the body
    #[arg(long)]
    body: Option<PathBuf>,

    /// One of `markdown`, `html`, `txt`
    #[arg(long)]
    markup: Option<String>,

    /// Comma-separated tags
    #[arg(long)]
    tags: Option<String>,

    /// Save as (or pull back to) a draft
    #[arg(long, conflicts_with = "publish")]
    draft: bool,

    /// Publish
    #[arg(long)]
    publish: bool,
}

impl PostArgs {
    fn onto(self, mut form: PostForm) -> Result<PostForm> {
        if let Some(title) = self.title {
            form.title = title;
        }
        if let Some(body) = self.body {
            form.body = read_body(&body)?;
        }
        if let Some(markup) = self.markup {
            form.body_markup = markup;
        }
        if let Some(tags) = self.tags {
            form.tags = tags;
        }
        if self.draft {
            form.draft = true;
        }
        if self.publish {
            form.draft = false;
        }
        Ok(form)
    }
}

#[derive(Subcommand)]
enum PageCommand {
    /// Create a page, or edit (and possibly rename) the page at `--from`
    Save {
        /// The current path of the page being edited
        #[arg(long)]
        from: Option<String>,

        #[arg(long)]
        path: Option<String>,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        template: Option<String>,

        /// File holding the body
        #[arg(long)]
        body: Option<PathBuf>,
    },

    /// Remove a page and its artifact
    Delete { path: String },

    /// Finish a rename whose old page could not be removed
    Retire { path: String },

    /// List pages, most recently updated first
    List(Range),
}

#[derive(Args)]
struct Range {
    #[arg(long, default_value_t = 0)]
    offset: usize,

    #[arg(long, default_value_t = 20)]
    count: usize,
}

fn read_body(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Reading body from `{}`", path.display()))
}

fn init_tracing(verbose: bool) {
    let filter = match std::env::var("RUST_LOG") {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => EnvFilter::new(if verbose { "debug" } else { "info" }),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = Config::from_directory(&cli.project)?;
    let backend = Backend {
        store: Arc::new(DirectoryStore::open(&config.store_directory)?),
        site: Arc::new(DirectorySite::new(&config.output_directory)),
        renderer: Arc::new(config.load_theme()?),
        site_root: config.site_root.clone(),
    };
    let listings = Arc::new(ListingRegenerator::new(
        backend.clone(),
        config.index_page_size,
        config.feed_config(),
    ));
    let regenerators = Regenerators {
        posts: Arc::new(PostRegenerator::new(backend.clone())),
        pages: Arc::new(PageRegenerator::new(backend.clone())),
        listings: listings.clone(),
        deploy: Arc::new(DeployMarker::new(
            &config.deploy_version,
            backend.site.clone(),
            config.static_directory.as_deref(),
            listings,
        )),
    };
    let retry = RetryPolicy {
        retries: config.retries,
        backoff: Duration::from_millis(250),
    };
    let dispatcher = Arc::new(match cli.sync {
        true => Dispatcher::manual(regenerators, retry),
        false => Dispatcher::spawn(regenerators, retry, config.threads),
    });
    let admin = Admin::new(
        backend,
        dispatcher.clone(),
        Arc::new(SharedSecret::new(config.csrf_secret.as_deref().unwrap_or_default())),
        Arc::new(SystemClock),
        config.default_markup,
    );

    let outcome = run(&admin, cli.token.as_deref(), cli.command);
    dispatcher.shutdown();

    let failures = dispatcher.take_failures();
    for failure in &failures {
        error!(job = %failure.job, attempts = failure.attempts, error = %failure.error, "regeneration failed");
    }
    outcome?;
    match failures.len() {
        0 => Ok(()),
        n => Err(anyhow!("{} regeneration job(s) failed", n)),
    }
}

fn run(admin: &Admin, token: Option<&str>, command: Commands) -> Result<()> {
    match command {
        Commands::Post(PostCommand::New(fields)) => {
            let saved = admin.save_post(token, None, fields.onto(admin.new_post_form())?)?;
            info!(id = %saved.id, path = ?saved.path, "post created");
            println!("{}", saved.id);
        }
        Commands::Post(PostCommand::Edit { id, fields }) => {
            let saved = admin.save_post(token, Some(id), fields.onto(admin.post_form(id)?)?)?;
            info!(id = %saved.id, transition = ?saved.transition, "post saved");
        }
        Commands::Post(PostCommand::Delete { id }) => {
            let removal = admin.delete_post(token, id)?;
            info!(%id, ?removal, "post deleted");
        }
        Commands::Post(PostCommand::Preview { id, fields }) => {
            let base = match id {
                Some(id) => admin.post_form(id)?,
                None => admin.new_post_form(),
            };
            let html = admin.preview_post(id, &fields.onto(base)?)?;
            println!("{}", String::from_utf8_lossy(&html));
        }
        Commands::Post(PostCommand::List(range)) => {
            let listing = admin.posts(range.offset, range.count)?;
            for post in &listing.items {
                println!(
                    "{}\t{}\t{}\t{}",
                    post.id.map_or_else(String::new, |id| id.to_string()),
                    match post.is_draft() {
                        true => "draft",
                        false => "live",
                    },
                    post.path.as_deref().unwrap_or("-"),
                    post.title
                );
            }
            print_range(&listing);
        }
        Commands::Page(PageCommand::Save {
            from,
            path,
            title,
            template,
            body,
        }) => {
            let mut form = match &from {
                Some(from) => admin.page_form(from)?,
                None => PageForm {
                    template: "default".to_owned(),
                    ..PageForm::default()
                },
            };
            if let Some(path) = path {
                form.path = path;
            }
            if let Some(title) = title {
                form.title = title;
            }
            if let Some(template) = template {
                form.template = template;
            }
            if let Some(body) = body {
                form.body = read_body(&body)?;
            }
            let plan = admin.save_page(token, from.as_deref(), form)?;
            info!(path = %plan.path, replaces = ?plan.replaces, "page saved");
        }
        Commands::Page(PageCommand::Delete { path }) => admin.delete_page(token, &path)?,
        Commands::Page(PageCommand::Retire { path }) => admin.retire_page(token, &path)?,
        Commands::Page(PageCommand::List(range)) => {
            let listing = admin.pages(range.offset, range.count)?;
            for page in &listing.items {
                println!("{}\t{}\t{}", page.path, page.template, page.title);
            }
            print_range(&listing);
        }
        Commands::Regenerate => admin.regenerate(token)?,
        Commands::Deploy { force } => admin.deploy(token, force)?,
    }
    Ok(())
}

fn print_range<T>(listing: &Listing<T>) {
    match listing.last() {
        Some(last) => eprintln!(
            "items {}-{} (prev --offset {}, next --offset {})",
            listing.offset,
            last,
            listing.prev_offset(),
            listing.next_offset()
        ),
        None => eprintln!("no items at offset {}", listing.offset),
    }
}
