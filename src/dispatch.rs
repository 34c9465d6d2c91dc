//! The regeneration dispatcher. Authoring actions [`Dispatcher::schedule`]
//! [`Job`]s; workers run them out of band against the regenerators the
//! dispatcher was built with.
//!
//! Jobs are identified by kind and target. A job scheduled again before a
//! worker has picked it up collapses into the pending one. Once a worker
//! takes a job it is no longer pending, so scheduling it while it runs
//! queues another run; that run reads the store afresh and picks up
//! whatever changed in the meantime.
//!
//! Delivery is at least once. A failing job is retried with a linear backoff
//! and, when its retries are exhausted, recorded as a [`Failure`]. No order
//! is kept between distinct jobs.

use crate::deploy::{self, DeployHook};
use crate::page::PagePath;
use crate::post::PostId;
use crate::regenerate::{self, Listings, Regenerator};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// A unit of regeneration work.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Job {
    /// Rebuild (or take down) one post's artifact.
    Post(PostId),

    /// Rebuild one page's artifact.
    Page(PagePath),

    /// Rebuild every post.
    Posts,

    /// Rebuild every page.
    Pages,

    /// Rebuild the indices and the feed.
    Listings,

    /// Run the post-deploy hook.
    Deploy { force: bool },
}

impl Job {
    /// The kind of the job, as used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Job::Post(_) => "post",
            Job::Page(_) => "page",
            Job::Posts => "posts",
            Job::Pages => "pages",
            Job::Listings => "listings",
            Job::Deploy { .. } => "deploy",
        }
    }
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Job::Post(id) => write!(f, "post {}", id),
            Job::Page(path) => write!(f, "page {}", path),
            Job::Deploy { force: true } => f.write_str("deploy (forced)"),
            job => f.write_str(job.kind()),
        }
    }
}

/// The regenerators a dispatcher runs jobs against.
#[derive(Clone)]
pub struct Regenerators {
    pub posts: Arc<dyn Regenerator<Target = PostId>>,
    pub pages: Arc<dyn Regenerator<Target = PagePath>>,
    pub listings: Arc<dyn Regenerator<Target = Listings>>,
    pub deploy: Arc<dyn DeployHook>,
}

impl Regenerators {
    fn run(&self, job: &Job) -> Result<()> {
        match job {
            Job::Post(id) => self.posts.regenerate(id)?,
            Job::Page(path) => self.pages.regenerate(path)?,
            Job::Posts => self.posts.regenerate_all().into_result()?,
            Job::Pages => self.pages.regenerate_all().into_result()?,
            Job::Listings => self.listings.regenerate(&Listings)?,
            Job::Deploy { force } => {
                let deployment = self.deploy.run(*force)?;
                debug!(?deployment, "deploy hook ran");
            }
        }
        Ok(())
    }
}

/// How hard the dispatcher tries before giving up on a job.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Runs after the first failed one.
    pub retries: u32,

    /// The wait before retry `n` is `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 3,
            backoff: Duration::from_millis(250),
        }
    }
}

/// A job that failed on every attempt.
#[derive(Debug)]
pub struct Failure {
    pub job: Job,
    pub attempts: u32,
    pub error: Error,
}

struct Shared {
    regenerators: Regenerators,
    retry: RetryPolicy,
    pending: Mutex<HashSet<Job>>,
    failures: Mutex<Vec<Failure>>,
}

impl Shared {
    fn execute(&self, job: Job) {
        self.pending.lock().remove(&job);
        let mut attempts = 0;
        loop {
            attempts += 1;
            match self.regenerators.run(&job) {
                Ok(()) => {
                    debug!(%job, attempts, "job done");
                    return;
                }
                Err(err) if attempts <= self.retry.retries => {
                    warn!(%job, attempts, error = %err, "job failed, retrying");
                    thread::sleep(self.retry.backoff * attempts);
                }
                Err(err) => {
                    error!(%job, attempts, error = %err, "job failed, giving up");
                    self.failures.lock().push(Failure {
                        job,
                        attempts,
                        error: err,
                    });
                    return;
                }
            }
        }
    }
}

/// Schedules and runs regeneration jobs.
pub struct Dispatcher {
    shared: Arc<Shared>,
    sender: Mutex<Option<Sender<Job>>>,
    receiver: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    /// Creates a dispatcher without workers. Scheduled jobs wait until
    /// [`Dispatcher::run_pending`] runs them on the calling thread.
    pub fn manual(regenerators: Regenerators, retry: RetryPolicy) -> Dispatcher {
        let (sender, receiver) = unbounded();
        Dispatcher {
            shared: Arc::new(Shared {
                regenerators,
                retry,
                pending: Mutex::new(HashSet::new()),
                failures: Mutex::new(Vec::new()),
            }),
            sender: Mutex::new(Some(sender)),
            receiver,
            workers: Mutex::new(Vec::new()),
        }
    }

    /// Creates a dispatcher with `threads` workers running jobs as they
    /// arrive.
    pub fn spawn(regenerators: Regenerators, retry: RetryPolicy, threads: usize) -> Dispatcher {
        let dispatcher = Dispatcher::manual(regenerators, retry);
        {
            let mut workers = dispatcher.workers.lock();
            for n in 0..threads.max(1) {
                let shared = dispatcher.shared.clone();
                let receiver = dispatcher.receiver.clone();
                let spawned = thread::Builder::new()
                    .name(format!("regenerate-{}", n))
                    .spawn(move || {
                        for job in receiver {
                            shared.execute(job);
                        }
                    });
                match spawned {
                    Ok(handle) => workers.push(handle),
                    Err(err) => error!(error = %err, "could not start worker"),
                }
            }
            info!(workers = workers.len(), "dispatcher started");
        }
        dispatcher
    }

    /// Enqueues `job` unless an identical job is already pending. Returns
    /// whether the job was enqueued.
    pub fn schedule(&self, job: Job) -> bool {
        let sender = self.sender.lock();
        let sender = match sender.as_ref() {
            Some(sender) => sender,
            None => {
                warn!(%job, "dispatcher shut down, job dropped");
                return false;
            }
        };

        let mut pending = self.shared.pending.lock();
        if !pending.insert(job.clone()) {
            debug!(%job, "job already pending");
            return false;
        }
        match sender.send(job.clone()) {
            Ok(()) => {
                debug!(%job, "job scheduled");
                true
            }
            Err(_) => {
                pending.remove(&job);
                false
            }
        }
    }

    /// Schedules a rebuild of everything: every post, every page, and a
    /// forced run of the deploy hook.
    pub fn regenerate_everything(&self) {
        info!("full regeneration requested");
        self.schedule(Job::Posts);
        self.schedule(Job::Pages);
        self.schedule(Job::Deploy { force: true });
    }

    /// Runs queued jobs on the calling thread until the queue is empty.
    /// Returns how many jobs ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            self.shared.execute(job);
            ran += 1;
        }
        ran
    }

    /// The jobs waiting to run.
    pub fn pending(&self) -> Vec<Job> {
        self.shared.pending.lock().iter().cloned().collect()
    }

    /// Removes and returns the jobs that failed on every attempt.
    pub fn take_failures(&self) -> Vec<Failure> {
        std::mem::take(&mut *self.shared.failures.lock())
    }

    /// Stops accepting jobs, lets the workers finish everything queued and
    /// waits for them. Without workers the queue is run here.
    pub fn shutdown(&self) {
        self.sender.lock().take();
        let workers: Vec<JoinHandle<()>> = std::mem::take(&mut *self.workers.lock());
        if workers.is_empty() {
            self.run_pending();
        }
        for worker in workers {
            if worker.join().is_err() {
                error!("worker panicked");
            }
        }
        debug!("dispatcher stopped");
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// The result of running a job.
pub type Result<T> = std::result::Result<T, Error>;

/// Represents a failed job run.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when a regenerator failed.
    #[error(transparent)]
    Regenerate(#[from] regenerate::Error),

    /// Returned when the deploy hook failed.
    #[error(transparent)]
    Deploy(#[from] deploy::Error),
}
