//! The library code for `scriptorium`, the authoring backend of a static
//! blog. The architecture breaks down into two halves that only meet at the
//! content store:
//!
//! 1. Authoring actions ([`crate::admin`]) move posts and pages through
//!    their publication lifecycle ([`crate::lifecycle`]), persist them in a
//!    [`crate::store::ContentStore`] and schedule regeneration jobs.
//! 2. The dispatcher ([`crate::dispatch`]) runs those jobs out of band. Each
//!    job is handed to a regenerator ([`crate::regenerate`]) that reads the
//!    store's *current* state and converges the static artifacts in a
//!    [`crate::site::StaticSite`] to it.
//!
//! Because regenerators never work from a snapshot, a job may run any number
//! of times and duplicate jobs are merely redundant. The dispatcher still
//! collapses duplicates that are waiting to run, to bound the work done for
//! a burst of edits.
//!
//! Listings are rebuilt as a whole: the paginated main index, one index per
//! tag and the Atom feed ([`crate::feed`]) are derived from every live post
//! in one job.

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]

pub mod admin;
pub mod clock;
pub mod config;
pub mod deploy;
pub mod dispatch;
pub mod feed;
pub mod form;
pub mod guard;
pub mod lifecycle;
pub mod markup;
pub mod page;
pub mod post;
pub mod regenerate;
pub mod render;
pub mod site;
pub mod store;
pub mod tag;
pub mod value;
mod util;
