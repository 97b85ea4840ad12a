//! watchview
//!
//! A live in-memory model of a watched directory tree. Every tracked file
//! carries the tick at which it last changed, so callers can ask what
//! changed since a clock they were handed earlier.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod query;
pub mod view;
pub mod watcher;

pub use config::Config;
pub use error::{Error, QueryError, Result, ViewError, WatcherError};
pub use query::{FileResult, MatchAll, Predicate, Query, QueryPath, QueryResult};
pub use view::{ClockPosition, ClockSpec, InMemoryView};
pub use watcher::{ManualWatcher, NotifyWatcher, Watcher};
