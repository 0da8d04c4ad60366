//! Event routing: handler records, the registry, and the priority dispatcher.
//!
//! User code registers callbacks as [`HandlerSetup`] records; the
//! [`HandlerRegistry`] validates them into [`EventHandler`]s grouped by event
//! kind, and the [`Dispatcher`] walks the priority-sorted list per event,
//! applying priority blocking. Matching building blocks (matchers, checkers,
//! parsers) live in [`matching`].

pub mod dispatcher;
pub mod error;
pub mod handler;
pub mod matching;
pub mod registry;

pub use {
    dispatcher::{Dispatcher, MIN_PRIORITY},
    error::{Error, Result},
    handler::{Callback, EventHandler, callback},
    matching::{Checker, Matcher, Parser},
    registry::{HandlerRegistry, HandlerSetup},
};
