//! Shared error spine, signal primitives, and id/process utilities used
//! across all botway crates.

pub mod error;
pub mod id;
pub mod meta;
pub mod signal;

pub use {
    error::{Error, FromMessage, Result},
    signal::{Flag, TwinFlag, twin_flags},
};
