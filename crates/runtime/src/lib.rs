//! Engine assembly: wires the connector, dispatcher, responder, sessions and
//! hooks into a runnable [`Bot`], and owns the worker pool, the shutdown
//! sequence, and the module-mode restart contract.

pub mod bot;

pub use {
    bot::{Bot, BotHandle},
    botway_common::meta::{EXIT_CLOSE, EXIT_ERROR, EXIT_RESTART, MODULE_MODE_ENV, MODULE_MODE_SET},
};
