#![forbid(unsafe_code)]

//! The kobs aggregator binary: configuration loading, logging setup and
//! the server lifecycle.

mod args;
mod config;

pub use self::args::Args;
pub use self::config::Config;
