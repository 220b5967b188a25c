#![forbid(unsafe_code)]

pub mod backup;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod console;
pub mod error;
pub mod gate;
pub mod mapping;
pub mod report;
pub mod rules;
pub mod runner;
pub mod scan;
pub mod util;

pub use cli::run_from_env;
pub use error::{MigrateError, Result};
