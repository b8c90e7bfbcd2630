//! Command-line host for the vision tools
//!
//! Only available with the `cli` feature.

mod backend_factory;
mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli, Command};
