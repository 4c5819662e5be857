//! Configuration loading and construction of the index components.

pub mod bootstrap;
pub mod config;

pub use config::Config;
