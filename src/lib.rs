//! Health scoring, an optimization catalog with a partial-failure
//! executor, and a process advisor that trims working sets.

pub mod advisor;
pub mod catalog;
pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod format;
pub mod health;
pub mod logging;
pub mod system;

pub use engine::Engine;
