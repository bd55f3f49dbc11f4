// crates/scriptpad-server/src/lib.rs
// Scriptpad - script build, execution, and code-intelligence engine

#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod assemble;
pub mod build;
pub mod config;
pub mod error;
pub mod events;
pub mod intel;
pub mod process;
pub mod resources;
pub mod scripts;

pub use error::{Result, ScriptpadError};
