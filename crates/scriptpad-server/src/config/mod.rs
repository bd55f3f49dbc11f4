// crates/scriptpad-server/src/config/mod.rs
// Configuration - environment variables and the optional config file

pub mod env;
pub mod file;

pub use env::{EnvConfig, IntelConfig};
pub use file::ScriptpadConfig;
