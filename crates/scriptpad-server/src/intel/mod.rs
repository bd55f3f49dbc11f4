// crates/scriptpad-server/src/intel/mod.rs
// Code intelligence - per-script language servers and the dispatch layer
// that keeps line numbers honest

pub mod catalog;
pub mod connection;
pub mod dispatch;

pub use catalog::{ServerCatalog, SessionLease};
pub use connection::{
    ProcessServerLauncher, ServerChannel, ServerLauncher, ServerTransport,
    DEFAULT_REQUEST_TIMEOUT,
};
pub use dispatch::Dispatcher;
