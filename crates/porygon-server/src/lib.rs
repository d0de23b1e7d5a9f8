//! HTTP and WebSocket front end for Porygon

#![deny(missing_docs)]

pub mod config;
pub mod error;
pub mod handlers;
pub mod server;
pub mod supervisor;
pub mod ws;

pub use config::Config;
pub use error::{Error, Result};
pub use server::{router, serve, AppState};
pub use supervisor::TaskSupervisor;
