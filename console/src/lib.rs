//! Mail-assistant console client
//!
//! This crate provides a terminal front end for the mail-assistant backend:
//! REST management of tasks, rule sets, flagged email and account settings,
//! plus the live task-run conversation streamed over a WebSocket.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod listing;
pub mod notifications;
pub mod reconcile;
pub mod refresh;
pub mod rehydrate;
pub mod session;
pub mod transport;
pub mod view;

pub use error::{ConsoleError, Result};
