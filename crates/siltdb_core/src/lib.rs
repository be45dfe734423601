//! # siltdb Core
//!
//! Core engine for siltdb, an embedded JSON document database.
//!
//! This crate provides:
//! - A durable sorted keyspace (write-ahead log + checkpoint snapshots)
//! - Automatic field and geo indexes maintained in lock-step with commits
//! - A boolean query AST with index-backed planning and exact verification
//! - Atomic multi-operation transactions through a single-writer path
//! - A change-notification hub for live subscribers
//! - Import/export, prefix clear, and database drop boundary operations
//!
//! The [`Database`] facade is the only entry point; boundary layers hold
//! one handle and call its methods.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod database;
mod dir;
mod document;
mod error;
mod hub;
mod index;
mod keys;
mod keyspace;
mod path;
mod query;
mod write;

pub use config::Config;
pub use database::Database;
pub use document::DocEntry;
pub use error::{DbError, DbResult};
pub use hub::{ChangeEvent, ChangeHub, ChangeKind};
pub use index::GeoPoint;
pub use query::{CancelToken, DataType, QueryNode, QueryOptions};
pub use write::TxnOp;
