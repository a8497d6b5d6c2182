//! # Mirror
//!
//! Synchronize repositories from an upstream registry into the content
//! graph, and maintain repository content by hand.
//!
//! A sync lists upstream tags, downloads the manifests, lists and blobs they
//! reach, and records them as content units with their relations. Identical
//! content is stored once however many tags or lists reach it. Each
//! successful sync creates one repository version:
//!
//! - [`SyncMode::Additive`] keeps existing content, replacing tags of the
//!   same name.
//! - [`SyncMode::Mirror`] makes the repository match what was synchronized.

mod config;
mod error;
mod filter;
mod forward;
mod pipeline;
mod report;
mod tasks;

pub use config::{ConfigError, MirrorConfig, Remote, SyncMode, SyncOptions};
pub use error::{Stage, SyncError, SyncErrorKind};
pub use filter::TagFilter;
pub use report::{StageReport, SyncReport};
pub use tasks::Mirror;
