//! # Container Registry
//!
//! A read-only registry v2 server for repositories kept in the content graph.
//!
//! ## Features
//!
//! - Tag listing with `n`/`last` pagination
//! - Manifest fetches by tag or digest, with content negotiation
//! - On-the-fly schema-2 to signed schema-1 conversion for older clients
//! - Blob downloads streamed from the artifact store
//! - Bearer token authentication and a `/token` endpoint
//!
//! Repositories are served through distributions, which map the name clients
//! pull by to a repository and optionally a pinned version.
//!
//! ## Example
//!
//! ```no_run
//! use registry::{Distribution, RegistryBuilder};
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let registry = RegistryBuilder::new(jose::KeyPair::generate()?)
//!     .distribution(Distribution::new("library/busybox", "busybox"))
//!     .build();
//!
//! // Use the registry service with axum or any tower-compatible server
//! # Ok(())
//! # }
//! ```

mod api;
mod auth;
mod blob;
mod config;
mod error;
mod manifest;
mod path;
mod tags;
pub mod token;

pub use api::{RegistryBuilder, API_VERSION, CONTENT_DIGEST};
pub use config::{ConfigError, Distribution, RegistryConfig, ServerConfig};
pub use error::{RegistryError, RegistryResult};
pub use token::{TokenConfig, TokenError, TokenService};
