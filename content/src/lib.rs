//! # Content graph
//!
//! Content-addressed blobs, manifests, manifest lists and tags, the relations
//! between them, and repositories built from immutable versions of that
//! content.
//!
//! Content units live in a single [`ContentStore`] and never change once
//! created. Repositories reference content by membership only: each
//! [`RepositoryVersion`] is a complete set of tags, manifests and blobs, and
//! new versions are created by copy-on-write from the latest one.
//!
//! ```
//! use content::{ContentStore, Repositories, recursive_add};
//!
//! let store = ContentStore::new();
//! let repositories = Repositories::new();
//! repositories.create("library/busybox").unwrap();
//!
//! let version = recursive_add(&store, &repositories, "library/busybox", &[]).unwrap();
//! assert_eq!(version.number(), 1);
//! ```

mod digest;
mod error;
mod graph;
pub mod manifest;
pub mod media;
mod model;
mod repository;
mod snapshot;
mod store;

pub use digest::{compute_digest, Algorithm, Digest, InvalidDigest};
pub use error::{ContentError, ContentResult, ContentValidationError};
pub use graph::{
    add_closure, recursive_add, recursive_remove, remove_plan, tag_image, untag_image,
};
pub use manifest::{ManifestDocument, ParsedManifest, Platform};
pub use media::{BlobKind, ManifestKind};
pub use model::{Blob, ContentRef, Manifest, Tag};
pub use repository::{
    ContentCounts, ContentSet, Delta, Repositories, Repository, RepositoryVersion, VersionReport,
};
pub use snapshot::Snapshot;
pub use store::ContentStore;
