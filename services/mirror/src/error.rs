use std::fmt;

use artifacts::ArtifactError;
use content::{ContentError, ContentValidationError, Digest};
use jose::JoseError;
use serde::Serialize;

/// A stage of the sync pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    /// List upstream tags and apply the tag filter.
    Tags,

    /// Download tagged manifests.
    Manifests,

    /// Sort manifests into images and lists, declaring list members.
    Classify,

    /// Download manifest list members and blobs into the artifact store.
    Artifacts,

    /// Create content units.
    Persist,

    /// Create relations between content units.
    Relate,
}

impl Stage {
    /// Every stage, in pipeline order.
    pub const ALL: [Stage; 6] = [
        Stage::Tags,
        Stage::Manifests,
        Stage::Classify,
        Stage::Artifacts,
        Stage::Persist,
        Stage::Relate,
    ];

    /// Name of the stage, as used in logs and reports.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Tags => "tags",
            Stage::Manifests => "manifests",
            Stage::Classify => "classify",
            Stage::Artifacts => "artifacts",
            Stage::Persist => "persist",
            Stage::Relate => "relate",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What went wrong during a sync.
#[derive(Debug, thiserror::Error)]
pub enum SyncErrorKind {
    /// The upstream registry request failed, after retries.
    #[error(transparent)]
    Client(#[from] registry_client::Error),

    /// The artifact store failed, or a blob did not match its digest.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// A content unit or relation could not be created.
    #[error(transparent)]
    Content(#[from] ContentError),

    /// A manifest served by upstream is not valid.
    #[error("invalid manifest {reference}: {source}")]
    Validation {
        /// Tag or digest the manifest was requested by.
        reference: String,
        /// The validation failure.
        #[source]
        source: ContentValidationError,
    },

    /// The signature of a schema-1 manifest did not verify.
    #[error("bad signature on manifest {reference}: {source}")]
    Signature {
        /// Tag or digest the manifest was requested by.
        reference: String,
        /// The verification failure.
        #[source]
        source: JoseError,
    },

    /// A manifest does not hash to the digest it was requested or announced
    /// by.
    #[error("manifest {reference} has digest {actual}, expected {expected}")]
    DigestMismatch {
        /// Tag or digest the manifest was requested by.
        reference: String,
        /// The expected digest.
        expected: String,
        /// The computed digest.
        actual: Digest,
    },

    /// A manifest list names another list as a member.
    #[error("manifest list member {0} is itself a manifest list")]
    NestedList(Digest),

    /// A list member was declared but never stored.
    #[error("manifest list member {0} was never stored")]
    Unresolved(Digest),

    /// A tag filter pattern did not compile.
    #[error("invalid tag pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// The next stage stopped accepting work.
    #[error("pipeline closed")]
    Closed,
}

/// A sync failed in one of its stages.
#[derive(Debug, thiserror::Error)]
#[error("sync failed in {stage} stage: {kind}")]
pub struct SyncError {
    stage: Stage,
    #[source]
    kind: SyncErrorKind,
}

impl SyncError {
    /// Attribute `kind` to `stage`.
    pub fn new(stage: Stage, kind: impl Into<SyncErrorKind>) -> Self {
        SyncError {
            stage,
            kind: kind.into(),
        }
    }

    /// The stage which failed.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// What went wrong.
    pub fn kind(&self) -> &SyncErrorKind {
        &self.kind
    }

    pub(crate) fn closed(stage: Stage) -> Self {
        SyncError::new(stage, SyncErrorKind::Closed)
    }
}

/// Attach a [`Stage`] to a fallible result.
pub(crate) trait StageExt<T> {
    fn stage(self, stage: Stage) -> Result<T, SyncError>;
}

impl<T, E> StageExt<T> for Result<T, E>
where
    E: Into<SyncErrorKind>,
{
    fn stage(self, stage: Stage) -> Result<T, SyncError> {
        self.map_err(|error| SyncError::new(stage, error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_order() {
        for (index, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(stage.index(), index);
        }
        assert!(Stage::Tags < Stage::Relate);
    }

    #[test]
    fn display_names_the_stage() {
        let digest = content::compute_digest(b"member");
        let error = SyncError::new(Stage::Relate, SyncErrorKind::Unresolved(digest.clone()));
        assert_eq!(
            error.to_string(),
            format!("sync failed in relate stage: manifest list member {digest} was never stored")
        );
        assert_eq!(error.stage(), Stage::Relate);
    }
}
