use std::sync::atomic::{AtomicUsize, Ordering};

use content::VersionReport;
use serde::Serialize;

use crate::error::Stage;

#[derive(Debug, Default)]
struct StageCounter {
    received: AtomicUsize,
    emitted: AtomicUsize,
}

/// Counters updated by the pipeline while it runs.
#[derive(Debug, Default)]
pub(crate) struct Progress {
    stages: [StageCounter; 6],
    manifests_downloaded: AtomicUsize,
    blobs_downloaded: AtomicUsize,
    blobs_present: AtomicUsize,
    foreign_skipped: AtomicUsize,
    tags_reused: AtomicUsize,
}

impl Progress {
    pub(crate) fn received(&self, stage: Stage) {
        self.stages[stage.index()]
            .received
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn emitted(&self, stage: Stage) {
        self.stages[stage.index()]
            .emitted
            .fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn manifest_downloaded(&self) {
        self.manifests_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn blob_downloaded(&self) {
        self.blobs_downloaded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn blob_present(&self) {
        self.blobs_present.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn foreign_skipped(&self) {
        self.foreign_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tag_reused(&self) {
        self.tags_reused.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn report(&self, version: VersionReport) -> SyncReport {
        SyncReport {
            version,
            stages: Stage::ALL
                .iter()
                .map(|&stage| {
                    let counter = &self.stages[stage.index()];
                    StageReport {
                        stage,
                        received: counter.received.load(Ordering::Relaxed),
                        emitted: counter.emitted.load(Ordering::Relaxed),
                    }
                })
                .collect(),
            manifests_downloaded: self.manifests_downloaded.load(Ordering::Relaxed),
            blobs_downloaded: self.blobs_downloaded.load(Ordering::Relaxed),
            blobs_present: self.blobs_present.load(Ordering::Relaxed),
            foreign_skipped: self.foreign_skipped.load(Ordering::Relaxed),
            tags_reused: self.tags_reused.load(Ordering::Relaxed),
        }
    }
}

/// Work done by one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageReport {
    /// The stage.
    pub stage: Stage,

    /// Items taken from the previous stage. For the tags stage, tags listed
    /// upstream.
    pub received: usize,

    /// Items handed to the next stage. For the relate stage, relations
    /// created or confirmed.
    pub emitted: usize,
}

/// Outcome of a successful sync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SyncReport {
    /// The repository version created by the sync.
    pub version: VersionReport,

    /// Per-stage progress.
    pub stages: Vec<StageReport>,

    /// Manifests fetched from upstream, by tag or digest.
    pub manifests_downloaded: usize,

    /// Blobs fetched from upstream.
    pub blobs_downloaded: usize,

    /// Blobs already in the artifact store.
    pub blobs_present: usize,

    /// Foreign layers recorded without downloading.
    pub foreign_skipped: usize,

    /// Tags which already existed in the content store.
    pub tags_reused: usize,
}

impl SyncReport {
    /// Progress of one stage.
    pub fn stage(&self, stage: Stage) -> &StageReport {
        &self.stages[stage.index()]
    }
}
