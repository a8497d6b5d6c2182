use std::sync::Arc;
use std::time::Duration;

use artifacts::StoreConfig;
use content::{compute_digest, media, ContentCounts, ContentStore, Digest, Repositories};
use http::header::{HeaderName, AUTHORIZATION, CONTENT_TYPE, LINK, WWW_AUTHENTICATE};
use http::StatusCode;
use mirror::{Mirror, Stage, SyncErrorKind, SyncMode, SyncOptions};
use registry_client::mock::{MockResponse, MockService};
use registry_client::{Backoff, RegistryClient, CONTENT_DIGEST};
use serde_json::json;

const BASE: &str = "https://upstream.example.com";
const UPSTREAM: &str = "library/app";
const REPOSITORY: &str = "app";

fn ok(body: impl Into<String>) -> MockResponse {
    MockResponse::new(StatusCode::OK, body.into())
}

/// A fake upstream registry serving one repository.
struct Upstream {
    mock: MockService,
}

impl Upstream {
    fn new() -> Self {
        Upstream {
            mock: MockService::new(),
        }
    }

    fn client(&self) -> RegistryClient {
        let backoff = Backoff::new(Duration::from_millis(1), 2, Duration::from_millis(2), 2);
        RegistryClient::with_service(BASE.parse().unwrap(), None, backoff, self.mock.clone())
    }

    fn path(kind: &str, reference: &str) -> String {
        format!("/v2/{UPSTREAM}/{kind}/{reference}")
    }

    fn blob(&self, data: &str) -> Digest {
        let digest = compute_digest(data.as_bytes());
        self.mock
            .add(&Self::path("blobs", digest.as_str()), ok(data));
        digest
    }

    fn serve_manifest(&self, reference: &str, body: &str, media_type: &str) {
        self.mock.add(
            &Self::path("manifests", reference),
            ok(body).header(CONTENT_TYPE, media_type),
        );
    }

    /// Publish an image manifest with a config and regular layers.
    fn image(&self, config: &str, layers: &[&str]) -> Manifest {
        let layers: Vec<_> = layers
            .iter()
            .map(|data| (*data, media::REGULAR_BLOB))
            .collect();
        self.image_with(config, &layers)
    }

    fn image_with(&self, config: &str, layers: &[(&str, &str)]) -> Manifest {
        let config_digest = self.blob(config);
        let layers: Vec<_> = layers
            .iter()
            .map(|(data, media_type)| {
                let digest = if *media_type == media::FOREIGN_BLOB {
                    compute_digest(data.as_bytes())
                } else {
                    self.blob(data)
                };
                json!({
                    "mediaType": media_type,
                    "size": data.len(),
                    "digest": digest.as_str(),
                })
            })
            .collect();

        let body = json!({
            "schemaVersion": 2,
            "mediaType": media::MANIFEST_V2,
            "config": {
                "mediaType": media::CONFIG_BLOB,
                "size": config.len(),
                "digest": config_digest.as_str(),
            },
            "layers": layers,
        })
        .to_string();

        let manifest = Manifest::new(body, media::MANIFEST_V2);
        self.serve_manifest(manifest.digest.as_str(), &manifest.body, media::MANIFEST_V2);
        manifest
    }

    fn list(&self, members: &[(&Manifest, &str)]) -> Manifest {
        let manifests: Vec<_> = members
            .iter()
            .map(|(member, architecture)| {
                json!({
                    "mediaType": member.media_type,
                    "size": member.body.len(),
                    "digest": member.digest.as_str(),
                    "platform": {"architecture": architecture, "os": "linux"},
                })
            })
            .collect();

        let body = json!({
            "schemaVersion": 2,
            "mediaType": media::MANIFEST_LIST,
            "manifests": manifests,
        })
        .to_string();

        let manifest = Manifest::new(body, media::MANIFEST_LIST);
        self.serve_manifest(manifest.digest.as_str(), &manifest.body, media::MANIFEST_LIST);
        manifest
    }

    fn tag(&self, name: &str, manifest: &Manifest) {
        self.serve_manifest(name, &manifest.body, &manifest.media_type);
    }

    fn tags(&self, names: &[&str]) {
        self.mock.add(
            &format!("/v2/{UPSTREAM}/tags/list"),
            ok(json!({"name": UPSTREAM, "tags": names}).to_string()),
        );
    }

    fn requests_to_blob(&self, digest: &Digest) -> usize {
        self.mock
            .requests_to(&Self::path("blobs", digest.as_str()))
            .len()
    }
}

struct Manifest {
    body: String,
    media_type: &'static str,
    digest: Digest,
}

impl Manifest {
    fn new(body: String, media_type: &'static str) -> Self {
        Manifest {
            digest: compute_digest(body.as_bytes()),
            body,
            media_type,
        }
    }
}

/// An image tagged twice and a two-platform list sharing a layer with it.
struct World {
    upstream: Upstream,
    image: Manifest,
    list: Manifest,
    amd64: Manifest,
    arm64: Manifest,
    shared: Digest,
    foreign: Digest,
}

impl World {
    fn new() -> Self {
        let world = World::untagged();
        world.upstream.tags(&["1.0", "latest", "multi"]);
        world
    }

    /// The world without a tag list.
    fn untagged() -> Self {
        let upstream = Upstream::new();
        let shared = compute_digest(b"layer-base");
        let foreign = compute_digest(b"layer-windows");

        let image = upstream.image("config-image", &["layer-base", "layer-app"]);
        let amd64 = upstream.image("config-amd64", &["layer-base", "layer-amd64"]);
        let arm64 = upstream.image_with(
            "config-arm64",
            &[
                ("layer-arm64", media::REGULAR_BLOB),
                ("layer-windows", media::FOREIGN_BLOB),
            ],
        );
        let list = upstream.list(&[(&amd64, "amd64"), (&arm64, "arm64")]);

        upstream.tag("1.0", &image);
        upstream.tag("latest", &image);
        upstream.tag("multi", &list);

        World {
            upstream,
            image,
            list,
            amd64,
            arm64,
            shared,
            foreign,
        }
    }
}

fn mirror() -> Mirror {
    Mirror::new(
        Arc::new(ContentStore::new()),
        Arc::new(Repositories::new()),
        StoreConfig::Memory.build(),
    )
}

fn options(include: &[&str], mode: SyncMode) -> SyncOptions {
    let mut options = SyncOptions::new(UPSTREAM);
    options.include_tags = include.iter().map(|tag| tag.to_string()).collect();
    options.mode = mode;
    options.max_concurrent_downloads = 3;
    options
}

fn counts(tags: usize, manifests: usize, blobs: usize) -> ContentCounts {
    ContentCounts {
        tags,
        manifests,
        blobs,
    }
}

#[tokio::test]
async fn sync_everything() {
    let world = World::new();
    let mirror = mirror();

    let report = mirror
        .synchronize(
            world.upstream.client(),
            &options(&[], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();

    assert_eq!(report.version.version, 1);
    assert_eq!(report.version.added, counts(3, 4, 8));
    assert_eq!(report.stage(Stage::Tags).received, 3);
    assert_eq!(report.stage(Stage::Tags).emitted, 3);
    assert_eq!(report.stage(Stage::Persist).received, 5);
    assert_eq!(report.foreign_skipped, 1);
    assert_eq!(report.blobs_downloaded, 7);

    let latest = mirror.repositories().latest(REPOSITORY).unwrap();
    let content = latest.content();
    assert_eq!(content.tag("1.0").unwrap().tagged_manifest, world.image.digest);
    assert_eq!(content.tag("latest").unwrap().tagged_manifest, world.image.digest);
    assert_eq!(content.tag("multi").unwrap().tagged_manifest, world.list.digest);
    for manifest in [&world.image, &world.list, &world.amd64, &world.arm64] {
        assert!(content.manifests.contains(&manifest.digest));
    }

    let store = mirror.store();
    let members = store.members(&world.list.digest);
    assert_eq!(members.len(), 2);
    let (_, platform) = members
        .iter()
        .find(|(member, _)| *member == world.amd64.digest)
        .unwrap();
    assert!(platform.is_linux_amd64());
    assert_eq!(store.layers(&world.amd64.digest).len(), 2);
    assert!(store.config(&world.amd64.digest).is_some());

    // The shared layer is downloaded once.
    assert_eq!(world.upstream.requests_to_blob(&world.shared), 1);
    assert!(mirror.artifacts().exists(&world.shared).await.unwrap());

    // Foreign layers are recorded but never downloaded.
    assert_eq!(world.upstream.requests_to_blob(&world.foreign), 0);
    assert!(store.blob(&world.foreign).unwrap().artifact.is_none());
    assert!(!mirror.artifacts().exists(&world.foreign).await.unwrap());

    // Manifest artifacts hold the exact bytes served.
    let artifact = store.manifest(&world.list.digest).unwrap().artifact;
    let bytes = mirror.artifacts().read(&artifact).await.unwrap();
    assert_eq!(bytes, world.list.body.as_bytes());
}

#[tokio::test]
async fn second_sync_is_idempotent() {
    let world = World::new();
    let mirror = mirror();
    let options = options(&[], SyncMode::Additive);

    mirror
        .synchronize(world.upstream.client(), &options, REPOSITORY)
        .await
        .unwrap();
    let before = mirror.store().counts();

    let report = mirror
        .synchronize(world.upstream.client(), &options, REPOSITORY)
        .await
        .unwrap();

    assert_eq!(report.version.version, 2);
    assert_eq!(report.version.added, ContentCounts::default());
    assert_eq!(report.version.removed, ContentCounts::default());
    assert_eq!(report.blobs_downloaded, 0);
    assert_eq!(report.tags_reused, 3);
    assert_eq!(mirror.store().counts(), before);

    let repositories = mirror.repositories();
    assert_eq!(
        repositories.version(REPOSITORY, 1).unwrap().content(),
        repositories.latest(REPOSITORY).unwrap().content()
    );
}

#[tokio::test]
async fn tag_filter_limits_the_sync() {
    let world = World::new();
    let mirror = mirror();

    let report = mirror
        .synchronize(
            world.upstream.client(),
            &options(&["1.*"], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();

    assert_eq!(report.version.added, counts(1, 1, 3));
    assert_eq!(report.stage(Stage::Tags).received, 3);
    assert_eq!(report.stage(Stage::Tags).emitted, 1);
    assert!(world
        .upstream
        .mock
        .requests_to(&Upstream::path("manifests", "multi"))
        .is_empty());
}

#[tokio::test]
async fn mirror_mode_replaces_content() {
    let world = World::new();
    let mirror = mirror();

    mirror
        .synchronize(
            world.upstream.client(),
            &options(&[], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();

    let report = mirror
        .synchronize(
            world.upstream.client(),
            &options(&["multi"], SyncMode::Mirror),
            REPOSITORY,
        )
        .await
        .unwrap();

    assert_eq!(report.version.version, 2);
    assert_eq!(report.version.added, ContentCounts::default());
    // The image, its config and its own layer go; the shared layer stays.
    assert_eq!(report.version.removed, counts(2, 1, 2));

    let latest = mirror.repositories().latest(REPOSITORY).unwrap();
    assert_eq!(latest.content().counts(), counts(1, 3, 6));
    assert!(latest.content().blobs.contains(&world.shared));
    assert!(!latest.content().manifests.contains(&world.image.digest));
}

#[tokio::test]
async fn additive_mode_keeps_content() {
    let world = World::new();
    let mirror = mirror();

    mirror
        .synchronize(
            world.upstream.client(),
            &options(&["1.0"], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();
    let report = mirror
        .synchronize(
            world.upstream.client(),
            &options(&["multi"], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();

    assert_eq!(report.version.removed, ContentCounts::default());
    let latest = mirror.repositories().latest(REPOSITORY).unwrap();
    assert_eq!(latest.content().counts(), counts(2, 4, 8));
}

#[tokio::test]
async fn retagged_upstream_replaces_tag() {
    let world = World::new();
    let mirror = mirror();
    let options = options(&["latest"], SyncMode::Additive);

    // Upstream moves `latest` to the amd64 image after the first request.
    world.upstream.tag("latest", &world.amd64);

    mirror
        .synchronize(world.upstream.client(), &options, REPOSITORY)
        .await
        .unwrap();
    assert_eq!(
        mirror
            .repositories()
            .latest(REPOSITORY)
            .unwrap()
            .content()
            .tag("latest")
            .unwrap()
            .tagged_manifest,
        world.image.digest
    );

    mirror
        .synchronize(world.upstream.client(), &options, REPOSITORY)
        .await
        .unwrap();

    let latest = mirror.repositories().latest(REPOSITORY).unwrap();
    let content = latest.content();
    assert_eq!(content.tags.len(), 1);
    assert_eq!(content.tag("latest").unwrap().tagged_manifest, world.amd64.digest);
    // Additive sync keeps the previously tagged image.
    assert!(content.manifests.contains(&world.image.digest));
}

#[tokio::test]
async fn paginated_tags() {
    let world = World::untagged();
    world.upstream.mock.add(
        &format!("/v2/{UPSTREAM}/tags/list"),
        ok(json!({"name": UPSTREAM, "tags": ["1.0"]}).to_string()).header(
            LINK,
            &format!(r#"</v2/{UPSTREAM}/tags/list?n=1&last=1.0>; rel="next""#),
        ),
    );
    world.upstream.mock.add(
        &format!("/v2/{UPSTREAM}/tags/list?n=1&last=1.0"),
        ok(json!({"name": UPSTREAM, "tags": ["multi"]}).to_string()),
    );
    let mirror = mirror();

    let report = mirror
        .synchronize(
            world.upstream.client(),
            &options(&["1.0", "multi"], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();

    assert_eq!(report.version.added.tags, 2);
}

#[tokio::test]
async fn authenticated_upstream() {
    let world = World::new();
    let tags = format!("/v2/{UPSTREAM}/tags/list");
    let mock = MockService::new();
    mock.add(
        &tags,
        MockResponse::new(StatusCode::UNAUTHORIZED, "").header(
            WWW_AUTHENTICATE,
            &format!(
                r#"Bearer realm="{BASE}/token",service="upstream.example.com",scope="repository:{UPSTREAM}:pull""#
            ),
        ),
    );
    mock.add(&tags, ok(json!({"name": UPSTREAM, "tags": ["1.0"]}).to_string()));
    mock.add("/token", ok(r#"{"token":"s3cret"}"#));
    mock.add(
        &Upstream::path("manifests", "1.0"),
        ok(world.image.body.clone()).header(CONTENT_TYPE, media::MANIFEST_V2),
    );
    for data in ["config-image", "layer-base", "layer-app"] {
        let digest = compute_digest(data.as_bytes());
        mock.add(&Upstream::path("blobs", digest.as_str()), ok(data));
    }

    let backoff = Backoff::new(Duration::from_millis(1), 2, Duration::from_millis(2), 2);
    let client = RegistryClient::with_service(BASE.parse().unwrap(), None, backoff, mock.clone());
    let report = mirror()
        .synchronize(client, &options(&[], SyncMode::Additive), REPOSITORY)
        .await
        .unwrap();

    assert_eq!(report.version.added, counts(1, 1, 3));
    assert_eq!(mock.requests_to("/token").len(), 1);
    let manifests = mock.requests_to(&Upstream::path("manifests", "1.0"));
    assert_eq!(manifests[0].headers[AUTHORIZATION], "Bearer s3cret");
}

#[tokio::test]
async fn blob_digest_mismatch_fails_the_sync() {
    let upstream = Upstream::new();
    let layer = compute_digest(b"layer");
    // Served on the first request for the layer.
    upstream
        .mock
        .add(&Upstream::path("blobs", layer.as_str()), ok("tampered"));
    let image = upstream.image("config", &["layer"]);
    upstream.tag("1.0", &image);
    upstream.tags(&["1.0"]);

    let mirror = mirror();
    let error = mirror
        .synchronize(
            upstream.client(),
            &options(&[], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Stage::Artifacts);
    assert!(matches!(error.kind(), SyncErrorKind::Artifact(_)), "{error:?}");
    assert_eq!(
        mirror.repositories().latest(REPOSITORY).unwrap().number(),
        0
    );
    assert!(!mirror.artifacts().exists(&layer).await.unwrap());
}

#[tokio::test]
async fn announced_digest_must_match() {
    let upstream = Upstream::new();
    let image = upstream.image("config", &["layer"]);
    upstream.mock.add(
        &Upstream::path("manifests", "1.0"),
        ok(image.body.clone())
            .header(CONTENT_TYPE, media::MANIFEST_V2)
            .header(
                HeaderName::from_static(CONTENT_DIGEST),
                compute_digest(b"something else").as_str(),
            ),
    );
    upstream.tags(&["1.0"]);

    let error = mirror()
        .synchronize(
            upstream.client(),
            &options(&[], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Stage::Manifests);
    assert!(
        matches!(error.kind(), SyncErrorKind::DigestMismatch { .. }),
        "{error:?}"
    );
}

#[tokio::test]
async fn missing_tag_fails_the_sync() {
    let upstream = Upstream::new();
    upstream.tags(&["gone"]);

    let error = mirror()
        .synchronize(
            upstream.client(),
            &options(&[], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap_err();

    assert_eq!(error.stage(), Stage::Manifests);
    match error.kind() {
        SyncErrorKind::Client(error) => assert_eq!(error.status(), Some(StatusCode::NOT_FOUND)),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn signed_schema1_manifest() {
    let upstream = Upstream::new();
    let layer = upstream.blob("schema1-layer");
    let payload = format!(
        "{{\n   \"schemaVersion\": 1,\n   \"name\": \"{UPSTREAM}\",\n   \"tag\": \"old\",\n   \"architecture\": \"amd64\",\n   \"fsLayers\": [\n      {{\n         \"blobSum\": \"{layer}\"\n      }}\n   ],\n   \"history\": [\n      {{\n         \"v1Compatibility\": \"{{\\\"id\\\":\\\"abc\\\"}}\"\n      }}\n   ]\n}}"
    );
    let key = jose::KeyPair::generate().unwrap();
    let signed = jose::jws::sign_pretty(payload.as_bytes(), &key, "2024-01-01T00:00:00Z").unwrap();
    upstream.mock.add(
        &Upstream::path("manifests", "old"),
        ok(String::from_utf8(signed.clone()).unwrap())
            .header(CONTENT_TYPE, media::MANIFEST_V1_SIGNED),
    );
    upstream.tags(&["old"]);

    let mirror = mirror();
    mirror
        .synchronize(
            upstream.client(),
            &options(&[], SyncMode::Additive),
            REPOSITORY,
        )
        .await
        .unwrap();

    // Schema-1 manifests are identified by their payload.
    let digest = compute_digest(payload.as_bytes());
    let manifest = mirror.store().manifest(&digest).unwrap();
    assert_eq!(manifest.schema_version, 1);
    assert_eq!(manifest.artifact, compute_digest(&signed));
    assert_eq!(mirror.store().layers(&digest), vec![layer]);

    let latest = mirror.repositories().latest(REPOSITORY).unwrap();
    assert_eq!(latest.content().tag("old").unwrap().tagged_manifest, digest);
}
