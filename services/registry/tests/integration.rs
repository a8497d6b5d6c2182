//! Integration tests for the registry

use std::sync::Arc;

use artifacts::{ArtifactStore, StoreConfig};
use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use bytes::Bytes;
use content::manifest::Schema1Manifest;
use content::{
    compute_digest, media, Blob, ContentRef, ContentStore, Digest, Manifest, Platform,
    Repositories, Tag,
};
use jose::KeyPair;
use registry::{Distribution, RegistryBuilder, TokenService, API_VERSION, CONTENT_DIGEST};
use serde_json::{json, Value};
use tower::ServiceExt;

const REALM: &str = "http://registry.test/token";
const SERVICE: &str = "registry.test";

/// Content served by the test registry.
struct World {
    store: Arc<ContentStore>,
    repositories: Arc<Repositories>,
    artifacts: ArtifactStore,
    key: KeyPair,
    image: Stored,
    arm: Stored,
    list: Stored,
    signed: Stored,
    unsigned: Stored,
    layers: Vec<Digest>,
    stray: Digest,
}

/// A manifest and the bytes it was stored with.
struct Stored {
    digest: Digest,
    bytes: Bytes,
}

impl World {
    async fn new() -> Self {
        let store = Arc::new(ContentStore::new());
        let repositories = Arc::new(Repositories::new());
        let artifacts = StoreConfig::default().build();
        let key = KeyPair::generate().unwrap();

        let base = blob(&store, &artifacts, "layer-base", media::REGULAR_BLOB).await;
        let app = blob(&store, &artifacts, "layer-app", media::REGULAR_BLOB).await;
        let arm_layer = blob(&store, &artifacts, "layer-arm64", media::REGULAR_BLOB).await;
        let stray = blob(&store, &artifacts, "layer-stray", media::REGULAR_BLOB).await;

        let config = json!({
            "architecture": "amd64",
            "os": "linux",
            "created": "2024-01-02T03:04:05Z",
            "config": { "Cmd": ["/bin/app"] },
            "rootfs": { "type": "layers", "diff_ids": [] },
            "history": [
                { "created": "2024-01-01T00:00:00Z", "created_by": "ADD base.tar /" },
                { "created": "2024-01-02T03:04:05Z", "created_by": "COPY app /bin/app" }
            ]
        });
        let config = blob(&store, &artifacts, &config.to_string(), media::CONFIG_BLOB).await;
        let arm_config = blob(&store, &artifacts, "{}", media::CONFIG_BLOB).await;

        let image = manifest(
            &store,
            &artifacts,
            image_document(&config, &[&base, &app]),
            media::MANIFEST_V2,
        )
        .await;
        for layer in [&base, &app] {
            store.relate_blob(&image.digest, layer).unwrap();
        }
        store.relate_config(&image.digest, &config).unwrap();

        let arm = manifest(
            &store,
            &artifacts,
            image_document(&arm_config, &[&arm_layer]),
            media::MANIFEST_V2,
        )
        .await;
        store.relate_blob(&arm.digest, &arm_layer).unwrap();
        store.relate_config(&arm.digest, &arm_config).unwrap();

        let list = manifest(
            &store,
            &artifacts,
            json!({
                "schemaVersion": 2,
                "mediaType": media::MANIFEST_LIST,
                "manifests": [
                    member(&arm.digest, "arm64"),
                    member(&image.digest, "amd64"),
                ]
            }),
            media::MANIFEST_LIST,
        )
        .await;
        store
            .relate_list_member(&list.digest, &arm.digest, platform("arm64"))
            .unwrap();
        store
            .relate_list_member(&list.digest, &image.digest, platform("amd64"))
            .unwrap();

        let signed = signed_manifest(&store, &artifacts, &[&app, &base]).await;
        for layer in [&app, &base] {
            store.relate_blob(&signed.digest, layer).unwrap();
        }

        let unsigned = manifest(
            &store,
            &artifacts,
            json!({
                "schemaVersion": 1,
                "name": "library/app",
                "tag": "legacy",
                "architecture": "amd64",
                "fsLayers": [{ "blobSum": base.as_str() }],
                "history": [{ "v1Compatibility": "{}" }],
            }),
            media::MANIFEST_V1,
        )
        .await;

        repositories.create("app").unwrap();
        let tags = [
            ("image", &image.digest),
            ("multi", &list.digest),
            ("old", &signed.digest),
            ("legacy", &unsigned.digest),
        ]
        .into_iter()
        .map(|(name, digest)| {
            let (tag, _) = store
                .find_or_create_tag(Tag::new(name, digest.clone()))
                .unwrap();
            ContentRef::Tag(tag)
        })
        .collect::<Vec<_>>();
        content::recursive_add(&store, &repositories, "app", &tags).unwrap();

        World {
            store,
            repositories,
            artifacts,
            key,
            image,
            arm,
            list,
            signed,
            unsigned,
            layers: vec![base, app],
            stray,
        }
    }

    fn builder(&self) -> RegistryBuilder {
        RegistryBuilder::new(self.key.clone())
            .content(self.store.clone(), self.repositories.clone())
            .artifacts(self.artifacts.clone())
            .distribution(Distribution::new("library/app", "app"))
            .distribution(Distribution::new("pinned", "app").pinned(0))
    }

    fn registry(&self) -> axum::Router {
        self.builder().build()
    }

    fn tokens(&self) -> TokenService {
        TokenService::new(KeyPair::generate().unwrap(), REALM, SERVICE, 300).unwrap()
    }
}

async fn blob(store: &ContentStore, artifacts: &ArtifactStore, data: &str, media_type: &str) -> Digest {
    let digest = artifacts
        .put(Bytes::copy_from_slice(data.as_bytes()))
        .await
        .unwrap();
    store.find_or_create_blob(Blob::new(digest.clone(), media_type, Some(digest.clone())));
    digest
}

async fn manifest(
    store: &ContentStore,
    artifacts: &ArtifactStore,
    document: Value,
    media_type: &str,
) -> Stored {
    let bytes = Bytes::from(serde_json::to_vec_pretty(&document).unwrap());
    let digest = artifacts.put(bytes.clone()).await.unwrap();
    store.find_or_create_manifest(Manifest::new(digest.clone(), media_type, digest.clone()).unwrap());
    Stored { digest, bytes }
}

/// A signed schema-1 manifest stored under its payload digest.
async fn signed_manifest(store: &ContentStore, artifacts: &ArtifactStore, layers: &[&Digest]) -> Stored {
    let payload = json!({
        "schemaVersion": 1,
        "name": "library/app",
        "tag": "old",
        "architecture": "amd64",
        "fsLayers": layers.iter().map(|d| json!({ "blobSum": d.as_str() })).collect::<Vec<_>>(),
        "history": layers.iter().map(|_| json!({ "v1Compatibility": "{}" })).collect::<Vec<_>>(),
    });
    let payload = serde_json::to_vec_pretty(&payload).unwrap();
    let signing = KeyPair::generate().unwrap();
    let bytes = Bytes::from(
        jose::jws::sign_pretty(&payload, &signing, "2024-01-01T00:00:00Z").unwrap(),
    );

    let digest = compute_digest(&payload);
    let artifact = artifacts.put(bytes.clone()).await.unwrap();
    store.find_or_create_manifest(
        Manifest::new(digest.clone(), media::MANIFEST_V1_SIGNED, artifact).unwrap(),
    );
    Stored { digest, bytes }
}

fn image_document(config: &Digest, layers: &[&Digest]) -> Value {
    json!({
        "schemaVersion": 2,
        "mediaType": media::MANIFEST_V2,
        "config": { "mediaType": media::CONFIG_BLOB, "size": 0, "digest": config.as_str() },
        "layers": layers
            .iter()
            .map(|d| json!({ "mediaType": media::REGULAR_BLOB, "size": 0, "digest": d.as_str() }))
            .collect::<Vec<_>>(),
    })
}

fn platform(architecture: &str) -> Platform {
    Platform {
        architecture: architecture.into(),
        os: "linux".into(),
        ..Platform::default()
    }
}

fn member(digest: &Digest, architecture: &str) -> Value {
    json!({
        "mediaType": media::MANIFEST_V2,
        "size": 0,
        "digest": digest.as_str(),
        "platform": { "architecture": architecture, "os": "linux" }
    })
}

async fn get(app: &axum::Router, uri: &str, accept: &[&str]) -> Response<Body> {
    let mut request = Request::builder().uri(uri);
    for media_type in accept {
        request = request.header(header::ACCEPT, *media_type);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn get_with_token(app: &axum::Router, uri: &str, token: &str) -> Response<Body> {
    app.clone()
        .oneshot(
            Request::builder()
                .uri(uri)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
}

async fn body(response: Response<Body>) -> Bytes {
    axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
}

async fn json_body(response: Response<Body>) -> Value {
    serde_json::from_slice(&body(response).await).unwrap()
}

fn header_str<'a>(response: &'a Response<Body>, name: &str) -> &'a str {
    response.headers()[name].to_str().unwrap()
}

async fn error_code(response: Response<Body>) -> String {
    json_body(response).await["errors"][0]["code"]
        .as_str()
        .unwrap()
        .to_owned()
}

#[tokio::test]
async fn test_api_version_check() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, API_VERSION), "registry/2.0");
}

#[tokio::test]
async fn test_errors_carry_api_version() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/unknown/tags/list", &[]).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(header_str(&response, API_VERSION), "registry/2.0");
    assert_eq!(error_code(response).await, "NAME_UNKNOWN");
}

#[tokio::test]
async fn test_list_tags() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/library/app/tags/list", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::LINK).is_none());
    assert_eq!(
        json_body(response).await,
        json!({ "name": "library/app", "tags": ["image", "legacy", "multi", "old"] })
    );
}

#[tokio::test]
async fn test_list_tags_paginated() {
    let world = World::new().await;
    let app = world.registry();

    let response = get(&app, "/v2/library/app/tags/list?n=2", &[]).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        header_str(&response, "link"),
        "</v2/library/app/tags/list?n=2&last=legacy>; rel=\"next\""
    );
    assert_eq!(json_body(response).await["tags"], json!(["image", "legacy"]));

    let response = get(&app, "/v2/library/app/tags/list?n=2&last=legacy", &[]).await;
    assert!(response.headers().get(header::LINK).is_none());
    assert_eq!(json_body(response).await["tags"], json!(["multi", "old"]));

    let response = get(&app, "/v2/library/app/tags/list?n=3&last=image", &[]).await;
    assert!(response.headers().get(header::LINK).is_none());
    assert_eq!(json_body(response).await["tags"], json!(["legacy", "multi", "old"]));
}

#[tokio::test]
async fn test_empty_page_has_no_next_link() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/library/app/tags/list?n=0", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().get(header::LINK).is_none());
    assert_eq!(json_body(response).await["tags"], json!([]));
}

#[tokio::test]
async fn test_bad_pagination() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/library/app/tags/list?n=lots", &[]).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "PAGINATION_NUMBER_INVALID");
}

#[tokio::test]
async fn test_pinned_distribution() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/pinned/tags/list", &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["tags"], json!([]));
}

#[tokio::test]
async fn test_manifest_accepted_as_stored() {
    let world = World::new().await;
    let response = get(
        &world.registry(),
        "/v2/library/app/manifests/image",
        &[media::MANIFEST_V2],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_V2);
    assert_eq!(header_str(&response, CONTENT_DIGEST), world.image.digest.as_str());
    assert_eq!(body(response).await, world.image.bytes);
}

#[tokio::test]
async fn test_manifest_converted_for_old_clients() {
    let world = World::new().await;
    let app = world.registry();
    let response = get(&app, "/v2/library/app/manifests/image", &[media::MANIFEST_V1_SIGNED]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_V1_SIGNED);
    let digest = header_str(&response, CONTENT_DIGEST).to_owned();
    assert_ne!(digest, world.image.digest.as_str());

    let bytes = body(response).await;
    let payload = jose::jws::payload(&bytes).unwrap();
    assert_eq!(digest, compute_digest(&payload).as_str());

    let signers = jose::jws::verify_pretty(&bytes).unwrap();
    assert_eq!(signers[0].key_id(), world.key.key_id());

    let document: Schema1Manifest = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(document.name, "library/app");
    assert_eq!(document.tag, "image");
    let blob_sums: Vec<&Digest> = document.fs_layers.iter().map(|l| &l.blob_sum).collect();
    assert_eq!(blob_sums, vec![&world.layers[1], &world.layers[0]]);

    // Conversion is deterministic.
    let again = get(&app, "/v2/library/app/manifests/image", &[]).await;
    assert_eq!(header_str(&again, CONTENT_DIGEST), digest);
}

#[tokio::test]
async fn test_list_served_when_accepted() {
    let world = World::new().await;
    let response = get(
        &world.registry(),
        "/v2/library/app/manifests/multi",
        &[media::MANIFEST_LIST, media::MANIFEST_V2],
    )
    .await;

    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_LIST);
    assert_eq!(header_str(&response, CONTENT_DIGEST), world.list.digest.as_str());
    assert_eq!(body(response).await, world.list.bytes);
}

#[tokio::test]
async fn test_list_falls_back_to_amd64() {
    let world = World::new().await;
    let app = world.registry();

    let response = get(&app, "/v2/library/app/manifests/multi", &[media::MANIFEST_V2]).await;
    assert_eq!(header_str(&response, CONTENT_DIGEST), world.image.digest.as_str());
    assert_ne!(header_str(&response, CONTENT_DIGEST), world.arm.digest.as_str());

    let response = get(&app, "/v2/library/app/manifests/multi", &[]).await;
    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_V1_SIGNED);
    let document: Schema1Manifest = serde_json::from_slice(&body(response).await).unwrap();
    assert_eq!(document.tag, "multi");
    assert_eq!(document.architecture, "amd64");
}

#[tokio::test]
async fn test_schema1_always_served() {
    let world = World::new().await;
    let response = get(
        &world.registry(),
        "/v2/library/app/manifests/old",
        &[media::MANIFEST_V2],
    )
    .await;

    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_V1_SIGNED);
    assert_eq!(header_str(&response, CONTENT_DIGEST), world.signed.digest.as_str());
    assert_eq!(body(response).await, world.signed.bytes);
}

#[tokio::test]
async fn test_unsigned_schema1_served_with_signed_type() {
    let world = World::new().await;
    let response = get(
        &world.registry(),
        "/v2/library/app/manifests/legacy",
        &[media::MANIFEST_V2],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_V1_SIGNED);
    assert_eq!(header_str(&response, CONTENT_DIGEST), world.unsigned.digest.as_str());
    assert_eq!(body(response).await, world.unsigned.bytes);
}

#[tokio::test]
async fn test_manifest_by_digest_never_converted() {
    let world = World::new().await;
    let response = get(
        &world.registry(),
        &format!("/v2/library/app/manifests/{}", world.image.digest),
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-type"), media::MANIFEST_V2);
    assert_eq!(body(response).await, world.image.bytes);
}

#[tokio::test]
async fn test_manifest_head() {
    let world = World::new().await;
    let response = world
        .registry()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri("/v2/library/app/manifests/image")
                .header(header::ACCEPT, media::MANIFEST_V2)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, CONTENT_DIGEST), world.image.digest.as_str());
    assert_eq!(
        header_str(&response, "content-length"),
        world.image.bytes.len().to_string()
    );
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_manifest_not_found() {
    let world = World::new().await;
    let app = world.registry();

    let response = get(&app, "/v2/library/app/manifests/missing", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");

    let absent = compute_digest(b"not stored");
    let response = get(&app, &format!("/v2/library/app/manifests/{absent}"), &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "MANIFEST_UNKNOWN");

    let response = get(&app, "/v2/library/app/manifests/sha256:nothex", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DIGEST_INVALID");
}

#[tokio::test]
async fn test_blob_download() {
    let world = World::new().await;
    let digest = &world.layers[0];
    let response = get(&world.registry(), &format!("/v2/library/app/blobs/{digest}"), &[]).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, CONTENT_DIGEST), digest.as_str());
    assert_eq!(header_str(&response, "content-type"), media::REGULAR_BLOB);
    assert_eq!(header_str(&response, "content-length"), "10");
    assert!(header_str(&response, "content-disposition").starts_with("attachment"));
    assert_eq!(&body(response).await[..], b"layer-base");
}

#[tokio::test]
async fn test_blob_head() {
    let world = World::new().await;
    let response = world
        .registry()
        .oneshot(
            Request::builder()
                .method("HEAD")
                .uri(format!("/v2/library/app/blobs/{}", world.layers[1]))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "content-length"), "9");
    assert!(body(response).await.is_empty());
}

#[tokio::test]
async fn test_blob_outside_repository() {
    let world = World::new().await;
    let response = get(
        &world.registry(),
        &format!("/v2/library/app/blobs/{}", world.stray),
        &[],
    )
    .await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "BLOB_UNKNOWN");
}

#[tokio::test]
async fn test_unsupported_route() {
    let world = World::new().await;
    let response = get(&world.registry(), "/v2/library/app/blobs/uploads/", &[]).await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_code(response).await, "UNSUPPORTED");
}

#[tokio::test]
async fn test_token_required() {
    let world = World::new().await;
    let app = world.builder().token_service(world.tokens()).build();

    let response = get(&app, "/v2/", &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        header_str(&response, "www-authenticate"),
        format!("Bearer realm=\"{REALM}\",service=\"{SERVICE}\"")
    );

    let response = get(&app, "/v2/library/app/tags/list", &[]).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(
        header_str(&response, "www-authenticate"),
        format!("Bearer realm=\"{REALM}\",service=\"{SERVICE}\",scope=\"repository:library/app:pull\"")
    );
    let error = json_body(response).await;
    assert_eq!(error["errors"][0]["code"], "UNAUTHORIZED");
    assert_eq!(
        error["errors"][0]["detail"],
        json!([{ "type": "repository", "name": "library/app", "action": "pull" }])
    );
}

#[tokio::test]
async fn test_token_flow() {
    let world = World::new().await;
    let app = world.builder().token_service(world.tokens()).build();

    let response = get(
        &app,
        &format!("/token?service={SERVICE}&scope=repository:library/app:pull,push"),
        &[],
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let issued = json_body(response).await;
    assert_eq!(issued["expires_in"], 300);
    assert_eq!(issued["token"], issued["access_token"]);
    let token = issued["token"].as_str().unwrap().to_owned();

    let response = get_with_token(&app, "/v2/library/app/tags/list", &token).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get_with_token(&app, "/v2/", &token).await;
    assert_eq!(response.status(), StatusCode::OK);

    let response = get_with_token(&app, "/v2/pinned/tags/list", &token).await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = get_with_token(&app, "/v2/library/app/tags/list", "garbage").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_token_with_several_scopes() {
    let world = World::new().await;
    let app = world.builder().token_service(world.tokens()).build();

    let response = get(
        &app,
        "/token?scope=repository:library/app:pull&scope=repository:pinned:pull",
        &[],
    )
    .await;
    let token = json_body(response).await["token"].as_str().unwrap().to_owned();

    for uri in ["/v2/library/app/tags/list", "/v2/pinned/tags/list"] {
        let response = get_with_token(&app, uri, &token).await;
        assert_eq!(response.status(), StatusCode::OK, "{uri}");
    }
}

#[tokio::test]
async fn test_token_without_scope_grants_root_only() {
    let world = World::new().await;
    let app = world.builder().token_service(world.tokens()).build();

    let response = get(&app, "/token", &[]).await;
    let token = json_body(response).await["token"].as_str().unwrap().to_owned();

    assert_eq!(get_with_token(&app, "/v2/", &token).await.status(), StatusCode::OK);
    assert_eq!(
        get_with_token(&app, "/v2/library/app/tags/list", &token)
            .await
            .status(),
        StatusCode::UNAUTHORIZED
    );
}

#[tokio::test]
async fn test_token_for_other_service() {
    let world = World::new().await;
    let app = world.builder().token_service(world.tokens()).build();

    let response = get(&app, "/token?service=elsewhere", &[]).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(response).await, "DENIED");
}

#[tokio::test]
async fn test_no_token_endpoint_without_auth() {
    let world = World::new().await;
    let response = get(&world.registry(), "/token", &[]).await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
