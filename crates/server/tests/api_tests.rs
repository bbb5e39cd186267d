//! Integration tests for the upload and fetch endpoints.

mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{TestServer, seeded_bytes, sha1_hex};
use librarian_core::{AliasId, ContentId, Sha1Hex};
use librarian_metadata::{AliasRepo, ContentRepo};
use librarian_server::auth::hash_token;

#[tokio::test]
async fn test_hello_world_round_trip() {
    let server = TestServer::new().await;
    let sha1 = sha1_hex(b"hello world");

    let response = server
        .put(
            "/v1/files/notes.txt",
            b"hello world",
            &[("content-type", "text/plain"), ("x-content-sha1", &sha1)],
        )
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["content_id"], 1);
    assert_eq!(response.json()["alias_id"], 1);

    let response = server.get("/v1/files/1", &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"hello world");
    assert_eq!(response.header("content-type"), Some("text/plain"));
    assert_eq!(response.header("content-length"), Some("11"));
    assert!(
        response
            .header("content-disposition")
            .unwrap()
            .contains("filename=\"notes.txt\"")
    );

    let content = server
        .metadata()
        .get_content(ContentId::new(1).unwrap())
        .await
        .unwrap()
        .unwrap();
    let digests = content.digests().unwrap();
    assert_eq!(digests.sha1_hex().as_str(), sha1);
    assert_eq!(digests.md5_hex(), "5eb63bbbe01eeed093cb22bb8f5acdc3");
    assert_eq!(
        digests.sha256_hex(),
        "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
    );
}

#[tokio::test]
async fn test_fetch_with_matching_filename() {
    let server = TestServer::new().await;
    let (_, alias_id) = server.upload("/v1/files/report.pdf", b"%PDF", "application/pdf").await;

    let response = server
        .get(&format!("/v1/files/{alias_id}/report.pdf"), &[])
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(&response.body[..], b"%PDF");

    let response = server
        .get(&format!("/v1/files/{alias_id}/other.pdf"), &[])
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_digest_mismatch_leaves_no_state() {
    let server = TestServer::new().await;
    let wrong = sha1_hex(b"something else");

    let response = server
        .put(
            "/v1/files/notes.txt",
            b"hello world",
            &[("x-content-sha1", &wrong)],
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["code"], "digest_mismatch");

    assert!(server.metadata().list_contents(None, 10).await.unwrap().is_empty());
    assert!(
        server
            .metadata()
            .get_alias(AliasId::new(1).unwrap())
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(server.settled_staged_count().await, 0);
}

#[tokio::test]
async fn test_uppercase_sha1_accepted() {
    let server = TestServer::new().await;
    let sha1 = sha1_hex(b"abc").to_uppercase();
    let response = server
        .put("/v1/files/abc.txt", b"abc", &[("x-content-sha1", &sha1)])
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_malformed_sha1_rejected() {
    let server = TestServer::new().await;
    let response = server
        .put("/v1/files/abc.txt", b"abc", &[("x-content-sha1", "xyz")])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_identical_uploads_are_independent() {
    let server = TestServer::new().await;
    let data = seeded_bytes(7, 4096);

    let first = server.upload("/v1/files/a.bin", &data, "application/octet-stream").await;
    let second = server.upload("/v1/files/b.bin", &data, "application/octet-stream").await;
    assert_ne!(first.0, second.0);
    assert_ne!(first.1, second.1);

    let matches = server
        .metadata()
        .lookup_by_sha1(&Sha1Hex::compute(&data))
        .await
        .unwrap();
    assert_eq!(
        matches.iter().map(|id| id.get()).collect::<Vec<_>>(),
        vec![first.0, second.0]
    );

    for (_, alias_id) in [first, second] {
        let response = server.get(&format!("/v1/files/{alias_id}"), &[]).await;
        assert_eq!(&response.body[..], &data[..]);
    }
}

#[tokio::test]
async fn test_explicit_content_id() {
    let server = TestServer::new().await;

    let response = server
        .put("/v1/files/a.bin", b"first", &[("x-content-id", "500")])
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    assert_eq!(response.json()["content_id"], 500);

    let response = server
        .put("/v1/files/b.bin", b"second", &[("x-content-id", "500")])
        .await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.json()["code"], "duplicate_content_id");

    let aliases = server
        .metadata()
        .list_aliases(ContentId::new(500).unwrap())
        .await
        .unwrap();
    assert_eq!(aliases.len(), 1);
    assert_eq!(aliases[0].filename, "a.bin");
}

#[tokio::test]
async fn test_sequence_skips_explicitly_taken_id() {
    let server = TestServer::new().await;
    let response = server
        .put("/v1/files/a.bin", b"explicit", &[("x-content-id", "1")])
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    let (content_id, _) = server.upload("/v1/files/b.bin", b"allocated", "x/y").await;
    assert_eq!(content_id, 2);

    let response = server.get("/v1/files/1", &[]).await;
    assert_eq!(&response.body[..], b"explicit");
}

#[tokio::test]
async fn test_invalid_explicit_content_id() {
    let server = TestServer::new().await;
    for value in ["0", "-3", "abc"] {
        let response = server
            .put("/v1/files/a.bin", b"x", &[("x-content-id", value)])
            .await;
        assert_eq!(response.status, StatusCode::BAD_REQUEST, "value {value}");
    }
}

#[tokio::test]
async fn test_missing_content_length() {
    let server = TestServer::new().await;
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/files/a.bin")
        .body(Body::from("data"))
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status, StatusCode::LENGTH_REQUIRED);
}

#[tokio::test]
async fn test_body_shorter_than_declared() {
    let server = TestServer::new().await;
    let request = Request::builder()
        .method("PUT")
        .uri("/v1/files/a.bin")
        .header("content-length", "10")
        .body(Body::from("short"))
        .unwrap();
    let response = server.send(request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.json()["code"], "size_mismatch");
    assert!(server.metadata().list_contents(None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_upload_over_limit() {
    let server = TestServer::builder()
        .with_config(|config| config.server.max_upload_size = 8)
        .build()
        .await;
    let response = server.put("/v1/files/big.bin", &[0u8; 9], &[]).await;
    assert_eq!(response.status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_empty_file() {
    let server = TestServer::new().await;
    let (_, alias_id) = server.upload("/v1/files/empty", b"", "text/plain").await;
    let response = server.get(&format!("/v1/files/{alias_id}"), &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(response.body.is_empty());
    assert_eq!(response.header("content-length"), Some("0"));
}

#[tokio::test]
async fn test_filename_with_separator_rejected() {
    let server = TestServer::new().await;
    let response = server.put("/v1/files/a%2Fb.txt", b"x", &[]).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_upload_token_required_when_configured() {
    let server = TestServer::builder()
        .with_config(|config| config.server.upload_token_hash = Some(hash_token("s3cret")))
        .build()
        .await;

    let response = server.put("/v1/files/a.txt", b"a", &[]).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = server
        .put("/v1/files/a.txt", b"a", &[("authorization", "Bearer nope")])
        .await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = server
        .put("/v1/files/a.txt", b"a", &[("authorization", "Bearer s3cret")])
        .await;
    assert_eq!(response.status, StatusCode::CREATED);

    // Reads are not gated by the upload token.
    let response = server.get("/v1/files/1", &[]).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_and_malformed_alias_ids() {
    let server = TestServer::new().await;
    for uri in ["/v1/files/42", "/v1/files/0", "/v1/files/-1", "/v1/files/abc"] {
        let response = server.get(uri, &[]).await;
        assert_eq!(response.status, StatusCode::NOT_FOUND, "uri {uri}");
        assert_eq!(response.json()["code"], "not_found");
    }
}

#[tokio::test]
async fn test_tombstoned_alias_is_gone() {
    let server = TestServer::new().await;
    let (content_id, alias_id) = server.upload("/v1/files/a.txt", b"reaped", "text/plain").await;
    server.tombstone(alias_id).await;

    let response = server.get(&format!("/v1/files/{alias_id}"), &[]).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    // The content row itself is untouched.
    assert!(
        server
            .metadata()
            .content_exists(ContentId::new(content_id).unwrap())
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_large_file_streams_intact() {
    let server = TestServer::new().await;
    let data = seeded_bytes(99, 1024 * 1024 + 17);
    let sha1 = sha1_hex(&data);
    let response = server
        .put("/v1/files/big.bin", &data, &[("x-content-sha1", &sha1)])
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let alias_id = response.json()["alias_id"].as_i64().unwrap();

    let response = server.get(&format!("/v1/files/{alias_id}"), &[]).await;
    assert_eq!(response.body.len(), data.len());
    assert_eq!(sha1_hex(&response.body), sha1);
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::new().await;
    let response = server.get("/v1/health", &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.json()["status"], "ok");
    assert_eq!(response.json()["remote_tier"], false);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let server = TestServer::new().await;
    server.upload("/v1/files/a.txt", b"a", "text/plain").await;

    let response = server.get("/metrics", &[]).await;
    assert_eq!(response.status, StatusCode::OK);
    let text = String::from_utf8(response.body.to_vec()).unwrap();
    assert!(text.contains("librarian_uploads_committed_total"));
    assert!(text.contains("librarian_bytes_stored_total"));
}

#[tokio::test]
async fn test_metrics_count_rejected_uploads() {
    let server = TestServer::new().await;
    let wrong = sha1_hex(b"not the body");
    let response = server
        .put("/v1/files/r.txt", b"body", &[("x-content-sha1", &wrong)])
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = server.get("/metrics", &[]).await;
    let text = String::from_utf8(response.body.to_vec()).unwrap();
    let rejected: u64 = text
        .lines()
        .find_map(|line| {
            line.strip_prefix("librarian_uploads_rejected_total{reason=\"digest_mismatch\"} ")
        })
        .unwrap()
        .parse()
        .unwrap();
    assert!(rejected >= 1, "{text}");
}

#[tokio::test]
async fn test_metrics_can_be_disabled() {
    let server = TestServer::builder()
        .with_config(|config| config.server.metrics_enabled = false)
        .build()
        .await;
    let response = server.get("/metrics", &[]).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_trace_id_echoed() {
    let server = TestServer::new().await;
    let response = server.get("/v1/health", &[("x-trace-id", "abc-123")]).await;
    assert_eq!(response.header("x-trace-id"), Some("abc-123"));

    let response = server.get("/v1/health", &[]).await;
    assert!(response.header("x-trace-id").is_some());
}
