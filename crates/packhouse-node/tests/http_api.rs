//! HTTP-level tests of the smart HTTP endpoints.

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use flate2::write::GzEncoder;
use flate2::Compression;
use packhouse_git::pack::{deflate, encode_entry_header, write_pack_header};
use packhouse_git::{pkt_line, Band, PktLine, FLUSH_PKT};
use packhouse_node::api::{create_router, AppState};
use packhouse_node::config::Config;
use packhouse_storage::{create_commit, Commit, GitObject, ObjectId};
use sha1::{Digest, Sha1};
use std::io::Write;
use tower::ServiceExt;

fn app() -> Router {
    create_router(AppState::new(&Config::default()))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Vec<String>, Vec<u8>) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = [header::CONTENT_TYPE, header::CACHE_CONTROL]
        .iter()
        .map(|h| {
            response
                .headers()
                .get(h)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body.to_vec())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post(uri: &str, body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .body(Body::from(body))
        .unwrap()
}

fn commit(message: &str) -> GitObject {
    create_commit(&Commit {
        tree: ObjectId::from_bytes([4; 20]),
        parents: vec![],
        author: "Bob <bob@example.com> 1700000000 +0000".to_string(),
        committer: "Bob <bob@example.com> 1700000000 +0000".to_string(),
        message: format!("{}\n", message),
    })
}

fn push_body(object: &GitObject, ref_name: &str) -> Vec<u8> {
    let line = format!(
        "{} {} {}\0report-status side-band-64k\n",
        ObjectId::ZERO,
        object.id,
        ref_name
    );
    let mut body = pkt_line(&[line.as_bytes()]);
    body.extend_from_slice(FLUSH_PKT);

    let mut pack = Vec::new();
    write_pack_header(&mut pack, 1);
    encode_entry_header(&mut pack, object.object_type.pack_type(), object.size());
    pack.extend_from_slice(&deflate(&object.data).unwrap());
    let digest = Sha1::digest(&pack);
    pack.extend_from_slice(&digest);
    body.extend(pack);
    body
}

fn fetch_body(want: &ObjectId) -> Vec<u8> {
    let mut body = pkt_line(&[format!("want {} side-band-64k\n", want).as_bytes()]);
    body.extend_from_slice(FLUSH_PKT);
    body.extend(pkt_line(&[b"done\n"]));
    body
}

/// Returns the non-banded lines and the data-band bytes of a response.
fn demux(mut out: &[u8]) -> (Vec<PktLine>, Vec<u8>) {
    let mut lines = Vec::new();
    let mut data = Vec::new();
    while let Some((pkt, used)) = PktLine::decode(out).unwrap() {
        out = &out[used..];
        match pkt.data() {
            Some(payload) if payload[0] == Band::Data as u8 => {
                data.extend_from_slice(&payload[1..])
            }
            Some(payload) if payload[0] == Band::Progress as u8 => {}
            _ => lines.push(pkt),
        }
    }
    (lines, data)
}

#[tokio::test]
async fn test_health() {
    let (status, headers, body) = send(&app(), get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(headers[0].starts_with("application/json"));
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_upload_pack_refs_of_unknown_repo() {
    let (status, _, body) = send(&app(), get("/nope/info/refs?service=git-upload-pack")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("nope"));
}

#[tokio::test]
async fn test_unsupported_service_is_forbidden() {
    let (status, _, body) = send(&app(), get("/repo/info/refs?service=git-archive")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], 403);
    assert!(json["message"].as_str().unwrap().contains("git-archive"));

    let (status, _, _) = send(&app(), get("/repo/info/refs")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_invalid_repo_name() {
    let (status, _, body) = send(&app(), get("/-bad/info/refs?service=git-upload-pack")).await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["details"][0]["field"], "repo");
}

#[tokio::test]
async fn test_receive_pack_advertises_empty_repo() {
    let (status, headers, body) =
        send(&app(), get("/fresh.git/info/refs?service=git-receive-pack")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[0], "application/x-git-receive-pack-advertisement");
    assert_eq!(headers[1], "no-cache");
    let text = String::from_utf8_lossy(&body);
    assert!(text.starts_with("001f# service=git-receive-pack\n0000"));
    assert!(text.contains("capabilities^{}"));
}

#[tokio::test]
async fn test_push_then_clone() {
    let app = app();
    let object = commit("over http");

    let (status, headers, body) = send(
        &app,
        post("/demo.git/git-receive-pack", push_body(&object, "refs/heads/main")),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[0], "application/x-git-receive-pack-result");
    let (_, report) = demux(&body);
    let (status_lines, _) = demux(&report);
    let status_lines: Vec<&str> = status_lines.iter().filter_map(|l| l.as_str()).collect();
    assert_eq!(status_lines, vec!["unpack ok", "ok refs/heads/main"]);

    let (status, _, body) = send(&app, get("/demo/info/refs?service=git-upload-pack")).await;
    assert_eq!(status, StatusCode::OK);
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains(&format!("{} HEAD\0", object.id)));
    assert!(text.contains("symref=HEAD:refs/heads/main"));

    let (status, headers, body) =
        send(&app, post("/demo/git-upload-pack", fetch_body(&object.id))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers[0], "application/x-git-upload-pack-result");
    let (lines, pack) = demux(&body);
    assert_eq!(lines[0].as_str(), Some("NAK"));
    assert!(lines.last().unwrap().is_flush());
    assert_eq!(&pack[..4], b"PACK");
    let digest = Sha1::digest(&pack[..pack.len() - 20]);
    assert_eq!(&pack[pack.len() - 20..], digest.as_slice());

    let (_, _, body) = send(&app, get("/api/repos")).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json[0]["name"], "demo");
    assert_eq!(json[0]["head"], "refs/heads/main");
    assert_eq!(json[0]["objects"], 1);
}

#[tokio::test]
async fn test_gzip_request_body() {
    let app = app();
    let object = commit("gzip");
    send(&app, post("/zipped/git-receive-pack", push_body(&object, "refs/heads/main"))).await;

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&fetch_body(&object.id)).unwrap();
    let request = Request::builder()
        .method("POST")
        .uri("/zipped/git-upload-pack")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(encoder.finish().unwrap()))
        .unwrap();

    let (status, _, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let (lines, pack) = demux(&body);
    assert_eq!(lines[0].as_str(), Some("NAK"));
    assert_eq!(&pack[8..12], &1u32.to_be_bytes());
}

#[tokio::test]
async fn test_fetch_from_unknown_repo() {
    let (status, _, _) = send(
        &app(),
        post("/ghost/git-upload-pack", fetch_body(&ObjectId::from_bytes([1; 20]))),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_malformed_request_fails() {
    let app = app();
    send(&app, post("/broken/git-receive-pack", push_body(&commit("x"), "refs/heads/main"))).await;
    let (status, _, _) = send(&app, post("/broken/git-upload-pack", b"zzzz".to_vec())).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn test_body_limit() {
    let config = Config {
        max_body_bytes: 16,
        ..Config::default()
    };
    let app = create_router(AppState::new(&config));
    let (status, _, _) = send(
        &app,
        post("/big/git-receive-pack", push_body(&commit("large"), "refs/heads/main")),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn test_body_limit_counts_decoded_bytes() {
    let config = Config {
        max_body_bytes: 64 * 1024,
        ..Config::default()
    };
    let app = create_router(AppState::new(&config));
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&vec![0u8; 4 << 20]).unwrap();
    let compressed = encoder.finish().unwrap();
    assert!(compressed.len() < config.max_body_bytes);

    let request = Request::builder()
        .method("POST")
        .uri("/bomb/git-receive-pack")
        .header(header::CONTENT_ENCODING, "gzip")
        .body(Body::from(compressed))
        .unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}
